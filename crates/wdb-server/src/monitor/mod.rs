//! Debuggable-process enumeration for the control channel.
//!
//! A scan walks every candidate process, keeps the running Python
//! interpreters, and emits `AddProcess`/`AddThread` entries followed by
//! `KeepProcess`/`KeepThreads` lists the UI uses to prune stale rows.
//! Processes are volatile by nature, so every per-process failure is
//! isolated: one unreadable pid never aborts the scan.

pub mod procfs;

pub use procfs::ProcfsInspector;

use async_trait::async_trait;
use log::warn;
use serde_json::{Value, json};
use thiserror::Error;

use crate::state::ControlRegistry;

/// Per-process failure modes. Reading another process's info races with its
/// lifecycle: it may vanish, turn into a zombie, or belong to someone else.
#[derive(Debug, Clone, Error)]
pub enum ProcError {
    #[error("no such process")]
    NoSuchProcess,
    #[error("access denied")]
    AccessDenied,
    #[error("zombie process")]
    Zombie,
    #[error("{0}")]
    Other(String),
}

impl ProcError {
    /// Expected lifecycle races are skipped silently; anything else is worth
    /// a log line.
    fn is_expected(&self) -> bool {
        matches!(self, Self::NoSuchProcess | Self::AccessDenied | Self::Zombie)
    }
}

/// Source of per-process facts, each fallible on its own.
#[async_trait]
pub trait ProcessInspector: Send + Sync {
    /// Candidate pids, in scan order.
    async fn pids(&self) -> Vec<u32>;
    async fn cmdline(&self, pid: u32) -> Result<Vec<String>, ProcError>;
    /// Whether the process still runs and is not a zombie.
    async fn is_alive(&self, pid: u32) -> Result<bool, ProcError>;
    async fn username(&self, pid: u32) -> Result<String, ProcError>;
    async fn thread_ids(&self, pid: u32) -> Result<Vec<u32>, ProcError>;
    /// Process start time, seconds since the epoch.
    async fn create_time(&self, pid: u32) -> Result<f64, ProcError>;
    async fn memory_percent(&self, pid: u32) -> Result<f64, ProcError>;
    /// CPU usage sampled over a short interval.
    async fn cpu_percent(&self, pid: u32) -> Result<f64, ProcError>;
}

/// One full scan. With a `target` the results answer one control channel's
/// `ListProcesses`; without one they are broadcast to every control channel.
pub async fn refresh_processes(
    control: &ControlRegistry,
    target: Option<&str>,
    inspector: &dyn ProcessInspector,
) {
    let mut remaining_pids: Vec<u32> = Vec::new();
    let mut remaining_tids: Vec<u32> = Vec::new();

    for pid in inspector.pids().await {
        let cmdline = match inspector.cmdline(pid).await {
            Ok(cmdline) if !cmdline.is_empty() => cmdline,
            Ok(_) => continue,
            Err(err) if err.is_expected() => continue,
            Err(err) => {
                warn!("reading cmdline of {pid}: {err}");
                continue;
            }
        };

        let binary = cmdline[0].rsplit('/').next().unwrap_or("");
        if !binary.contains("python") && !binary.contains("pypy") {
            continue;
        }

        match inspector.is_alive(pid).await {
            Ok(true) => {}
            Ok(false) => continue,
            Err(err) => {
                if !err.is_expected() {
                    warn!("reading status of {pid}: {err}");
                }
                continue;
            }
        }

        match emit_process(control, target, inspector, pid, &cmdline).await {
            Ok(tids) => {
                remaining_pids.push(pid);
                remaining_tids.extend(tids);
            }
            Err(err) if err.is_expected() => {}
            Err(err) => warn!("skipping process {pid}: {err}"),
        }
    }

    deliver(control, target, "KeepProcess", Some(&json!(remaining_pids))).await;
    deliver(control, target, "KeepThreads", Some(&json!(remaining_tids))).await;
}

/// Gather the remaining facts about one interpreter and announce it. Any
/// failure drops the whole process from this scan.
async fn emit_process(
    control: &ControlRegistry,
    target: Option<&str>,
    inspector: &dyn ProcessInspector,
    pid: u32,
    cmdline: &[String],
) -> Result<Vec<u32>, ProcError> {
    let cpu = inspector.cpu_percent(pid).await?;
    let user = inspector.username(pid).await?;
    let threads = inspector.thread_ids(pid).await?;
    let time = inspector.create_time(pid).await?;
    let mem = inspector.memory_percent(pid).await?;

    deliver(
        control,
        target,
        "AddProcess",
        Some(&json!({
            "pid": pid,
            "user": user,
            "cmd": cmdline.join(" "),
            "threads": threads.len(),
            "time": time,
            "mem": mem,
            "cpu": cpu,
        })),
    )
    .await;

    for tid in &threads {
        deliver(
            control,
            target,
            "AddThread",
            Some(&json!({ "id": tid, "of": pid })),
        )
        .await;
    }

    Ok(threads)
}

async fn deliver(control: &ControlRegistry, target: Option<&str>, data: &str, payload: Option<&Value>) {
    match target {
        Some(uuid) => {
            if let Err(err) = control.send(uuid, data, payload).await {
                warn!("failed to send {data} to control {uuid}: {err:#}");
            }
        }
        None => control.broadcast(data, payload).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ConnectionHandle;
    use anyhow::Result;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::Mutex;
    use wdb_protocol::message;

    #[derive(Clone)]
    struct FakeProcess {
        cmdline: Result<Vec<String>, ProcError>,
        alive: Result<bool, ProcError>,
        username: String,
        threads: Vec<u32>,
        create_time: f64,
        memory_percent: f64,
        cpu_percent: Result<f64, ProcError>,
    }

    impl FakeProcess {
        fn python(pid_threads: Vec<u32>) -> Self {
            Self {
                cmdline: Ok(vec![
                    "/usr/bin/python3.9".to_string(),
                    "test.py".to_string(),
                ]),
                alive: Ok(true),
                username: "user".to_string(),
                threads: pid_threads,
                create_time: 1.0,
                memory_percent: 1.1,
                cpu_percent: Ok(0.0),
            }
        }
    }

    struct FakeInspector {
        order: Vec<u32>,
        processes: HashMap<u32, FakeProcess>,
    }

    #[async_trait]
    impl ProcessInspector for FakeInspector {
        async fn pids(&self) -> Vec<u32> {
            self.order.clone()
        }

        async fn cmdline(&self, pid: u32) -> Result<Vec<String>, ProcError> {
            self.processes[&pid].cmdline.clone()
        }

        async fn is_alive(&self, pid: u32) -> Result<bool, ProcError> {
            self.processes[&pid].alive.clone()
        }

        async fn username(&self, pid: u32) -> Result<String, ProcError> {
            Ok(self.processes[&pid].username.clone())
        }

        async fn thread_ids(&self, pid: u32) -> Result<Vec<u32>, ProcError> {
            Ok(self.processes[&pid].threads.clone())
        }

        async fn create_time(&self, pid: u32) -> Result<f64, ProcError> {
            Ok(self.processes[&pid].create_time)
        }

        async fn memory_percent(&self, pid: u32) -> Result<f64, ProcError> {
            Ok(self.processes[&pid].memory_percent)
        }

        async fn cpu_percent(&self, pid: u32) -> Result<f64, ProcError> {
            self.processes[&pid].cpu_percent.clone()
        }
    }

    struct RecordingHandle {
        sent: Mutex<Vec<String>>,
    }

    impl RecordingHandle {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ConnectionHandle for RecordingHandle {
        async fn send_text(&self, data: &str) -> Result<()> {
            self.sent.lock().await.push(data.to_string());
            Ok(())
        }

        async fn close(&self) {}
    }

    /// A mixed bag of processes: non-interpreters, zombies, vanishing pids
    /// and permission failures around two healthy interpreters.
    fn inspector() -> FakeInspector {
        let mut processes = HashMap::new();
        processes.insert(
            1,
            FakeProcess {
                cmdline: Ok(vec![]),
                ..FakeProcess::python(vec![])
            },
        );
        processes.insert(
            2,
            FakeProcess {
                cmdline: Ok(vec!["/usr/bin/binary".to_string(), "test".to_string()]),
                ..FakeProcess::python(vec![])
            },
        );
        processes.insert(3, FakeProcess::python(vec![]));
        processes.insert(4, FakeProcess::python(vec![1, 2]));
        processes.insert(
            5,
            FakeProcess {
                cmdline: Err(ProcError::Zombie),
                ..FakeProcess::python(vec![])
            },
        );
        processes.insert(
            6,
            FakeProcess {
                cmdline: Err(ProcError::AccessDenied),
                ..FakeProcess::python(vec![])
            },
        );
        processes.insert(
            7,
            FakeProcess {
                cmdline: Err(ProcError::NoSuchProcess),
                ..FakeProcess::python(vec![])
            },
        );
        processes.insert(
            8,
            FakeProcess {
                alive: Ok(false),
                ..FakeProcess::python(vec![])
            },
        );
        processes.insert(
            9,
            FakeProcess {
                cpu_percent: Err(ProcError::NoSuchProcess),
                ..FakeProcess::python(vec![])
            },
        );
        processes.insert(
            10,
            FakeProcess {
                cpu_percent: Err(ProcError::AccessDenied),
                ..FakeProcess::python(vec![])
            },
        );
        processes.insert(
            11,
            FakeProcess {
                cpu_percent: Err(ProcError::Other("unknown".to_string())),
                ..FakeProcess::python(vec![])
            },
        );
        FakeInspector {
            order: (1..=11).collect(),
            processes,
        }
    }

    fn expected_messages() -> Vec<String> {
        let add = |pid: u32, threads: usize| {
            message::join(
                "AddProcess",
                Some(&json!({
                    "pid": pid,
                    "user": "user",
                    "cmd": "/usr/bin/python3.9 test.py",
                    "threads": threads,
                    "time": 1.0,
                    "mem": 1.1,
                    "cpu": 0.0,
                })),
            )
        };
        vec![
            add(3, 0),
            add(4, 2),
            message::join("AddThread", Some(&json!({ "id": 1, "of": 4 }))),
            message::join("AddThread", Some(&json!({ "id": 2, "of": 4 }))),
            message::join("KeepProcess", Some(&json!([3, 4]))),
            message::join("KeepThreads", Some(&json!([1, 2]))),
        ]
    }

    #[tokio::test]
    async fn scan_broadcasts_to_every_control_channel() {
        let control = ControlRegistry::new();
        let first = RecordingHandle::new();
        let second = RecordingHandle::new();
        control.add("one", first.clone()).await;
        control.add("two", second.clone()).await;

        refresh_processes(&control, None, &inspector()).await;

        assert_eq!(*first.sent.lock().await, expected_messages());
        assert_eq!(*second.sent.lock().await, expected_messages());
    }

    #[tokio::test]
    async fn empty_scan_sends_bare_keep_verbs() {
        // no interpreters found means no surviving pids or tids, and the
        // keepalive verbs go out without a payload
        let control = ControlRegistry::new();
        let observer = RecordingHandle::new();
        control.add("one", observer.clone()).await;

        let empty = FakeInspector {
            order: vec![],
            processes: HashMap::new(),
        };
        refresh_processes(&control, None, &empty).await;

        assert_eq!(
            *observer.sent.lock().await,
            vec!["KeepProcess".to_string(), "KeepThreads".to_string()]
        );
    }

    #[tokio::test]
    async fn scan_with_target_unicasts_only() {
        let control = ControlRegistry::new();
        let asker = RecordingHandle::new();
        let bystander = RecordingHandle::new();
        control.add("asker", asker.clone()).await;
        control.add("bystander", bystander.clone()).await;

        refresh_processes(&control, Some("asker"), &inspector()).await;

        assert_eq!(*asker.sent.lock().await, expected_messages());
        assert!(bystander.sent.lock().await.is_empty());
    }
}
