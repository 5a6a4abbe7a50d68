//! `/proc` implementation of the process inspector.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use super::{ProcError, ProcessInspector};

/// Interval over which CPU usage is sampled.
const CPU_SAMPLE_INTERVAL: Duration = Duration::from_millis(10);

pub struct ProcfsInspector {
    clock_ticks: f64,
    page_size: u64,
}

impl Default for ProcfsInspector {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcfsInspector {
    pub fn new() -> Self {
        // sysconf cannot fail for these well-known names; -1 would only mean
        // an unsupported platform, so fall back to the common values.
        let clock_ticks = match unsafe { libc::sysconf(libc::_SC_CLK_TCK) } {
            ticks if ticks > 0 => ticks as f64,
            _ => 100.0,
        };
        let page_size = match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
            size if size > 0 => size as u64,
            _ => 4096,
        };
        Self {
            clock_ticks,
            page_size,
        }
    }

    fn proc_path(pid: u32, leaf: &str) -> PathBuf {
        PathBuf::from(format!("/proc/{pid}/{leaf}"))
    }

    async fn read_proc_file(pid: u32, leaf: &str) -> Result<String, ProcError> {
        tokio::fs::read_to_string(Self::proc_path(pid, leaf))
            .await
            .map_err(io_to_proc)
    }

    /// State char and the post-comm fields of `/proc/<pid>/stat`.
    async fn stat(pid: u32) -> Result<(char, Vec<String>), ProcError> {
        let contents = Self::read_proc_file(pid, "stat").await?;
        parse_stat(&contents)
    }

    /// CPU time consumed so far, in seconds.
    async fn cpu_time(&self, pid: u32) -> Result<f64, ProcError> {
        let (_, fields) = Self::stat(pid).await?;
        let utime = stat_field(&fields, STAT_UTIME)?;
        let stime = stat_field(&fields, STAT_STIME)?;
        Ok((utime + stime) as f64 / self.clock_ticks)
    }
}

// Offsets into the post-comm fields of /proc/<pid>/stat, counted from the
// state char at 0. Overall field numbers are 3 higher.
const STAT_UTIME: usize = 11;
const STAT_STIME: usize = 12;
const STAT_STARTTIME: usize = 19;

#[async_trait]
impl ProcessInspector for ProcfsInspector {
    async fn pids(&self) -> Vec<u32> {
        let mut pids = Vec::new();
        let Ok(mut entries) = tokio::fs::read_dir("/proc").await else {
            return pids;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            if let Ok(pid) = entry.file_name().to_string_lossy().parse::<u32>() {
                pids.push(pid);
            }
        }
        pids.sort_unstable();
        pids
    }

    async fn cmdline(&self, pid: u32) -> Result<Vec<String>, ProcError> {
        let raw = Self::read_proc_file(pid, "cmdline").await?;
        Ok(raw
            .split('\0')
            .filter(|arg| !arg.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn is_alive(&self, pid: u32) -> Result<bool, ProcError> {
        let (state, _) = Self::stat(pid).await?;
        Ok(state != 'Z' && state != 'X')
    }

    async fn username(&self, pid: u32) -> Result<String, ProcError> {
        let status = Self::read_proc_file(pid, "status").await?;
        let uid = parse_uid(&status)?;
        let passwd = tokio::fs::read_to_string("/etc/passwd")
            .await
            .unwrap_or_default();
        Ok(lookup_username(&passwd, uid).unwrap_or_else(|| uid.to_string()))
    }

    async fn thread_ids(&self, pid: u32) -> Result<Vec<u32>, ProcError> {
        let mut entries = tokio::fs::read_dir(Self::proc_path(pid, "task"))
            .await
            .map_err(io_to_proc)?;
        let mut tids = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_to_proc)? {
            if let Ok(tid) = entry.file_name().to_string_lossy().parse::<u32>() {
                tids.push(tid);
            }
        }
        tids.sort_unstable();
        Ok(tids)
    }

    async fn create_time(&self, pid: u32) -> Result<f64, ProcError> {
        let (_, fields) = Self::stat(pid).await?;
        let starttime = stat_field(&fields, STAT_STARTTIME)?;
        let system = tokio::fs::read_to_string("/proc/stat")
            .await
            .map_err(io_to_proc)?;
        let boot_time = parse_boot_time(&system)?;
        Ok(boot_time as f64 + starttime as f64 / self.clock_ticks)
    }

    async fn memory_percent(&self, pid: u32) -> Result<f64, ProcError> {
        let statm = Self::read_proc_file(pid, "statm").await?;
        let resident_pages = statm
            .split_whitespace()
            .nth(1)
            .and_then(|field| field.parse::<u64>().ok())
            .ok_or_else(|| ProcError::Other("malformed statm".to_string()))?;
        let meminfo = tokio::fs::read_to_string("/proc/meminfo")
            .await
            .map_err(io_to_proc)?;
        let total_bytes = parse_mem_total(&meminfo)? * 1024;
        if total_bytes == 0 {
            return Ok(0.0);
        }
        Ok((resident_pages * self.page_size) as f64 / total_bytes as f64 * 100.0)
    }

    async fn cpu_percent(&self, pid: u32) -> Result<f64, ProcError> {
        let before = self.cpu_time(pid).await?;
        tokio::time::sleep(CPU_SAMPLE_INTERVAL).await;
        let after = self.cpu_time(pid).await?;
        Ok((after - before).max(0.0) / CPU_SAMPLE_INTERVAL.as_secs_f64() * 100.0)
    }
}

fn io_to_proc(err: std::io::Error) -> ProcError {
    match err.kind() {
        std::io::ErrorKind::NotFound => ProcError::NoSuchProcess,
        std::io::ErrorKind::PermissionDenied => ProcError::AccessDenied,
        _ => ProcError::Other(err.to_string()),
    }
}

/// The comm field is a parenthesized, unescaped string; everything reliable
/// starts after its closing paren.
fn parse_stat(contents: &str) -> Result<(char, Vec<String>), ProcError> {
    let rest = contents
        .rfind(')')
        .map(|at| &contents[at + 1..])
        .ok_or_else(|| ProcError::Other("malformed stat".to_string()))?;
    let fields: Vec<String> = rest.split_whitespace().map(str::to_string).collect();
    let state = fields
        .first()
        .and_then(|field| field.chars().next())
        .ok_or_else(|| ProcError::Other("malformed stat".to_string()))?;
    Ok((state, fields))
}

fn stat_field(fields: &[String], index: usize) -> Result<u64, ProcError> {
    fields
        .get(index)
        .and_then(|field| field.parse::<u64>().ok())
        .ok_or_else(|| ProcError::Other(format!("malformed stat field {index}")))
}

fn parse_uid(status: &str) -> Result<u32, ProcError> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("Uid:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|uid| uid.parse::<u32>().ok())
        .ok_or_else(|| ProcError::Other("malformed status".to_string()))
}

fn lookup_username(passwd: &str, uid: u32) -> Option<String> {
    passwd.lines().find_map(|line| {
        let mut fields = line.split(':');
        let name = fields.next()?;
        let entry_uid = fields.nth(1)?.parse::<u32>().ok()?;
        (entry_uid == uid).then(|| name.to_string())
    })
}

fn parse_boot_time(system_stat: &str) -> Result<u64, ProcError> {
    system_stat
        .lines()
        .find_map(|line| line.strip_prefix("btime "))
        .and_then(|rest| rest.trim().parse::<u64>().ok())
        .ok_or_else(|| ProcError::Other("no btime in /proc/stat".to_string()))
}

fn parse_mem_total(meminfo: &str) -> Result<u64, ProcError> {
    meminfo
        .lines()
        .find_map(|line| line.strip_prefix("MemTotal:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kb| kb.parse::<u64>().ok())
        .ok_or_else(|| ProcError::Other("no MemTotal in /proc/meminfo".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const STAT_LINE: &str = "1234 (py (test)) S 1 1234 1234 0 -1 4194304 \
        1000 0 0 0 50 25 0 0 20 0 3 0 98765 10000000 500 18446744073709551615";

    #[test]
    fn stat_survives_parens_in_comm() {
        let (state, fields) = parse_stat(STAT_LINE).unwrap();
        assert_eq!(state, 'S');
        assert_eq!(stat_field(&fields, STAT_UTIME).unwrap(), 50);
        assert_eq!(stat_field(&fields, STAT_STIME).unwrap(), 25);
        assert_eq!(stat_field(&fields, STAT_STARTTIME).unwrap(), 98765);
    }

    #[test]
    fn zombie_state_is_detected() {
        let line = STAT_LINE.replace(") S ", ") Z ");
        let (state, _) = parse_stat(&line).unwrap();
        assert_eq!(state, 'Z');
    }

    #[test]
    fn uid_comes_from_the_real_uid_column() {
        let status = "Name:\tpython3\nUid:\t1000\t1000\t1000\t1000\nGid:\t1000\n";
        assert_eq!(parse_uid(status).unwrap(), 1000);
    }

    #[test]
    fn username_lookup_falls_back_to_uid() {
        let passwd = "root:x:0:0:root:/root:/bin/bash\nuser:x:1000:1000::/home/user:/bin/sh\n";
        assert_eq!(lookup_username(passwd, 1000).as_deref(), Some("user"));
        assert_eq!(lookup_username(passwd, 4242), None);
    }

    #[test]
    fn boot_time_and_mem_total() {
        let stat = "cpu  1 2 3 4\nbtime 1700000000\nprocesses 42\n";
        assert_eq!(parse_boot_time(stat).unwrap(), 1_700_000_000);
        let meminfo = "MemTotal:       16384000 kB\nMemFree:         1024000 kB\n";
        assert_eq!(parse_mem_total(meminfo).unwrap(), 16_384_000);
    }
}
