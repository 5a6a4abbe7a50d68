//! Fire-and-forget launches of debuggee processes.
//!
//! Outcomes are deliberately unobserved: a successfully started process
//! announces itself over its own TCP connection, and a failed one simply
//! never shows up in the session list.

use std::process::Stdio;
use std::sync::Arc;

use log::{debug, warn};
use tokio::process::Command;

use crate::config::EngineConfig;

#[derive(Clone)]
pub struct Engine {
    config: Arc<EngineConfig>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Run a file under the debugger in a fresh interpreter.
    pub fn run_file(&self, path: &str) {
        let script = format!("from wdb import Wdb; Wdb.get().run_file({path:?})");
        self.spawn_python(&script);
    }

    /// Open a debugged interactive shell.
    pub fn run_shell(&self) {
        self.spawn_python("from wdb import Wdb; Wdb.get().shell()");
    }

    /// Break into this very server process.
    pub fn self_shell(&self) {
        self.spawn_python("import wdb; wdb.set_trace()");
    }

    fn spawn_python(&self, script: &str) {
        debug!("spawning {} -c {script:?}", self.config.python);
        let spawned = Command::new(&self.config.python)
            .arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        if let Err(err) = spawned {
            warn!("failed to spawn {}: {err}", self.config.python);
        }
    }

    /// Attach gdb to a running interpreter and inject a trace call under the
    /// GIL.
    pub fn attach(&self, pid: u32) {
        debug!("attaching gdb to {pid}");
        let hooks = [
            "PyGILState_Ensure()",
            r#"PyRun_SimpleString("import wdb; wdb.set_trace(skip=1)")"#,
            "PyGILState_Release($1)",
        ];
        let mut command = Command::new(&self.config.gdb);
        command.arg("-p").arg(pid.to_string()).arg("-batch");
        for hook in hooks {
            command.arg(format!("-eval-command=call {hook}"));
        }
        let spawned = command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        if let Err(err) = spawned {
            warn!("failed to spawn {}: {err}", self.config.gdb);
        }
    }
}
