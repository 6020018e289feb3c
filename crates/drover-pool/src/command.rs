//! The worker entry point: what `push()` launches.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;

use drover_core::WorkerConfig;

/// Environment variable carrying the worker's spawn index.
pub const WORKER_INDEX_ENV: &str = "DROVER_WORKER_INDEX";

/// Program, arguments, and environment for one worker process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub working_dir: Option<PathBuf>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            working_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Build a tokio command for the worker with spawn index `index`.
    ///
    /// Stdin is closed; stdout and stderr are inherited so worker logs
    /// land next to the daemon's.
    pub(crate) fn build(&self, index: u64) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args)
            .envs(&self.env)
            .env(WORKER_INDEX_ENV, index.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

impl From<&WorkerConfig> for WorkerCommand {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            env: config.env.clone(),
            working_dir: config.working_dir.clone(),
        }
    }
}
