//! Launching external tools.
//!
//! Components that run subprocesses take an `Arc<dyn CommandExecutor>` so
//! tests can substitute a recording executor.

use std::fmt;
use std::io;
use std::process::Stdio;

use async_trait::async_trait;
use gpupgrade_core::idl::ChunkTag;
use tracing::debug;

use crate::error::HubError;
use crate::mux::StreamMultiplexer;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// `bash -c <script>`
    pub fn bash(script: impl Into<String>) -> Self {
        Self::new("bash").arg("-c").arg(script)
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// How a subprocess ended. `code` is `None` when it was killed by a signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandExit {
    pub code: Option<i32>,
}

impl CommandExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl fmt::Display for CommandExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit status {code}"),
            None => f.write_str("terminated by signal"),
        }
    }
}

#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run `command` to completion, forwarding its stdout and stderr through
    /// `mux` as they are produced.
    async fn run(&self, command: &CommandSpec, mux: &StreamMultiplexer) -> Result<CommandExit, HubError>;
}

/// Real subprocess execution backed by `tokio::process::Command`.
pub struct TokioCommandExecutor;

#[async_trait]
impl CommandExecutor for TokioCommandExecutor {
    async fn run(&self, command: &CommandSpec, mux: &StreamMultiplexer) -> Result<CommandExit, HubError> {
        debug!(%command, "spawning process");

        let mut child = tokio::process::Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| HubError::io(format!("spawn {}", command.program), e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| HubError::io("capture stdout", io::Error::other("stdout not piped")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| HubError::io("capture stderr", io::Error::other("stderr not piped")))?;

        let mut out = mux.writer(ChunkTag::Stdout);
        let mut err = mux.writer(ChunkTag::Stderr);

        let (copied_out, copied_err, status) =
            tokio::join!(out.copy_from(stdout), err.copy_from(stderr), child.wait());

        let status = status.map_err(|e| HubError::io(format!("wait for {}", command.program), e))?;
        copied_out?;
        copied_err?;

        let exit = CommandExit {
            code: status.code(),
        };
        debug!(%command, %exit, "process completed");
        Ok(exit)
    }
}
