//! In-process stand-ins for the hub's collaborators, for deterministic tests
//! without agents, databases or gpinitsystem.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use gpupgrade_core::agent::{AgentClient, AgentDialer};
use gpupgrade_core::db::{ConnectionParams, Connector, DbSession};
use gpupgrade_core::idl::{
    ChunkTag, CreateSegmentDataDirRequest, DeleteDataDirectoriesRequest, Message, StepStatus,
};
use gpupgrade_core::stream::MessageSender;
use gpupgrade_core::{AgentError, DbError, StreamError};
use parking_lot::Mutex;

use crate::command::{CommandExecutor, CommandExit, CommandSpec};
use crate::error::HubError;
use crate::mux::StreamMultiplexer;

/// Records every message sent. Optionally starts failing after `n` sends.
#[derive(Default)]
pub struct RecordingStream {
    messages: Mutex<Vec<Message>>,
    fail_after: Option<usize>,
}

impl RecordingStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_after(sends: usize) -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            fail_after: Some(sends),
        }
    }

    pub fn messages(&self) -> Vec<Message> {
        self.messages.lock().clone()
    }

    pub fn statuses(&self) -> Vec<StepStatus> {
        self.messages()
            .into_iter()
            .filter_map(|m| match m {
                Message::Status(s) => Some(s),
                Message::Chunk(_) => None,
            })
            .collect()
    }

    /// Concatenated payload of every chunk with `tag`.
    pub fn output(&self, tag: ChunkTag) -> Vec<u8> {
        self.messages()
            .into_iter()
            .filter_map(|m| match m {
                Message::Chunk(c) if c.tag == tag => Some(c.data.to_vec()),
                _ => None,
            })
            .flatten()
            .collect()
    }
}

#[async_trait]
impl MessageSender for RecordingStream {
    async fn send(&self, message: Message) -> Result<(), StreamError> {
        let mut messages = self.messages.lock();
        if self.fail_after.is_some_and(|n| messages.len() >= n) {
            return Err(StreamError::Closed);
        }
        messages.push(message);
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AgentCall {
    Create { host: String, datadirs: Vec<PathBuf> },
    Delete { host: String, datadirs: Vec<PathBuf> },
}

impl AgentCall {
    pub fn host(&self) -> &str {
        match self {
            Self::Create { host, .. } | Self::Delete { host, .. } => host,
        }
    }
}

#[derive(Default)]
struct AgentLog {
    calls: Mutex<Vec<AgentCall>>,
    dials: Mutex<Vec<String>>,
}

/// Hands out [`MockAgent`]s. Hosts can be made unreachable, or reachable
/// but failing every RPC. Calls are recorded whether or not they fail.
#[derive(Default)]
pub struct MockAgentDialer {
    log: Arc<AgentLog>,
    unreachable: HashSet<String>,
    failing: HashSet<String>,
}

impl MockAgentDialer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unreachable(mut self, host: &str) -> Self {
        self.unreachable.insert(host.to_string());
        self
    }

    pub fn failing(mut self, host: &str) -> Self {
        self.failing.insert(host.to_string());
        self
    }

    pub fn calls(&self) -> Vec<AgentCall> {
        self.log.calls.lock().clone()
    }

    pub fn calls_to(&self, host: &str) -> Vec<AgentCall> {
        self.calls().into_iter().filter(|c| c.host() == host).collect()
    }

    pub fn dials(&self) -> Vec<String> {
        self.log.dials.lock().clone()
    }
}

#[async_trait]
impl AgentDialer for MockAgentDialer {
    async fn dial(&self, hostname: &str) -> Result<Arc<dyn AgentClient>, AgentError> {
        self.log.dials.lock().push(hostname.to_string());
        if self.unreachable.contains(hostname) {
            return Err(AgentError::Unreachable {
                host: hostname.to_string(),
                reason: "connection refused".into(),
            });
        }
        Ok(Arc::new(MockAgent {
            host: hostname.to_string(),
            log: Arc::clone(&self.log),
            fail: self.failing.contains(hostname),
        }))
    }
}

pub struct MockAgent {
    host: String,
    log: Arc<AgentLog>,
    fail: bool,
}

impl MockAgent {
    fn outcome(&self, method: &'static str) -> Result<(), AgentError> {
        if self.fail {
            Err(AgentError::Rpc {
                host: self.host.clone(),
                method,
                message: "mock failure".into(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl AgentClient for MockAgent {
    async fn create_segment_data_directories(
        &self,
        request: CreateSegmentDataDirRequest,
    ) -> Result<(), AgentError> {
        self.log.calls.lock().push(AgentCall::Create {
            host: self.host.clone(),
            datadirs: request.datadirs,
        });
        self.outcome("CreateSegmentDataDirectories")
    }

    async fn delete_data_directories(
        &self,
        request: DeleteDataDirectoriesRequest,
    ) -> Result<(), AgentError> {
        self.log.calls.lock().push(AgentCall::Delete {
            host: self.host.clone(),
            datadirs: request.datadirs,
        });
        self.outcome("DeleteDataDirectories")
    }
}

/// Serves fixed settings and records every connection attempt.
#[derive(Default)]
pub struct MockConnector {
    settings: HashMap<String, String>,
    refuse: bool,
    connects: Mutex<Vec<ConnectionParams>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_setting(mut self, name: &str, value: &str) -> Self {
        self.settings.insert(name.to_string(), value.to_string());
        self
    }

    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::default()
        }
    }

    pub fn connects(&self) -> Vec<ConnectionParams> {
        self.connects.lock().clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, params: &ConnectionParams) -> Result<Box<dyn DbSession>, DbError> {
        self.connects.lock().push(params.clone());
        if self.refuse {
            return Err(DbError::Connect(format!("{}:{} refused", params.host, params.port)));
        }
        Ok(Box::new(MockSession {
            settings: self.settings.clone(),
        }))
    }
}

struct MockSession {
    settings: HashMap<String, String>,
}

#[async_trait]
impl DbSession for MockSession {
    async fn current_setting(&self, name: &str) -> Result<String, DbError> {
        self.settings.get(name).cloned().ok_or_else(|| DbError::Query {
            setting: name.to_string(),
            message: "unrecognized configuration parameter".into(),
        })
    }
}

/// Records launched commands and replays scripted output and exit code.
pub struct RecordingExecutor {
    stdout: Vec<Vec<u8>>,
    stderr: Vec<Vec<u8>>,
    exit: CommandExit,
    commands: Mutex<Vec<CommandSpec>>,
}

impl RecordingExecutor {
    pub fn succeeding() -> Self {
        Self::exiting(0)
    }

    pub fn exiting(code: i32) -> Self {
        Self {
            stdout: Vec::new(),
            stderr: Vec::new(),
            exit: CommandExit { code: Some(code) },
            commands: Mutex::new(Vec::new()),
        }
    }

    pub fn with_stdout(mut self, chunk: &str) -> Self {
        self.stdout.push(chunk.as_bytes().to_vec());
        self
    }

    pub fn with_stderr(mut self, chunk: &str) -> Self {
        self.stderr.push(chunk.as_bytes().to_vec());
        self
    }

    pub fn commands(&self) -> Vec<CommandSpec> {
        self.commands.lock().clone()
    }
}

#[async_trait]
impl CommandExecutor for RecordingExecutor {
    async fn run(&self, command: &CommandSpec, mux: &StreamMultiplexer) -> Result<CommandExit, HubError> {
        self.commands.lock().push(command.clone());

        let mut out = mux.writer(ChunkTag::Stdout);
        for chunk in &self.stdout {
            out.write(chunk).await?;
        }
        let mut err = mux.writer(ChunkTag::Stderr);
        for chunk in &self.stderr {
            err.write(chunk).await?;
        }
        Ok(self.exit)
    }
}
