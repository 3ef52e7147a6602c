//! Messages exchanged between the CLI, the hub and the agents.
//!
//! Only the fields the hub reads or writes are modelled; the transport that
//! carries them is owned by the caller.

use std::fmt;
use std::path::PathBuf;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Which output channel of a subprocess a chunk came from.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChunkTag {
    Stdout,
    Stderr,
}

impl fmt::Display for ChunkTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => f.write_str("STDOUT"),
            Self::Stderr => f.write_str("STDERR"),
        }
    }
}

/// A tagged fragment of subprocess output. One per write.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub tag: ChunkTag,
    pub data: Bytes,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Running,
    Complete,
    Failed,
    Skipped,
}

/// Progress of one sub-step within a running step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepStatus {
    pub step: String,
    pub status: Status,
}

/// Everything a step can push onto its outbound stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    Chunk(Chunk),
    Status(StepStatus),
}

impl Message {
    pub fn chunk(tag: ChunkTag, data: impl Into<Bytes>) -> Self {
        Self::Chunk(Chunk {
            tag,
            data: data.into(),
        })
    }

    pub fn status(step: impl Into<String>, status: Status) -> Self {
        Self::Status(StepStatus {
            step: step.into(),
            status,
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevertRequest {}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitializeRequest {}

/// Ask an agent to create directories. The response carries no payload.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSegmentDataDirRequest {
    pub datadirs: Vec<PathBuf>,
}

/// Ask an agent to remove data directories. The response carries no payload.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteDataDirectoriesRequest {
    pub datadirs: Vec<PathBuf>,
}
