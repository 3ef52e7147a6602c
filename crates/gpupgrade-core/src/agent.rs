//! Interface to the per-host agent processes.

use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::AgentError;
use crate::idl::{CreateSegmentDataDirRequest, DeleteDataDirectoriesRequest};

/// Live RPC handle to one agent.
#[async_trait]
pub trait AgentClient: Send + Sync {
    async fn create_segment_data_directories(
        &self,
        request: CreateSegmentDataDirRequest,
    ) -> Result<(), AgentError>;

    async fn delete_data_directories(
        &self,
        request: DeleteDataDirectoriesRequest,
    ) -> Result<(), AgentError>;
}

/// Opens connections to agents. Failure is reported as
/// [`AgentError::Unreachable`] for that host alone.
#[async_trait]
pub trait AgentDialer: Send + Sync {
    async fn dial(&self, hostname: &str) -> Result<Arc<dyn AgentClient>, AgentError>;
}
