use std::path::PathBuf;

use crate::cluster::{ContentId, SegmentRole};

/// Errors raised while planning post-upgrade paths and ports.
/// Always fatal to the enclosing operation; never retried.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    #[error("path requires a master content identifier: '{}'", path.display())]
    InvalidPath { path: PathBuf },
    #[error("path has no segment prefix: '{}'", path.display())]
    EmptyPrefix { path: PathBuf },
    #[error("port {port} + offset {offset} is out of range for content {content}")]
    PortOutOfRange {
        content: ContentId,
        port: u16,
        offset: u16,
    },
}

/// Structural problems with a cluster definition.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ClusterError {
    #[error("cluster has no master segment")]
    MissingMaster,
    #[error("cluster has more than one master segment")]
    DuplicateMaster,
    #[error("duplicate {role} segment for content {content}")]
    DuplicateSegment { content: ContentId, role: SegmentRole },
    #[error("no segments found on host {0}")]
    UnknownHost(String),
}

/// Failures talking to a per-host agent. Scoped to that host only.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AgentError {
    #[error("agent on {host} is unreachable: {reason}")]
    Unreachable { host: String, reason: String },
    #[error("{method} on {host} failed: {message}")]
    Rpc {
        host: String,
        method: &'static str,
        message: String,
    },
}

impl AgentError {
    pub fn host(&self) -> &str {
        match self {
            Self::Unreachable { host, .. } | Self::Rpc { host, .. } => host,
        }
    }
}

/// The outbound progress stream rejected a message.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error("stream closed by peer")]
    Closed,
    #[error("stream send failed: {0}")]
    Send(String),
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DbError {
    #[error("could not connect to database: {0}")]
    Connect(String),
    #[error("could not retrieve {setting}: {message}")]
    Query { setting: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_error_messages_name_the_path() {
        let err = PlanError::InvalidPath {
            path: PathBuf::from("/data/master/gpseg1"),
        };
        assert_eq!(
            err.to_string(),
            "path requires a master content identifier: '/data/master/gpseg1'"
        );

        let err = PlanError::EmptyPrefix {
            path: PathBuf::from("/data/master/-1"),
        };
        assert_eq!(err.to_string(), "path has no segment prefix: '/data/master/-1'");
    }

    #[test]
    fn agent_error_exposes_host() {
        let err = AgentError::Rpc {
            host: "sdw2".into(),
            method: "DeleteDataDirectories",
            message: "permission denied".into(),
        };
        assert_eq!(err.host(), "sdw2");
        assert!(err.to_string().contains("sdw2"));

        let err = AgentError::Unreachable {
            host: "sdw3".into(),
            reason: "connection refused".into(),
        };
        assert_eq!(err.host(), "sdw3");
    }

    #[test]
    fn duplicate_segment_display() {
        let err = ClusterError::DuplicateSegment {
            content: ContentId::Segment(2),
            role: SegmentRole::Mirror,
        };
        assert_eq!(err.to_string(), "duplicate mirror segment for content 2");
    }
}
