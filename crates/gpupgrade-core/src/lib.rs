pub mod agent;
pub mod cluster;
pub mod db;
pub mod errors;
pub mod idl;
pub mod stream;

pub use cluster::{Cluster, ClusterConfig, ContentId, Segment, SegmentRole};
pub use errors::{AgentError, ClusterError, DbError, PlanError, StreamError};
