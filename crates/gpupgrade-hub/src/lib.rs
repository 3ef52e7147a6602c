//! The gpupgrade hub: plans post-upgrade locations, fans work out to the
//! per-host agents, runs gpinitsystem, and bounds each operation with a
//! persisted step.
//!
//! The crate carries no transport. An embedding server dials agents, opens
//! the client stream and builds a [`Hub`] with a [`TokioCommandExecutor`]
//! and a [`LogSink`](gpupgrade_telemetry::LogSink); the `gpupgrade-hub`
//! binary only inspects the state directory.

pub mod command;
pub mod config;
pub mod error;
pub mod fleet;
pub mod hub;
pub mod initialize;
pub mod initsystem;
pub mod mock;
pub mod mux;
pub mod planner;
pub mod revert;
pub mod state;
pub mod step;

pub use command::{CommandExecutor, CommandExit, CommandSpec, TokioCommandExecutor};
pub use config::{HubConfig, TargetInstall};
pub use error::{ErrorSource, Failure, HubError, MultiError};
pub use fleet::{AgentConnection, AgentFleet};
pub use hub::Hub;
pub use mux::{StreamMultiplexer, StreamWriter};
pub use planner::{FixedOffsetPolicy, PortPolicy};
pub use revert::{RevertTeardown, UnimplementedTeardown};
pub use state::{Outcome, StepOutcome, StepStore};
pub use step::Step;
