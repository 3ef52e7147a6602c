//! The hub: source cluster plus every collaborator an upgrade step needs.
//!
//! Steps live in [`crate::revert`] and [`crate::initialize`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use gpupgrade_core::agent::AgentDialer;
use gpupgrade_core::db::Connector;
use gpupgrade_core::Cluster;
use gpupgrade_telemetry::LogSink;

use crate::command::CommandExecutor;
use crate::config::{HubConfig, TargetInstall};
use crate::error::HubError;
use crate::fleet::AgentFleet;
use crate::initsystem;
use crate::planner::PortPolicy;
use crate::revert::{RevertTeardown, UnimplementedTeardown};

pub struct Hub {
    pub(crate) state_dir: PathBuf,
    pub(crate) source: Arc<Cluster>,
    pub(crate) target: TargetInstall,
    pub(crate) ports: Arc<dyn PortPolicy>,
    pub(crate) fleet: AgentFleet,
    pub(crate) executor: Arc<dyn CommandExecutor>,
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) log: LogSink,
    pub(crate) teardown: Arc<dyn RevertTeardown>,
}

impl Hub {
    pub fn new(
        config: HubConfig,
        dialer: Arc<dyn AgentDialer>,
        executor: Arc<dyn CommandExecutor>,
        connector: Arc<dyn Connector>,
        log: LogSink,
    ) -> Result<Self, HubError> {
        let source = Arc::new(config.source_cluster()?);
        Ok(Self {
            state_dir: config.state_dir,
            source,
            target: config.target,
            ports: Arc::new(config.ports),
            fleet: AgentFleet::new(dialer),
            executor,
            connector,
            log,
            teardown: Arc::new(UnimplementedTeardown),
        })
    }

    pub fn with_teardown(mut self, teardown: Arc<dyn RevertTeardown>) -> Self {
        self.teardown = teardown;
        self
    }

    pub fn with_port_policy(mut self, ports: Arc<dyn PortPolicy>) -> Self {
        self.ports = ports;
        self
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn source(&self) -> &Cluster {
        &self.source
    }

    pub fn fleet(&self) -> &AgentFleet {
        &self.fleet
    }

    pub fn initsystem_config_path(&self) -> PathBuf {
        self.state_dir.join(initsystem::CONFIG_FILE)
    }
}
