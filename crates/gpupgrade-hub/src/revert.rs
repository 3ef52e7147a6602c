//! Revert: remove everything the upgrade created.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use gpupgrade_core::idl::{DeleteDataDirectoriesRequest, RevertRequest};
use gpupgrade_core::stream::MessageSender;
use gpupgrade_core::Cluster;
use tracing::{debug, error, info};

use crate::error::HubError;
use crate::fleet::AgentFleet;
use crate::hub::Hub;
use crate::planner::upgrade_data_dir;
use crate::step::{catch_panic, Step};

pub const REVERT_STEP: &str = "revert";

pub const DELETE_SEGMENT_DIRS: &str = "delete segment data directories";
pub const STOP_AGENTS: &str = "stop agents";
pub const DELETE_MASTER_DIR: &str = "delete master data directory";
pub const RELEASE_HUB: &str = "release hub";

/// The tail of revert, after segment data is gone.
///
/// Whether the hub stops its own server or hands control back to the caller
/// to do so is not settled. Each method runs as its own reported sub-step;
/// the defaults do nothing.
#[async_trait]
pub trait RevertTeardown: Send + Sync {
    async fn stop_agents(&self, fleet: &AgentFleet) -> Result<(), HubError> {
        debug!(hosts = ?fleet.connected_hosts(), "stopping agents is not implemented");
        Ok(())
    }

    async fn remove_master_data_directory(&self, source: &Cluster) -> Result<(), HubError> {
        debug!(data_dir = %source.master_data_dir().display(), "removing the master data directory is not implemented");
        Ok(())
    }

    async fn release_hub(&self) -> Result<(), HubError> {
        debug!("releasing the hub is not implemented");
        Ok(())
    }
}

pub struct UnimplementedTeardown;

impl RevertTeardown for UnimplementedTeardown {}

impl Hub {
    /// Delete the upgrade data directories of every primary, mirror and
    /// standby across the fleet, then run the teardown sub-steps.
    pub async fn revert(
        &self,
        _request: RevertRequest,
        stream: Arc<dyn MessageSender>,
    ) -> Result<(), HubError> {
        let mut step = Step::begin(&self.state_dir, REVERT_STEP, stream)?;
        info!(run_id = %step.run_id(), hosts = ?self.source.agent_hosts(), "reverting");

        let body = catch_panic(self.revert_substeps(&mut step)).await;
        step.finish_with(body).map_err(|errs| {
            error!(error = %errs, "revert failed");
            HubError::Aggregate(errs)
        })
    }

    async fn revert_substeps(&self, step: &mut Step) -> Result<(), HubError> {
        step.run_substep(DELETE_SEGMENT_DIRS, self.delete_segment_data_directories())
            .await;
        step.run_substep(STOP_AGENTS, self.teardown.stop_agents(&self.fleet))
            .await;
        step.run_substep(
            DELETE_MASTER_DIR,
            self.teardown.remove_master_data_directory(&self.source),
        )
        .await;
        step.run_substep(RELEASE_HUB, self.teardown.release_hub()).await;
        Ok(())
    }

    async fn delete_segment_data_directories(&self) -> Result<(), HubError> {
        let hosts = self.source.agent_hosts();
        self.fleet
            .dispatch(&self.source, &hosts, |conn, segments| async move {
                let datadirs: Vec<PathBuf> = segments
                    .iter()
                    .map(|s| upgrade_data_dir(&s.data_dir))
                    .collect();
                debug!(host = %conn.hostname, ?datadirs, "deleting upgrade data directories");
                conn.client
                    .delete_data_directories(DeleteDataDirectoriesRequest { datadirs })
                    .await?;
                Ok::<(), HubError>(())
            })
            .await?;
        Ok(())
    }
}
