//! Create the target cluster with gpinitsystem.

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use gpupgrade_core::db::ConnectionParams;
use gpupgrade_core::idl::{CreateSegmentDataDirRequest, InitializeRequest};
use gpupgrade_core::stream::MessageSender;
use gpupgrade_core::SegmentRole;
use tracing::{debug, error, info};

use crate::command::CommandSpec;
use crate::config::TargetInstall;
use crate::error::HubError;
use crate::hub::Hub;
use crate::initsystem::{InitsystemConfig, SourceSettings};
use crate::mux::StreamMultiplexer;
use crate::planner::{master_segment_prefix, plan_segment, upgrade_parent_dir};
use crate::step::{catch_panic, Step};

pub const INITIALIZE_STEP: &str = "initialize";
pub const INIT_TOOL: &str = "gpinitsystem";

pub const GENERATE_CONFIG: &str = "generate gpinitsystem config";
pub const CREATE_MASTER_DIR: &str = "create master upgrade directory";
pub const CREATE_SEGMENT_DIRS: &str = "create segment upgrade directories";
pub const RUN_INITSYSTEM: &str = "run gpinitsystem";

#[cfg(unix)]
const UPGRADE_DIR_MODE: u32 = 0o755;

/// `bash -c "source <root>/greenplum_path.sh && <root>/bin/gpinitsystem -a -I <config>"`,
/// plus `--ignore-warnings` for installs that need it.
pub fn initsystem_command(target: &TargetInstall, config_path: &Path) -> CommandSpec {
    let root = target.install_root();
    let mut args = format!("-a -I {}", config_path.display());
    if target.requires_ignore_warnings() {
        args.push_str(" --ignore-warnings");
    }
    CommandSpec::bash(format!(
        "source {root}/greenplum_path.sh && {root}/bin/{INIT_TOOL} {args}",
        root = root.display(),
    ))
}

impl Hub {
    /// Initialize the target cluster. On success returns where to reach its
    /// master; the session itself is left to the caller.
    pub async fn initialize_target_cluster(
        &self,
        _request: InitializeRequest,
        stream: Arc<dyn MessageSender>,
    ) -> Result<ConnectionParams, HubError> {
        let mut step = Step::begin(&self.state_dir, INITIALIZE_STEP, stream)?;
        info!(run_id = %step.run_id(), "initializing target cluster");

        let body = catch_panic(self.initialize_substeps(&mut step)).await;
        let target = step.finish_with(body).map_err(|errs| {
            error!(error = %errs, "initialize failed");
            HubError::Aggregate(errs)
        })?;
        // A step that finished cleanly ran every sub-step.
        target.ok_or_else(|| HubError::Abandoned {
            step: INITIALIZE_STEP.into(),
        })
    }

    /// Yields the target master once gpinitsystem has run, or `None` when an
    /// earlier sub-step failed.
    async fn initialize_substeps(
        &self,
        step: &mut Step,
    ) -> Result<Option<ConnectionParams>, HubError> {
        let mux = StreamMultiplexer::new(step.stream(), self.log.clone());

        step.run_substep(GENERATE_CONFIG, self.generate_initsystem_config())
            .await;
        step.run_substep(CREATE_MASTER_DIR, self.create_master_upgrade_dir())
            .await;
        step.run_substep(CREATE_SEGMENT_DIRS, self.create_segment_upgrade_dirs())
            .await;
        let target = step.run_substep(RUN_INITSYSTEM, self.run_initsystem(&mux)).await;

        if let Some(e) = mux.stream_error() {
            debug!(error = %e, "progress stream detached during initialize");
        }
        Ok(target)
    }

    /// Read settings from the source master and write the gpinitsystem
    /// artifact into the state directory.
    pub async fn generate_initsystem_config(&self) -> Result<PathBuf, HubError> {
        // Fail on a bad master path before touching the database.
        master_segment_prefix(self.source.master_data_dir())?;

        let params = ConnectionParams::localhost(self.source.master_port());
        let session = self.connector.connect(&params).await?;
        let settings = SourceSettings::read(session.as_ref()).await?;

        let config = InitsystemConfig::build(&self.source, &settings, self.ports.as_ref())?;
        let path = self.initsystem_config_path();
        config.write_to(&path)?;
        debug!(path = %path.display(), "wrote gpinitsystem config");
        Ok(path)
    }

    /// gpinitsystem creates the master data directory itself but needs its
    /// parent to exist.
    pub async fn create_master_upgrade_dir(&self) -> Result<(), HubError> {
        let dir = upgrade_parent_dir(self.source.master_data_dir());
        match tokio::fs::metadata(&dir).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let mut builder = tokio::fs::DirBuilder::new();
                builder.recursive(true);
                #[cfg(unix)]
                builder.mode(UPGRADE_DIR_MODE);
                builder
                    .create(&dir)
                    .await
                    .map_err(|e| HubError::io(format!("master upgrade directory {}", dir.display()), e))
            }
            Err(e) => Err(HubError::io(
                format!("stat master upgrade directory {}", dir.display()),
                e,
            )),
        }
    }

    /// Ask each agent to create the upgrade parents of its primaries.
    pub async fn create_segment_upgrade_dirs(&self) -> Result<(), HubError> {
        let hosts: Vec<String> = self
            .source
            .primaries()
            .filter(|s| !s.is_master())
            .map(|s| s.hostname.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        self.fleet
            .dispatch(&self.source, &hosts, |conn, segments| async move {
                let datadirs: Vec<PathBuf> = segments
                    .iter()
                    .filter(|s| s.role == SegmentRole::Primary)
                    .map(|s| upgrade_parent_dir(&s.data_dir))
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect();
                if datadirs.is_empty() {
                    return Ok(());
                }
                debug!(host = %conn.hostname, ?datadirs, "creating upgrade parent directories");
                conn.client
                    .create_segment_data_directories(CreateSegmentDataDirRequest { datadirs })
                    .await?;
                Ok::<(), HubError>(())
            })
            .await?;
        Ok(())
    }

    async fn run_initsystem(&self, mux: &StreamMultiplexer) -> Result<ConnectionParams, HubError> {
        let master = plan_segment(self.source.master(), self.ports.as_ref())?;
        let command = initsystem_command(&self.target, &self.initsystem_config_path());
        info!(%command, "running gpinitsystem");

        let exit = self
            .executor
            .run(&command, mux)
            .await
            .map_err(|e| HubError::Subprocess {
                tool: INIT_TOOL.into(),
                reason: e.to_string(),
            })?;
        if !exit.success() {
            return Err(HubError::Subprocess {
                tool: INIT_TOOL.into(),
                reason: exit.to_string(),
            });
        }
        Ok(ConnectionParams::localhost(master.port))
    }
}
