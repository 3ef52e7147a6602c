//! The gpinitsystem configuration artifact.
//!
//! Written once into the state directory and read only by gpinitsystem.

use std::path::Path;

use gpupgrade_core::db::DbSession;
use gpupgrade_core::{Cluster, DbError, PlanError, Segment};
use tracing::info;

use crate::error::HubError;
use crate::planner::{master_segment_prefix, plan_segment, PortPolicy};

pub const CONFIG_FILE: &str = "gpinitsystem_config";
pub const ARRAY_NAME: &str = "gp_upgrade cluster";
pub const TRUSTED_SHELL: &str = "ssh";

/// Server settings carried over from the source cluster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceSettings {
    pub checkpoint_segments: String,
    pub encoding: String,
}

impl SourceSettings {
    pub async fn read(session: &dyn DbSession) -> Result<Self, DbError> {
        Ok(Self {
            checkpoint_segments: session.current_setting("checkpoint_segments").await?,
            encoding: session.current_setting("server_encoding").await?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InitsystemConfig {
    lines: Vec<String>,
}

impl InitsystemConfig {
    pub fn build(
        source: &Cluster,
        settings: &SourceSettings,
        ports: &dyn PortPolicy,
    ) -> Result<Self, PlanError> {
        let prefix = master_segment_prefix(source.master_data_dir())?;
        info!(data_dir = %source.master_data_dir().display(), seg_prefix = %prefix, "building gpinitsystem config");

        let mut lines = vec![
            format!("ARRAY_NAME=\"{ARRAY_NAME}\""),
            format!("SEG_PREFIX={prefix}"),
            format!("TRUSTED_SHELL={TRUSTED_SHELL}"),
            format!("CHECK_POINT_SEGMENTS={}", settings.checkpoint_segments),
            format!("ENCODING={}", settings.encoding),
        ];

        let master = plan_segment(source.master(), ports)?;
        lines.push(format!("QD_PRIMARY_ARRAY={}", declaration(&master)));

        let mut segments = Vec::new();
        for segment in source.primaries().filter(|s| !s.is_master()) {
            let planned = plan_segment(segment, ports)?;
            segments.push(format!("\t{}", declaration(&planned)));
        }
        lines.push(format!("declare -a PRIMARY_ARRAY=(\n{}\n)", segments.join("\n")));

        Ok(Self { lines })
    }

    pub fn render(&self) -> String {
        self.lines.join("\n")
    }

    pub fn write_to(&self, path: &Path) -> Result<(), HubError> {
        std::fs::write(path, self.render())
            .map_err(|e| HubError::io("could not write gpinitsystem_config file", e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644))
                .map_err(|e| HubError::io("could not set gpinitsystem_config permissions", e))?;
        }
        Ok(())
    }
}

/// `host~port~datadir~dbid~content~0`
fn declaration(segment: &Segment) -> String {
    format!(
        "{}~{}~{}~{}~{}~0",
        segment.hostname,
        segment.port,
        segment.data_dir.display(),
        segment.db_id,
        segment.content.as_raw()
    )
}
