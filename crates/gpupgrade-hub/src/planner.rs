//! Where the upgraded cluster lives, derived from where the source lives.
//!
//! These functions are the only place post-upgrade locations are computed.
//! Creation and deletion both call them, so nothing needs to be stored.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

use gpupgrade_core::{ContentId, PlanError, Segment};
use serde::{Deserialize, Serialize};

/// Appended to the parent directory of every data directory.
pub const UPGRADE_SUFFIX: &str = "_upgrade";

/// Leaf names of master data directories end with the master's content id.
pub const MASTER_CONTENT_SUFFIX: &str = "-1";

pub const DEFAULT_MASTER_PORT_OFFSET: u16 = 1;

/// Placeholder until segment port assignment is decided properly.
pub const PROVISIONAL_SEGMENT_PORT_OFFSET: u16 = 4000;

/// `/data/primary/seg1` becomes `/data/primary_upgrade/seg1`.
///
/// Re-planning an already planned path is not meaningful.
pub fn upgrade_data_dir(path: &Path) -> PathBuf {
    let cleaned: PathBuf = path.components().collect();

    match (cleaned.parent(), cleaned.file_name()) {
        (Some(parent), Some(leaf)) => {
            let mut dir = OsString::from(parent.as_os_str());
            dir.push(UPGRADE_SUFFIX);
            PathBuf::from(dir).join(leaf)
        }
        _ => {
            let mut dir = cleaned.into_os_string();
            dir.push(UPGRADE_SUFFIX);
            PathBuf::from(dir)
        }
    }
}

/// Parent of [`upgrade_data_dir`]. gpinitsystem creates the leaf itself but
/// requires this to exist.
pub fn upgrade_parent_dir(path: &Path) -> PathBuf {
    let planned = upgrade_data_dir(path);
    match planned.parent() {
        Some(parent) => parent.to_path_buf(),
        None => planned,
    }
}

/// `SEG_PREFIX` for gpinitsystem: the master leaf name minus its `-1`.
pub fn master_segment_prefix(master_data_dir: &Path) -> Result<String, PlanError> {
    let invalid = || PlanError::InvalidPath {
        path: master_data_dir.to_path_buf(),
    };

    let leaf = master_data_dir
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(invalid)?;
    let prefix = leaf.strip_suffix(MASTER_CONTENT_SUFFIX).ok_or_else(invalid)?;

    if prefix.is_empty() {
        return Err(PlanError::EmptyPrefix {
            path: master_data_dir.to_path_buf(),
        });
    }
    Ok(prefix.to_string())
}

/// Chooses the port a segment listens on after the upgrade.
pub trait PortPolicy: Send + Sync + fmt::Debug {
    fn upgrade_port(&self, segment: &Segment) -> Result<u16, PlanError>;
}

/// Shifts master-content ports by one offset and everything else by another.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixedOffsetPolicy {
    pub master_offset: u16,
    pub segment_offset: u16,
}

impl Default for FixedOffsetPolicy {
    fn default() -> Self {
        Self {
            master_offset: DEFAULT_MASTER_PORT_OFFSET,
            segment_offset: PROVISIONAL_SEGMENT_PORT_OFFSET,
        }
    }
}

impl PortPolicy for FixedOffsetPolicy {
    fn upgrade_port(&self, segment: &Segment) -> Result<u16, PlanError> {
        let offset = match segment.content {
            ContentId::Master => self.master_offset,
            ContentId::Segment(_) => self.segment_offset,
        };
        segment
            .port
            .checked_add(offset)
            .ok_or(PlanError::PortOutOfRange {
                content: segment.content,
                port: segment.port,
                offset,
            })
    }
}

/// The post-upgrade counterpart of `segment`.
pub fn plan_segment(segment: &Segment, ports: &dyn PortPolicy) -> Result<Segment, PlanError> {
    Ok(Segment {
        port: ports.upgrade_port(segment)?,
        data_dir: upgrade_data_dir(&segment.data_dir),
        ..segment.clone()
    })
}
