//! Hub configuration persisted in the state directory.
//!
//! Loading flow:
//! 1. Read `<state_dir>/config.json`
//! 2. Apply environment overrides (highest priority)
//!
//! Invalid override values are ignored with a warning.

use std::path::{Component, Path, PathBuf};

use gpupgrade_core::{Cluster, ClusterConfig};
use semver::Version;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::HubError;
use crate::planner::FixedOffsetPolicy;

pub const CONFIG_FILE: &str = "config.json";
pub const HOME_ENV: &str = "GPUPGRADE_HOME";
pub const MASTER_PORT_OFFSET_ENV: &str = "GPUPGRADE_MASTER_PORT_OFFSET";
pub const SEGMENT_PORT_OFFSET_ENV: &str = "GPUPGRADE_SEGMENT_PORT_OFFSET";

/// Releases before this major version need `--ignore-warnings`, otherwise
/// gpinitsystem exits nonzero on warnings alone.
const IGNORE_WARNINGS_BEFORE_MAJOR: u64 = 7;

/// The Greenplum installation the target cluster is initialized from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetInstall {
    pub bin_dir: PathBuf,
    pub version: Version,
}

impl TargetInstall {
    /// Directory holding `greenplum_path.sh`: the parent of `bin_dir`.
    pub fn install_root(&self) -> PathBuf {
        let cleaned: PathBuf = self
            .bin_dir
            .components()
            .filter(|c| !matches!(c, Component::CurDir))
            .collect();
        match cleaned.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => cleaned,
        }
    }

    pub fn requires_ignore_warnings(&self) -> bool {
        self.version.major < IGNORE_WARNINGS_BEFORE_MAJOR
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(skip)]
    pub state_dir: PathBuf,
    pub source: ClusterConfig,
    pub target: TargetInstall,
    #[serde(default)]
    pub ports: FixedOffsetPolicy,
}

impl HubConfig {
    pub fn path(state_dir: &Path) -> PathBuf {
        state_dir.join(CONFIG_FILE)
    }

    /// Load from `state_dir` with environment overrides applied.
    pub fn load(state_dir: &Path) -> Result<Self, HubError> {
        let mut config = Self::load_file(state_dir)?;
        apply_env_overrides(&mut config);
        Ok(config)
    }

    /// Load from `state_dir` exactly as written.
    pub fn load_file(state_dir: &Path) -> Result<Self, HubError> {
        let path = Self::path(state_dir);
        debug!(?path, "loading hub config");
        let content = std::fs::read_to_string(&path)
            .map_err(|e| HubError::io(format!("read {}", path.display()), e))?;
        let mut config: HubConfig = serde_json::from_str(&content)
            .map_err(|e| HubError::Config(format!("{}: {e}", path.display())))?;
        config.state_dir = state_dir.to_path_buf();
        Ok(config)
    }

    /// Write pretty JSON via a temp file and rename.
    pub fn save(&self) -> Result<(), HubError> {
        std::fs::create_dir_all(&self.state_dir).map_err(|e| {
            HubError::io(format!("create state directory {}", self.state_dir.display()), e)
        })?;
        let path = Self::path(&self.state_dir);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| HubError::Config(format!("serialize hub config: {e}")))?;
        std::fs::write(&tmp, json).map_err(|e| HubError::io(format!("write {}", tmp.display()), e))?;
        std::fs::rename(&tmp, &path)
            .map_err(|e| HubError::io(format!("rename {} into place", tmp.display()), e))
    }

    pub fn source_cluster(&self) -> Result<Cluster, HubError> {
        Ok(Cluster::from_config(self.source.clone())?)
    }
}

pub fn apply_env_overrides(config: &mut HubConfig) {
    apply_env_overrides_with(config, |name| std::env::var(name).ok());
}

/// Overrides from an arbitrary lookup, so tests need not touch the process
/// environment.
pub fn apply_env_overrides_with(config: &mut HubConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = read_u16(&lookup, MASTER_PORT_OFFSET_ENV) {
        config.ports.master_offset = v;
    }
    if let Some(v) = read_u16(&lookup, SEGMENT_PORT_OFFSET_ENV) {
        config.ports.segment_offset = v;
    }
}

fn read_u16(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<u16> {
    let val = lookup(name)?;
    let result = parse_u16(&val);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid u16 env var, ignoring");
    }
    result
}

fn parse_u16(val: &str) -> Option<u16> {
    val.trim().parse().ok()
}

/// `$GPUPGRADE_HOME`, else `$HOME/.gpupgrade`.
pub fn state_dir_from_env() -> PathBuf {
    if let Some(dir) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
        return PathBuf::from(dir);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".gpupgrade")
}

#[cfg(test)]
mod tests {
    use gpupgrade_core::{ContentId, Segment, SegmentRole};

    use super::*;

    fn sample(state_dir: &Path) -> HubConfig {
        let seg = |host: &str, port: u16, dir: &str, content: i32| Segment {
            hostname: host.into(),
            port,
            data_dir: PathBuf::from(dir),
            db_id: content + 2,
            content: ContentId::from(content),
            role: SegmentRole::Primary,
        };
        HubConfig {
            state_dir: state_dir.to_path_buf(),
            source: ClusterConfig {
                name: "source".into(),
                segments: vec![
                    seg("mdw", 15432, "/data/master/gpseg-1", -1),
                    seg("sdw1", 25432, "/data/primary/gpseg0", 0),
                ],
            },
            target: TargetInstall {
                bin_dir: PathBuf::from("/usr/local/gpdb6/bin"),
                version: Version::new(6, 20, 0),
            },
            ports: FixedOffsetPolicy::default(),
        }
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let config = sample(dir.path());
        config.save().unwrap();

        let loaded = HubConfig::load_file(dir.path()).unwrap();
        assert_eq!(loaded, config);
        assert!(!dir.path().join("config.json.tmp").exists());
        assert_eq!(loaded.source_cluster().unwrap().master_port(), 15432);
    }

    #[test]
    fn ports_default_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let json = r#"{
            "source": {"name": "s", "segments": [
                {"hostname": "mdw", "port": 5432, "data_dir": "/m/gpseg-1", "db_id": 1, "content": -1}
            ]},
            "target": {"bin_dir": "/gpdb7/bin", "version": "7.1.0"}
        }"#;
        std::fs::write(dir.path().join(CONFIG_FILE), json).unwrap();

        let config = HubConfig::load_file(dir.path()).unwrap();
        assert_eq!(config.ports, FixedOffsetPolicy::default());
        assert_eq!(config.state_dir, dir.path());
        assert!(!config.target.requires_ignore_warnings());
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(HubConfig::load(dir.path()).unwrap_err().kind(), "io");
    }

    #[test]
    fn malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "{").unwrap();
        let err = HubConfig::load(dir.path()).unwrap_err();
        assert!(matches!(err, HubError::Config(_)));
    }

    #[test]
    fn env_overrides_apply_and_ignore_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = sample(dir.path());
        apply_env_overrides_with(&mut config, |name| match name {
            MASTER_PORT_OFFSET_ENV => Some("not-a-port".into()),
            SEGMENT_PORT_OFFSET_ENV => Some(" 3000 ".into()),
            _ => None,
        });
        assert_eq!(config.ports.master_offset, 1);
        assert_eq!(config.ports.segment_offset, 3000);
    }

    #[test]
    fn install_root_is_parent_of_bin_dir() {
        let target = TargetInstall {
            bin_dir: PathBuf::from("/usr/local/gpdb6/bin/"),
            version: Version::new(6, 0, 0),
        };
        assert_eq!(target.install_root(), PathBuf::from("/usr/local/gpdb6"));
        assert!(target.requires_ignore_warnings());
    }
}
