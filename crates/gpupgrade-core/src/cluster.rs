//! Cluster topology as loaded from the hub configuration.
//!
//! A [`Cluster`] is keyed by [`ContentId`]. The master is a distinct variant
//! rather than a reserved number; the `-1` encoding only exists at the
//! serialization boundary (config files and the gpinitsystem artifact).

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::ClusterError;

const MASTER_CONTENT_RAW: i32 = -1;

/// Identity of a segment within the cluster.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum ContentId {
    Master,
    Segment(i32),
}

impl ContentId {
    pub fn is_master(self) -> bool {
        matches!(self, Self::Master)
    }

    /// The on-disk / on-wire integer encoding.
    pub fn as_raw(self) -> i32 {
        match self {
            Self::Master => MASTER_CONTENT_RAW,
            Self::Segment(id) => id,
        }
    }
}

impl From<i32> for ContentId {
    fn from(raw: i32) -> Self {
        if raw == MASTER_CONTENT_RAW {
            Self::Master
        } else {
            Self::Segment(raw)
        }
    }
}

impl From<ContentId> for i32 {
    fn from(id: ContentId) -> Self {
        id.as_raw()
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_raw())
    }
}

#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentRole {
    #[default]
    Primary,
    /// A mirror; for the master content this is the standby.
    Mirror,
}

impl fmt::Display for SegmentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => f.write_str("primary"),
            Self::Mirror => f.write_str("mirror"),
        }
    }
}

/// One database instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub hostname: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub db_id: i32,
    pub content: ContentId,
    #[serde(default)]
    pub role: SegmentRole,
}

impl Segment {
    pub fn is_master(&self) -> bool {
        self.content.is_master() && self.role == SegmentRole::Primary
    }
}

/// Serialized form of a cluster, as stored in `config.json`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default)]
    pub name: String,
    pub segments: Vec<Segment>,
}

/// A validated cluster: exactly one master primary and at most one segment
/// per (content, role).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cluster {
    name: String,
    primaries: BTreeMap<ContentId, Segment>,
    mirrors: BTreeMap<ContentId, Segment>,
}

impl Cluster {
    pub fn new(name: impl Into<String>, segments: Vec<Segment>) -> Result<Self, ClusterError> {
        let mut primaries = BTreeMap::new();
        let mut mirrors = BTreeMap::new();

        for segment in segments {
            let (content, role) = (segment.content, segment.role);
            let slot = match role {
                SegmentRole::Primary => &mut primaries,
                SegmentRole::Mirror => &mut mirrors,
            };
            if slot.insert(content, segment).is_some() {
                return Err(if content.is_master() && role == SegmentRole::Primary {
                    ClusterError::DuplicateMaster
                } else {
                    ClusterError::DuplicateSegment { content, role }
                });
            }
        }

        if !primaries.contains_key(&ContentId::Master) {
            return Err(ClusterError::MissingMaster);
        }

        Ok(Self {
            name: name.into(),
            primaries,
            mirrors,
        })
    }

    pub fn from_config(config: ClusterConfig) -> Result<Self, ClusterError> {
        Self::new(config.name, config.segments)
    }

    pub fn to_config(&self) -> ClusterConfig {
        ClusterConfig {
            name: self.name.clone(),
            segments: self
                .primaries
                .values()
                .chain(self.mirrors.values())
                .cloned()
                .collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn master(&self) -> &Segment {
        // Presence is checked in `new`.
        &self.primaries[&ContentId::Master]
    }

    pub fn master_data_dir(&self) -> &Path {
        &self.master().data_dir
    }

    pub fn master_port(&self) -> u16 {
        self.master().port
    }

    pub fn standby(&self) -> Option<&Segment> {
        self.mirrors.get(&ContentId::Master)
    }

    /// Primaries in content order, master first.
    pub fn primaries(&self) -> impl Iterator<Item = &Segment> {
        self.primaries.values()
    }

    pub fn mirrors(&self) -> impl Iterator<Item = &Segment> {
        self.mirrors.values()
    }

    /// Segments an agent on `hostname` is responsible for: every primary and
    /// mirror on that host except the master primary, which the hub manages
    /// itself.
    pub fn segments_on(&self, hostname: &str) -> Result<Vec<Segment>, ClusterError> {
        let segments: Vec<Segment> = self
            .agent_segments()
            .filter(|s| s.hostname == hostname)
            .cloned()
            .collect();

        if segments.is_empty() {
            return Err(ClusterError::UnknownHost(hostname.to_string()));
        }
        Ok(segments)
    }

    /// Distinct hosts that run an agent, sorted.
    pub fn agent_hosts(&self) -> Vec<String> {
        self.agent_segments()
            .map(|s| s.hostname.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    fn agent_segments(&self) -> impl Iterator<Item = &Segment> {
        self.primaries
            .values()
            .filter(|s| !s.is_master())
            .chain(self.mirrors.values())
    }
}
