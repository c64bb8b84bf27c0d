//! Destination cluster map, as far as the sink needs it.

use serde::Deserialize;

use crate::sink::error::SinkError;

pub const DEFAULT_CONFLICT_RESOLUTION: &str = "seqno";

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct SinkMap {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub buckets: Vec<BucketInfo>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct BucketInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "conflictResolutionType")]
    pub conflict_resolution_type: Option<String>,
}

impl SinkMap {
    pub fn from_json(raw: &str) -> Result<Self, SinkError> {
        serde_json::from_str(raw).map_err(|err| SinkError::Topology(format!("bad sink map: {err}")))
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            buckets: Vec::new(),
        }
    }

    /// Conflict resolution of the first bucket; `seqno` when unspecified.
    pub fn conflict_resolution_type(&self) -> &str {
        self.buckets
            .first()
            .and_then(|bucket| bucket.conflict_resolution_type.as_deref())
            .unwrap_or(DEFAULT_CONFLICT_RESOLUTION)
    }

    pub fn is_lww(&self) -> bool {
        self.conflict_resolution_type() == "lww"
    }
}

/// Source of vbucket ownership for the destination.
pub trait Topology: Send {
    fn sink_map(&self) -> &SinkMap;

    /// Called after the destination answered NOT_MY_VBUCKET.
    fn refresh_sink_map(&mut self) -> Result<(), SinkError>;
}

/// A map that never changes; refresh is a no-op.
#[derive(Clone, Debug, Default)]
pub struct StaticTopology {
    map: SinkMap,
}

impl StaticTopology {
    pub fn new(map: SinkMap) -> Self {
        Self { map }
    }
}

impl Topology for StaticTopology {
    fn sink_map(&self) -> &SinkMap {
        &self.map
    }

    fn refresh_sink_map(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}
