//! Runner manifest
//!
//! Records the layers embedded in a runner bundle, their digests, and the
//! extra QEMU search locations the bundle carries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single embedded layer in the manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerEntry {
    /// Path of the layer text within the bundle
    pub path: String,

    /// Name the layer was requested by
    pub name: String,

    /// SHA-256 of the layer text
    pub sha256: String,
}

/// Runner manifest (runner.json)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerManifest {
    /// Schema version
    pub schema_version: u32,

    /// Schema identifier
    pub schema_id: String,

    /// When the bundle was created
    pub created_at: DateTime<Utc>,

    /// Embedded layers in application order
    pub layers: Vec<LayerEntry>,

    /// Files whose directories are searched for QEMU (tracked base bundles)
    #[serde(default)]
    pub script_bases: Vec<String>,

    /// Extra QEMU search directories
    #[serde(default)]
    pub search_paths: Vec<String>,
}

impl RunnerManifest {
    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Load from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
