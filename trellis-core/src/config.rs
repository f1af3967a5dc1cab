//! Session configuration.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Tunables for a [`Session`](crate::Session).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Name of the dependency registry used when no name is given.
    pub default_registry: String,

    /// Record an edge from every addressed argument when a cell commits.
    pub track_edges: bool,

    /// Weight given to implicitly recorded edges.
    pub edge_weight: f64,
}

impl SessionConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_registry: String::new(),
            track_edges: true,
            edge_weight: 1.0,
        }
    }
}
