//! Store configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for a [`Store`](crate::Store).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreConfig {
    /// Backing file holding the last saved tree.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backing_path: Option<PathBuf>,

    /// Write indented JSON on save.
    pub pretty: bool,

    /// Read the backing file when the store is first used. When false the
    /// store starts empty and only remembers the path for `save`.
    pub load_on_open: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backing_path: None,
            pretty: true,
            load_on_open: true,
        }
    }
}

impl StoreConfig {
    /// Configuration backed by the file at `path`.
    pub fn with_backing_path(path: impl Into<PathBuf>) -> Self {
        Self {
            backing_path: Some(path.into()),
            ..Default::default()
        }
    }

    /// Parse a JSON configuration document. Missing fields take defaults.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
