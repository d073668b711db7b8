//! Error types shared by the document tree and the store facade.

use std::path::PathBuf;
use thiserror::Error;

/// Kind of value found at a location, used in structural conflict reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Mapping,
    Sequence,
    Scalar,
}

impl NodeKind {
    pub fn of(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Object(_) => NodeKind::Mapping,
            serde_json::Value::Array(_) => NodeKind::Sequence,
            _ => NodeKind::Scalar,
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeKind::Mapping => write!(f, "mapping"),
            NodeKind::Sequence => write!(f, "sequence"),
            NodeKind::Scalar => write!(f, "scalar"),
        }
    }
}

/// Errors raised by document and store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The path argument is not a string or a sequence of string segments,
    /// or one of its segments is malformed.
    #[error("Invalid path: {0}")]
    PathType(String),

    /// A write would turn a mapping into a sequence (or the reverse), or walk
    /// through a scalar. Nothing was mutated.
    #[error("Structural conflict at {path}: expected {expected}, found {found}")]
    StructuralConflict {
        path: String,
        expected: NodeKind,
        found: NodeKind,
    },

    /// `save` was called on a store that never had a backing path.
    #[error("No backing path configured for save")]
    NoBackingPath,

    /// Reading or writing the backing file failed.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The tree could not be serialized.
    #[error("Failed to serialize document: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
