//! Change record types.
//!
//! A change record describes one difference detected while merging incoming
//! data into the document tree. The serialized form is the wire shape shared
//! with downstream consumers:
//!
//! ```json
//! {"type": "changed", "path": "/devices/abc/status/temp", "oldValue": 70, "newValue": 72}
//! ```

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Whether the target existed before the write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// The target existed with a different value.
    Changed,
    /// The target key or index did not exist before the write.
    Missing,
}

/// One detected difference between existing and incoming data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    #[serde(rename = "type")]
    pub kind: ChangeKind,

    /// Rooted path of the changed location (e.g. "/arr[2]/d1")
    pub path: String,

    /// Previous value; None when the location did not exist. A previous
    /// `null` is `Some(Value::Null)` and is written as `"oldValue": null`.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present_value"
    )]
    pub old_value: Option<Value>,

    pub new_value: Value,
}

/// A field that is present deserializes to `Some`, even when it is `null`.
fn present_value<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

impl ChangeRecord {
    pub fn missing(path: impl Into<String>, new_value: Value) -> Self {
        Self {
            kind: ChangeKind::Missing,
            path: path.into(),
            old_value: None,
            new_value,
        }
    }

    pub fn changed(path: impl Into<String>, old_value: Value, new_value: Value) -> Self {
        Self {
            kind: ChangeKind::Changed,
            path: path.into(),
            old_value: Some(old_value),
            new_value,
        }
    }
}
