//! The in-memory document tree.
//!
//! `Document` owns the root mapping and ties path resolution and the
//! differencing merge together. It has no locking and no notification; the
//! async store wraps it with both.

use crate::diff::{check_merge, Merge};
use crate::error::{NodeKind, Result, StoreError};
use crate::model::ChangeRecord;
use crate::path::{self, IntoDocPath};
use serde_json::Value;
use tracing::debug;

/// A mutable JSON-like tree addressed by slash paths.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    root: Value,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Create an empty document.
    pub fn new() -> Self {
        Self {
            root: Value::Object(serde_json::Map::new()),
        }
    }

    /// Create a document from an existing tree.
    ///
    /// The root must be a mapping.
    pub fn from_tree(root: Value) -> Result<Self> {
        match root {
            Value::Object(_) => Ok(Self { root }),
            other => Err(StoreError::StructuralConflict {
                path: "/".to_string(),
                expected: NodeKind::Mapping,
                found: NodeKind::of(&other),
            }),
        }
    }

    /// Get the whole tree.
    pub fn tree(&self) -> &Value {
        &self.root
    }

    pub fn into_tree(self) -> Value {
        self.root
    }

    /// Replace the whole tree, returning the previous one.
    pub fn replace(&mut self, other: Document) -> Document {
        std::mem::replace(self, other)
    }

    /// Read the value at `path` without creating anything.
    pub fn get<P: IntoDocPath>(&self, path: P) -> Result<Option<&Value>> {
        let path = path.into_doc_path()?;
        Ok(path::lookup(&self.root, path.steps()))
    }

    /// Merge `data` at `path` and collect the resulting change records.
    pub fn post<P: IntoDocPath>(&mut self, path: P, data: Value) -> Result<Vec<ChangeRecord>> {
        Ok(self.merge(path, data)?.collect())
    }

    /// Merge `data` at `path`, lazily.
    ///
    /// All validation happens here: if this returns `Ok`, iterating the merge
    /// cannot fail, and the tree is only touched as records are produced
    /// (apart from creating missing parent containers). If it returns `Err`,
    /// the tree has not been modified.
    pub fn merge<P: IntoDocPath>(&mut self, path: P, data: Value) -> Result<Merge<'_>> {
        let path = path.into_doc_path()?;
        let resolved = path.resolve(true);
        debug!("merging at {} (parent {})", path, resolved.parent_path);

        path::check(&self.root, path.steps())?;

        let Some(target) = resolved.target else {
            check_merge(Some(&self.root), &data, "/")?;
            return match data {
                Value::Object(map) => Ok(Merge::at_root(&mut self.root, map)),
                other => Err(StoreError::StructuralConflict {
                    path: "/".to_string(),
                    expected: NodeKind::of(&other),
                    found: NodeKind::Mapping,
                }),
            };
        };

        let existing = path::lookup(&self.root, path.steps());
        check_merge(existing, &data, &path.to_string())?;

        let parent_path = resolved.parent_path.clone();
        path::vivify(&mut self.root, resolved.parent, Some(target))?;
        Ok(Merge::at_target(
            &mut self.root,
            resolved.parent,
            parent_path,
            target.clone(),
            data,
        ))
    }
}

impl TryFrom<Value> for Document {
    type Error = StoreError;

    fn try_from(root: Value) -> Result<Self> {
        Self::from_tree(root)
    }
}
