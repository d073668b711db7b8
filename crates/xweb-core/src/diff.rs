//! Differencing merge of incoming data into the document tree.
//!
//! [`Merge`] is a lazy iterator: each call to `next` advances the merge until
//! it produces the next change record, mutating the tree in place as it goes.
//! Records come out depth-first in the incoming value's own iteration order.
//!
//! Structural conflicts are detected up front by [`check_merge`], so a merge
//! that has been constructed always runs to completion.

use crate::error::{NodeKind, Result, StoreError};
use crate::model::ChangeRecord;
use crate::path::{lookup_mut, pad_to, push_step, Step};
use serde_json::Value;

/// Validate that merging `incoming` over `existing` never meets a mapping
/// and a sequence at the same location. Never mutates.
///
/// `path` is the rendered location of `existing`, used in the error.
pub fn check_merge(existing: Option<&Value>, incoming: &Value, path: &str) -> Result<()> {
    let mut buf = path.to_string();
    check_at(existing, incoming, &mut buf)
}

fn check_at(existing: Option<&Value>, incoming: &Value, path: &mut String) -> Result<()> {
    let Some(existing) = existing else {
        return Ok(());
    };

    match (existing, incoming) {
        (Value::Object(old), Value::Object(new)) => {
            for (key, value) in new {
                let len = path.len();
                push_step(path, &Step::Key(key.clone()));
                check_at(old.get(key), value, path)?;
                path.truncate(len);
            }
            Ok(())
        }
        (Value::Array(old), Value::Array(new)) => {
            for (index, value) in new.iter().enumerate() {
                let len = path.len();
                push_step(path, &Step::Index(index));
                check_at(old.get(index), value, path)?;
                path.truncate(len);
            }
            Ok(())
        }
        (Value::Object(_), Value::Array(_)) | (Value::Array(_), Value::Object(_)) => {
            Err(StoreError::StructuralConflict {
                path: path.clone(),
                expected: NodeKind::of(incoming),
                found: NodeKind::of(existing),
            })
        }
        _ => Ok(()),
    }
}

/// Remaining incoming entries of one container being merged.
enum Entries {
    Map(serde_json::map::IntoIter),
    Seq(std::iter::Enumerate<std::vec::IntoIter<Value>>),
    One(Option<(Step, Value)>),
}

impl Iterator for Entries {
    type Item = (Step, Value);

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Entries::Map(iter) => iter.next().map(|(key, value)| (Step::Key(key), value)),
            Entries::Seq(iter) => iter.next().map(|(index, value)| (Step::Index(index), value)),
            Entries::One(entry) => entry.take(),
        }
    }
}

struct Frame {
    /// Steps from the root to the container receiving `entries`
    steps: Vec<Step>,
    /// Rendered form of `steps`
    prefix: String,
    entries: Entries,
}

enum Outcome {
    Record(ChangeRecord),
    Unchanged,
    Descend(Entries),
}

/// Lazy, single-pass merge of incoming data into the tree.
pub struct Merge<'a> {
    root: &'a mut Value,
    stack: Vec<Frame>,
}

impl<'a> Merge<'a> {
    /// Merge `incoming` into the `target` slot of the container at `parent`.
    ///
    /// The parent container must already exist and fit the target step, and
    /// [`check_merge`] must have passed for the target's current value.
    pub(crate) fn at_target(
        root: &'a mut Value,
        parent: &[Step],
        parent_path: String,
        target: Step,
        incoming: Value,
    ) -> Self {
        Self {
            root,
            stack: vec![Frame {
                steps: parent.to_vec(),
                prefix: parent_path,
                entries: Entries::One(Some((target, incoming))),
            }],
        }
    }

    /// Merge the entries of `incoming` directly into the root mapping.
    pub(crate) fn at_root(root: &'a mut Value, incoming: serde_json::Map<String, Value>) -> Self {
        Self {
            root,
            stack: vec![Frame {
                steps: Vec::new(),
                prefix: "/".to_string(),
                entries: Entries::Map(incoming.into_iter()),
            }],
        }
    }
}

impl Iterator for Merge<'_> {
    type Item = ChangeRecord;

    fn next(&mut self) -> Option<ChangeRecord> {
        loop {
            let frame = self.stack.last_mut()?;
            let Some((step, incoming)) = frame.entries.next() else {
                self.stack.pop();
                continue;
            };

            let mut path = frame.prefix.clone();
            push_step(&mut path, &step);

            // Containers on the stack were either vivified or found during
            // descent, so they are always present.
            let Some(container) = lookup_mut(self.root, &frame.steps) else {
                self.stack.pop();
                continue;
            };

            match apply(container, &step, incoming, &path) {
                Outcome::Record(change) => return Some(change),
                Outcome::Unchanged => {}
                Outcome::Descend(entries) => {
                    let mut steps = frame.steps.clone();
                    steps.push(step);
                    self.stack.push(Frame {
                        steps,
                        prefix: path,
                        entries,
                    });
                }
            }
        }
    }
}

/// Merge one incoming entry into `container` at `step`.
fn apply(container: &mut Value, step: &Step, incoming: Value, path: &str) -> Outcome {
    let (present, hole) = match (step, &*container) {
        (Step::Key(key), Value::Object(map)) => (map.contains_key(key), false),
        (Step::Index(index), Value::Array(items)) => match items.get(*index) {
            Some(Value::Null) => (false, true),
            Some(_) => (true, false),
            None => (false, false),
        },
        _ => return Outcome::Unchanged,
    };

    if !present {
        // A hole already reads as null.
        if hole && incoming.is_null() {
            return Outcome::Unchanged;
        }
        insert(container, step, incoming.clone());
        return Outcome::Record(ChangeRecord::missing(path, incoming));
    }

    let Some(slot) = slot_mut(container, step) else {
        return Outcome::Unchanged;
    };

    match (NodeKind::of(slot), incoming) {
        (NodeKind::Mapping, Value::Object(map)) => Outcome::Descend(Entries::Map(map.into_iter())),
        (NodeKind::Sequence, Value::Array(items)) => {
            Outcome::Descend(Entries::Seq(items.into_iter().enumerate()))
        }
        (_, incoming) => {
            if *slot == incoming {
                Outcome::Unchanged
            } else {
                let old = std::mem::replace(slot, incoming.clone());
                Outcome::Record(ChangeRecord::changed(path, old, incoming))
            }
        }
    }
}

fn slot_mut<'v>(container: &'v mut Value, step: &Step) -> Option<&'v mut Value> {
    match (step, container) {
        (Step::Key(key), Value::Object(map)) => map.get_mut(key),
        (Step::Index(index), Value::Array(items)) => items.get_mut(*index),
        _ => None,
    }
}

fn insert(container: &mut Value, step: &Step, value: Value) {
    match (step, container) {
        (Step::Key(key), Value::Object(map)) => {
            map.insert(key.clone(), value);
        }
        (Step::Index(index), Value::Array(items)) => {
            if pad_to(items, *index) {
                items[*index] = value;
            }
        }
        _ => {}
    }
}
