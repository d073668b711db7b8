//! Document path parsing, resolution and glob matching.
//!
//! Document paths are slash-separated strings like "devices/abc/zones[2]/temp".
//! Leading, trailing and repeated slashes are ignored. A segment of the form
//! `name[n]` addresses index `n` of the sequence stored at key `name`; any other
//! segment addresses a key of a mapping.
//!
//! Resolution is split into a read-only [`check`] and a mutating [`vivify`] so a
//! write that would hit a structural conflict is rejected before anything in the
//! tree changes.

use crate::error::{NodeKind, Result, StoreError};
use serde_json::Value;

/// Largest sequence index a path may address. Writes pad sequences with nulls
/// up to the index, so the bound also caps the size of one padded sequence.
pub const MAX_INDEX: usize = 1 << 20;

/// One addressing step into the document tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Step {
    /// Key of a mapping.
    Key(String),
    /// Index of a sequence.
    Index(usize),
}

impl Step {
    /// The container kind this step can be applied to.
    pub fn container_kind(&self) -> NodeKind {
        match self {
            Step::Key(_) => NodeKind::Mapping,
            Step::Index(_) => NodeKind::Sequence,
        }
    }

    /// An empty container this step can be applied to.
    pub fn empty_container(&self) -> Value {
        match self {
            Step::Key(_) => Value::Object(serde_json::Map::new()),
            Step::Index(_) => Value::Array(Vec::new()),
        }
    }

    /// Check whether `node` is a container this step can be applied to.
    pub fn fits(&self, node: &Value) -> bool {
        matches!(
            (self, node),
            (Step::Key(_), Value::Object(_)) | (Step::Index(_), Value::Array(_))
        )
    }
}

/// A parsed document path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct DocPath {
    steps: Vec<Step>,
}

impl DocPath {
    /// The empty path, addressing the root of the tree.
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a slash-separated path string.
    pub fn parse(path: &str) -> Result<Self> {
        Self::from_segments(path.split('/'))
    }

    /// Build a path from pre-split segments. Empty segments are dropped.
    pub fn from_segments<I, S>(segments: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut path = Self::root();
        for segment in segments {
            let segment = segment.as_ref();
            if segment.is_empty() {
                continue;
            }
            let (key, index) = parse_segment(segment)?;
            path.steps.push(Step::Key(key.to_string()));
            if let Some(index) = index {
                path.steps.push(Step::Index(index));
            }
        }
        Ok(path)
    }

    /// Build a path from a dynamically typed value: a string, or an array of
    /// string segments. Anything else is a path type error.
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::String(s) => Self::parse(s),
            Value::Array(items) => {
                let segments = items
                    .iter()
                    .map(|item| {
                        item.as_str().ok_or_else(|| {
                            StoreError::PathType(format!("path segment must be a string: {item}"))
                        })
                    })
                    .collect::<Result<Vec<&str>>>()?;
                Self::from_segments(segments)
            }
            other => Err(StoreError::PathType(format!(
                "path must be a string or array: {other}"
            ))),
        }
    }

    /// Get the addressing steps.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn is_root(&self) -> bool {
        self.steps.is_empty()
    }

    /// Append a step.
    pub fn push(&mut self, step: Step) {
        self.steps.push(step);
    }

    /// A new path one step below this one.
    pub fn child(&self, step: Step) -> Self {
        let mut child = self.clone();
        child.push(step);
        child
    }

    /// Split the path into the parent steps and the target step.
    ///
    /// With `includes_target` false the whole path is the parent and there is
    /// no target.
    pub fn resolve(&self, includes_target: bool) -> Resolved<'_> {
        let (parent, target) = match self.steps.split_last() {
            Some((target, parent)) if includes_target => (parent, Some(target)),
            _ => (self.steps.as_slice(), None),
        };
        Resolved {
            parent,
            target,
            parent_path: format_steps(parent),
        }
    }
}

impl std::fmt::Display for DocPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", format_steps(&self.steps))
    }
}

/// A path split into its parent container and target location.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<'p> {
    /// Steps from the root to the parent container.
    pub parent: &'p [Step],
    /// Key or index of the target within the parent, if any.
    pub target: Option<&'p Step>,
    /// Rooted, normalised form of the parent path (e.g. "/a/b").
    pub parent_path: String,
}

/// Conversion into a [`DocPath`], implemented for the path forms the store accepts.
pub trait IntoDocPath {
    fn into_doc_path(self) -> Result<DocPath>;
}

impl IntoDocPath for DocPath {
    fn into_doc_path(self) -> Result<DocPath> {
        Ok(self)
    }
}

impl IntoDocPath for &DocPath {
    fn into_doc_path(self) -> Result<DocPath> {
        Ok(self.clone())
    }
}

impl IntoDocPath for &str {
    fn into_doc_path(self) -> Result<DocPath> {
        DocPath::parse(self)
    }
}

impl IntoDocPath for String {
    fn into_doc_path(self) -> Result<DocPath> {
        DocPath::parse(&self)
    }
}

impl IntoDocPath for &String {
    fn into_doc_path(self) -> Result<DocPath> {
        DocPath::parse(self)
    }
}

impl IntoDocPath for &[&str] {
    fn into_doc_path(self) -> Result<DocPath> {
        DocPath::from_segments(self.iter())
    }
}

impl IntoDocPath for Vec<String> {
    fn into_doc_path(self) -> Result<DocPath> {
        DocPath::from_segments(self)
    }
}

impl IntoDocPath for &Value {
    fn into_doc_path(self) -> Result<DocPath> {
        DocPath::from_value(self)
    }
}

/// Split a segment into its key and optional sequence index.
fn parse_segment(segment: &str) -> Result<(&str, Option<usize>)> {
    let Some((name, index)) = segment
        .strip_suffix(']')
        .and_then(|inner| inner.rsplit_once('['))
    else {
        return Ok((segment, None));
    };

    if name.is_empty() || index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
        return Ok((segment, None));
    }

    let index = index
        .parse::<usize>()
        .ok()
        .filter(|&index| index <= MAX_INDEX)
        .ok_or_else(|| {
            StoreError::PathType(format!("index out of range in {segment:?} (max {MAX_INDEX})"))
        })?;
    Ok((name, Some(index)))
}

/// Render steps in rooted form: `/key` for keys, `[n]` for indices.
pub(crate) fn format_steps(steps: &[Step]) -> String {
    if steps.is_empty() {
        return "/".to_string();
    }
    let mut out = String::new();
    for step in steps {
        push_step(&mut out, step);
    }
    out
}

/// Append one step to a rendered path prefix.
pub(crate) fn push_step(prefix: &mut String, step: &Step) {
    match step {
        Step::Key(key) => {
            if !prefix.ends_with('/') {
                prefix.push('/');
            }
            prefix.push_str(key);
        }
        Step::Index(index) => {
            prefix.push('[');
            prefix.push_str(&index.to_string());
            prefix.push(']');
        }
    }
}

/// A null slot, whether a null mapping value or a sequence hole, is vacant and
/// can be replaced by a container during a write.
fn is_vacant(node: &Value) -> bool {
    node.is_null()
}

fn conflict(at: &[Step], expected: NodeKind, found: &Value) -> StoreError {
    StoreError::StructuralConflict {
        path: format_steps(at),
        expected,
        found: NodeKind::of(found),
    }
}

/// Validate that every step can be walked without destroying existing data.
///
/// Each node a step is applied to must be the container the step needs or be
/// vacant; once a vacant or absent node is reached the rest of the walk would
/// be created fresh, so it cannot conflict. Indices above [`MAX_INDEX`] are
/// rejected even when the path was built step by step. Never mutates.
pub fn check(root: &Value, steps: &[Step]) -> Result<()> {
    if let Some(step) = steps.iter().find(|s| matches!(s, Step::Index(i) if *i > MAX_INDEX)) {
        return Err(StoreError::PathType(format!(
            "index {} out of range (max {MAX_INDEX})",
            format_steps(std::slice::from_ref(step))
        )));
    }

    let mut current = root;
    for (depth, step) in steps.iter().enumerate() {
        if is_vacant(current) {
            return Ok(());
        }
        let next = match (step, current) {
            (Step::Key(key), Value::Object(map)) => map.get(key),
            (Step::Index(index), Value::Array(items)) => items.get(*index),
            (step, node) => return Err(conflict(&steps[..depth], step.container_kind(), node)),
        };
        match next {
            Some(next) => current = next,
            None => return Ok(()),
        }
    }
    Ok(())
}

/// Walk `parent` from `root`, creating missing containers, and return the
/// parent container ready to receive `target`.
///
/// Each created container is a mapping unless the step applied to it is an
/// index, in which case it is a sequence. Sequences grown to reach an index are
/// padded with nulls. Callers run [`check`] first so this never fails midway.
pub fn vivify<'v>(
    root: &'v mut Value,
    parent: &[Step],
    target: Option<&Step>,
) -> Result<&'v mut Value> {
    let mut current = root;
    for (depth, step) in parent.iter().enumerate() {
        current = descend(current, step, &parent[..depth])?;
    }

    if let Some(step) = target {
        if is_vacant(current) {
            *current = step.empty_container();
        } else if !step.fits(current) {
            return Err(conflict(parent, step.container_kind(), current));
        }
    }
    Ok(current)
}

fn descend<'v>(node: &'v mut Value, step: &Step, at: &[Step]) -> Result<&'v mut Value> {
    if is_vacant(node) {
        *node = step.empty_container();
    }
    match (step, node) {
        (Step::Key(key), Value::Object(map)) => Ok(map.entry(key.clone()).or_insert(Value::Null)),
        (Step::Index(index), Value::Array(items)) => {
            if !pad_to(items, *index) {
                return Err(StoreError::PathType(format!("index [{index}] out of range")));
            }
            Ok(&mut items[*index])
        }
        (step, node) => Err(conflict(at, step.container_kind(), node)),
    }
}

/// Grow `items` with nulls so `index` is in bounds. False if `index + 1`
/// overflows; path indices are already bounded by [`check`].
pub(crate) fn pad_to(items: &mut Vec<Value>, index: usize) -> bool {
    let Some(len) = index.checked_add(1) else {
        return false;
    };
    if items.len() < len {
        items.resize(len, Value::Null);
    }
    true
}

/// Read the value at `steps` without creating anything.
pub fn lookup<'v>(root: &'v Value, steps: &[Step]) -> Option<&'v Value> {
    steps.iter().try_fold(root, |node, step| match (step, node) {
        (Step::Key(key), Value::Object(map)) => map.get(key),
        (Step::Index(index), Value::Array(items)) => items.get(*index),
        _ => None,
    })
}

/// Mutable counterpart of [`lookup`].
pub(crate) fn lookup_mut<'v>(root: &'v mut Value, steps: &[Step]) -> Option<&'v mut Value> {
    steps.iter().try_fold(root, |node, step| match (step, node) {
        (Step::Key(key), Value::Object(map)) => map.get_mut(key),
        (Step::Index(index), Value::Array(items)) => items.get_mut(*index),
        _ => None,
    })
}

/// A segment in a path pattern.
#[derive(Debug, Clone, PartialEq)]
enum PatternSegment {
    /// Exact literal match for this segment
    Literal(String),
    /// Single wildcard (*) - matches exactly one segment when mid-path,
    /// or any suffix when at the end
    Wildcard,
}

/// A glob-style path pattern.
///
/// Supported patterns:
/// - Exact: "/devices/abc/status"
/// - Suffix wildcard: "/devices/*"
/// - Mid-path wildcard: "/devices/*/status"
/// - Full wildcard: "*"
///
/// Segment-based matching, cheaper than a regular expression for the common
/// "any device" subscriptions.
#[derive(Debug, Clone)]
pub struct PathPattern {
    raw: String,
    segments: Vec<PatternSegment>,
    /// True if the pattern ends with a wildcard (matches any suffix)
    trailing_wildcard: bool,
}

impl PathPattern {
    /// Create a new path pattern.
    ///
    /// Pattern syntax:
    /// - `*` at end matches any suffix (e.g., "devices/*" matches "/devices/abc/status/temp")
    /// - `*` in middle matches exactly one segment (e.g., "devices/*/status")
    /// - `*` alone matches any path
    pub fn new(pattern: &str) -> std::result::Result<Self, PatternError> {
        let parts: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();

        if parts.is_empty() {
            return Err(PatternError::EmptyPattern);
        }

        let trailing_wildcard = parts.last() == Some(&"*");

        let segments = parts
            .iter()
            .map(|&s| {
                if s == "*" {
                    PatternSegment::Wildcard
                } else {
                    PatternSegment::Literal(s.to_string())
                }
            })
            .collect();

        Ok(Self {
            raw: pattern.to_string(),
            segments,
            trailing_wildcard,
        })
    }

    /// Check if a path matches this pattern.
    pub fn matches(&self, path: &str) -> bool {
        self.captures(path).is_some()
    }

    /// Match a path, returning the text matched by each wildcard in order.
    ///
    /// A trailing wildcard captures the whole remaining suffix joined by '/'.
    pub fn captures(&self, path: &str) -> Option<Vec<String>> {
        let path_parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        if self.trailing_wildcard {
            if path_parts.len() < self.segments.len() {
                return None;
            }
        } else if path_parts.len() != self.segments.len() {
            return None;
        }

        let mut captured = Vec::new();
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                PatternSegment::Literal(lit) => {
                    if path_parts[i] != lit {
                        return None;
                    }
                }
                PatternSegment::Wildcard => {
                    if self.trailing_wildcard && i == self.segments.len() - 1 {
                        captured.push(path_parts[i..].join("/"));
                        return Some(captured);
                    }
                    captured.push(path_parts[i].to_string());
                }
            }
        }

        Some(captured)
    }

    /// Get the raw pattern string.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

/// Errors that can occur when creating a path pattern.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PatternError {
    #[error("Empty pattern")]
    EmptyPattern,
}
