//! Subscription registry for change notifications.
//!
//! Observers register against an exact path, a regular expression, or a glob
//! pattern. For every change record, exact subscribers for that path run first,
//! in registration order, then every matching pattern subscriber, in
//! registration order.
//!
//! A failing or panicking callback never stops delivery to the others; its
//! failure is collected and handed back to the caller of [`SubscriptionRegistry::notify`].

use crate::model::ChangeRecord;
use crate::path::{DocPath, PathPattern};
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

/// Error returned by a subscriber callback.
pub type SubscriberError = Box<dyn std::error::Error + Send + Sync>;

/// Callback invoked for each matching change.
pub type Callback =
    Arc<dyn Fn(&Notification<'_>) -> Result<(), SubscriberError> + Send + Sync>;

/// Opaque handle identifying one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

/// What a subscription listens to.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// One literal path, compared in canonical form
    Exact(String),
    /// Regular expression tested against the change path
    Regex(Regex),
    /// Glob pattern over path segments
    Glob(PathPattern),
}

impl Matcher {
    /// Exact matcher for a path. The path is normalised so "x/y" and "/x/y/"
    /// listen to the same records; unparseable input is kept verbatim.
    pub fn exact(path: &str) -> Self {
        let canonical = DocPath::parse(path)
            .map(|p| p.to_string())
            .unwrap_or_else(|_| path.to_string());
        Matcher::Exact(canonical)
    }

    /// Regular expression matcher.
    pub fn regex(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(Matcher::Regex)
    }

    /// Glob matcher (see [`PathPattern`]).
    pub fn glob(pattern: &str) -> Result<Self, crate::path::PatternError> {
        PathPattern::new(pattern).map(Matcher::Glob)
    }
}

impl From<&str> for Matcher {
    fn from(path: &str) -> Self {
        Matcher::exact(path)
    }
}

impl From<String> for Matcher {
    fn from(path: String) -> Self {
        Matcher::exact(&path)
    }
}

impl From<Regex> for Matcher {
    fn from(regex: Regex) -> Self {
        Matcher::Regex(regex)
    }
}

impl From<PathPattern> for Matcher {
    fn from(pattern: PathPattern) -> Self {
        Matcher::Glob(pattern)
    }
}

/// Groups captured by a pattern subscription.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatternMatch {
    /// Numbered groups; index 0 is the whole match. For glob patterns index 0
    /// is the path and the wildcards follow in order.
    pub groups: Vec<Option<String>>,
    /// Named groups that participated in the match.
    pub named: BTreeMap<String, String>,
}

impl PatternMatch {
    /// Get a numbered group.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.groups.get(index).and_then(|g| g.as_deref())
    }

    /// Get a named group.
    pub fn name(&self, name: &str) -> Option<&str> {
        self.named.get(name).map(String::as_str)
    }
}

/// What a callback receives.
#[derive(Debug, Clone)]
pub struct Notification<'a> {
    pub change: &'a ChangeRecord,
    /// Present for pattern subscriptions only.
    pub captures: Option<PatternMatch>,
}

/// A callback that failed while being notified.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryFailure {
    pub subscription: SubscriptionId,
    /// Path of the change being delivered.
    pub path: String,
    pub message: String,
}

struct Entry {
    id: SubscriptionId,
    callback: Callback,
}

/// Matchers kept in the pattern list; exact paths live in their own map.
#[derive(Debug)]
enum Pattern {
    Regex(Regex),
    Glob(PathPattern),
}

struct PatternEntry {
    id: SubscriptionId,
    pattern: Pattern,
    callback: Callback,
}

#[derive(Default)]
struct Registry {
    exact: HashMap<String, Vec<Entry>>,
    patterns: Vec<PatternEntry>,
}

/// Holds exact-path and pattern subscriptions.
///
/// Safe to share between threads. Callbacks run without any registry lock
/// held, so a callback may itself subscribe or unsubscribe.
#[derive(Default)]
pub struct SubscriptionRegistry {
    inner: Mutex<Registry>,
    next_id: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a callback and return its handle.
    pub fn subscribe<M, F>(&self, matcher: M, callback: F) -> SubscriptionId
    where
        M: Into<Matcher>,
        F: Fn(&Notification<'_>) -> Result<(), SubscriberError> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let callback: Callback = Arc::new(callback);
        let mut registry = self.lock();

        let pattern = match matcher.into() {
            Matcher::Exact(path) => {
                debug!("registering {} for {}", id, path);
                registry.exact.entry(path).or_default().push(Entry { id, callback });
                return id;
            }
            Matcher::Regex(regex) => Pattern::Regex(regex),
            Matcher::Glob(glob) => Pattern::Glob(glob),
        };

        debug!("registering {} for pattern {:?}", id, pattern);
        registry.patterns.push(PatternEntry {
            id,
            pattern,
            callback,
        });
        id
    }

    /// Remove exactly the registration identified by `id`.
    ///
    /// Returns false if the handle was unknown or already removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut registry = self.lock();

        if let Some(pos) = registry.patterns.iter().position(|e| e.id == id) {
            registry.patterns.remove(pos);
            debug!("removed {}", id);
            return true;
        }

        let mut removed = false;
        registry.exact.retain(|_, entries| {
            if let Some(pos) = entries.iter().position(|e| e.id == id) {
                entries.remove(pos);
                removed = true;
            }
            !entries.is_empty()
        });
        if removed {
            debug!("removed {}", id);
        }
        removed
    }

    /// Number of active registrations.
    pub fn len(&self) -> usize {
        let registry = self.lock();
        registry.exact.values().map(Vec::len).sum::<usize>() + registry.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver one change to every matching subscriber.
    pub fn notify(&self, change: &ChangeRecord) -> Vec<DeliveryFailure> {
        let targets = self.matching(change);
        let mut failures = Vec::new();

        for (id, callback, captures) in targets {
            debug!("notifying {} of {:?} {}", id, change.kind, change.path);
            let notification = Notification { change, captures };
            let outcome = catch_unwind(AssertUnwindSafe(|| callback(&notification)));

            let message = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err.to_string(),
                Err(panic) => panic_message(panic.as_ref()),
            };
            warn!("subscriber {} failed on {}: {}", id, change.path, message);
            failures.push(DeliveryFailure {
                subscription: id,
                path: change.path.clone(),
                message,
            });
        }

        failures
    }

    /// Deliver a batch of changes in order.
    pub fn notify_all<'c, I>(&self, changes: I) -> Vec<DeliveryFailure>
    where
        I: IntoIterator<Item = &'c ChangeRecord>,
    {
        changes
            .into_iter()
            .flat_map(|change| self.notify(change))
            .collect()
    }

    /// Snapshot the callbacks matching a change, exact subscribers first.
    fn matching(
        &self,
        change: &ChangeRecord,
    ) -> Vec<(SubscriptionId, Callback, Option<PatternMatch>)> {
        let registry = self.lock();
        let mut targets = Vec::new();

        if let Some(entries) = registry.exact.get(&change.path) {
            targets.extend(entries.iter().map(|e| (e.id, e.callback.clone(), None)));
        }

        for entry in &registry.patterns {
            if let Some(captures) = match_pattern(&entry.pattern, &change.path) {
                targets.push((entry.id, entry.callback.clone(), Some(captures)));
            }
        }

        targets
    }
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("subscriptions", &self.len())
            .finish()
    }
}

fn match_pattern(pattern: &Pattern, path: &str) -> Option<PatternMatch> {
    match pattern {
        Pattern::Regex(regex) => {
            let caps = regex.captures(path)?;
            let groups = caps
                .iter()
                .map(|g| g.map(|m| m.as_str().to_string()))
                .collect();
            let named = regex
                .capture_names()
                .flatten()
                .filter_map(|name| {
                    caps.name(name)
                        .map(|m| (name.to_string(), m.as_str().to_string()))
                })
                .collect();
            Some(PatternMatch { groups, named })
        }
        Pattern::Glob(glob) => {
            let wildcards = glob.captures(path)?;
            let groups = std::iter::once(Some(path.to_string()))
                .chain(wildcards.into_iter().map(Some))
                .collect();
            Some(PatternMatch {
                groups,
                named: BTreeMap::new(),
            })
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}
