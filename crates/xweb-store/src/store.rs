//! The async document store facade.
//!
//! Every mutating call (`post`, `post_now`, `save`, `load`) takes the tree's
//! write lock. tokio's `RwLock` is fair, so writers are served one at a time
//! in arrival order and no two mutations ever interleave. Subscribers are
//! notified while the write lock is still held, so notification order across
//! calls matches mutation order.
//!
//! A store opened on a backing file starts `Uninitialized`. The first
//! operation starts the load; every operation issued while it is in flight
//! waits for that same load.

use crate::config::StoreConfig;
use crate::fs::{FileSystem, TokioFs};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::sync::{Mutex, OnceCell, RwLock, RwLockWriteGuard};
use tracing::{debug, info, warn};
use xweb_core::{
    ChangeRecord, DeliveryFailure, Document, IntoDocPath, Matcher, Notification, Result,
    StoreError, SubscriberError, SubscriptionId, SubscriptionRegistry,
};

/// Lifecycle state of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    /// Opened on a backing file that has not been read yet.
    Uninitialized,
    /// The backing file is being read.
    Loading,
    Ready,
}

impl StoreState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => StoreState::Uninitialized,
            1 => StoreState::Loading,
            _ => StoreState::Ready,
        }
    }
}

/// Whether a `post_now_with_save` call persisted the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Persisted {
    NotRequested,
    Saved,
    /// The changes were applied but the save failed.
    Failed(String),
}

/// Result of one `post` call.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Change records in emission order.
    pub changes: Vec<ChangeRecord>,
    /// Subscribers that failed while being notified of these changes.
    pub delivery_failures: Vec<DeliveryFailure>,
    pub persisted: Persisted,
}

impl Batch {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }
}

impl IntoIterator for Batch {
    type Item = ChangeRecord;
    type IntoIter = std::vec::IntoIter<ChangeRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.into_iter()
    }
}

struct State {
    doc: Document,
    backing: Option<PathBuf>,
}

/// In-memory reactive document store.
pub struct Store<F: FileSystem = TokioFs> {
    tree: OnceCell<RwLock<State>>,
    /// Backing file to read on first use.
    pending_load: Option<PathBuf>,
    state: AtomicU8,
    registry: SubscriptionRegistry,
    /// Orders backing-file writes.
    io: Mutex<()>,
    fs: F,
    pretty: bool,
}

impl Store<TokioFs> {
    /// Create an empty store with no backing file.
    pub fn new() -> Self {
        Self::from_document(Document::new(), None, TokioFs, true)
    }

    /// Create a store holding `tree`. The root must be a mapping.
    pub fn with_tree(tree: Value) -> Result<Self> {
        Ok(Self::from_document(Document::from_tree(tree)?, None, TokioFs, true))
    }

    /// Open a store on the local disk.
    pub fn open(config: StoreConfig) -> Self {
        Self::open_with(config, TokioFs)
    }
}

impl Default for Store<TokioFs> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: FileSystem> Store<F> {
    /// Open a store using `fs` for the backing file.
    pub fn open_with(config: StoreConfig, fs: F) -> Self {
        match config.backing_path {
            Some(path) if config.load_on_open => Self {
                tree: OnceCell::new(),
                pending_load: Some(path),
                state: AtomicU8::new(StoreState::Uninitialized as u8),
                registry: SubscriptionRegistry::new(),
                io: Mutex::new(()),
                fs,
                pretty: config.pretty,
            },
            backing => Self::from_document(Document::new(), backing, fs, config.pretty),
        }
    }

    /// Create a ready store holding `doc`.
    pub fn from_document(doc: Document, backing: Option<PathBuf>, fs: F, pretty: bool) -> Self {
        Self {
            tree: OnceCell::new_with(Some(RwLock::new(State { doc, backing }))),
            pending_load: None,
            state: AtomicU8::new(StoreState::Ready as u8),
            registry: SubscriptionRegistry::new(),
            io: Mutex::new(()),
            fs,
            pretty,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> StoreState {
        StoreState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: StoreState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// The tree, loading it first if this is the first operation.
    ///
    /// Concurrent first callers share the one initialisation, which is the
    /// only place the lifecycle moves from Uninitialized to Ready.
    async fn ready(&self) -> &RwLock<State> {
        self.tree
            .get_or_init(|| async {
                self.set_state(StoreState::Loading);
                let doc = match &self.pending_load {
                    Some(path) => self.read_document(path).await,
                    None => Document::new(),
                };
                self.set_state(StoreState::Ready);
                RwLock::new(State {
                    doc,
                    backing: self.pending_load.clone(),
                })
            })
            .await
    }

    /// Read and parse a backing file, recovering to an empty tree on failure.
    async fn read_document(&self, path: &Path) -> Document {
        let bytes = match self.fs.read(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to read store from {}: {}; starting empty", path.display(), e);
                return Document::new();
            }
        };

        let parsed = serde_json::from_slice::<Value>(&bytes)
            .map_err(StoreError::from)
            .and_then(Document::from_tree);
        match parsed {
            Ok(doc) => {
                info!("Loaded store from {}", path.display());
                doc
            }
            Err(e) => {
                warn!("Failed to parse store from {}: {}; starting empty", path.display(), e);
                Document::new()
            }
        }
    }

    /// Read the value at `path`. Never modifies the tree.
    pub async fn get<P: IntoDocPath>(&self, path: P) -> Result<Option<Value>> {
        let path = path.into_doc_path()?;
        let state = self.ready().await.read().await;
        Ok(state.doc.get(&path)?.cloned())
    }

    /// Deep copy of the whole tree.
    pub async fn snapshot(&self) -> Value {
        self.ready().await.read().await.doc.tree().clone()
    }

    /// Backing file used by `save`, if any.
    pub async fn backing_path(&self) -> Option<PathBuf> {
        self.ready().await.read().await.backing.clone()
    }

    /// Merge `data` at `path`, notify subscribers and return the changes.
    ///
    /// Does not persist.
    pub async fn post<P: IntoDocPath>(&self, path: P, data: Value) -> Result<Batch> {
        let path = path.into_doc_path()?;
        let mut state = self.ready().await.write().await;
        let (changes, delivery_failures) = self.apply(&mut state, &path, data)?;
        Ok(Batch {
            changes,
            delivery_failures,
            persisted: Persisted::NotRequested,
        })
    }

    /// Same as [`post`](Self::post).
    pub async fn post_now<P: IntoDocPath>(&self, path: P, data: Value) -> Result<Batch> {
        self.post_now_with_save(false, path, data).await
    }

    /// Post, then save the resulting tree when `should_save` is true.
    ///
    /// The saved snapshot is exactly the tree this post produced. A failed
    /// save is reported in [`Batch::persisted`]; the changes stay applied.
    pub async fn post_now_with_save<P: IntoDocPath>(
        &self,
        should_save: bool,
        path: P,
        data: Value,
    ) -> Result<Batch> {
        let path = path.into_doc_path()?;
        let mut state = self.ready().await.write().await;
        let (changes, delivery_failures) = self.apply(&mut state, &path, data)?;

        let persisted = if should_save {
            match self.persist(state).await {
                Ok(()) => Persisted::Saved,
                Err(e) => {
                    warn!("Save after post to {} failed: {}", path, e);
                    Persisted::Failed(e.to_string())
                }
            }
        } else {
            Persisted::NotRequested
        };

        Ok(Batch {
            changes,
            delivery_failures,
            persisted,
        })
    }

    fn apply(
        &self,
        state: &mut State,
        path: &xweb_core::DocPath,
        data: Value,
    ) -> Result<(Vec<ChangeRecord>, Vec<DeliveryFailure>)> {
        let changes = state.doc.post(path, data)?;
        debug!("post to {} produced {} change(s)", path, changes.len());
        let failures = self.registry.notify_all(&changes);
        Ok((changes, failures))
    }

    /// Read the backing file at `path`, replacing the tree.
    ///
    /// A missing or unparseable file leaves an empty tree; the failure is
    /// logged, never returned. `path` becomes the backing path for `save`.
    /// As the first operation on a store opened on another file, this read
    /// replaces the pending one instead of following it.
    pub async fn load(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        let mut initialised_here = false;
        let tree = {
            let initialised_here = &mut initialised_here;
            let path = &path;
            self.tree
                .get_or_init(move || async move {
                    *initialised_here = true;
                    self.set_state(StoreState::Loading);
                    let doc = self.read_document(path).await;
                    self.set_state(StoreState::Ready);
                    RwLock::new(State {
                        doc,
                        backing: Some(path.clone()),
                    })
                })
                .await
        };
        if initialised_here {
            return;
        }

        let mut state = tree.write().await;
        self.set_state(StoreState::Loading);
        state.doc = self.read_document(&path).await;
        state.backing = Some(path);
        self.set_state(StoreState::Ready);
    }

    /// Write the whole tree to the backing file.
    pub async fn save(&self) -> Result<()> {
        let state = self.ready().await.write().await;
        self.persist(state).await
    }

    /// Serialize under the write lock, then release it and write the file.
    ///
    /// The I/O lock is taken before the write lock is released so backing
    /// file writes happen in queue order.
    async fn persist(&self, state: RwLockWriteGuard<'_, State>) -> Result<()> {
        let path = state.backing.clone().ok_or(StoreError::NoBackingPath)?;
        let bytes = if self.pretty {
            serde_json::to_vec_pretty(state.doc.tree())?
        } else {
            serde_json::to_vec(state.doc.tree())?
        };

        let _io = self.io.lock().await;
        drop(state);

        self.fs
            .write(&path, bytes)
            .await
            .map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;
        info!("Saved store to {}", path.display());
        Ok(())
    }

    /// Register an observer. See [`SubscriptionRegistry::subscribe`].
    ///
    /// Callbacks run synchronously while the posting call still holds the
    /// write lock; they must not block on this store.
    pub fn subscribe<M, C>(&self, matcher: M, callback: C) -> SubscriptionId
    where
        M: Into<Matcher>,
        C: Fn(&Notification<'_>) -> std::result::Result<(), SubscriberError>
            + Send
            + Sync
            + 'static,
    {
        self.registry.subscribe(matcher, callback)
    }

    /// Remove exactly the registration identified by `id`.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.registry.unsubscribe(id)
    }

    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.registry
    }
}

impl<F: FileSystem> std::fmt::Debug for Store<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("state", &self.state())
            .field("registry", &self.registry)
            .finish()
    }
}
