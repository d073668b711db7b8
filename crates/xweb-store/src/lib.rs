//! # xweb-store
//!
//! Async facade over the xweb document tree.
//!
//! The [`Store`] owns the tree, serializes every mutation through a single
//! writer queue, notifies subscribers after each post, and loads and saves
//! the whole tree as JSON through a pluggable [`FileSystem`].

pub mod config;
pub mod fs;
pub mod store;

pub use config::StoreConfig;
pub use fs::{FileSystem, MemoryFs, TokioFs};
pub use store::{Batch, Persisted, Store, StoreState};
pub use xweb_core::{
    ChangeKind, ChangeRecord, DeliveryFailure, DocPath, Document, Matcher, Notification,
    PatternMatch, Result, StoreError, SubscriberError, SubscriptionId,
};
