//! # xweb-core
//!
//! Core of the xweb reactive document store.
//!
//! This crate provides:
//! - Path parsing, resolution and glob matching
//! - Differencing merge producing change records
//! - Subscription registry (exact and pattern observers)
//! - Observable value holders
//!
//! This crate is intentionally runtime-agnostic and contains no async code;
//! the `xweb-store` crate adds the single-writer queue and persistence.

pub mod diff;
pub mod document;
pub mod error;
pub mod model;
pub mod path;
pub mod subscription;
pub mod watch;

pub use diff::Merge;
pub use document::Document;
pub use error::{NodeKind, Result, StoreError};
pub use model::{ChangeKind, ChangeRecord};
pub use path::{DocPath, IntoDocPath, PathPattern, Step};
pub use subscription::{
    DeliveryFailure, Matcher, Notification, PatternMatch, SubscriberError, SubscriptionId,
    SubscriptionRegistry,
};
pub use watch::{Watched, WatchedMap};
