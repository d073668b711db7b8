//! File system abstraction used for the backing file.
//!
//! The store only ever reads and writes whole files, so the trait is two
//! methods. [`TokioFs`] is the real implementation; [`MemoryFs`] keeps files in
//! memory for tests and embedders without a disk.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Async whole-file storage.
pub trait FileSystem: Send + Sync {
    /// Read the whole file at `path`.
    fn read<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, io::Result<Vec<u8>>>;

    /// Replace the file at `path` with `contents`.
    fn write<'a>(&'a self, path: &'a Path, contents: Vec<u8>) -> BoxFuture<'a, io::Result<()>>;
}

impl<F: FileSystem + ?Sized> FileSystem for Arc<F> {
    fn read<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, io::Result<Vec<u8>>> {
        (**self).read(path)
    }

    fn write<'a>(&'a self, path: &'a Path, contents: Vec<u8>) -> BoxFuture<'a, io::Result<()>> {
        (**self).write(path, contents)
    }
}

/// Local disk through `tokio::fs`.
///
/// Writes go to a sibling temporary file that is then renamed over the
/// target, so a crash mid-write never leaves a truncated backing file.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioFs;

impl FileSystem for TokioFs {
    fn read<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, io::Result<Vec<u8>>> {
        tokio::fs::read(path).boxed()
    }

    fn write<'a>(&'a self, path: &'a Path, contents: Vec<u8>) -> BoxFuture<'a, io::Result<()>> {
        async move {
            let mut tmp = path.as_os_str().to_owned();
            tmp.push(".tmp");
            let tmp = PathBuf::from(tmp);
            tokio::fs::write(&tmp, contents).await?;
            tokio::fs::rename(&tmp, path).await
        }
        .boxed()
    }
}

/// In-memory file system.
#[derive(Debug, Default)]
pub struct MemoryFs {
    files: Mutex<HashMap<PathBuf, Vec<u8>>>,
    fail_writes: AtomicBool,
    reads: AtomicUsize,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    fn files(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, Vec<u8>>> {
        self.files.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Put a file in place.
    pub fn insert(&self, path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) {
        self.files().insert(path.into(), contents.into());
    }

    /// Current contents of a file.
    pub fn contents(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        self.files().get(path.as_ref()).cloned()
    }

    /// Make every subsequent write fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of reads served so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl FileSystem for MemoryFs {
    fn read<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, io::Result<Vec<u8>>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let result = self.contents(path).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("{} not found", path.display()))
        });
        futures::future::ready(result).boxed()
    }

    fn write<'a>(&'a self, path: &'a Path, contents: Vec<u8>) -> BoxFuture<'a, io::Result<()>> {
        let result = if self.fail_writes.load(Ordering::SeqCst) {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "writes disabled"))
        } else {
            self.insert(path, contents);
            Ok(())
        };
        futures::future::ready(result).boxed()
    }
}
