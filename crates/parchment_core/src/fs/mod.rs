//! Filesystem capability abstraction (§4.1).
//!
//! Everything the rest of the crate needs from "the filesystem" is expressed
//! through [`FileSystem`], an object-safe async trait. This keeps the store
//! injectable (a real implementation for production, an in-memory one for
//! tests) and keeps every I/O call explicitly awaited, per the suspension
//! points documented in the spec's concurrency model.

mod memory;
mod native;
mod watch;

pub use memory::InMemoryFileSystem;
pub use native::RealFileSystem;
pub use watch::{DirectoryWatcher, WatchEvent, WatchEventKind};

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

/// A boxed, `Send` future, used to keep [`FileSystem`] object-safe.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result of listing a directory: either the entries it contains, or a
/// structured failure (missing directory, permission error, ...).
///
/// Mirrors the spec's `{success, entries}|{success:false,error}` contract.
#[derive(Debug, Clone)]
pub enum DirListing {
    /// Directory was read successfully.
    Entries(Vec<PathBuf>),
    /// Directory could not be read (including "does not exist").
    Error(String),
}

impl DirListing {
    /// Entries if the listing succeeded, or an empty vec if it failed.
    ///
    /// Per §4.5's "missing `updates/` directory during read: treat as empty",
    /// callers that only care about iterating known files should use this.
    pub fn entries_or_empty(&self) -> &[PathBuf] {
        match self {
            DirListing::Entries(entries) => entries,
            DirListing::Error(_) => &[],
        }
    }
}

/// Abstraction over filesystem operations used by the note store (§4.1, §6).
///
/// Implementations must make directory recursion best-effort but entries
/// within one directory authoritative. All operations are async so that
/// blocking I/O never stalls the caller's executor.
pub trait FileSystem: Send + Sync {
    /// Does `path` exist (file or directory)?
    fn exists<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, bool>;

    /// Create `path` and all missing parent directories.
    fn mkdir_p<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, std::io::Result<()>>;

    /// Read a whole file into memory. `NotFound` is reported via the
    /// `std::io::Error` kind, not a sentinel value.
    fn read_file<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, std::io::Result<Vec<u8>>>;

    /// Overwrite (or create) a file, creating parent directories first.
    ///
    /// Implementations should make this as close to atomic as the platform
    /// allows (write-temp + rename); see §5's shared-resource policy on meta
    /// files for why this matters.
    fn write_file<'a>(
        &'a self,
        path: &'a Path,
        content: &'a [u8],
    ) -> BoxFuture<'a, std::io::Result<()>>;

    /// List the direct children of a directory.
    fn read_dir<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, DirListing>;

    /// Watch `path` recursively, delivering events to `on_event` until the
    /// returned handle is dropped or passed to [`FileSystem::unwatch`].
    fn watch(
        &self,
        path: &Path,
        on_event: Box<dyn Fn(WatchEvent) + Send + Sync>,
    ) -> std::io::Result<DirectoryWatcher>;

    /// Stop a watch started with [`FileSystem::watch`].
    ///
    /// The default implementation simply drops the handle, which is
    /// sufficient for [`DirectoryWatcher`]'s `Drop` impl to tear down the
    /// underlying watcher.
    fn unwatch(&self, handle: DirectoryWatcher) {
        drop(handle);
    }
}
