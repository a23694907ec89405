//! In-memory filesystem test double.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use super::{BoxFuture, DirListing, DirectoryWatcher, FileSystem, WatchEvent};

/// An in-memory stand-in for [`FileSystem`], used by unit and integration
/// tests that need deterministic, fast, disk-free I/O.
///
/// Watching is unsupported: tests exercise the watcher-driven paths against
/// [`super::RealFileSystem`] and real temp directories instead.
#[derive(Default)]
pub struct InMemoryFileSystem {
    files: RwLock<HashMap<PathBuf, Vec<u8>>>,
}

impl InMemoryFileSystem {
    /// Create an empty in-memory filesystem.
    pub fn new() -> Self {
        Self::default()
    }

    fn is_dir_prefix(&self, path: &Path) -> bool {
        let files = self.files.read().unwrap();
        files.keys().any(|p| p != path && p.starts_with(path))
    }
}

impl FileSystem for InMemoryFileSystem {
    fn exists<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            self.files.read().unwrap().contains_key(path) || self.is_dir_prefix(path)
        })
    }

    fn mkdir_p<'a>(&'a self, _path: &'a Path) -> BoxFuture<'a, std::io::Result<()>> {
        // Directories are implicit in the key space; nothing to create.
        Box::pin(async move { Ok(()) })
    }

    fn read_file<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, std::io::Result<Vec<u8>>> {
        Box::pin(async move {
            self.files
                .read()
                .unwrap()
                .get(path)
                .cloned()
                .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::NotFound))
        })
    }

    fn write_file<'a>(
        &'a self,
        path: &'a Path,
        content: &'a [u8],
    ) -> BoxFuture<'a, std::io::Result<()>> {
        Box::pin(async move {
            self.files
                .write()
                .unwrap()
                .insert(path.to_path_buf(), content.to_vec());
            Ok(())
        })
    }

    fn read_dir<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, DirListing> {
        Box::pin(async move {
            let files = self.files.read().unwrap();
            let mut seen = std::collections::BTreeSet::new();
            for key in files.keys() {
                if let Ok(rest) = key.strip_prefix(path)
                    && let Some(first) = rest.iter().next()
                {
                    seen.insert(path.join(first));
                }
            }
            if seen.is_empty() {
                DirListing::Error(format!("no such directory: {}", path.display()))
            } else {
                DirListing::Entries(seen.into_iter().collect())
            }
        })
    }

    fn watch(
        &self,
        _path: &Path,
        _on_event: Box<dyn Fn(WatchEvent) + Send + Sync>,
    ) -> std::io::Result<DirectoryWatcher> {
        Err(std::io::Error::other(
            "InMemoryFileSystem does not support watching",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let fs = InMemoryFileSystem::new();
        let path = Path::new("/root/notes/a.yjson");
        fs.write_file(path, b"data").await.unwrap();
        assert!(fs.exists(path).await);
        assert_eq!(fs.read_file(path).await.unwrap(), b"data");
    }

    #[tokio::test]
    async fn read_missing_file_is_not_found() {
        let fs = InMemoryFileSystem::new();
        let err = fs.read_file(Path::new("/missing")).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn read_dir_lists_direct_children_only() {
        let fs = InMemoryFileSystem::new();
        fs.write_file(Path::new("/root/notes/a/one.yjson"), b"{}")
            .await
            .unwrap();
        fs.write_file(Path::new("/root/notes/b.yjson"), b"{}")
            .await
            .unwrap();

        let listing = fs.read_dir(Path::new("/root/notes")).await;
        let entries = listing.entries_or_empty();
        assert_eq!(entries.len(), 2);
        assert!(entries.contains(&PathBuf::from("/root/notes/a")));
        assert!(entries.contains(&PathBuf::from("/root/notes/b.yjson")));
    }
}
