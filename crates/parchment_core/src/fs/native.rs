//! Native filesystem implementation backed by `tokio::fs`.

use std::path::Path;

use super::{BoxFuture, DirListing, DirectoryWatcher, FileSystem, WatchEvent};

/// Maps [`FileSystem`] operations onto `tokio::fs`, so every call genuinely
/// runs on tokio's blocking I/O pool rather than the calling task.
#[derive(Clone, Copy, Default)]
pub struct RealFileSystem;

impl FileSystem for RealFileSystem {
    fn exists<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, bool> {
        Box::pin(async move { tokio::fs::metadata(path).await.is_ok() })
    }

    fn mkdir_p<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, std::io::Result<()>> {
        Box::pin(async move { tokio::fs::create_dir_all(path).await })
    }

    fn read_file<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, std::io::Result<Vec<u8>>> {
        Box::pin(async move { tokio::fs::read(path).await })
    }

    fn write_file<'a>(
        &'a self,
        path: &'a Path,
        content: &'a [u8],
    ) -> BoxFuture<'a, std::io::Result<()>> {
        Box::pin(async move {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let tmp = tmp_path(path);
            tokio::fs::write(&tmp, content).await?;
            tokio::fs::rename(&tmp, path).await
        })
    }

    fn read_dir<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, DirListing> {
        Box::pin(async move {
            let mut dir = match tokio::fs::read_dir(path).await {
                Ok(dir) => dir,
                Err(err) => return DirListing::Error(err.to_string()),
            };
            let mut entries = Vec::new();
            loop {
                match dir.next_entry().await {
                    Ok(Some(entry)) => entries.push(entry.path()),
                    Ok(None) => break,
                    Err(err) => return DirListing::Error(err.to_string()),
                }
            }
            DirListing::Entries(entries)
        })
    }

    fn watch(
        &self,
        path: &Path,
        on_event: Box<dyn Fn(WatchEvent) + Send + Sync>,
    ) -> std::io::Result<DirectoryWatcher> {
        DirectoryWatcher::start(path, on_event)
    }
}

fn tmp_path(path: &Path) -> std::path::PathBuf {
    let file_name = path
        .file_name()
        .map(|n| format!(".{}.tmp", n.to_string_lossy()))
        .unwrap_or_else(|| ".tmp".to_string());
    path.with_file_name(file_name)
}
