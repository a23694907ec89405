//! Directory watching backed by the `notify` crate.
//!
//! The note store has no server to push change notifications, so each
//! writer must notice other writers' files appearing on disk itself. This
//! bridges `notify`'s synchronous callback into the async world: the
//! callback runs on notify's own thread and forwards events into a channel
//! drained by a spawned task, which invokes the caller's handler.

use std::path::{Path, PathBuf};
use std::sync::mpsc as std_mpsc;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

/// Coarse classification of a filesystem change under a watched directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    /// A file or directory was created.
    Created,
    /// A file's contents or metadata changed.
    Modified,
    /// A file or directory was removed.
    Removed,
    /// Some other change notify reported that doesn't fit the above.
    Other,
}

impl From<&EventKind> for WatchEventKind {
    fn from(kind: &EventKind) -> Self {
        match kind {
            EventKind::Create(_) => WatchEventKind::Created,
            EventKind::Modify(_) => WatchEventKind::Modified,
            EventKind::Remove(_) => WatchEventKind::Removed,
            _ => WatchEventKind::Other,
        }
    }
}

/// A single filesystem change observed under a watched directory.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    /// Paths the underlying notify event referred to.
    pub paths: Vec<PathBuf>,
    /// What kind of change occurred.
    pub kind: WatchEventKind,
}

/// A live recursive watch on a directory.
///
/// Dropping the handle stops the watch: the underlying `RecommendedWatcher`
/// is torn down and the bridging task exits once its channel closes.
pub struct DirectoryWatcher {
    _watcher: RecommendedWatcher,
}

impl DirectoryWatcher {
    /// Start watching `path` recursively, invoking `on_event` for every
    /// change notify reports. Errors from notify itself are logged and
    /// dropped; they don't have a natural `WatchEvent` to carry.
    pub fn start(
        path: &Path,
        on_event: Box<dyn Fn(WatchEvent) + Send + Sync>,
    ) -> std::io::Result<Self> {
        let (tx, rx) = std_mpsc::channel::<notify::Result<Event>>();

        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            notify::Config::default(),
        )
        .map_err(notify_to_io)?;

        watcher
            .watch(path, RecursiveMode::Recursive)
            .map_err(notify_to_io)?;

        let (bridge_tx, mut bridge_rx) = mpsc::unbounded_channel::<Event>();
        std::thread::spawn(move || {
            while let Ok(res) = rx.recv() {
                match res {
                    Ok(event) => {
                        if bridge_tx.send(event).is_err() {
                            break;
                        }
                    }
                    Err(err) => log::warn!("directory watch error: {err}"),
                }
            }
        });

        tokio::spawn(async move {
            while let Some(event) = bridge_rx.recv().await {
                on_event(WatchEvent {
                    kind: WatchEventKind::from(&event.kind),
                    paths: event.paths,
                });
            }
        });

        Ok(Self { _watcher: watcher })
    }
}

fn notify_to_io(err: notify::Error) -> std::io::Error {
    std::io::Error::other(err)
}
