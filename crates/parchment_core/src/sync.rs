//! Sync manager (§4.8): binds the registry, the store, and the directory
//! watcher together so that a local CRDT edit gets buffered and flushed,
//! and an external file change gets read back and replayed.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::codec;
use crate::crdt::{DocumentRegistry, NoteDocument, UpdateOrigin};
use crate::error::Result;
use crate::fs::{DirectoryWatcher, FileSystem, WatchEventKind};
use crate::store::UpdateStore;

/// Sync manager lifecycle state (§4.8 "Status").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    /// Not yet watching the notes root.
    Idle,
    /// Watching, no ingest currently in flight.
    Watching,
    /// Actively reading and applying updates for one note.
    Syncing,
    /// An unrecoverable error occurred; carries a description.
    Error(String),
}

/// Events the sync manager emits to subscribers (§6 "Event channel").
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// A note finished ingesting `count` new updates from peers.
    NoteSynced {
        /// Note that was synced.
        note_id: String,
        /// Number of new updates applied.
        count: usize,
    },
    /// A packed file disappeared from disk. No state is mutated — the CRDT
    /// state is additive, so a missing file is a no-op (§4.8, §9).
    FileRemoved {
        /// Note the vanished file belonged to.
        note_id: String,
    },
    /// The sync manager's status changed.
    StatusChanged(SyncStatus),
}

type EventListener = Box<dyn Fn(&SyncEvent) + Send + Sync>;

/// Composes the [`DocumentRegistry`], [`UpdateStore`], and [`DirectoryWatcher`]
/// into the local-edit/remote-edit data flow described in §2.
pub struct SyncManager<FS: FileSystem> {
    fs: Arc<FS>,
    notes_root: PathBuf,
    store: Arc<UpdateStore<FS>>,
    registry: Arc<DocumentRegistry>,
    status: Mutex<SyncStatus>,
    watcher: Mutex<Option<DirectoryWatcher>>,
    open_notes: Mutex<HashSet<String>>,
    listeners: Mutex<Vec<EventListener>>,
    stopped: std::sync::atomic::AtomicBool,
}

impl<FS: FileSystem + 'static> SyncManager<FS> {
    /// Build a sync manager over an already-constructed store and registry.
    ///
    /// Registers the registry's local-update listener once, for the
    /// lifetime of the manager, per §4.8's "on local CRDT update
    /// buffer+flush" binding.
    pub fn new(
        fs: Arc<FS>,
        notes_root: PathBuf,
        store: Arc<UpdateStore<FS>>,
        registry: Arc<DocumentRegistry>,
    ) -> Arc<Self> {
        let manager = Arc::new(SyncManager {
            fs,
            notes_root,
            store,
            registry: Arc::clone(&registry),
            status: Mutex::new(SyncStatus::Idle),
            watcher: Mutex::new(None),
            open_notes: Mutex::new(HashSet::new()),
            listeners: Mutex::new(Vec::new()),
            stopped: std::sync::atomic::AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&manager);
        registry.on_doc_updated(Box::new(move |event| {
            let Some(manager) = weak.upgrade() else {
                return;
            };
            if manager.stopped.load(std::sync::atomic::Ordering::SeqCst) {
                return;
            }
            let note_id = event.note_id.clone();
            let update = event.update.clone();
            tokio::spawn(async move {
                if let Err(err) = manager.store.add_update(&note_id, update).await {
                    log::warn!("failed to buffer local update for note {note_id}: {err}");
                }
            });
        }));

        manager
    }

    /// Subscribe to [`SyncEvent`]s.
    pub fn on_event(&self, listener: EventListener) {
        self.listeners.lock().unwrap().push(listener);
    }

    fn emit(&self, event: SyncEvent) {
        for listener in self.listeners.lock().unwrap().iter() {
            listener(&event);
        }
    }

    fn set_status(&self, status: SyncStatus) {
        *self.status.lock().unwrap() = status.clone();
        self.emit(SyncEvent::StatusChanged(status));
    }

    /// Current status.
    pub fn status(&self) -> SyncStatus {
        self.status.lock().unwrap().clone()
    }

    /// Ensure the store is initialized for `note_id` and return a live
    /// document handle for it (§4.8 "Binding").
    pub async fn open_note(self: &Arc<Self>, note_id: &str) -> Result<NoteDocument> {
        self.store.initialize(note_id).await?;
        self.open_notes.lock().unwrap().insert(note_id.to_string());
        Ok(self.registry.get_document(note_id))
    }

    /// Start watching the notes root recursively (§4.8 "Watching").
    pub fn start_watching(self: &Arc<Self>) -> Result<()> {
        let manager = Arc::clone(self);
        let handle = self
            .fs
            .watch(
                &self.notes_root,
                Box::new(move |event| {
                    if manager.stopped.load(std::sync::atomic::Ordering::SeqCst) {
                        return;
                    }
                    for path in &event.paths {
                        let Some(note_id) =
                            codec::note_id_from_update_path(&manager.notes_root, path)
                        else {
                            continue;
                        };
                        match event.kind {
                            WatchEventKind::Removed => {
                                manager.emit(SyncEvent::FileRemoved {
                                    note_id: note_id.clone(),
                                });
                            }
                            WatchEventKind::Created | WatchEventKind::Modified => {
                                let manager = Arc::clone(&manager);
                                tokio::spawn(async move {
                                    if let Err(err) = manager.ingest(&note_id).await {
                                        manager.set_status(SyncStatus::Error(err.to_string()));
                                    }
                                });
                            }
                            WatchEventKind::Other => {}
                        }
                    }
                }),
            )
            .map_err(crate::error::StoreError::Io)?;

        *self.watcher.lock().unwrap() = Some(handle);
        self.set_status(SyncStatus::Watching);
        Ok(())
    }

    /// Read new updates for `note_id` and apply each to its document with
    /// `Remote` origin, then emit `NoteSynced` (§4.8 "Ingest").
    pub async fn ingest(self: &Arc<Self>, note_id: &str) -> Result<()> {
        if self.stopped.load(std::sync::atomic::Ordering::SeqCst) {
            return Ok(());
        }
        self.set_status(SyncStatus::Syncing);
        let entries = self.store.read_new_updates(note_id).await?;
        for entry in &entries {
            if let Err(err) = self.registry.apply_state(note_id, &entry.update) {
                log::warn!(
                    "failed to apply update from {} seq {} for note {note_id}: {err}",
                    entry.instance_id,
                    entry.sequence
                );
            }
        }
        if !entries.is_empty() {
            self.emit(SyncEvent::NoteSynced {
                note_id: note_id.to_string(),
                count: entries.len(),
            });
        }
        self.set_status(SyncStatus::Watching);
        Ok(())
    }

    /// Stop watching, flush every open note's pending buffer, and detach
    /// listeners. Idempotent.
    pub async fn destroy(&self) {
        self.stopped
            .store(true, std::sync::atomic::Ordering::SeqCst);
        if let Some(handle) = self.watcher.lock().unwrap().take() {
            self.fs.unwatch(handle);
        }
        let notes: Vec<String> = self.open_notes.lock().unwrap().drain().collect();
        for note_id in notes {
            if let Err(err) = self.store.cleanup(&note_id).await {
                log::warn!("cleanup of note {note_id} failed during shutdown: {err}");
            }
        }
        self.listeners.lock().unwrap().clear();
        self.set_status(SyncStatus::Idle);
    }

    /// Apply a local edit's bytes directly, bypassing the registry's
    /// listener wiring. Useful for callers that already hold the update
    /// bytes (e.g. the CLI, or a host editor integration that captures the
    /// update itself) and want synchronous buffering without waiting on the
    /// spawned listener task.
    pub async fn buffer_local_update(&self, note_id: &str, update: Vec<u8>) -> Result<bool> {
        self.store.add_update(note_id, update).await
    }

    /// Origin a bootstrap or sample-note writer must use so this manager's
    /// listener does not try to re-persist it as if it were a live local
    /// edit (only relevant because the registry fans out solely on
    /// `Local`; this is a documentation anchor, not a behavior toggle).
    pub const BOOTSTRAP_ORIGIN: UpdateOrigin = UpdateOrigin::Silent;
}
