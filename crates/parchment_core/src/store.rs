//! Update store (§4.5): produces and consumes log files for a note, using
//! the filesystem capability, the codec, and the flush strategy.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex as AsyncMutex, RwLock as AsyncRwLock};

use crate::codec::{self, MetaFile, PackedFile};
use crate::error::Result;
use crate::flush::FlushStrategy;
use crate::fs::FileSystem;
use crate::log_state::NoteLogState;

/// One update read back from disk, paired with the writer and sequence
/// number that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateEntry {
    /// Writer that produced this update.
    pub instance_id: String,
    /// Sequence number within that writer's stream.
    pub sequence: u64,
    /// Decoded update bytes.
    pub update: Vec<u8>,
}

#[derive(Default)]
struct NoteEntry {
    initialized: bool,
    state: NoteLogState,
    idle_timer: Option<tokio::task::JoinHandle<()>>,
}

/// Produces and consumes per-note, per-writer log files.
///
/// All mutating operations on one note (`add_update`, `flush`, `ingest` via
/// `read_new_updates`) are serialized by a per-note async mutex, per §5's
/// "no concurrent mutation of one note's store state" contract.
pub struct UpdateStore<FS: FileSystem> {
    fs: Arc<FS>,
    notes_root: PathBuf,
    instance_id: String,
    strategy: Arc<dyn FlushStrategy>,
    notes: AsyncRwLock<HashMap<String, Arc<AsyncMutex<NoteEntry>>>>,
}

impl<FS: FileSystem + 'static> UpdateStore<FS> {
    /// Build a store rooted at `notes_root`, writing as `instance_id`.
    pub fn new(
        fs: Arc<FS>,
        notes_root: PathBuf,
        instance_id: String,
        strategy: Arc<dyn FlushStrategy>,
    ) -> Arc<Self> {
        Arc::new(UpdateStore {
            fs,
            notes_root,
            instance_id,
            strategy,
            notes: AsyncRwLock::new(HashMap::new()),
        })
    }

    async fn entry_for(&self, note_id: &str) -> Arc<AsyncMutex<NoteEntry>> {
        if let Some(entry) = self.notes.read().await.get(note_id) {
            return Arc::clone(entry);
        }
        let mut notes = self.notes.write().await;
        Arc::clone(
            notes
                .entry(note_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(NoteEntry::default()))),
        )
    }

    /// Load `meta/<self>.json` if present, seeding `writeCounter` and `seen`
    /// from it. Corrupt or absent meta seeds zero/empty state rather than
    /// failing (§4.5). Idempotent.
    pub async fn initialize(&self, note_id: &str) -> Result<()> {
        let entry_arc = self.entry_for(note_id).await;
        let mut entry = entry_arc.lock().await;
        if entry.initialized {
            return Ok(());
        }

        let path = codec::meta_path(&self.notes_root, note_id, &self.instance_id);
        match self.fs.read_file(&path).await {
            Ok(bytes) => match MetaFile::from_bytes(&path, &bytes) {
                Ok(meta) => {
                    entry.state.write_counter = meta.last_write;
                    entry.state.seen = meta.seen;
                }
                Err(err) => {
                    log::warn!(
                        "corrupt meta file {}: {err}, starting fresh",
                        path.display()
                    );
                }
            },
            Err(_) => {
                // No meta file yet; fresh note or first run for this writer.
            }
        }
        entry.initialized = true;
        Ok(())
    }

    /// Push an update into the pending buffer. Flushes synchronously if the
    /// strategy says to; otherwise (re)arms the idle timer.
    ///
    /// Returns whether this call resulted in a successful synchronous flush.
    pub async fn add_update(self: &Arc<Self>, note_id: &str, bytes: Vec<u8>) -> Result<bool> {
        self.initialize(note_id).await?;
        let entry_arc = self.entry_for(note_id).await;

        let should_flush = {
            let mut entry = entry_arc.lock().await;
            entry.state.push_pending(bytes);
            self.strategy.should_flush_now(entry.state.buffer_state())
        };

        if should_flush {
            self.cancel_timer(&entry_arc).await;
            return self.flush(note_id).await;
        }

        if let Some(idle) = self.strategy.idle_duration() {
            self.cancel_timer(&entry_arc).await;
            let store = Arc::clone(self);
            let owned_note_id = note_id.to_string();
            let handle = tokio::spawn(async move {
                tokio::time::sleep(idle).await;
                if let Err(err) = store.flush(&owned_note_id).await {
                    log::warn!("idle flush of note {owned_note_id} failed: {err}");
                }
            });
            entry_arc.lock().await.idle_timer = Some(handle);
        }

        Ok(false)
    }

    async fn cancel_timer(&self, entry_arc: &Arc<AsyncMutex<NoteEntry>>) {
        if let Some(handle) = entry_arc.lock().await.idle_timer.take() {
            handle.abort();
        }
    }

    /// Write the pending buffer as a packed file, if non-empty.
    ///
    /// On write failure, returns `Ok(false)` without mutating counters,
    /// the seen-vector, or the pending buffer, so a retry sees the same
    /// buffer (§4.5).
    pub async fn flush(&self, note_id: &str) -> Result<bool> {
        let entry_arc = self.entry_for(note_id).await;
        self.cancel_timer(&entry_arc).await;

        let mut entry = entry_arc.lock().await;
        let Some((start_seq, end_seq)) = entry.state.pending_range() else {
            return Ok(false);
        };

        let packed = PackedFile::new(&self.instance_id, start_seq, &entry.state.pending_updates);
        let bytes = packed.to_bytes()?;
        let file_name = codec::format_file_name(&self.instance_id, start_seq, end_seq);
        let path = codec::updates_dir(&self.notes_root, note_id).join(file_name);

        if let Err(err) = self.fs.write_file(&path, &bytes).await {
            log::warn!("flush of note {note_id} failed: {err}");
            return Ok(false);
        }

        entry.state.commit_flush(&self.instance_id, end_seq);
        self.strategy.reset();

        let meta = MetaFile {
            instance_id: self.instance_id.clone(),
            last_write: entry.state.write_counter,
            seen: entry.state.seen.clone(),
            last_updated: Utc::now(),
        };
        drop(entry);
        self.write_meta(note_id, &meta).await;

        Ok(true)
    }

    async fn write_meta(&self, note_id: &str, meta: &MetaFile) {
        let path = codec::meta_path(&self.notes_root, note_id, &self.instance_id);
        let bytes = match meta.to_bytes() {
            Ok(bytes) => bytes,
            Err(err) => {
                log::warn!("failed to encode meta for note {note_id}: {err}");
                return;
            }
        };
        if let Err(err) = self.fs.write_file(&path, &bytes).await {
            log::warn!("failed to write meta for note {note_id}: {err}");
        }
    }

    /// Enumerate every update file for a note, decode all updates, and sort
    /// them by sequence (ties broken by writer id). Does not consult or
    /// mutate the seen-vector. Used at cold start.
    pub async fn read_all_updates(&self, note_id: &str) -> Result<Vec<UpdateEntry>> {
        let dir = codec::updates_dir(&self.notes_root, note_id);
        let listing = self.fs.read_dir(&dir).await;

        let mut all = Vec::new();
        for path in listing.entries_or_empty() {
            let Some(entries) = self.read_packed_file(path).await else {
                continue;
            };
            all.extend(entries);
        }
        all.sort_by(|a, b| {
            a.sequence
                .cmp(&b.sequence)
                .then_with(|| a.instance_id.cmp(&b.instance_id))
        });
        Ok(all)
    }

    /// Like [`UpdateStore::read_all_updates`] but skips anything already
    /// covered by the seen-vector, and advances it for what it emits.
    /// Persists the meta file if anything was emitted. Used during live
    /// sync.
    pub async fn read_new_updates(&self, note_id: &str) -> Result<Vec<UpdateEntry>> {
        self.initialize(note_id).await?;
        let entry_arc = self.entry_for(note_id).await;
        let mut entry = entry_arc.lock().await;

        let dir = codec::updates_dir(&self.notes_root, note_id);
        let listing = self.fs.read_dir(&dir).await;

        let mut all = Vec::new();
        for path in listing.entries_or_empty() {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(parsed) = codec::parse_file_name(name) else {
                continue;
            };
            let already_seen = entry.state.seen.get(&parsed.instance).copied().unwrap_or(0);
            if parsed.end_seq <= already_seen {
                continue;
            }
            let Some(entries) = self.read_packed_file(path).await else {
                continue;
            };
            all.extend(entries.into_iter().filter(|e| e.sequence > already_seen));
        }
        all.sort_by(|a, b| {
            a.sequence
                .cmp(&b.sequence)
                .then_with(|| a.instance_id.cmp(&b.instance_id))
        });

        for e in &all {
            let slot = entry.state.seen.entry(e.instance_id.clone()).or_insert(0);
            *slot = (*slot).max(e.sequence);
        }

        if !all.is_empty() {
            let meta = MetaFile {
                instance_id: self.instance_id.clone(),
                last_write: entry.state.write_counter,
                seen: entry.state.seen.clone(),
                last_updated: Utc::now(),
            };
            drop(entry);
            self.write_meta(note_id, &meta).await;
        }

        Ok(all)
    }

    /// Read and decode one packed file, logging and skipping it on any
    /// parse or invariant failure (§7 "Corruption").
    async fn read_packed_file(&self, path: &std::path::Path) -> Option<Vec<UpdateEntry>> {
        let name = path.file_name().and_then(|n| n.to_str())?;
        let parsed = codec::parse_file_name(name)?;

        let bytes = match self.fs.read_file(path).await {
            Ok(bytes) => bytes,
            Err(err) => {
                log::warn!("failed to read {}: {err}", path.display());
                return None;
            }
        };
        let packed = match PackedFile::from_bytes(path, &bytes) {
            Ok(packed) => packed,
            Err(err) => {
                log::warn!("skipping corrupt packed file {}: {err}", path.display());
                return None;
            }
        };
        let decoded = match packed.decode_updates() {
            Ok(decoded) => decoded,
            Err(err) => {
                log::warn!("skipping undecodable packed file {}: {err}", path.display());
                return None;
            }
        };
        Some(
            decoded
                .into_iter()
                .map(|(sequence, update)| UpdateEntry {
                    instance_id: parsed.instance.clone(),
                    sequence,
                    update,
                })
                .collect(),
        )
    }

    /// List writer ids known to this note by enumerating `meta/*.json`.
    pub async fn get_instances(&self, note_id: &str) -> Result<Vec<String>> {
        let dir = codec::meta_dir(&self.notes_root, note_id);
        let listing = self.fs.read_dir(&dir).await;
        let mut ids: Vec<String> = listing
            .entries_or_empty()
            .iter()
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(str::to_string))
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// Cancel any idle timer and flush pending updates for a note.
    /// Idempotent.
    pub async fn cleanup(&self, note_id: &str) -> Result<()> {
        let entry_arc = self.entry_for(note_id).await;
        self.cancel_timer(&entry_arc).await;
        self.flush(note_id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flush::{Count, Idle, Immediate};
    use crate::fs::InMemoryFileSystem;
    use std::path::Path;

    fn store_with(strategy: Arc<dyn FlushStrategy>) -> Arc<UpdateStore<InMemoryFileSystem>> {
        UpdateStore::new(
            Arc::new(InMemoryFileSystem::new()),
            PathBuf::from("/notes"),
            "A".to_string(),
            strategy,
        )
    }

    #[tokio::test]
    async fn immediate_strategy_flushes_every_update() {
        let store = store_with(Arc::new(Immediate));
        store.initialize("n1").await.unwrap();
        assert!(store.add_update("n1", vec![1]).await.unwrap());
        assert!(store.add_update("n1", vec![2]).await.unwrap());

        let all = store.read_all_updates("n1").await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].sequence, 1);
        assert_eq!(all[1].sequence, 2);
    }

    #[tokio::test]
    async fn count_strategy_flushes_in_batches() {
        let store = store_with(Arc::new(Count(3)));
        store.initialize("n1").await.unwrap();
        assert!(!store.add_update("n1", vec![1]).await.unwrap());
        assert!(!store.add_update("n1", vec![2]).await.unwrap());
        assert!(store.add_update("n1", vec![3]).await.unwrap());

        let all = store.read_all_updates("n1").await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn safety_overflow_produces_two_files_and_a_remainder() {
        let store = store_with(Arc::new(Count(3)));
        store.initialize("n1").await.unwrap();
        for i in 1..=7u8 {
            store.add_update("n1", vec![i]).await.unwrap();
        }

        let dir = codec::updates_dir(Path::new("/notes"), "n1");
        let listing = store.fs.read_dir(&dir).await;
        let mut names: Vec<String> = listing
            .entries_or_empty()
            .iter()
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(str::to_string))
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec!["A.000001-000003.yjson", "A.000004-000006.yjson"]
        );

        let all = store.read_all_updates("n1").await.unwrap();
        assert_eq!(all.len(), 6); // seq 7 still buffered, not yet flushed
    }

    #[tokio::test]
    async fn restart_preserves_counter() {
        let fs = Arc::new(InMemoryFileSystem::new());
        let store = UpdateStore::new(
            Arc::clone(&fs),
            PathBuf::from("/notes"),
            "A".to_string(),
            Arc::new(Immediate) as Arc<dyn FlushStrategy>,
        );
        store.initialize("n1").await.unwrap();
        store.add_update("n1", vec![1]).await.unwrap();
        store.add_update("n1", vec![2]).await.unwrap();
        store.add_update("n1", vec![3]).await.unwrap();

        // Fresh store instance sharing the same filesystem, simulating a
        // process restart.
        let restarted = UpdateStore::new(
            fs,
            PathBuf::from("/notes"),
            "A".to_string(),
            Arc::new(Immediate) as Arc<dyn FlushStrategy>,
        );
        restarted.initialize("n1").await.unwrap();
        assert!(restarted.add_update("n1", vec![4]).await.unwrap());

        let names: Vec<String> = restarted
            .fs
            .read_dir(&codec::updates_dir(Path::new("/notes"), "n1"))
            .await
            .entries_or_empty()
            .iter()
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(str::to_string))
            .collect();
        assert!(names.contains(&"A.000004.yjson".to_string()));
    }

    #[tokio::test]
    async fn flush_with_no_pending_updates_is_a_noop() {
        let store = store_with(Arc::new(Immediate));
        store.initialize("n1").await.unwrap();
        assert!(!store.flush("n1").await.unwrap());
    }

    #[tokio::test]
    async fn read_all_updates_on_missing_directory_is_empty() {
        let store = store_with(Arc::new(Immediate));
        let all = store.read_all_updates("never-touched").await.unwrap();
        assert!(all.is_empty());
    }

    #[tokio::test]
    async fn read_new_updates_skips_already_seen_and_advances_vector() {
        let fs = Arc::new(InMemoryFileSystem::new());
        let writer_a = UpdateStore::new(
            Arc::clone(&fs),
            PathBuf::from("/notes"),
            "A".to_string(),
            Arc::new(Immediate) as Arc<dyn FlushStrategy>,
        );
        writer_a.initialize("n1").await.unwrap();
        writer_a.add_update("n1", vec![10]).await.unwrap();
        writer_a.add_update("n1", vec![20]).await.unwrap();

        let reader_b = UpdateStore::new(
            fs,
            PathBuf::from("/notes"),
            "B".to_string(),
            Arc::new(Immediate) as Arc<dyn FlushStrategy>,
        );
        reader_b.initialize("n1").await.unwrap();

        let first = reader_b.read_new_updates("n1").await.unwrap();
        assert_eq!(first.len(), 2);

        let second = reader_b.read_new_updates("n1").await.unwrap();
        assert!(second.is_empty(), "already-seen updates must not repeat");
    }

    #[tokio::test]
    async fn corrupt_packed_file_is_skipped_not_fatal() {
        let fs = Arc::new(InMemoryFileSystem::new());
        let writer_a = UpdateStore::new(
            Arc::clone(&fs),
            PathBuf::from("/notes"),
            "A".to_string(),
            Arc::new(Immediate) as Arc<dyn FlushStrategy>,
        );
        writer_a.initialize("n1").await.unwrap();
        writer_a.add_update("n1", vec![1]).await.unwrap();

        // A corrupt peer file sits alongside a good one.
        fs.write_file(Path::new("/notes/n1/updates/B.000001.yjson"), b"not json")
            .await
            .unwrap();

        let all = writer_a.read_all_updates("n1").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].instance_id, "A");
    }

    #[tokio::test]
    async fn corrupt_meta_falls_back_to_empty_state() {
        let fs = Arc::new(InMemoryFileSystem::new());
        fs.write_file(Path::new("/notes/n1/meta/A.json"), b"not json")
            .await
            .unwrap();
        let store = UpdateStore::new(
            fs,
            PathBuf::from("/notes"),
            "A".to_string(),
            Arc::new(Immediate) as Arc<dyn FlushStrategy>,
        );
        store.initialize("n1").await.unwrap();
        assert!(store.add_update("n1", vec![1]).await.unwrap());

        let names: Vec<String> = store
            .fs
            .read_dir(&codec::updates_dir(Path::new("/notes"), "n1"))
            .await
            .entries_or_empty()
            .iter()
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(str::to_string))
            .collect();
        // Sequencing restarted from zero, not from whatever garbage was in meta.
        assert!(names.contains(&"A.000001.yjson".to_string()));
    }

    #[tokio::test]
    async fn idle_strategy_batches_then_flushes_on_timer() {
        tokio::time::pause();
        let store = store_with(Arc::new(Idle {
            max_updates: 100,
            max_bytes: usize::MAX,
            idle: std::time::Duration::from_millis(30),
        }));
        store.initialize("n1").await.unwrap();
        for i in 1..=5u8 {
            store.add_update("n1", vec![i]).await.unwrap();
        }
        assert!(store.read_all_updates("n1").await.unwrap().is_empty());

        // Let the idle timer task run up to its `sleep().await` so the
        // deadline is registered against the paused clock's current value
        // before we advance it.
        tokio::task::yield_now().await;
        tokio::time::advance(std::time::Duration::from_millis(40)).await;
        tokio::task::yield_now().await;

        let all = store.read_all_updates("n1").await.unwrap();
        assert_eq!(all.len(), 5);
    }

    #[tokio::test]
    async fn get_instances_lists_known_writers() {
        let fs = Arc::new(InMemoryFileSystem::new());
        let a = UpdateStore::new(
            Arc::clone(&fs),
            PathBuf::from("/notes"),
            "A".to_string(),
            Arc::new(Immediate) as Arc<dyn FlushStrategy>,
        );
        a.initialize("n1").await.unwrap();
        a.add_update("n1", vec![1]).await.unwrap();

        let b = UpdateStore::new(
            fs,
            PathBuf::from("/notes"),
            "B".to_string(),
            Arc::new(Immediate) as Arc<dyn FlushStrategy>,
        );
        b.initialize("n1").await.unwrap();
        b.add_update("n1", vec![1]).await.unwrap();

        let instances = a.get_instances("n1").await.unwrap();
        assert_eq!(instances, vec!["A".to_string(), "B".to_string()]);
    }
}
