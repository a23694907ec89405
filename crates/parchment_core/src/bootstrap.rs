//! Bootstrap/loader (§4.9) and sample-note seeding (§4.10).
//!
//! At startup, scan the notes root, replay every writer's full history
//! into a fresh document per note, and project a cacheable [`NoteView`] for
//! list rendering. Notes expected but absent from disk (sample notes on
//! first run) are created and initialized with `Silent` origin so their
//! starter content lands in the CRDT itself rather than only in the
//! derived view cache (§9's resolved open question).

use std::collections::HashMap;
use std::sync::Arc;

use crate::crdt::{DocumentRegistry, NoteData, NoteView, UpdateOrigin};
use crate::error::Result;
use crate::fs::FileSystem;
use crate::store::UpdateStore;

/// One starter note: a title and a handful of plain-text paragraphs.
///
/// Rich HTML starter content would require an HTML-to-fragment converter,
/// which isn't in this stack; per §9, starter content is supplied as plain
/// paragraphs rather than desynchronizing the view cache from the CRDT.
pub struct SampleNote {
    /// Fixed id this sample note is always seeded under.
    pub id: &'static str,
    /// Starter title.
    pub title: &'static str,
    /// Starter body, one paragraph per line.
    pub body: &'static [&'static str],
}

/// The fixed set of starter notes a fresh installation gets.
pub const SAMPLE_NOTES: &[SampleNote] = &[
    SampleNote {
        id: "sample-welcome",
        title: "Welcome to Parchment",
        body: &[
            "Parchment is a local-first note store. Your notes sync across devices by watching a shared folder — no server required.",
            "Start typing to create your first real note.",
        ],
    },
    SampleNote {
        id: "sample-multi-writer",
        title: "How sync works",
        body: &[
            "Each device writes its own update log and reads everyone else's. Nothing is ever overwritten, so two devices editing the same note offline will merge cleanly when they see each other again.",
        ],
    },
];

/// Result of scanning the notes root at startup: one view per discovered
/// or seeded note, keyed by note id.
pub struct Bootstrap {
    /// Projected views, ready for list rendering.
    pub views: HashMap<String, NoteView>,
}

impl Bootstrap {
    /// Scan `<notes_root>`, replay every note's full history into a fresh
    /// document, project a [`NoteView`] for each, and seed any missing
    /// sample notes (§4.9, §4.10).
    pub async fn run<FS: FileSystem + 'static>(
        fs: &Arc<FS>,
        store: &Arc<UpdateStore<FS>>,
        registry: &Arc<DocumentRegistry>,
        notes_root: &std::path::Path,
    ) -> Result<Self> {
        let mut views = HashMap::new();

        for note_id in Self::discover_note_ids(fs, notes_root).await {
            let view = Self::load_note(store, registry, &note_id).await?;
            views.insert(note_id, view);
        }

        for sample in SAMPLE_NOTES {
            if views.contains_key(sample.id) {
                continue;
            }
            let view = Self::seed_sample(store, registry, sample).await?;
            views.insert(sample.id.to_string(), view);
        }

        Ok(Bootstrap { views })
    }

    /// List directories directly under the notes root that contain an
    /// `updates/` child, i.e. every note with at least one flushed file.
    async fn discover_note_ids<FS: FileSystem>(
        fs: &Arc<FS>,
        notes_root: &std::path::Path,
    ) -> Vec<String> {
        let listing = fs.read_dir(notes_root).await;
        let mut ids = Vec::new();
        for path in listing.entries_or_empty() {
            let Some(note_id) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if fs.exists(&path.join("updates")).await {
                ids.push(note_id.to_string());
            }
        }
        ids.sort();
        ids
    }

    /// Replay a note's full update history into a fresh document and
    /// project its view (§4.9).
    async fn load_note<FS: FileSystem + 'static>(
        store: &Arc<UpdateStore<FS>>,
        registry: &Arc<DocumentRegistry>,
        note_id: &str,
    ) -> Result<NoteView> {
        store.initialize(note_id).await?;
        let document = registry.get_document(note_id);
        for entry in store.read_all_updates(note_id).await? {
            if let Err(err) = document.apply_update(&entry.update, UpdateOrigin::Silent) {
                log::warn!(
                    "skipping unreplayable update from {} seq {} for note {note_id}: {err}",
                    entry.instance_id,
                    entry.sequence
                );
            }
        }
        Ok(project_view(note_id, &document))
    }

    /// Create and persist one missing sample note. The title/body are
    /// written under `Silent` origin (so the registry's `Local`-only
    /// fan-out doesn't try to re-route them through a live sync manager's
    /// listener), and the produced bytes are pushed into the store directly
    /// so a later real edit from this writer continues the same sequence
    /// (§4.10).
    async fn seed_sample<FS: FileSystem + 'static>(
        store: &Arc<UpdateStore<FS>>,
        registry: &Arc<DocumentRegistry>,
        sample: &SampleNote,
    ) -> Result<NoteView> {
        store.initialize(sample.id).await?;
        let document = registry.get_document(sample.id);

        document.initialize_note(&NoteData {
            title: Some(sample.title.to_string()),
            ..Default::default()
        });
        for line in sample.body {
            document.push_plain_paragraph(line, UpdateOrigin::Silent);
        }

        // Persist the whole seeded state as a single update so the starter
        // content lands in the CRDT itself, not only in the projected view
        // (§9's resolved open question), then flush it immediately so a
        // later real edit from this writer continues the same sequence
        // rather than restarting it.
        let update = document.encode_full_state();
        store.add_update(sample.id, update).await?;
        store.flush(sample.id).await?;

        Ok(project_view(sample.id, &document))
    }
}

/// Derive the read-model view from a live document (§3 "Note view").
pub fn project_view(note_id: &str, document: &crate::crdt::NoteDocument) -> NoteView {
    let metadata = document.get_metadata();
    let preview: String = document.content_text().chars().take(200).collect();

    NoteView {
        id: note_id.to_string(),
        title: metadata.title,
        content_preview: preview,
        created: parse_or_now(&metadata.created),
        modified: parse_or_now(&metadata.modified),
        tags: metadata.tags,
        folder_id: metadata.folder_id,
        deleted: metadata.deleted,
    }
}

fn parse_or_now(iso: &str) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::parse_from_rfc3339(iso)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .unwrap_or_else(|_| chrono::Utc::now())
}
