//! Note document adapter (§4.7): projects a CRDT document onto a metadata
//! map and a rich-text content fragment.

use std::str::FromStr;

use chrono::Utc;
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{
    Any, Doc, GetString, Map, MapRef, Out, ReadTxn, StateVector, Subscription, Transact, Update,
    XmlFragment, XmlFragmentRef, XmlTextPrelim,
};

use super::types::{MetadataPatch, NoteData, UpdateOrigin};
use crate::error::{Result, StoreError};

const METADATA_MAP_NAME: &str = "metadata";
const CONTENT_FRAGMENT_NAME: &str = "default";

const KEY_TITLE: &str = "title";
const KEY_CREATED: &str = "created";
const KEY_MODIFIED: &str = "modified";
const KEY_TAGS: &str = "tags";
const KEY_FOLDER: &str = "folderId";
const KEY_DELETED: &str = "deleted";

/// A read-only snapshot of a note's metadata map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteMetadata {
    /// Title, empty string if unset.
    pub title: String,
    /// Creation timestamp, ISO-8601.
    pub created: String,
    /// Last-modified timestamp, ISO-8601.
    pub modified: String,
    /// Tags attached to the note.
    pub tags: Vec<String>,
    /// Folder id, if the note belongs to one.
    pub folder_id: Option<String>,
    /// Tombstone flag.
    pub deleted: bool,
}

/// Projects a CRDT document onto the note-store's view of a note: a
/// metadata map plus a rich-text content fragment.
///
/// Holds only yrs handles — no independent business state. A clone is a
/// cheap second handle onto the same underlying document.
#[derive(Clone)]
pub struct NoteDocument {
    doc: Doc,
    metadata: MapRef,
    content: XmlFragmentRef,
}

impl Default for NoteDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl NoteDocument {
    /// Create a fresh, empty CRDT document.
    pub fn new() -> Self {
        let doc = Doc::new();
        let metadata = doc.get_or_insert_map(METADATA_MAP_NAME);
        let content = doc.get_or_insert_xml_fragment(CONTENT_FRAGMENT_NAME);
        NoteDocument {
            doc,
            metadata,
            content,
        }
    }

    /// Populate metadata from `note_data` if the map is empty, tagged
    /// `silent` so it never fans out to listeners (§4.7 `initializeNote`).
    /// Never overwrites fields that are already populated.
    pub fn initialize_note(&self, note_data: &NoteData) {
        let mut txn = self.doc.transact_mut_with(UpdateOrigin::Silent.to_string());
        if self.metadata.get(&txn, KEY_TITLE).is_some() {
            return;
        }

        let now = Utc::now().to_rfc3339();
        self.metadata.insert(
            &mut txn,
            KEY_TITLE,
            note_data.title.clone().unwrap_or_default(),
        );
        self.metadata.insert(&mut txn, KEY_CREATED, now.clone());
        self.metadata.insert(&mut txn, KEY_MODIFIED, now);
        self.metadata.insert(
            &mut txn,
            KEY_TAGS,
            note_data.tags.clone().unwrap_or_default(),
        );
        if let Some(folder_id) = &note_data.folder_id {
            self.metadata
                .insert(&mut txn, KEY_FOLDER, folder_id.clone());
        }
        self.metadata.insert(&mut txn, KEY_DELETED, false);
    }

    /// Apply keys present in `patch`; always bumps `modified` (§4.7
    /// `updateMetadata`). Tagged `local`.
    pub fn update_metadata(&self, patch: &MetadataPatch) {
        let mut txn = self.doc.transact_mut_with(UpdateOrigin::Local.to_string());
        if let Some(title) = &patch.title {
            self.metadata.insert(&mut txn, KEY_TITLE, title.clone());
        }
        if let Some(folder_id) = &patch.folder_id {
            match folder_id {
                Some(id) => {
                    self.metadata.insert(&mut txn, KEY_FOLDER, id.clone());
                }
                None => {
                    self.metadata.remove(&mut txn, KEY_FOLDER);
                }
            }
        }
        if let Some(tags) = &patch.tags {
            self.metadata.insert(&mut txn, KEY_TAGS, tags.clone());
        }
        self.metadata
            .insert(&mut txn, KEY_MODIFIED, Utc::now().to_rfc3339());
    }

    /// Set `deleted = true` and bump `modified` (§4.7 `markDeleted`).
    pub fn mark_deleted(&self) {
        self.set_deleted_flag(true);
    }

    /// Set `deleted = false` and bump `modified` (§4.7 `markRestored`).
    pub fn mark_restored(&self) {
        self.set_deleted_flag(false);
    }

    fn set_deleted_flag(&self, deleted: bool) {
        let mut txn = self.doc.transact_mut_with(UpdateOrigin::Local.to_string());
        self.metadata.insert(&mut txn, KEY_DELETED, deleted);
        self.metadata
            .insert(&mut txn, KEY_MODIFIED, Utc::now().to_rfc3339());
    }

    /// Read-only snapshot of the metadata map (§4.7 `getMetadata`).
    pub fn get_metadata(&self) -> NoteMetadata {
        let txn = self.doc.transact();
        NoteMetadata {
            title: self.read_string(&txn, KEY_TITLE),
            created: self.read_string(&txn, KEY_CREATED),
            modified: self.read_string(&txn, KEY_MODIFIED),
            tags: self.read_tags(&txn),
            folder_id: self.metadata.get(&txn, KEY_FOLDER).and_then(|v| match v {
                Out::Any(Any::String(s)) => Some(s.to_string()),
                _ => None,
            }),
            deleted: matches!(
                self.metadata.get(&txn, KEY_DELETED),
                Some(Out::Any(Any::Bool(true)))
            ),
        }
    }

    fn read_string<T: ReadTxn>(&self, txn: &T, key: &str) -> String {
        match self.metadata.get(txn, key) {
            Some(Out::Any(Any::String(s))) => s.to_string(),
            _ => String::new(),
        }
    }

    fn read_tags<T: ReadTxn>(&self, txn: &T) -> Vec<String> {
        match self.metadata.get(txn, KEY_TAGS) {
            Some(Out::Any(Any::Array(items))) => items
                .iter()
                .filter_map(|v| match v {
                    Any::String(s) => Some(s.to_string()),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// True iff the content fragment is empty and the title is empty
    /// (§4.7 `isDocEmpty`).
    pub fn is_doc_empty(&self) -> bool {
        let txn = self.doc.transact();
        self.content.len(&txn) == 0 && self.read_string(&txn, KEY_TITLE).is_empty()
    }

    /// Flattened plain-text content, used for previews and empty-content
    /// assertions in tests.
    pub fn content_text(&self) -> String {
        let txn = self.doc.transact();
        self.content.get_string(&txn)
    }

    /// Append a plain-text paragraph to the content fragment, tagged with
    /// the given origin. Used by sample-note bootstrap (§9 open question)
    /// when no HTML-to-fragment converter is available.
    pub fn push_plain_paragraph(&self, text: &str, origin: UpdateOrigin) {
        let mut txn = self.doc.transact_mut_with(origin.to_string());
        self.content.push_back(&mut txn, XmlTextPrelim::new(text));
    }

    /// Encode the full document state vector.
    pub fn encode_state_vector(&self) -> Vec<u8> {
        self.doc.transact().state_vector().encode_v1()
    }

    /// Encode the full document state as an update (§4.6 `getState`).
    pub fn encode_full_state(&self) -> Vec<u8> {
        self.doc
            .transact()
            .encode_state_as_update_v1(&StateVector::default())
    }

    /// Encode the diff between the current state and a remote state vector.
    pub fn encode_diff(&self, remote_state_vector: &[u8]) -> Result<Vec<u8>> {
        let sv = StateVector::decode_v1(remote_state_vector)
            .map_err(|e| StoreError::Crdt(format!("failed to decode state vector: {e}")))?;
        Ok(self.doc.transact().encode_state_as_update_v1(&sv))
    }

    /// Decode and apply a binary update under the given origin (§4.6
    /// `applyState`). Returns whether this origin should fan out to
    /// listeners — callers own the actual notification.
    pub fn apply_update(&self, update: &[u8], origin: UpdateOrigin) -> Result<bool> {
        let decoded = Update::decode_v1(update)
            .map_err(|e| StoreError::Crdt(format!("failed to decode update: {e}")))?;
        let mut txn = self.doc.transact_mut_with(origin.to_string());
        txn.apply_update(decoded)
            .map_err(|e| StoreError::Crdt(format!("failed to apply update: {e}")))?;
        Ok(origin.triggers_fan_out())
    }

    /// Register a raw update observer, invoked on every transaction commit
    /// with the origin it was tagged with and the encoded update bytes.
    /// Unrecognized origin tags are treated as `Remote` (suppressed) rather
    /// than panicking — a document must never crash a host because of a
    /// foreign writer's tagging convention.
    ///
    /// Used by [`super::registry::DocumentRegistry`] to implement the
    /// origin-gated fan-out described in §4.6.
    pub fn observe_updates<F>(&self, f: F) -> Result<Subscription>
    where
        F: Fn(UpdateOrigin, Vec<u8>) + Send + Sync + 'static,
    {
        self.doc
            .observe_update_v1(move |txn, event| {
                let origin = txn
                    .origin()
                    .and_then(|o| std::str::from_utf8(o.as_ref()).ok())
                    .and_then(|s| UpdateOrigin::from_str(s).ok())
                    .unwrap_or(UpdateOrigin::Remote);
                f(origin, event.update.clone());
            })
            .map_err(|err| StoreError::Crdt(format!("failed to observe updates: {err}")))
    }

    /// Run `f` in a local-origin transaction, returning the update produced
    /// (empty if `f` made no change). Used by callers that need to capture
    /// bytes for persistence while editing through a richer API than this
    /// adapter exposes (e.g. a hosted rich-text editor).
    pub fn mutate_local<R>(&self, f: impl FnOnce(&mut yrs::TransactionMut) -> R) -> (R, Vec<u8>) {
        self.mutate_with_origin(UpdateOrigin::Local, f)
    }

    /// Like [`NoteDocument::mutate_local`] but under an explicit origin.
    /// Used by bootstrap (§4.9, §4.10) to capture the bytes of a
    /// `Silent`-tagged write so they can be persisted directly through
    /// [`crate::store::UpdateStore::add_update`], bypassing the registry's
    /// listener (which only fans out `Local` writes).
    pub fn mutate_with_origin<R>(
        &self,
        origin: UpdateOrigin,
        f: impl FnOnce(&mut yrs::TransactionMut) -> R,
    ) -> (R, Vec<u8>) {
        let sv_before = self.doc.transact().state_vector();
        let mut txn = self.doc.transact_mut_with(origin.to_string());
        let result = f(&mut txn);
        let update = txn.encode_state_as_update_v1(&sv_before);
        drop(txn);
        (result, update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialize_note_seeds_defaults_once() {
        let doc = NoteDocument::new();
        doc.initialize_note(&NoteData {
            title: Some("My Note".to_string()),
            folder_id: None,
            tags: None,
        });

        let meta = doc.get_metadata();
        assert_eq!(meta.title, "My Note");
        assert!(!meta.created.is_empty());
        assert_eq!(meta.tags, Vec::<String>::new());
        assert!(!meta.deleted);

        // Re-initializing must not clobber the existing title.
        doc.initialize_note(&NoteData {
            title: Some("Different".to_string()),
            folder_id: None,
            tags: None,
        });
        assert_eq!(doc.get_metadata().title, "My Note");
    }

    #[test]
    fn update_metadata_applies_patch_and_bumps_modified() {
        let doc = NoteDocument::new();
        doc.initialize_note(&NoteData::default());
        let created_modified = doc.get_metadata().modified;

        std::thread::sleep(std::time::Duration::from_millis(2));
        doc.update_metadata(&MetadataPatch {
            title: Some("Renamed".to_string()),
            folder_id: Some(Some("work".to_string())),
            tags: Some(vec!["a".to_string()]),
        });

        let meta = doc.get_metadata();
        assert_eq!(meta.title, "Renamed");
        assert_eq!(meta.folder_id, Some("work".to_string()));
        assert_eq!(meta.tags, vec!["a".to_string()]);
        assert_ne!(meta.modified, created_modified);
    }

    #[test]
    fn mark_deleted_and_restored_round_trip() {
        let doc = NoteDocument::new();
        doc.initialize_note(&NoteData::default());
        assert!(!doc.get_metadata().deleted);
        doc.mark_deleted();
        assert!(doc.get_metadata().deleted);
        doc.mark_restored();
        assert!(!doc.get_metadata().deleted);
    }

    #[test]
    fn is_doc_empty_true_until_title_or_content_set() {
        let doc = NoteDocument::new();
        assert!(doc.is_doc_empty());
        doc.initialize_note(&NoteData {
            title: Some("Hello".to_string()),
            ..Default::default()
        });
        assert!(!doc.is_doc_empty());
    }

    #[test]
    fn push_plain_paragraph_is_reflected_in_content_text() {
        let doc = NoteDocument::new();
        doc.push_plain_paragraph("Hello world", UpdateOrigin::Silent);
        assert!(doc.content_text().contains("Hello world"));
    }

    #[test]
    fn apply_update_round_trips_full_state() {
        let writer = NoteDocument::new();
        writer.initialize_note(&NoteData {
            title: Some("From writer".to_string()),
            ..Default::default()
        });
        writer.push_plain_paragraph("Body text", UpdateOrigin::Local);

        let reader = NoteDocument::new();
        let state = writer.encode_full_state();
        let fan_out = reader.apply_update(&state, UpdateOrigin::Remote).unwrap();
        assert!(!fan_out);
        assert_eq!(reader.get_metadata().title, "From writer");
        assert!(reader.content_text().contains("Body text"));
    }

    #[test]
    fn local_origin_triggers_fan_out_remote_does_not() {
        let doc = NoteDocument::new();
        let update = doc.encode_full_state();
        assert!(doc.apply_update(&update, UpdateOrigin::Local).unwrap());
        assert!(!doc.apply_update(&update, UpdateOrigin::Remote).unwrap());
        assert!(!doc.apply_update(&update, UpdateOrigin::Silent).unwrap());
    }
}
