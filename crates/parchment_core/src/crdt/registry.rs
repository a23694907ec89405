//! CRDT document registry (§4.6): map from note id to a live CRDT
//! document, created on demand and destroyed on removal, fanning out
//! locally-originated update events to listeners.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use yrs::Subscription;

use super::document::NoteDocument;
use super::types::UpdateOrigin;

/// Emitted for every update applied with [`UpdateOrigin::Local`]. Updates
/// applied with `Remote` or `Silent` origin are suppressed — see §4.6 and
/// §9's note on breaking the editor→CRDT→store→watcher→CRDT cycle.
#[derive(Debug, Clone)]
pub struct DocEvent {
    /// Note the update belongs to.
    pub note_id: String,
    /// The encoded update bytes, ready for [`crate::store::UpdateStore::add_update`].
    pub update: Vec<u8>,
    /// When the update was produced.
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

type Listener = Box<dyn Fn(&DocEvent) + Send + Sync>;

struct Entry {
    document: NoteDocument,
    _subscription: Subscription,
}

/// Owns every live [`NoteDocument`] for the process, keyed by note id.
///
/// Listener registration is process-wide rather than per-note: the sync
/// manager filters by `note_id` on the events it receives, mirroring the
/// spec's single fan-out point (§4.6).
#[derive(Default)]
pub struct DocumentRegistry {
    documents: Mutex<HashMap<String, Entry>>,
    listeners: Mutex<Vec<Listener>>,
}

impl DocumentRegistry {
    /// Create an empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Subscribe to `doc-updated` events. Returns no handle: per §9's
    /// ownership notes, unsubscription is the caller's problem if the host
    /// doesn't support weak references; this registry's listener set lives
    /// as long as the registry itself.
    pub fn on_doc_updated(&self, listener: Listener) {
        self.listeners.lock().unwrap().push(listener);
    }

    fn notify(&self, event: DocEvent) {
        for listener in self.listeners.lock().unwrap().iter() {
            listener(&event);
        }
    }

    /// Return the document for `note_id`, creating it (with an attached
    /// update handler) if this is the first request (§4.6 `getDocument`).
    pub fn get_document(self: &Arc<Self>, note_id: &str) -> NoteDocument {
        let mut documents = self.documents.lock().unwrap();
        if let Some(entry) = documents.get(note_id) {
            return entry.document.clone();
        }

        let document = NoteDocument::new();
        let registry = Arc::downgrade(self);
        let owned_note_id = note_id.to_string();
        let subscription = document
            .observe_updates(move |origin, update| {
                if !origin.triggers_fan_out() {
                    return;
                }
                if let Some(registry) = registry.upgrade() {
                    registry.notify(DocEvent {
                        note_id: owned_note_id.clone(),
                        update,
                        timestamp: chrono::Utc::now(),
                    });
                }
            })
            .expect("observing a freshly created document cannot fail to acquire a transaction");

        let entry = Entry {
            document: document.clone(),
            _subscription: subscription,
        };
        documents.insert(note_id.to_string(), entry);
        document
    }

    /// True iff `note_id` already has a live document.
    pub fn has_document(&self, note_id: &str) -> bool {
        self.documents.lock().unwrap().contains_key(note_id)
    }

    /// Detach the update handler and forget the document (§4.6 `removeDocument`).
    pub fn remove_document(&self, note_id: &str) {
        self.documents.lock().unwrap().remove(note_id);
    }

    /// Encode a note's full document state (§4.6 `getState`). Returns
    /// `None` if no document is currently live for it.
    pub fn get_state(&self, note_id: &str) -> Option<Vec<u8>> {
        self.documents
            .lock()
            .unwrap()
            .get(note_id)
            .map(|entry| entry.document.encode_full_state())
    }

    /// Apply a binary update to `note_id`'s document, creating it first if
    /// necessary, tagged `Remote` so it never fans back out (§4.6 `applyState`).
    pub fn apply_state(self: &Arc<Self>, note_id: &str, update: &[u8]) -> crate::Result<()> {
        let document = self.get_document(note_id);
        document.apply_update(update, UpdateOrigin::Remote)?;
        Ok(())
    }
}
