//! CRDT adapter (§4.6, §4.7): the document registry and the note
//! projection it hands out.

mod document;
mod registry;
mod types;

pub use document::{NoteDocument, NoteMetadata};
pub use registry::{DocEvent, DocumentRegistry};
pub use types::{MetadataPatch, NoteData, NoteView, UpdateOrigin};
