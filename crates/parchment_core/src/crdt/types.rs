//! Shared CRDT-adjacent types (§4.6, §4.7).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Origin tag attached to every CRDT mutation (§4.6, Glossary).
///
/// Threading this through every mutation API is what breaks the
/// editor→CRDT→store→watcher→CRDT feedback loop: only `Local` writes are
/// persisted and fanned out to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateOrigin {
    /// A local edit. Triggers persistence and listener fan-out.
    Local,
    /// An update applied from a peer writer's files. Suppresses fan-out.
    Remote,
    /// Initialization or cache-hydrate. Suppresses fan-out.
    Silent,
}

impl UpdateOrigin {
    /// Whether a document update with this origin should be persisted and
    /// fanned out to registry listeners (§4.6).
    pub fn triggers_fan_out(self) -> bool {
        matches!(self, UpdateOrigin::Local)
    }
}

impl fmt::Display for UpdateOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UpdateOrigin::Local => "local",
            UpdateOrigin::Remote => "remote",
            UpdateOrigin::Silent => "silent",
        };
        f.write_str(s)
    }
}

impl FromStr for UpdateOrigin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(UpdateOrigin::Local),
            "remote" => Ok(UpdateOrigin::Remote),
            "silent" => Ok(UpdateOrigin::Silent),
            other => Err(format!("unknown origin tag: {other}")),
        }
    }
}

/// Derived read-model projected from a CRDT document for list rendering
/// (§3 "Note view").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NoteView {
    /// Note id.
    pub id: String,
    /// Title, read from the metadata map.
    pub title: String,
    /// Short plain-text preview of the content fragment.
    pub content_preview: String,
    /// Creation timestamp.
    pub created: DateTime<Utc>,
    /// Last-modified timestamp.
    pub modified: DateTime<Utc>,
    /// Tags attached to the note.
    pub tags: Vec<String>,
    /// Folder the note belongs to, if any.
    pub folder_id: Option<String>,
    /// Tombstone flag.
    pub deleted: bool,
}

/// Fields a caller may supply when first creating a note (§4.7
/// `initializeNote`). Fields left `None` fall back to defaults.
#[derive(Debug, Clone, Default)]
pub struct NoteData {
    /// Initial title, if any.
    pub title: Option<String>,
    /// Initial folder id, if any.
    pub folder_id: Option<String>,
    /// Initial tags, if any.
    pub tags: Option<Vec<String>>,
}

/// Partial update to a note's metadata (§4.7 `updateMetadata`). Only
/// present fields are applied; `modified` is always bumped regardless.
#[derive(Debug, Clone, Default)]
pub struct MetadataPatch {
    /// New title, if changing.
    pub title: Option<String>,
    /// New folder id, if changing. `Some(None)` clears it.
    pub folder_id: Option<Option<String>>,
    /// New tag list, if changing.
    pub tags: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_local_origin_triggers_fan_out() {
        assert!(UpdateOrigin::Local.triggers_fan_out());
        assert!(!UpdateOrigin::Remote.triggers_fan_out());
        assert!(!UpdateOrigin::Silent.triggers_fan_out());
    }

    #[test]
    fn origin_round_trips_through_display_and_from_str() {
        for origin in [
            UpdateOrigin::Local,
            UpdateOrigin::Remote,
            UpdateOrigin::Silent,
        ] {
            let parsed: UpdateOrigin = origin.to_string().parse().unwrap();
            assert_eq!(parsed, origin);
        }
    }
}
