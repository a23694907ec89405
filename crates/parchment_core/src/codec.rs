//! Update codec (§4.2): base64 framing, the packed-file envelope, and the
//! `<instance>.<start>-<end>.yjson` filename grammar.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Base64-encode a raw update.
pub fn encode_update(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Decode a base64-encoded update back to raw bytes.
pub fn decode_update(encoded: &str) -> Result<Vec<u8>> {
    Ok(BASE64.decode(encoded)?)
}

/// JSON envelope for one or more consecutive updates from one writer, for
/// one note (§3 "Packed file").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackedFile {
    /// Writer id that produced these updates.
    pub instance: String,
    /// Inclusive `[start, end]` sequence range; `updates.len() == end - start + 1`.
    pub sequence: (u64, u64),
    /// When this file was written.
    pub timestamp: DateTime<Utc>,
    /// Base64-encoded updates, in production order.
    pub updates: Vec<String>,
}

impl PackedFile {
    /// Build a packed file from raw update bytes, validating the invariant
    /// that the array length matches the claimed sequence range.
    pub fn new(instance: impl Into<String>, start_seq: u64, raw_updates: &[Vec<u8>]) -> Self {
        let end_seq = start_seq + raw_updates.len() as u64 - 1;
        PackedFile {
            instance: instance.into(),
            sequence: (start_seq, end_seq),
            timestamp: Utc::now(),
            updates: raw_updates.iter().map(|u| encode_update(u)).collect(),
        }
    }

    /// Serialize to the on-disk JSON form.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|source| StoreError::Json {
            path: Default::default(),
            source,
        })
    }

    /// Parse and validate a packed file's bytes, rejecting malformed
    /// sequence ranges or arrays whose length doesn't match the range
    /// (§7 invariant violation).
    pub fn from_bytes(path: &std::path::Path, bytes: &[u8]) -> Result<Self> {
        let file: PackedFile =
            serde_json::from_slice(bytes).map_err(|source| StoreError::Json {
                path: path.to_path_buf(),
                source,
            })?;

        let (start, end) = file.sequence;
        if end < start {
            return Err(StoreError::InvariantViolation {
                path: path.to_path_buf(),
                message: format!("endSeq {end} < startSeq {start}"),
            });
        }
        let expected_len = (end - start + 1) as usize;
        if file.updates.len() != expected_len {
            return Err(StoreError::InvariantViolation {
                path: path.to_path_buf(),
                message: format!(
                    "updates array has {} entries, expected {expected_len} for range [{start},{end}]",
                    file.updates.len()
                ),
            });
        }
        Ok(file)
    }

    /// Decode every update in this file, pairing each with its sequence
    /// number.
    pub fn decode_updates(&self) -> Result<Vec<(u64, Vec<u8>)>> {
        let (start, _) = self.sequence;
        self.updates
            .iter()
            .enumerate()
            .map(|(i, encoded)| Ok((start + i as u64, decode_update(encoded)?)))
            .collect()
    }
}

/// A parsed `<instance>.<start>(-<end>)?.yjson` filename (§4.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFileName {
    /// Writer id embedded in the filename.
    pub instance: String,
    /// Start sequence (inclusive).
    pub start_seq: u64,
    /// End sequence (inclusive); equals `start_seq` for single-update files.
    pub end_seq: u64,
}

const EXTENSION: &str = ".yjson";

/// Parse a packed-file name. Unrecognized names return `None` and must be
/// silently ignored by callers, per §4.5's failure semantics.
pub fn parse_file_name(name: &str) -> Option<ParsedFileName> {
    let stem = name.strip_suffix(EXTENSION)?;
    let dot = stem.rfind('.')?;
    let (instance, seq_part) = stem.split_at(dot);
    let seq_part = &seq_part[1..]; // drop the leading '.'
    if instance.is_empty() {
        return None;
    }

    let (start_str, end_str) = match seq_part.split_once('-') {
        Some((s, e)) => (s, e),
        None => (seq_part, seq_part),
    };
    let start_seq: u64 = start_str.parse().ok()?;
    let end_seq: u64 = end_str.parse().ok()?;
    if end_seq < start_seq {
        return None;
    }

    Some(ParsedFileName {
        instance: instance.to_string(),
        start_seq,
        end_seq,
    })
}

/// Format a packed-file name for a given instance and sequence range,
/// zero-padding to six digits (§4.2). Ranges wider than 10^6 still parse
/// correctly; only the lexicographic-sort guarantee is lost beyond that.
pub fn format_file_name(instance: &str, start_seq: u64, end_seq: u64) -> String {
    if start_seq == end_seq {
        format!("{instance}.{start_seq:06}{EXTENSION}")
    } else {
        format!("{instance}.{start_seq:06}-{end_seq:06}{EXTENSION}")
    }
}

/// Path of the `updates/` directory for a note under the notes root.
pub fn updates_dir(notes_root: &std::path::Path, note_id: &str) -> std::path::PathBuf {
    notes_root.join(note_id).join("updates")
}

/// Path of the `meta/` directory for a note under the notes root.
pub fn meta_dir(notes_root: &std::path::Path, note_id: &str) -> std::path::PathBuf {
    notes_root.join(note_id).join("meta")
}

/// Path of a specific writer's meta file for a note.
pub fn meta_path(
    notes_root: &std::path::Path,
    note_id: &str,
    instance: &str,
) -> std::path::PathBuf {
    meta_dir(notes_root, note_id).join(format!("{instance}.json"))
}

/// Extract the note id from a path the directory watcher reported, if it
/// matches `<notesRoot>/<noteId>/updates/<file>.yjson` (§4.8 "Watching").
/// Anything else (meta files, non-`.yjson` files, paths outside the root)
/// returns `None`.
pub fn note_id_from_update_path(
    notes_root: &std::path::Path,
    path: &std::path::Path,
) -> Option<String> {
    let rel = path.strip_prefix(notes_root).ok()?;
    let mut components = rel.components();
    let note_id = components.next()?.as_os_str().to_str()?.to_string();
    let dir = components.next()?.as_os_str().to_str()?;
    if dir != "updates" {
        return None;
    }
    let file_name = components.next()?.as_os_str().to_str()?;
    if components.next().is_some() {
        return None;
    }
    parse_file_name(file_name)?;
    Some(note_id)
}

/// Per-writer meta file (§3 "Meta file"): last emitted sequence and the
/// seen-vector of last-consumed sequence per known peer writer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaFile {
    /// Id of the writer this meta file belongs to.
    pub instance_id: String,
    /// Last sequence this writer has emitted.
    pub last_write: u64,
    /// Last sequence consumed from each known writer, including self.
    pub seen: std::collections::HashMap<String, u64>,
    /// When this meta file was last rewritten.
    pub last_updated: DateTime<Utc>,
}

impl MetaFile {
    /// Serialize to the on-disk JSON form.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|source| StoreError::Json {
            path: Default::default(),
            source,
        })
    }

    /// Parse a meta file's bytes. Callers must treat any error here as
    /// "absent meta" and fall back to empty state (§4.5).
    pub fn from_bytes(path: &std::path::Path, bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|source| StoreError::Json {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_round_trips() {
        let bytes = vec![0u8, 1, 2, 255, 254, 10, 13];
        assert_eq!(decode_update(&encode_update(&bytes)).unwrap(), bytes);
    }

    #[test]
    fn single_update_name_omits_range() {
        assert_eq!(format_file_name("A", 5, 5), "A.000005.yjson");
    }

    #[test]
    fn multi_update_name_includes_range() {
        assert_eq!(format_file_name("A", 1, 50), "A.000001-000050.yjson");
    }

    #[test]
    fn parse_degenerate_range_is_accepted() {
        let parsed = parse_file_name("A.000005.yjson").unwrap();
        assert_eq!(parsed.instance, "A");
        assert_eq!(parsed.start_seq, 5);
        assert_eq!(parsed.end_seq, 5);
    }

    #[test]
    fn parse_range_numeric_not_fixed_width() {
        // Must parse numerically, not assume six digits forever (§4.2).
        let parsed = parse_file_name("A.1000000-1000007.yjson").unwrap();
        assert_eq!(parsed.start_seq, 1_000_000);
        assert_eq!(parsed.end_seq, 1_000_007);
    }

    #[test]
    fn parse_rejects_unrecognized_names() {
        assert!(parse_file_name("not json").is_none());
        assert!(parse_file_name("A.json").is_none());
        assert!(parse_file_name("A.5-3.yjson").is_none());
        assert!(parse_file_name(".yjson").is_none());
    }

    #[test]
    fn packed_file_round_trips_through_bytes() {
        let updates = vec![vec![1, 2, 3], vec![4, 5]];
        let packed = PackedFile::new("A", 10, &updates);
        let bytes = packed.to_bytes().unwrap();
        let parsed = PackedFile::from_bytes(std::path::Path::new("x"), &bytes).unwrap();
        assert_eq!(parsed.sequence, (10, 11));
        let decoded = parsed.decode_updates().unwrap();
        assert_eq!(decoded, vec![(10, vec![1, 2, 3]), (11, vec![4, 5])]);
    }

    #[test]
    fn packed_file_rejects_length_mismatch() {
        let bad = serde_json::json!({
            "instance": "A",
            "sequence": [1, 3],
            "timestamp": "2024-01-01T00:00:00Z",
            "updates": ["AA=="],
        });
        let bytes = serde_json::to_vec(&bad).unwrap();
        let err = PackedFile::from_bytes(std::path::Path::new("x"), &bytes).unwrap_err();
        assert!(matches!(err, StoreError::InvariantViolation { .. }));
    }

    #[test]
    fn meta_file_round_trips_through_bytes() {
        let mut seen = std::collections::HashMap::new();
        seen.insert("A".to_string(), 11u64);
        let meta = MetaFile {
            instance_id: "A".to_string(),
            last_write: 11,
            seen,
            last_updated: Utc::now(),
        };
        let bytes = meta.to_bytes().unwrap();
        let parsed = MetaFile::from_bytes(std::path::Path::new("x"), &bytes).unwrap();
        assert_eq!(parsed.last_write, 11);
        assert_eq!(parsed.seen.get("A"), Some(&11));

        let json = String::from_utf8(bytes).unwrap();
        assert!(json.contains("\"instanceId\""));
        assert!(json.contains("\"lastWrite\""));
        assert!(json.contains("\"lastUpdated\""));
    }

    #[test]
    fn meta_file_corrupt_bytes_error_out() {
        let err = MetaFile::from_bytes(std::path::Path::new("x"), b"not json").unwrap_err();
        assert!(matches!(err, StoreError::Json { .. }));
    }

    #[test]
    fn packed_file_rejects_end_before_start() {
        let bad = serde_json::json!({
            "instance": "A",
            "sequence": [5, 3],
            "timestamp": "2024-01-01T00:00:00Z",
            "updates": [],
        });
        let bytes = serde_json::to_vec(&bad).unwrap();
        let err = PackedFile::from_bytes(std::path::Path::new("x"), &bytes).unwrap_err();
        assert!(matches!(err, StoreError::InvariantViolation { .. }));
    }
}
