//! Notes and the closed patch schema.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A note as held by the external store.
///
/// `version` starts at 1 and strictly increases on every successful
/// mutation; the owning tenant is immutable after creation. A soft-deleted
/// note keeps its row but is invisible to list, get, search and edit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    /// Globally unique identifier
    pub note_id: String,
    /// Owning tenant
    pub org_id: String,
    /// Title
    pub title: String,
    /// Markdown body
    pub body: String,
    /// Monotonically increasing positive version
    pub version: i64,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
    /// Last-modified timestamp
    pub updated_at: DateTime<Utc>,
    /// Soft-deletion flag
    #[serde(default)]
    pub deleted: bool,
}

impl Note {
    /// Weak entity tag carrying the version, used for conditional GET
    pub fn etag(&self) -> String {
        format!("W/\"{}\"", self.version)
    }

    /// Text handed to the embedding producer when indexing
    pub fn index_text(&self) -> String {
        format!("{}\n\n{}", self.title, self.body)
    }
}

/// Partial update to a note: overwrite-on-present, absent fields keep the
/// stored value. Unknown fields are rejected.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl NotePatch {
    /// True when the patch carries no field at all
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.body.is_none()
    }

    /// Deterministic merge into an existing note's fields
    pub fn merged_title<'a>(&'a self, note: &'a Note) -> &'a str {
        self.title.as_deref().unwrap_or(&note.title)
    }

    /// Deterministic merge into an existing note's fields
    pub fn merged_body<'a>(&'a self, note: &'a Note) -> &'a str {
        self.body.as_deref().unwrap_or(&note.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(title: &str, body: &str, version: i64) -> Note {
        Note {
            note_id: "n1".into(),
            org_id: "org1".into(),
            title: title.into(),
            body: body.into(),
            version,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted: false,
        }
    }

    #[test]
    fn etag_is_weak_and_versioned() {
        assert_eq!(note("t", "b", 2).etag(), "W/\"2\"");
    }

    #[test]
    fn patch_merge_overwrites_only_present_fields() {
        let stored = note("T", "B", 1);
        let patch = NotePatch {
            title: Some("T2".into()),
            body: None,
        };
        assert_eq!(patch.merged_title(&stored), "T2");
        assert_eq!(patch.merged_body(&stored), "B");
    }

    #[test]
    fn unknown_patch_fields_are_rejected() {
        let err = serde_json::from_str::<NotePatch>(r#"{"title":"x","tags":[]}"#);
        assert!(err.is_err());
    }

    #[test]
    fn empty_patch_is_detected() {
        assert!(NotePatch::default().is_empty());
        let patch: NotePatch = serde_json::from_str(r#"{"body":"b"}"#).unwrap();
        assert!(!patch.is_empty());
    }
}
