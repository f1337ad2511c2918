//! Response shapes shared by the REST and RPC surfaces.

use chrono::{DateTime, Utc};
use quill_types::Note;
use serde::Serialize;

/// A note as returned to clients; the tenant and deletion flag stay
/// internal.
#[derive(Debug, Clone, Serialize)]
pub struct NoteResponse {
    pub note_id: String,
    pub title: String,
    pub body: String,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Note> for NoteResponse {
    fn from(note: Note) -> Self {
        Self {
            note_id: note.note_id,
            title: note.title,
            body: note.body,
            version: note.version,
            created_at: note.created_at,
            updated_at: note.updated_at,
        }
    }
}

/// One similarity-search result
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub note_id: String,
    pub similarity: f32,
    pub title: String,
    pub snippet: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Body snippet shown in search results
pub fn snippet(body: &str) -> String {
    const SNIPPET_CHARS: usize = 200;
    if body.chars().count() <= SNIPPET_CHARS {
        body.to_string()
    } else {
        let cut: String = body.chars().take(SNIPPET_CHARS).collect();
        format!("{cut}…")
    }
}
