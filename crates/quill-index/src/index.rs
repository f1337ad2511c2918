//! In-memory index state for one tenant.

use crate::snapshot::SnapshotStore;
use quill_types::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tokio::sync::Mutex;
use tracing::debug;

/// One search result
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub note_id: String,
    /// Similarity in `[0, 1]`, larger is more similar
    pub similarity: f32,
}

/// Insertion-ordered note ids with parallel unit vectors.
///
/// The dimension is fixed for the life of the instance; writes normalize
/// their input and reject mismatched dimensions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexState {
    dimension: usize,
    note_ids: Vec<String>,
    vectors: Vec<Vec<f32>>,
}

impl IndexState {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            note_ids: Vec::new(),
            vectors: Vec::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.note_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.note_ids.is_empty()
    }

    /// Replace or append the entry for `note_id`.
    pub fn upsert(&mut self, note_id: &str, vector: Vec<f32>) -> CoreResult<()> {
        if vector.len() != self.dimension {
            return Err(CoreError::invalid(format!(
                "embedding dimension {} does not match index dimension {}",
                vector.len(),
                self.dimension
            )));
        }

        if let Some(position) = self.note_ids.iter().position(|id| id == note_id) {
            self.note_ids.remove(position);
            self.vectors.remove(position);
        }

        self.note_ids.push(note_id.to_string());
        self.vectors.push(normalize(vector));
        Ok(())
    }

    /// Remove the entry for `note_id` if present; reports whether it was.
    pub fn remove(&mut self, note_id: &str) -> bool {
        if let Some(position) = self.note_ids.iter().position(|id| id == note_id) {
            self.note_ids.remove(position);
            self.vectors.remove(position);
            true
        } else {
            false
        }
    }

    /// Nearest neighbours of `query`, at most `k`, in non-increasing
    /// similarity order with ties broken by insertion order (older first).
    pub fn search(&self, query: &[f32], k: usize) -> CoreResult<Vec<SearchHit>> {
        if query.len() != self.dimension {
            return Err(CoreError::invalid(format!(
                "query dimension {} does not match index dimension {}",
                query.len(),
                self.dimension
            )));
        }
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let query = normalize(query.to_vec());
        let mut hits: Vec<SearchHit> = self
            .note_ids
            .iter()
            .zip(self.vectors.iter())
            .map(|(note_id, vector)| SearchHit {
                note_id: note_id.clone(),
                similarity: similarity(&query, vector),
            })
            .collect();

        // Stable sort keeps insertion order on equal similarity
        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(Ordering::Equal)
        });
        hits.truncate(k);
        Ok(hits)
    }
}

/// Similarity of two unit vectors: `1 - l2_distance / 2`, clamped to `[0, 1]`.
fn similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let distance = (2.0 - 2.0 * dot).max(0.0).sqrt();
    (1.0 - distance / 2.0).clamp(0.0, 1.0)
}

fn normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for component in &mut vector {
            *component /= norm;
        }
    }
    vector
}

/// A tenant's index: state under a per-instance lock plus its snapshot file.
///
/// Reads and writes on the same instance observe a serial order consistent
/// with lock acquisition; every mutation persists before the lock is
/// released.
pub struct TenantIndex {
    org_id: String,
    state: Mutex<IndexState>,
    snapshot: SnapshotStore,
}

impl TenantIndex {
    pub fn new(org_id: impl Into<String>, state: IndexState, snapshot: SnapshotStore) -> Self {
        Self {
            org_id: org_id.into(),
            state: Mutex::new(state),
            snapshot,
        }
    }

    pub fn org_id(&self) -> &str {
        &self.org_id
    }

    /// Replace or append an entry, then persist.
    pub async fn upsert(&self, note_id: &str, vector: Vec<f32>) -> CoreResult<()> {
        let mut state = self.state.lock().await;
        state.upsert(note_id, vector)?;
        self.snapshot.save(&state).await?;
        debug!(org_id = %self.org_id, note_id = %note_id, entries = state.len(), "index entry upserted");
        Ok(())
    }

    /// Remove an entry if present, then persist.
    pub async fn remove(&self, note_id: &str) -> CoreResult<()> {
        let mut state = self.state.lock().await;
        if state.remove(note_id) {
            self.snapshot.save(&state).await?;
            debug!(org_id = %self.org_id, note_id = %note_id, "index entry removed");
        }
        Ok(())
    }

    /// Search under the instance lock.
    pub async fn search(&self, query: &[f32], k: usize) -> CoreResult<Vec<SearchHit>> {
        let state = self.state.lock().await;
        state.search(query, k)
    }

    /// Atomically replace the whole state (rebuild), then persist.
    pub async fn replace(&self, new_state: IndexState) -> CoreResult<usize> {
        let mut state = self.state.lock().await;
        *state = new_state;
        self.snapshot.save(&state).await?;
        Ok(state.len())
    }

    /// Number of indexed notes.
    pub async fn len(&self) -> usize {
        self.state.lock().await.len()
    }
}
