//! Registry of per-tenant index instances.

use crate::index::{IndexState, SearchHit, TenantIndex};
use crate::snapshot::SnapshotStore;
use dashmap::DashMap;
use quill_types::{CoreResult, Embedder, Note, NoteStore};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Owns every tenant's index instance and the embedding producer.
///
/// Instances are materialized lazily: the first access for a tenant
/// rehydrates its snapshot (or starts empty when there is none). Different
/// tenants' indexes proceed independently; all callers for the same tenant
/// share one instance and therefore one lock.
pub struct IndexRegistry {
    indexes: DashMap<String, Arc<TenantIndex>>,
    embedder: Arc<dyn Embedder>,
    snapshot_dir: PathBuf,
}

impl IndexRegistry {
    pub fn new(embedder: Arc<dyn Embedder>, snapshot_dir: impl Into<PathBuf>) -> Self {
        Self {
            indexes: DashMap::new(),
            embedder,
            snapshot_dir: snapshot_dir.into(),
        }
    }

    /// The configured embedding dimension.
    pub fn dimension(&self) -> usize {
        self.embedder.dimension()
    }

    /// Get or lazily materialize the index instance for a tenant.
    pub async fn index_for(&self, org_id: &str) -> CoreResult<Arc<TenantIndex>> {
        if let Some(existing) = self.indexes.get(org_id) {
            return Ok(Arc::clone(&existing));
        }

        let snapshot = SnapshotStore::for_tenant(&self.snapshot_dir, org_id);
        let state = match snapshot.load(self.embedder.dimension()).await? {
            Some(state) => state,
            None => IndexState::new(self.embedder.dimension()),
        };
        let index = Arc::new(TenantIndex::new(org_id, state, snapshot));

        // A concurrent caller may have materialized the same tenant; the
        // first insertion wins and both see one instance.
        let entry = self
            .indexes
            .entry(org_id.to_string())
            .or_insert_with(|| Arc::clone(&index));
        Ok(Arc::clone(&entry))
    }

    /// Embed and upsert one note.
    pub async fn index_note(&self, note: &Note) -> CoreResult<()> {
        let vector = self.embedder.embed(&note.index_text());
        let index = self.index_for(&note.org_id).await?;
        index.upsert(&note.note_id, vector).await
    }

    /// Drop a note from its tenant's index.
    pub async fn remove_note(&self, org_id: &str, note_id: &str) -> CoreResult<()> {
        let index = self.index_for(org_id).await?;
        index.remove(note_id).await
    }

    /// Embed the query and search the tenant's index.
    pub async fn search(&self, org_id: &str, query: &str, k: usize) -> CoreResult<Vec<SearchHit>> {
        let vector = self.embedder.embed(query);
        let index = self.index_for(org_id).await?;
        index.search(&vector, k).await
    }

    /// Re-enumerate every non-deleted note for the tenant, re-embed, and
    /// replace the in-memory state atomically. Returns the entry count.
    pub async fn rebuild(&self, org_id: &str, store: &dyn NoteStore) -> CoreResult<usize> {
        let notes = store.list_for_index(org_id).await?;

        let mut state = IndexState::new(self.embedder.dimension());
        for note in &notes {
            if let Err(e) = state.upsert(&note.note_id, self.embedder.embed(&note.index_text())) {
                warn!(org_id = %org_id, note_id = %note.note_id, error = %e, "skipping note during rebuild");
            }
        }

        let index = self.index_for(org_id).await?;
        let count = index.replace(state).await?;
        info!(org_id = %org_id, entries = count, "index rebuilt");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use chrono::Utc;
    use quill_store::MemoryStore;

    fn note(org_id: &str, note_id: &str, title: &str, body: &str) -> Note {
        Note {
            note_id: note_id.into(),
            org_id: org_id.into(),
            title: title.into(),
            body: body.into(),
            version: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted: false,
        }
    }

    fn registry(dir: &std::path::Path) -> IndexRegistry {
        IndexRegistry::new(Arc::new(HashEmbedder::new(64)), dir)
    }

    #[tokio::test]
    async fn indexed_note_is_findable_by_its_own_text() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());

        let note = note("org1", "n1", "apples and oranges", "a note about fruit");
        registry.index_note(&note).await.unwrap();

        let hits = registry
            .search("org1", &note.index_text(), 10)
            .await
            .unwrap();
        assert_eq!(hits[0].note_id, "n1");
        assert!((hits[0].similarity - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn search_never_crosses_tenants() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());

        registry
            .index_note(&note("org-a", "note-a", "secret", "alpha"))
            .await
            .unwrap();
        registry
            .index_note(&note("org-b", "note-b", "secret", "alpha"))
            .await
            .unwrap();

        let hits = registry.search("org-a", "secret", 10).await.unwrap();
        assert!(hits.iter().all(|hit| hit.note_id == "note-a"));
    }

    #[tokio::test]
    async fn removed_note_stops_surfacing() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());

        let n = note("org1", "n1", "title", "body");
        registry.index_note(&n).await.unwrap();
        registry.remove_note("org1", "n1").await.unwrap();

        let hits = registry.search("org1", "title", 10).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn state_survives_registry_restart() {
        let dir = tempfile::tempdir().unwrap();

        {
            let registry = registry(dir.path());
            registry
                .index_note(&note("org1", "n1", "durable", "entry"))
                .await
                .unwrap();
        }

        // A fresh registry over the same directory rehydrates the snapshot
        let registry = registry(dir.path());
        let hits = registry.search("org1", "durable\n\nentry", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].note_id, "n1");
    }

    #[tokio::test]
    async fn rebuild_reflects_store_contents() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let store = MemoryStore::new();

        store.seed_tenant("org1", "Acme", None);
        let kept = store.create("org1", "kept", "body").await.unwrap();
        let dropped = store.create("org1", "dropped", "body").await.unwrap();
        store.soft_delete("org1", &dropped.note_id).await.unwrap();

        // Stale entry for the deleted note, as after a missed update
        registry.index_note(&dropped).await.unwrap();

        let count = registry.rebuild("org1", &store).await.unwrap();
        assert_eq!(count, 1);

        let hits = registry.search("org1", "kept\n\nbody", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].note_id, kept.note_id);
    }
}
