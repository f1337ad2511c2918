//! Durable per-tenant snapshot files.
//!
//! Envelope: `QIX1` magic, format version, dimension, CRC32 of the payload,
//! then the JSON payload. The only external contract is that the same
//! process (same embedding dimension) can reload its own files; anything
//! unreadable is discarded and the index starts empty.

use crate::index::IndexState;
use quill_types::{CoreError, CoreResult};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const MAGIC: &[u8; 4] = b"QIX1";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 4 + 4;

/// Reads and writes one tenant's snapshot file.
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    /// Snapshot location for a tenant inside the snapshot directory.
    pub fn for_tenant(dir: &Path, org_id: &str) -> Self {
        Self {
            path: dir.join(format!("index_{org_id}.qix")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the snapshot. Returns `None` when the file is missing, damaged
    /// or was written with a different dimension; the caller starts empty.
    pub async fn load(&self, expected_dimension: usize) -> CoreResult<Option<IndexState>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CoreError::from(e)),
        };

        match decode(&bytes, expected_dimension) {
            Ok(state) => {
                debug!(path = %self.path.display(), entries = state.len(), "snapshot loaded");
                Ok(Some(state))
            }
            Err(reason) => {
                warn!(path = %self.path.display(), reason = %reason, "discarding unreadable snapshot");
                Ok(None)
            }
        }
    }

    /// Persist the state: write a temp file, then rename into place.
    pub async fn save(&self, state: &IndexState) -> CoreResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let bytes = encode(state)?;
        let tmp = self.path.with_extension("qix.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

fn encode(state: &IndexState) -> CoreResult<Vec<u8>> {
    let payload =
        serde_json::to_vec(state).map_err(|e| CoreError::internal(format!("snapshot encode: {e}")))?;
    let crc = crc32fast::hash(&payload);

    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    bytes.extend_from_slice(&(state.dimension() as u32).to_le_bytes());
    bytes.extend_from_slice(&crc.to_le_bytes());
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

fn decode(bytes: &[u8], expected_dimension: usize) -> Result<IndexState, String> {
    if bytes.len() < HEADER_LEN {
        return Err("truncated header".into());
    }
    if &bytes[0..4] != MAGIC {
        return Err("bad magic".into());
    }

    let version = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
    if version != FORMAT_VERSION {
        return Err(format!("unsupported format version {version}"));
    }

    let dimension = u32::from_le_bytes(bytes[8..12].try_into().unwrap()) as usize;
    if dimension != expected_dimension {
        return Err(format!(
            "dimension {dimension} does not match configured {expected_dimension}"
        ));
    }

    let crc = u32::from_le_bytes(bytes[12..16].try_into().unwrap());
    let payload = &bytes[HEADER_LEN..];
    if crc32fast::hash(payload) != crc {
        return Err("checksum mismatch".into());
    }

    let state: IndexState =
        serde_json::from_slice(payload).map_err(|e| format!("payload decode: {e}"))?;
    if state.dimension() != dimension {
        return Err("payload dimension disagrees with header".into());
    }
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::for_tenant(dir.path(), "org1");

        let mut state = IndexState::new(3);
        state.upsert("n1", vec![1.0, 0.0, 0.0]).unwrap();
        state.upsert("n2", vec![0.0, 1.0, 0.0]).unwrap();
        store.save(&state).await.unwrap();

        let loaded = store.load(3).await.unwrap().expect("snapshot present");
        assert_eq!(loaded.len(), 2);
        let hits = loaded.search(&[1.0, 0.0, 0.0], 1).unwrap();
        assert_eq!(hits[0].note_id, "n1");
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::for_tenant(dir.path(), "org1");
        assert!(store.load(3).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupt_payload_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::for_tenant(dir.path(), "org1");

        let mut state = IndexState::new(3);
        state.upsert("n1", vec![1.0, 0.0, 0.0]).unwrap();
        store.save(&state).await.unwrap();

        let mut bytes = tokio::fs::read(store.path()).await.unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        tokio::fs::write(store.path(), &bytes).await.unwrap();

        assert!(store.load(3).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dimension_change_invalidates_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::for_tenant(dir.path(), "org1");

        let state = IndexState::new(3);
        store.save(&state).await.unwrap();

        assert!(store.load(4).await.unwrap().is_none());
        assert!(store.load(3).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn snapshots_are_per_tenant() {
        let dir = tempfile::tempdir().unwrap();
        let a = SnapshotStore::for_tenant(dir.path(), "org-a");
        let b = SnapshotStore::for_tenant(dir.path(), "org-b");
        assert_ne!(a.path(), b.path());
    }
}
