//! In-memory store implementing the same contract as [`crate::PgStore`].
//!
//! Used by tests and local development without a database. The mutex makes
//! each operation atomic, which preserves the single-winner property of
//! `commit_versioned` under concurrency.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use quill_types::{
    ApiKeyRecord, ApiKeyStore, CoreError, CoreResult, IdentityStore, Note, NotePatch, NoteStore,
    Principal, QuotaOverride, Role, Tenant, UsageRecord, UsageSink,
};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Default)]
struct State {
    tenants: HashMap<String, Tenant>,
    users: HashMap<String, Principal>,
    keys: HashMap<String, ApiKeyRecord>,
    notes: HashMap<String, Note>,
    usage: Vec<UsageRecord>,
}

/// Process-local store.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a tenant record directly (test fixture).
    pub fn seed_tenant(&self, org_id: &str, name: &str, quota: Option<QuotaOverride>) {
        self.state.lock().tenants.insert(
            org_id.to_string(),
            Tenant {
                org_id: org_id.to_string(),
                name: name.to_string(),
                created_at: Utc::now(),
                quota,
            },
        );
    }

    /// Insert a user record directly (test fixture).
    pub fn seed_user(&self, user_id: &str, org_id: &str, email: &str, role: Role) {
        self.state.lock().users.insert(
            user_id.to_string(),
            Principal {
                user_id: user_id.to_string(),
                org_id: org_id.to_string(),
                email: email.to_string(),
                role,
                created_at: Utc::now(),
            },
        );
    }

    /// Recorded usage so far (test observer).
    pub fn usage_records(&self) -> Vec<UsageRecord> {
        self.state.lock().usage.clone()
    }
}

#[async_trait]
impl NoteStore for MemoryStore {
    async fn create(&self, org_id: &str, title: &str, body: &str) -> CoreResult<Note> {
        let note = Note {
            note_id: Uuid::new_v4().to_string(),
            org_id: org_id.to_string(),
            title: title.to_string(),
            body: body.to_string(),
            version: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted: false,
        };
        self.state
            .lock()
            .notes
            .insert(note.note_id.clone(), note.clone());
        Ok(note)
    }

    async fn get(&self, org_id: &str, note_id: &str) -> CoreResult<Note> {
        self.state
            .lock()
            .notes
            .get(note_id)
            .filter(|n| n.org_id == org_id && !n.deleted)
            .cloned()
            .ok_or_else(|| CoreError::not_found(format!("note {note_id}")))
    }

    async fn list(&self, org_id: &str, offset: i64, limit: i64) -> CoreResult<Vec<Note>> {
        let state = self.state.lock();
        let mut notes: Vec<Note> = state
            .notes
            .values()
            .filter(|n| n.org_id == org_id && !n.deleted)
            .cloned()
            .collect();
        notes.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

        Ok(notes
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn patch(&self, org_id: &str, note_id: &str, patch: &NotePatch) -> CoreResult<Note> {
        let mut state = self.state.lock();
        let note = state
            .notes
            .get_mut(note_id)
            .filter(|n| n.org_id == org_id && !n.deleted)
            .ok_or_else(|| CoreError::not_found(format!("note {note_id}")))?;

        if let Some(ref title) = patch.title {
            note.title = title.clone();
        }
        if let Some(ref body) = patch.body {
            note.body = body.clone();
        }
        note.version += 1;
        note.updated_at = Utc::now();
        Ok(note.clone())
    }

    async fn commit_versioned(
        &self,
        org_id: &str,
        note_id: &str,
        expected_version: i64,
        patch: &NotePatch,
    ) -> CoreResult<Note> {
        let mut state = self.state.lock();
        let note = state
            .notes
            .get_mut(note_id)
            .filter(|n| n.org_id == org_id && !n.deleted)
            .ok_or_else(|| CoreError::not_found(format!("note {note_id}")))?;

        if note.version != expected_version {
            return Err(CoreError::VersionMismatch {
                current: note.version,
            });
        }

        if let Some(ref title) = patch.title {
            note.title = title.clone();
        }
        if let Some(ref body) = patch.body {
            note.body = body.clone();
        }
        note.version += 1;
        note.updated_at = Utc::now();
        Ok(note.clone())
    }

    async fn soft_delete(&self, org_id: &str, note_id: &str) -> CoreResult<()> {
        let mut state = self.state.lock();
        let note = state
            .notes
            .get_mut(note_id)
            .filter(|n| n.org_id == org_id && !n.deleted)
            .ok_or_else(|| CoreError::not_found(format!("note {note_id}")))?;
        note.deleted = true;
        Ok(())
    }

    async fn list_for_index(&self, org_id: &str) -> CoreResult<Vec<Note>> {
        Ok(self
            .state
            .lock()
            .notes
            .values()
            .filter(|n| n.org_id == org_id && !n.deleted)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn find_api_key_by_digest(&self, digest: &str) -> CoreResult<Option<ApiKeyRecord>> {
        Ok(self
            .state
            .lock()
            .keys
            .values()
            .find(|k| k.digest == digest)
            .cloned())
    }

    async fn resolve_user(&self, user_id: &str) -> CoreResult<Option<Principal>> {
        Ok(self.state.lock().users.get(user_id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> CoreResult<Option<Principal>> {
        Ok(self
            .state
            .lock()
            .users
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn find_owner(&self, org_id: &str) -> CoreResult<Option<Principal>> {
        Ok(self
            .state
            .lock()
            .users
            .values()
            .find(|u| u.org_id == org_id && u.role == Role::Owner)
            .cloned())
    }

    async fn load_tenant(&self, org_id: &str) -> CoreResult<Option<Tenant>> {
        Ok(self.state.lock().tenants.get(org_id).cloned())
    }
}

#[async_trait]
impl ApiKeyStore for MemoryStore {
    async fn create_key(
        &self,
        org_id: &str,
        name: &str,
        digest: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> CoreResult<ApiKeyRecord> {
        let record = ApiKeyRecord {
            key_id: Uuid::new_v4().to_string(),
            org_id: org_id.to_string(),
            name: name.to_string(),
            digest: digest.to_string(),
            created_at: Utc::now(),
            expires_at,
        };
        self.state
            .lock()
            .keys
            .insert(record.key_id.clone(), record.clone());
        Ok(record)
    }

    async fn list_keys(&self, org_id: &str) -> CoreResult<Vec<ApiKeyRecord>> {
        let mut keys: Vec<ApiKeyRecord> = self
            .state
            .lock()
            .keys
            .values()
            .filter(|k| k.org_id == org_id)
            .cloned()
            .collect();
        keys.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(keys)
    }

    async fn delete_key(&self, org_id: &str, key_id: &str) -> CoreResult<()> {
        let mut state = self.state.lock();
        match state.keys.get(key_id) {
            Some(key) if key.org_id == org_id => {
                state.keys.remove(key_id);
                Ok(())
            }
            _ => Err(CoreError::not_found(format!("api key {key_id}"))),
        }
    }
}

#[async_trait]
impl UsageSink for MemoryStore {
    async fn record_batch(&self, records: &[UsageRecord]) -> CoreResult<()> {
        self.state.lock().usage.extend_from_slice(records);
        Ok(())
    }
}
