//! PostgreSQL implementation of the store ports.
//!
//! The anti-corruption layer keeps SQL rows out of the domain: every query
//! maps through a private row struct. All note predicates carry `org_id`
//! and exclude soft-deleted rows, except `soft_delete` itself.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quill_types::{
    ApiKeyRecord, ApiKeyStore, CoreError, CoreResult, IdentityStore, Note, NotePatch, NoteStore,
    Principal, QuotaOverride, Role, Tenant, UsageRecord, UsageSink,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

/// Store facade over a PostgreSQL pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct NoteRow {
    note_id: String,
    org_id: String,
    title: String,
    body: String,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted: bool,
}

impl From<NoteRow> for Note {
    fn from(row: NoteRow) -> Self {
        Note {
            note_id: row.note_id,
            org_id: row.org_id,
            title: row.title,
            body: row.body,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted: row.deleted,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ApiKeyRow {
    key_id: String,
    org_id: String,
    digest: String,
    name: String,
    created_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

impl From<ApiKeyRow> for ApiKeyRecord {
    fn from(row: ApiKeyRow) -> Self {
        ApiKeyRecord {
            key_id: row.key_id,
            org_id: row.org_id,
            name: row.name,
            digest: row.digest,
            created_at: row.created_at,
            expires_at: row.expires_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    user_id: String,
    org_id: String,
    email: String,
    role: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for Principal {
    type Error = CoreError;

    fn try_from(row: UserRow) -> CoreResult<Self> {
        let role = Role::parse(&row.role)
            .ok_or_else(|| CoreError::internal(format!("unknown stored role: {}", row.role)))?;
        Ok(Principal {
            user_id: row.user_id,
            org_id: row.org_id,
            email: row.email,
            role,
            created_at: row.created_at,
        })
    }
}

const NOTE_COLUMNS: &str =
    "note_id, org_id, title, body, version, created_at, updated_at, deleted";

fn db_err(err: sqlx::Error) -> CoreError {
    CoreError::internal(format!("store operation failed: {err}"))
}

impl PgStore {
    /// Connect a pool against the configured store URL.
    pub async fn connect(database_url: &str) -> CoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(16)
            .connect(database_url)
            .await
            .map_err(db_err)?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn current_version(&self, org_id: &str, note_id: &str) -> CoreResult<Option<i64>> {
        let row = sqlx::query(
            "SELECT version FROM note WHERE note_id = $1 AND org_id = $2 AND NOT deleted",
        )
        .bind(note_id)
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.map(|r| r.get::<i64, _>("version")))
    }
}

#[async_trait]
impl NoteStore for PgStore {
    #[instrument(skip(self, title, body), fields(org_id = %org_id))]
    async fn create(&self, org_id: &str, title: &str, body: &str) -> CoreResult<Note> {
        let note_id = Uuid::new_v4().to_string();
        let row: NoteRow = sqlx::query_as(&format!(
            "INSERT INTO note (note_id, org_id, title, body) VALUES ($1, $2, $3, $4) \
             RETURNING {NOTE_COLUMNS}"
        ))
        .bind(&note_id)
        .bind(org_id)
        .bind(title)
        .bind(body)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        debug!(note_id = %row.note_id, "note created");
        Ok(row.into())
    }

    async fn get(&self, org_id: &str, note_id: &str) -> CoreResult<Note> {
        let row: Option<NoteRow> = sqlx::query_as(&format!(
            "SELECT {NOTE_COLUMNS} FROM note \
             WHERE note_id = $1 AND org_id = $2 AND NOT deleted"
        ))
        .bind(note_id)
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(Note::from)
            .ok_or_else(|| CoreError::not_found(format!("note {note_id}")))
    }

    async fn list(&self, org_id: &str, offset: i64, limit: i64) -> CoreResult<Vec<Note>> {
        let rows: Vec<NoteRow> = sqlx::query_as(&format!(
            "SELECT {NOTE_COLUMNS} FROM note \
             WHERE org_id = $1 AND NOT deleted \
             ORDER BY updated_at DESC OFFSET $2 LIMIT $3"
        ))
        .bind(org_id)
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows.into_iter().map(Note::from).collect())
    }

    async fn patch(&self, org_id: &str, note_id: &str, patch: &NotePatch) -> CoreResult<Note> {
        let row: Option<NoteRow> = sqlx::query_as(&format!(
            "UPDATE note SET title = COALESCE($3, title), body = COALESCE($4, body), \
             version = version + 1, updated_at = NOW() \
             WHERE note_id = $1 AND org_id = $2 AND NOT deleted \
             RETURNING {NOTE_COLUMNS}"
        ))
        .bind(note_id)
        .bind(org_id)
        .bind(patch.title.as_deref())
        .bind(patch.body.as_deref())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(Note::from)
            .ok_or_else(|| CoreError::not_found(format!("note {note_id}")))
    }

    #[instrument(skip(self, patch), fields(org_id = %org_id, note_id = %note_id, expected_version))]
    async fn commit_versioned(
        &self,
        org_id: &str,
        note_id: &str,
        expected_version: i64,
        patch: &NotePatch,
    ) -> CoreResult<Note> {
        // Version check and write are one statement; the store's row lock
        // serializes concurrent committers so exactly one sees the expected
        // version.
        let row: Option<NoteRow> = sqlx::query_as(&format!(
            "UPDATE note SET title = COALESCE($4, title), body = COALESCE($5, body), \
             version = version + 1, updated_at = NOW() \
             WHERE note_id = $1 AND org_id = $2 AND version = $3 AND NOT deleted \
             RETURNING {NOTE_COLUMNS}"
        ))
        .bind(note_id)
        .bind(org_id)
        .bind(expected_version)
        .bind(patch.title.as_deref())
        .bind(patch.body.as_deref())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        if let Some(row) = row {
            return Ok(row.into());
        }

        match self.current_version(org_id, note_id).await? {
            Some(current) => Err(CoreError::VersionMismatch { current }),
            None => Err(CoreError::not_found(format!("note {note_id}"))),
        }
    }

    async fn soft_delete(&self, org_id: &str, note_id: &str) -> CoreResult<()> {
        let result = sqlx::query(
            "UPDATE note SET deleted = TRUE \
             WHERE note_id = $1 AND org_id = $2 AND NOT deleted",
        )
        .bind(note_id)
        .bind(org_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(CoreError::not_found(format!("note {note_id}")));
        }
        Ok(())
    }

    async fn list_for_index(&self, org_id: &str) -> CoreResult<Vec<Note>> {
        let rows: Vec<NoteRow> = sqlx::query_as(&format!(
            "SELECT {NOTE_COLUMNS} FROM note WHERE org_id = $1 AND NOT deleted"
        ))
        .bind(org_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows.into_iter().map(Note::from).collect())
    }
}

#[async_trait]
impl IdentityStore for PgStore {
    async fn find_api_key_by_digest(&self, digest: &str) -> CoreResult<Option<ApiKeyRecord>> {
        let row: Option<ApiKeyRow> = sqlx::query_as(
            "SELECT key_id, org_id, digest, name, created_at, expires_at \
             FROM api_key WHERE digest = $1",
        )
        .bind(digest)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.map(ApiKeyRecord::from))
    }

    async fn resolve_user(&self, user_id: &str) -> CoreResult<Option<Principal>> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT user_id, org_id, email, role, created_at FROM app_user WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(Principal::try_from).transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> CoreResult<Option<Principal>> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT user_id, org_id, email, role, created_at FROM app_user \
             WHERE email = $1 LIMIT 1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(Principal::try_from).transpose()
    }

    async fn find_owner(&self, org_id: &str) -> CoreResult<Option<Principal>> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT user_id, org_id, email, role, created_at FROM app_user \
             WHERE org_id = $1 AND role = 'owner' LIMIT 1",
        )
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(Principal::try_from).transpose()
    }

    async fn load_tenant(&self, org_id: &str) -> CoreResult<Option<Tenant>> {
        let row = sqlx::query(
            "SELECT org_id, name, created_at, quota_json FROM org WHERE org_id = $1",
        )
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        let Some(row) = row else { return Ok(None) };

        let quota: Option<QuotaOverride> = row
            .get::<Option<serde_json::Value>, _>("quota_json")
            .and_then(|value| serde_json::from_value(value).ok());

        Ok(Some(Tenant {
            org_id: row.get("org_id"),
            name: row.get("name"),
            created_at: row.get("created_at"),
            quota,
        }))
    }
}

#[async_trait]
impl ApiKeyStore for PgStore {
    async fn create_key(
        &self,
        org_id: &str,
        name: &str,
        digest: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> CoreResult<ApiKeyRecord> {
        let key_id = Uuid::new_v4().to_string();
        let row: ApiKeyRow = sqlx::query_as(
            "INSERT INTO api_key (key_id, org_id, digest, name, expires_at) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING key_id, org_id, digest, name, created_at, expires_at",
        )
        .bind(&key_id)
        .bind(org_id)
        .bind(digest)
        .bind(name)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.into())
    }

    async fn list_keys(&self, org_id: &str) -> CoreResult<Vec<ApiKeyRecord>> {
        let rows: Vec<ApiKeyRow> = sqlx::query_as(
            "SELECT key_id, org_id, digest, name, created_at, expires_at \
             FROM api_key WHERE org_id = $1 ORDER BY created_at DESC",
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows.into_iter().map(ApiKeyRecord::from).collect())
    }

    async fn delete_key(&self, org_id: &str, key_id: &str) -> CoreResult<()> {
        let result = sqlx::query("DELETE FROM api_key WHERE key_id = $1 AND org_id = $2")
            .bind(key_id)
            .bind(org_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(CoreError::not_found(format!("api key {key_id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl UsageSink for PgStore {
    async fn record_batch(&self, records: &[UsageRecord]) -> CoreResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for record in records {
            sqlx::query(
                "INSERT INTO usage_log (log_id, org_id, user_id, kind, endpoint, bytes, timestamp) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&record.org_id)
            .bind(record.user_id.as_deref())
            .bind(record.surface.as_str())
            .bind(&record.endpoint)
            .bind(record.bytes as i64)
            .bind(record.timestamp)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;

        debug!(count = records.len(), "usage batch persisted");
        Ok(())
    }
}
