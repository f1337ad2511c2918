//! Schema bootstrap for the external store.
//!
//! Idempotent statements executed at startup; production deployments can
//! run the same schema through their own migration tooling.

use quill_types::{CoreError, CoreResult};
use sqlx::PgPool;
use tracing::info;

const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS org (
        org_id      TEXT PRIMARY KEY,
        name        TEXT NOT NULL,
        created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        quota_json  JSONB
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS app_user (
        user_id     TEXT PRIMARY KEY,
        org_id      TEXT NOT NULL REFERENCES org(org_id),
        email       TEXT NOT NULL,
        role        TEXT NOT NULL DEFAULT 'viewer',
        created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS api_key (
        key_id      TEXT PRIMARY KEY,
        org_id      TEXT NOT NULL REFERENCES org(org_id),
        digest      TEXT NOT NULL UNIQUE,
        name        TEXT NOT NULL,
        created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        expires_at  TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS note (
        note_id     TEXT PRIMARY KEY,
        org_id      TEXT NOT NULL REFERENCES org(org_id),
        title       TEXT NOT NULL,
        body        TEXT NOT NULL,
        version     BIGINT NOT NULL DEFAULT 1,
        created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        deleted     BOOLEAN NOT NULL DEFAULT FALSE
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_note_org_updated
        ON note (org_id, updated_at DESC) WHERE NOT deleted
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS usage_log (
        log_id      TEXT PRIMARY KEY,
        org_id      TEXT NOT NULL REFERENCES org(org_id),
        user_id     TEXT,
        kind        TEXT NOT NULL,
        endpoint    TEXT NOT NULL,
        bytes       BIGINT NOT NULL DEFAULT 0,
        timestamp   TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    // Written by the external billing aggregation job, never by the core
    r#"
    CREATE TABLE IF NOT EXISTS usage_summary (
        org_id        TEXT NOT NULL REFERENCES org(org_id),
        period        DATE NOT NULL,
        requests      BIGINT NOT NULL DEFAULT 0,
        bytes         BIGINT NOT NULL DEFAULT 0,
        invoice_json  JSONB,
        PRIMARY KEY (org_id, period)
    )
    "#,
];

/// Apply the bootstrap schema.
pub async fn run(pool: &PgPool) -> CoreResult<()> {
    for statement in STATEMENTS {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| CoreError::internal(format!("schema bootstrap failed: {e}")))?;
    }
    info!(statements = STATEMENTS.len(), "store schema ensured");
    Ok(())
}
