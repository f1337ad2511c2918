//! Shared application state.

use anyhow::Context;
use quill_auth::{AuthGate, TokenSigner};
use quill_config::AppConfig;
use quill_hub::{EditHub, RedisBus};
use quill_index::{HashEmbedder, IndexRegistry};
use quill_quota::{QuotaEngine, QuotaLimits, RedisQuota};
use quill_store::{migrations, PgStore};
use quill_types::{
    ApiKeyStore, EditBus, Embedder, IdentityStore, NoteStore, QuotaBackend, UsageSink,
};
use quill_usage::UsageEmitter;
use std::sync::Arc;

/// Everything the surface adapters need, dependency-injected and cheap to
/// clone. Services are process-scoped singletons owned by this struct, not
/// globals.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub notes: Arc<dyn NoteStore>,
    pub identity: Arc<dyn IdentityStore>,
    pub api_keys: Arc<dyn ApiKeyStore>,
    pub gate: AuthGate,
    pub quota: QuotaEngine,
    pub index: Arc<IndexRegistry>,
    pub hub: Arc<EditHub>,
    pub usage: UsageEmitter,
}

impl AppState {
    /// Wire the production backends: PostgreSQL store, Redis quota buckets
    /// and Redis edit bus.
    pub async fn production(config: AppConfig) -> anyhow::Result<Self> {
        let store = Arc::new(
            PgStore::connect(&config.database_url)
                .await
                .context("connecting to the store")?,
        );
        migrations::run(store.pool())
            .await
            .context("bootstrapping the schema")?;

        let quota_backend = Arc::new(
            RedisQuota::connect(&config.redis_url)
                .await
                .context("connecting the quota backend")?,
        );
        let bus = Arc::new(
            RedisBus::connect(&config.redis_url)
                .await
                .context("connecting the edit bus")?,
        );
        let embedder = Arc::new(HashEmbedder::new(config.embedding_dim));

        Self::assemble(
            config,
            store.clone(),
            store.clone(),
            store.clone(),
            store,
            quota_backend,
            bus,
            embedder,
        )
    }

    /// Assemble the state from already-constructed ports. Production and
    /// tests share this wiring.
    #[allow(clippy::too_many_arguments)]
    pub fn assemble(
        config: AppConfig,
        notes: Arc<dyn NoteStore>,
        identity: Arc<dyn IdentityStore>,
        api_keys: Arc<dyn ApiKeyStore>,
        usage_sink: Arc<dyn UsageSink>,
        quota_backend: Arc<dyn QuotaBackend>,
        bus: Arc<dyn EditBus>,
        embedder: Arc<dyn Embedder>,
    ) -> anyhow::Result<Self> {
        let signer = TokenSigner::new(
            &config.secret_key,
            &config.token_algorithm,
            config.token_ttl,
        )
        .map_err(|e| anyhow::anyhow!("token signer: {e}"))?;
        let gate = AuthGate::new(identity.clone(), signer);

        let quota = QuotaEngine::new(
            quota_backend,
            QuotaLimits {
                requests_per_minute: config.quotas.requests_per_minute,
                bytes_per_minute: config.quotas.bytes_per_minute,
                window_secs: config.quotas.window_secs,
            },
        );

        let index = Arc::new(IndexRegistry::new(embedder, config.snapshot_dir.clone()));

        let hub = Arc::new(EditHub::new(
            notes.clone(),
            index.clone(),
            quota.clone(),
            bus,
            config.session_queue_depth,
            config.op_timeout,
        ));

        let usage = UsageEmitter::start(usage_sink, config.usage_queue_depth);

        Ok(Self {
            config: Arc::new(config),
            notes,
            identity,
            api_keys,
            gate,
            quota,
            index,
            hub,
            usage,
        })
    }
}
