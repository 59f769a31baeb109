/// Application context and dependency injection
use crate::{
    config::ServerConfig,
    crypto::ResolveSigner,
    db,
    error::MonaliasResult,
    identity::{IdentityState, IdentityWatchdog},
    rate_limit::SourceRateLimiter,
    resolver::ResolveService,
    store::{InstanceStore, SqliteStore},
    wallet::{WalletBridge, WalletRpcClient},
};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub db: SqlitePool,
    pub store: Arc<SqliteStore>,
    pub signer: Arc<ResolveSigner>,
    pub identity: Arc<IdentityState>,
    pub watchdog: Arc<IdentityWatchdog>,
    pub resolver: Arc<ResolveService>,
    // Per-source limiter for the resolve route
    pub rate_limiter: Arc<SourceRateLimiter>,
    // Wallet RPC bridge, when configured
    pub wallet: Option<Arc<dyn WalletBridge>>,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: ServerConfig) -> MonaliasResult<Self> {
        // Validate configuration
        config.validate()?;

        // Open database and run migrations
        let db = db::create_pool(&config.storage.db_path, db::DatabaseOptions::default()).await?;
        db::run_migrations(&db).await?;
        db::test_connection(&db).await?;

        // Load signing key
        let signer = ResolveSigner::load(&config.signing.key_file, config.signing.key_id.clone()).await?;

        // Wallet bridge
        let wallet: Option<Arc<dyn WalletBridge>> = match &config.wallet_rpc {
            Some(rpc) => Some(Arc::new(WalletRpcClient::new(rpc)?)),
            None => None,
        };

        Self::from_parts(config, db, signer, wallet).await
    }

    /// Assemble the context from an opened, migrated database
    pub async fn from_parts(
        config: ServerConfig,
        db: SqlitePool,
        signer: ResolveSigner,
        wallet: Option<Arc<dyn WalletBridge>>,
    ) -> MonaliasResult<Self> {
        let store = Arc::new(SqliteStore::new(db.clone()));
        let signer = Arc::new(signer);

        // Reconcile the stored identity with configuration; status survives restarts
        let identity = store
            .upsert_identity(
                &config.service.domain,
                &config.service.public_base_url,
                signer.key_id(),
                &signer.public_key_base64(),
            )
            .await?;
        tracing::info!(
            status = %identity.status,
            key_id = %identity.signing_key_id,
            "instance_identity_loaded"
        );

        let identity = Arc::new(IdentityState::load(store.clone()).await?);

        let watchdog = Arc::new(IdentityWatchdog::new(
            Arc::clone(&identity),
            &config.identity,
            config.service.public_base_url.clone(),
        )?);

        let rate_limiter = Arc::new(SourceRateLimiter::new(&config.rate_limit)?);

        let resolver = Arc::new(ResolveService::new(
            store.clone(),
            store.clone(),
            Arc::clone(&signer),
            Arc::clone(&identity),
            wallet.clone(),
            config.service.domain.clone(),
            &config.resolver,
        ));

        Ok(Self {
            config: Arc::new(config),
            db,
            store,
            signer,
            identity,
            watchdog,
            resolver,
            rate_limiter,
            wallet,
        })
    }
}
