/// Alias resolution
///
/// Validates a resolve request, gates it on the instance status, looks up
/// the alias (falling back to the catch-all), produces its address and
/// signs the answer.
use crate::{
    config::ResolverConfig,
    crypto::{CanonicalResolve, ResolveSigner},
    db::models::{Alias, AliasMode},
    error::{MonaliasError, MonaliasResult},
    identity::IdentityState,
    metrics,
    protocol::{
        acct_matches_domain, catch_all_display_name, display_name_from_acct, Network,
        ResolveMeta, ResolveRequest, ResolveResponse, ResolvedKind,
    },
    store::{AccountStore, AliasStore},
    wallet::WalletBridge,
};
use chrono::{SecondsFormat, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Derivations retried when an admin rotation races the write-back
const MAX_DERIVE_ATTEMPTS: usize = 3;

fn static_address(alias: &Alias) -> MonaliasResult<String> {
    alias.stored_address().map(str::to_string).ok_or_else(|| {
        error!(alias_id = alias.id, full_acct = %alias.full_acct, "static alias has no address");
        MonaliasError::Integrity(format!("Static alias {} has no address", alias.id))
    })
}

/// A resolution plus the metadata that travels in response headers
#[derive(Debug, Clone)]
pub struct SignedResolution {
    pub response: ResolveResponse,
    pub key_id: String,
    /// Base64 Ed25519 signature over the canonical string
    pub signature: String,
}

/// Resolve handler
pub struct ResolveService {
    aliases: Arc<dyn AliasStore>,
    accounts: Arc<dyn AccountStore>,
    signer: Arc<ResolveSigner>,
    identity: Arc<IdentityState>,
    wallet: Option<Arc<dyn WalletBridge>>,
    domain: String,
    catch_all_address: Option<String>,
    response_ttl: Option<Duration>,
}

impl ResolveService {
    pub fn new(
        aliases: Arc<dyn AliasStore>,
        accounts: Arc<dyn AccountStore>,
        signer: Arc<ResolveSigner>,
        identity: Arc<IdentityState>,
        wallet: Option<Arc<dyn WalletBridge>>,
        domain: impl Into<String>,
        config: &ResolverConfig,
    ) -> Self {
        Self {
            aliases,
            accounts,
            signer,
            identity,
            wallet,
            domain: domain.into(),
            catch_all_address: config.catch_all_address.clone().filter(|a| !a.is_empty()),
            response_ttl: config.response_ttl,
        }
    }

    /// Resolve one request end to end
    pub async fn resolve(&self, request: &ResolveRequest) -> MonaliasResult<SignedResolution> {
        let result = self.resolve_inner(request).await;

        match &result {
            Ok(signed) => {
                let outcome = match signed.response.meta.resolved_kind {
                    ResolvedKind::Normal => "normal",
                    ResolvedKind::CatchAll => "catch_all",
                };
                metrics::record_resolve(outcome);
                info!(
                    acct = %request.acct,
                    network = %request.network,
                    kind = outcome,
                    "resolve_served"
                );
            }
            Err(err) => {
                metrics::record_resolve(err.code());
                debug!(
                    acct = %request.acct,
                    network = %request.network,
                    code = err.code(),
                    "resolve_rejected"
                );
            }
        }

        result
    }

    async fn resolve_inner(&self, request: &ResolveRequest) -> MonaliasResult<SignedResolution> {
        let network = request.validate()?;

        if !acct_matches_domain(&request.acct, &self.domain) {
            return Err(MonaliasError::AliasNotFound);
        }

        self.identity.ensure_unlocked()?;

        let (address, meta) = match self.aliases.get_alias_by_full_acct(&request.acct).await? {
            Some(alias) => {
                let address = self.address_for(&alias).await?;
                let meta = ResolveMeta {
                    display_name: display_name_from_acct(&request.acct),
                    alias: Some(alias.alias_label.clone()),
                    resolved_kind: ResolvedKind::Normal,
                };
                (address, meta)
            }
            None => {
                let address = self
                    .catch_all_address
                    .clone()
                    .ok_or(MonaliasError::AliasNotFound)?;
                let meta = ResolveMeta {
                    display_name: Some(catch_all_display_name(&self.domain)),
                    alias: None,
                    resolved_kind: ResolvedKind::CatchAll,
                };
                (address, meta)
            }
        };

        Ok(self.sign(request, network, address, meta))
    }

    /// Address for a stored alias according to its mode
    async fn address_for(&self, alias: &Alias) -> MonaliasResult<String> {
        let mut alias = alias.clone();

        for _ in 0..MAX_DERIVE_ATTEMPTS {
            match alias.mode {
                AliasMode::StaticAddress => return static_address(&alias),
                AliasMode::DynamicSubaddress => {
                    if let Some(cached) = alias.stored_address() {
                        return Ok(cached.to_string());
                    }
                    if let Some(stored) = self.derive_and_cache(&alias).await? {
                        return Ok(stored);
                    }
                }
            }

            // Rotated while deriving: start over from the current row
            debug!(alias_id = alias.id, "alias_rotated_during_derivation");
            alias = self
                .aliases
                .get_alias(alias.id)
                .await?
                .ok_or(MonaliasError::AliasNotFound)?;
        }

        Err(MonaliasError::Internal(format!(
            "Alias {} kept rotating during derivation",
            alias.id
        )))
    }

    /// First resolution of a dynamic alias: ask the wallet, then store the result.
    ///
    /// `None` when the alias moved to another index before the write-back.
    async fn derive_and_cache(&self, alias: &Alias) -> MonaliasResult<Option<String>> {
        let stored_index = alias.subaddress_index.ok_or_else(|| {
            error!(alias_id = alias.id, full_acct = %alias.full_acct, "dynamic alias has neither address nor index");
            MonaliasError::Integrity(format!("Dynamic alias {} has no subaddress index", alias.id))
        })?;
        let index = u32::try_from(stored_index).map_err(|_| {
            MonaliasError::Integrity(format!("Alias {} has invalid subaddress index {}", alias.id, stored_index))
        })?;

        let wallet = self
            .wallet
            .as_ref()
            .ok_or_else(|| MonaliasError::WalletBridge("Wallet RPC is not configured".to_string()))?;

        let account = self
            .accounts
            .get_account(alias.account_id)
            .await?
            .ok_or_else(|| {
                MonaliasError::Integrity(format!("Alias {} has no owning account", alias.id))
            })?;
        let wallet_name = account.wallet().ok_or_else(|| {
            MonaliasError::WalletBridge(format!("Account {} has no wallet name", account.handle))
        })?;

        let derived = wallet.derive_address(wallet_name, index).await?;
        let stored = self
            .aliases
            .cache_derived_address(alias.id, stored_index, &derived)
            .await?;

        if stored.is_some() {
            info!(alias_id = alias.id, index, "dynamic_address_cached");
        }
        Ok(stored)
    }

    fn sign(
        &self,
        request: &ResolveRequest,
        network: Network,
        address: String,
        meta: ResolveMeta,
    ) -> SignedResolution {
        let expires_at = self.response_ttl.and_then(|ttl| {
            chrono::Duration::from_std(ttl)
                .ok()
                .map(|ttl| (Utc::now() + ttl).to_rfc3339_opts(SecondsFormat::Secs, true))
        });

        let signature = self.signer.sign_resolve(CanonicalResolve {
            acct: &request.acct,
            address: &address,
            network: &request.network,
            expires_at: expires_at.as_deref(),
            key_id: self.signer.key_id(),
        });

        SignedResolution {
            response: ResolveResponse {
                address,
                network: network.as_str().to_string(),
                meta,
                expires_at,
            },
            key_id: self.signer.key_id().to_string(),
            signature,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        crypto::verify_resolve,
        db::{self, models::{InstanceStatus, NewAlias}},
        store::{InstanceStore, SqliteStore},
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    const SEED: [u8; 32] = [7u8; 32];

    /// Returns a different address on every call
    #[derive(Default)]
    struct CountingWallet {
        calls: AtomicU32,
        delay: Duration,
    }

    #[async_trait]
    impl WalletBridge for CountingWallet {
        async fn open_wallet(&self, _name: &str) -> MonaliasResult<()> {
            Ok(())
        }

        async fn get_address(&self, index: u32) -> MonaliasResult<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(format!("8Sub{}-{}", index, n))
        }

        async fn create_address(&self, _label: Option<&str>) -> MonaliasResult<(String, u32)> {
            Ok(("8Created".to_string(), 1))
        }
    }

    struct Fixture {
        store: Arc<SqliteStore>,
        identity: Arc<IdentityState>,
        signer: Arc<ResolveSigner>,
        wallet: Arc<CountingWallet>,
    }

    impl Fixture {
        async fn new() -> Self {
            let store = Arc::new(SqliteStore::new(db::open_in_memory().await.unwrap()));
            let signer = Arc::new(ResolveSigner::new(&SEED, "main-2026-01").unwrap());
            store
                .upsert_identity("example.com", "https://example.com", "main-2026-01", &signer.public_key_base64())
                .await
                .unwrap();
            let identity = Arc::new(IdentityState::load(store.clone()).await.unwrap());

            Self {
                store,
                identity,
                signer,
                wallet: Arc::new(CountingWallet::default()),
            }
        }

        fn service(&self, config: ResolverConfig, with_wallet: bool) -> ResolveService {
            let wallet: Option<Arc<dyn WalletBridge>> = if with_wallet {
                Some(self.wallet.clone())
            } else {
                None
            };
            self.service_with(config, wallet)
        }

        fn service_with(
            &self,
            config: ResolverConfig,
            wallet: Option<Arc<dyn WalletBridge>>,
        ) -> ResolveService {
            ResolveService::new(
                self.store.clone(),
                self.store.clone(),
                self.signer.clone(),
                self.identity.clone(),
                wallet,
                "example.com",
                &config,
            )
        }

        async fn static_alias(&self, full_acct: &str, label: &str, address: Option<&str>) {
            let account = self.account("alice$example.com", None).await;
            self.store
                .create_alias(&NewAlias {
                    account_id: account,
                    full_acct: full_acct.to_string(),
                    alias_label: label.to_string(),
                    mode: AliasMode::StaticAddress,
                    address: address.map(str::to_string),
                    subaddress_index: None,
                })
                .await
                .unwrap();
        }

        async fn dynamic_alias(&self, full_acct: &str, wallet: Option<&str>, index: Option<i64>) {
            let account = self.account("bob$example.com", wallet).await;
            self.store
                .create_alias(&NewAlias {
                    account_id: account,
                    full_acct: full_acct.to_string(),
                    alias_label: "tips".to_string(),
                    mode: AliasMode::DynamicSubaddress,
                    address: None,
                    subaddress_index: index,
                })
                .await
                .unwrap();
        }

        async fn account(&self, handle: &str, wallet: Option<&str>) -> i64 {
            match self.store.get_account_by_handle(handle).await.unwrap() {
                Some(account) => account.id,
                None => self.store.create_account(handle, wallet).await.unwrap().id,
            }
        }
    }

    #[tokio::test]
    async fn test_static_alias_resolves_verbatim_and_verifies() {
        let fx = Fixture::new().await;
        fx.static_alias("alice$example.com", "default", Some("4AliceAddress")).await;
        let service = fx.service(ResolverConfig::default(), false);

        let request = ResolveRequest::new("alice$example.com", "mainnet");
        let signed = service.resolve(&request).await.unwrap();

        assert_eq!(signed.response.address, "4AliceAddress");
        assert_eq!(signed.response.network, "mainnet");
        assert_eq!(signed.response.meta.resolved_kind, ResolvedKind::Normal);
        assert_eq!(signed.response.meta.display_name.as_deref(), Some("alice"));
        assert_eq!(signed.response.meta.alias.as_deref(), Some("default"));
        assert!(signed.response.expires_at.is_none());
        assert_eq!(signed.key_id, "main-2026-01");

        let fields = CanonicalResolve {
            acct: "alice$example.com",
            address: "4AliceAddress",
            network: "mainnet",
            expires_at: None,
            key_id: "main-2026-01",
        };
        assert!(verify_resolve(&fx.signer.public_key_base64(), fields, &signed.signature));
    }

    #[tokio::test]
    async fn test_display_name_stops_at_label() {
        let fx = Fixture::new().await;
        fx.static_alias("alice+donate$example.com", "donate", Some("4Donate")).await;
        let service = fx.service(ResolverConfig::default(), false);

        let signed = service
            .resolve(&ResolveRequest::new("alice+donate$example.com", "stagenet"))
            .await
            .unwrap();
        assert_eq!(signed.response.meta.display_name.as_deref(), Some("alice"));
        assert_eq!(signed.response.network, "stagenet");
    }

    #[tokio::test]
    async fn test_input_validation_order() {
        let fx = Fixture::new().await;
        let service = fx.service(ResolverConfig::default(), false);

        let err = service.resolve(&ResolveRequest::new("", "mainnet")).await.unwrap_err();
        assert_eq!(err.code(), "bad_request");

        let err = service
            .resolve(&ResolveRequest::new("alice$example.com", "testnet"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_network");

        // Domain mismatch reads as a plain miss, even when locked
        fx.identity.lock("maintenance").await.unwrap();
        let err = service
            .resolve(&ResolveRequest::new("alice$other.org", "mainnet"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "alias_not_found");
    }

    #[tokio::test]
    async fn test_domain_match_ignores_case() {
        let fx = Fixture::new().await;
        let service = fx.service(
            ResolverConfig {
                catch_all_address: Some("4CatchAll".to_string()),
                response_ttl: None,
            },
            false,
        );

        let signed = service
            .resolve(&ResolveRequest::new("someone$EXAMPLE.com", "mainnet"))
            .await
            .unwrap();
        assert_eq!(signed.response.address, "4CatchAll");
    }

    #[tokio::test]
    async fn test_catch_all_fallback() {
        let fx = Fixture::new().await;
        let request = ResolveRequest::new("nobody$example.com", "mainnet");

        let without = fx.service(ResolverConfig::default(), false);
        assert!(matches!(
            without.resolve(&request).await,
            Err(MonaliasError::AliasNotFound)
        ));

        let with = fx.service(
            ResolverConfig {
                catch_all_address: Some("4CatchAll".to_string()),
                response_ttl: None,
            },
            false,
        );
        let signed = with.resolve(&request).await.unwrap();
        assert_eq!(signed.response.address, "4CatchAll");
        assert_eq!(signed.response.meta.resolved_kind, ResolvedKind::CatchAll);
        assert_eq!(signed.response.meta.alias, None);
        assert_eq!(
            signed.response.meta.display_name.as_deref(),
            Some("example.com (catch-all)")
        );
    }

    #[tokio::test]
    async fn test_locked_instance_refuses_before_lookup() {
        let fx = Fixture::new().await;
        fx.static_alias("alice$example.com", "default", Some("4AliceAddress")).await;
        let service = fx.service(ResolverConfig::default(), false);
        let request = ResolveRequest::new("alice$example.com", "mainnet");

        fx.identity
            .commit(InstanceStatus::Locked, Some("identity_mismatch"))
            .await
            .unwrap();
        match service.resolve(&request).await {
            Err(MonaliasError::InstanceLocked { reason }) => {
                assert_eq!(reason.as_deref(), Some("identity_mismatch"))
            }
            other => panic!("expected lock, got {:?}", other),
        }

        fx.identity
            .commit(InstanceStatus::Degraded, Some("well_known_unreachable"))
            .await
            .unwrap();
        assert!(service.resolve(&request).await.is_ok());
    }

    #[tokio::test]
    async fn test_static_alias_without_address_is_integrity_error() {
        let fx = Fixture::new().await;
        fx.static_alias("alice$example.com", "default", None).await;
        let service = fx.service(ResolverConfig::default(), false);

        let err = service
            .resolve(&ResolveRequest::new("alice$example.com", "mainnet"))
            .await
            .unwrap_err();
        assert!(matches!(err, MonaliasError::Integrity(_)));
        assert_eq!(err.code(), "server_error");
    }

    #[tokio::test]
    async fn test_dynamic_alias_is_idempotent() {
        let fx = Fixture::new().await;
        fx.dynamic_alias("bob+tips$example.com", Some("bob-wallet"), Some(3)).await;
        let service = fx.service(ResolverConfig::default(), true);
        let request = ResolveRequest::new("bob+tips$example.com", "mainnet");

        let first = service.resolve(&request).await.unwrap();
        let second = service.resolve(&request).await.unwrap();

        assert_eq!(first.response.address, "8Sub3-0");
        assert_eq!(second.response.address, first.response.address);
        assert_eq!(fx.wallet.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_first_derivations_converge() {
        let fx = Fixture::new().await;
        fx.dynamic_alias("bob+tips$example.com", Some("bob-wallet"), Some(5)).await;
        let service = Arc::new(fx.service(ResolverConfig::default(), true));
        let request = ResolveRequest::new("bob+tips$example.com", "mainnet");

        let (a, b) = tokio::join!(service.resolve(&request), service.resolve(&request));
        let (a, b) = (a.unwrap(), b.unwrap());
        let third = service.resolve(&request).await.unwrap();

        assert_eq!(a.response.address, b.response.address);
        assert_eq!(third.response.address, a.response.address);
    }

    #[tokio::test]
    async fn test_rotation_during_first_derivation_is_kept() {
        let fx = Fixture::new().await;
        fx.dynamic_alias("bob+tips$example.com", Some("bob-wallet"), Some(3)).await;
        let alias = fx
            .store
            .get_alias_by_full_acct("bob+tips$example.com")
            .await
            .unwrap()
            .unwrap();

        let slow_wallet = Arc::new(CountingWallet {
            delay: Duration::from_millis(200),
            ..Default::default()
        });
        let service = Arc::new(fx.service_with(ResolverConfig::default(), Some(slow_wallet.clone())));
        let request = ResolveRequest::new("bob+tips$example.com", "mainnet");

        let in_flight = tokio::spawn({
            let service = Arc::clone(&service);
            let request = request.clone();
            async move { service.resolve(&request).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        fx.store.set_alias_index(alias.id, 7).await.unwrap();

        // The index-3 derivation is discarded and index 7 is derived instead
        let first = in_flight.await.unwrap().unwrap();
        assert_eq!(first.response.address, "8Sub7-1");
        assert_eq!(slow_wallet.calls.load(Ordering::SeqCst), 2);

        let stored = fx.store.get_alias(alias.id).await.unwrap().unwrap();
        assert_eq!(stored.subaddress_index, Some(7));
        assert_eq!(stored.stored_address(), Some("8Sub7-1"));

        let next = service.resolve(&request).await.unwrap();
        assert_eq!(next.response.address, "8Sub7-1");
    }

    #[tokio::test]
    async fn test_dynamic_alias_dependency_failures() {
        let fx = Fixture::new().await;
        let request = ResolveRequest::new("bob+tips$example.com", "mainnet");

        // No index and no cache
        fx.dynamic_alias("bob+tips$example.com", Some("bob-wallet"), None).await;
        let err = fx
            .service(ResolverConfig::default(), true)
            .resolve(&request)
            .await
            .unwrap_err();
        assert!(matches!(err, MonaliasError::Integrity(_)));

        // No bridge configured
        fx.dynamic_alias("bob+other$example.com", Some("bob-wallet"), Some(1)).await;
        let err = fx
            .service(ResolverConfig::default(), false)
            .resolve(&ResolveRequest::new("bob+other$example.com", "mainnet"))
            .await
            .unwrap_err();
        assert!(matches!(err, MonaliasError::WalletBridge(_)));
        assert_eq!(err.code(), "server_error");
    }

    #[tokio::test]
    async fn test_dynamic_alias_requires_wallet_name() {
        let fx = Fixture::new().await;
        fx.dynamic_alias("bob+tips$example.com", None, Some(2)).await;
        let service = fx.service(ResolverConfig::default(), true);

        let err = service
            .resolve(&ResolveRequest::new("bob+tips$example.com", "mainnet"))
            .await
            .unwrap_err();
        assert!(matches!(err, MonaliasError::WalletBridge(_)));
        assert_eq!(fx.wallet.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_ttl_adds_signed_expiry() {
        let fx = Fixture::new().await;
        fx.static_alias("alice$example.com", "default", Some("4AliceAddress")).await;
        let service = fx.service(
            ResolverConfig {
                catch_all_address: None,
                response_ttl: Some(Duration::from_secs(3600)),
            },
            false,
        );

        let signed = service
            .resolve(&ResolveRequest::new("alice$example.com", "mainnet"))
            .await
            .unwrap();
        let expires_at = signed.response.expires_at.clone().unwrap();
        assert!(expires_at.ends_with('Z'));

        let fields = CanonicalResolve {
            acct: "alice$example.com",
            address: "4AliceAddress",
            network: "mainnet",
            expires_at: Some(&expires_at),
            key_id: "main-2026-01",
        };
        assert!(verify_resolve(&fx.signer.public_key_base64(), fields, &signed.signature));
        assert!(!verify_resolve(
            &fx.signer.public_key_base64(),
            CanonicalResolve { expires_at: None, ..fields },
            &signed.signature
        ));
    }
}
