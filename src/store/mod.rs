/// Storage collaborators
///
/// The resolver, watchdog and admin surface only see these traits; the
/// service runs on the SQLite implementation.

pub mod sqlite;

pub use sqlite::SqliteStore;

use crate::db::models::{Account, Alias, AliasMode, InstanceIdentity, InstanceStatus, NewAlias};
use crate::error::MonaliasResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Single-row instance identity
#[async_trait]
pub trait InstanceStore: Send + Sync {
    /// Read the instance identity; errors when the row was never provisioned
    async fn read_instance(&self) -> MonaliasResult<InstanceIdentity>;

    /// Record one check verdict: status, reason and timestamp in one update
    async fn write_status(
        &self,
        status: InstanceStatus,
        reason: Option<&str>,
        checked_at: DateTime<Utc>,
    ) -> MonaliasResult<()>;

    /// Operator lock; leaves the last check timestamp alone
    async fn lock_instance(&self, reason: &str) -> MonaliasResult<()>;

    /// Insert or refresh the configured identity, keeping any stored status
    async fn upsert_identity(
        &self,
        domain: &str,
        homeserver: &str,
        signing_key_id: &str,
        signing_pubkey: &str,
    ) -> MonaliasResult<InstanceIdentity>;
}

/// Account records
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn get_account(&self, id: i64) -> MonaliasResult<Option<Account>>;

    async fn get_account_by_handle(&self, handle: &str) -> MonaliasResult<Option<Account>>;

    async fn list_accounts(&self) -> MonaliasResult<Vec<Account>>;

    /// Create an account; a taken handle is a conflict
    async fn create_account(&self, handle: &str, wallet_name: Option<&str>) -> MonaliasResult<Account>;

    /// Delete an account and its aliases, returning whether it existed
    async fn delete_account(&self, id: i64) -> MonaliasResult<bool>;
}

/// Alias records
#[async_trait]
pub trait AliasStore: Send + Sync {
    /// Exact match on the externally visible acct
    async fn get_alias_by_full_acct(&self, full_acct: &str) -> MonaliasResult<Option<Alias>>;

    async fn get_alias(&self, id: i64) -> MonaliasResult<Option<Alias>>;

    async fn list_aliases_for_account(&self, account_id: i64) -> MonaliasResult<Vec<Alias>>;

    /// Create an alias; a taken full acct is a conflict
    async fn create_alias(&self, alias: &NewAlias) -> MonaliasResult<Alias>;

    async fn set_alias_address(&self, id: i64, address: &str) -> MonaliasResult<Alias>;

    async fn set_alias_mode(&self, id: i64, mode: AliasMode) -> MonaliasResult<Alias>;

    /// Point a dynamic alias at a new subaddress index and drop its cached address
    async fn set_alias_index(&self, id: i64, index: i64) -> MonaliasResult<Alias>;

    /// Store an address derived at `index` unless one is already cached.
    ///
    /// Returns whichever address ends up stored for that index, so concurrent
    /// first derivations all answer with the same value. `None` when the
    /// alias no longer points at `index` (rotated mid-derivation).
    async fn cache_derived_address(
        &self,
        id: i64,
        index: i64,
        address: &str,
    ) -> MonaliasResult<Option<String>>;
}
