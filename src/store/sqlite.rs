/// SQLite-backed stores
use super::{AccountStore, AliasStore, InstanceStore};
use crate::{
    db::{
        format_timestamp,
        models::{Account, Alias, AliasMode, InstanceIdentity, InstanceStatus, NewAlias},
        parse_timestamp,
    },
    error::{MonaliasError, MonaliasResult},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

const INSTANCE_COLUMNS: &str = "domain, homeserver, signing_key_id, signing_pubkey, status, status_reason, last_identity_check_at";
const ACCOUNT_COLUMNS: &str = "id, handle, wallet_name, created_at";
const ALIAS_COLUMNS: &str = "id, account_id, full_acct, alias_label, mode, address, subaddress_index, created_at, updated_at";

/// All three stores over one pool
#[derive(Clone)]
pub struct SqliteStore {
    db: SqlitePool,
}

impl SqliteStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    async fn require_alias(&self, id: i64) -> MonaliasResult<Alias> {
        self.get_alias(id)
            .await?
            .ok_or_else(|| MonaliasError::NotFound(format!("Alias {} not found", id)))
    }
}

fn row_to_instance(row: &SqliteRow) -> MonaliasResult<InstanceIdentity> {
    let status: String = row.try_get("status")?;
    let checked_at: Option<String> = row.try_get("last_identity_check_at")?;

    Ok(InstanceIdentity {
        domain: row.try_get("domain")?,
        homeserver: row.try_get("homeserver")?,
        signing_key_id: row.try_get("signing_key_id")?,
        signing_pubkey: row.try_get("signing_pubkey")?,
        status: status.parse()?,
        status_reason: row.try_get("status_reason")?,
        last_identity_check_at: checked_at.as_deref().map(parse_timestamp).transpose()?,
    })
}

fn row_to_account(row: &SqliteRow) -> MonaliasResult<Account> {
    let created_at: String = row.try_get("created_at")?;

    Ok(Account {
        id: row.try_get("id")?,
        handle: row.try_get("handle")?,
        wallet_name: row.try_get("wallet_name")?,
        created_at: parse_timestamp(&created_at)?,
    })
}

fn row_to_alias(row: &SqliteRow) -> MonaliasResult<Alias> {
    let mode: String = row.try_get("mode")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(Alias {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        full_acct: row.try_get("full_acct")?,
        alias_label: row.try_get("alias_label")?,
        mode: mode
            .parse()
            .map_err(|_| MonaliasError::Integrity(format!("Stored alias mode {:?}", mode)))?,
        address: row.try_get("address")?,
        subaddress_index: row.try_get("subaddress_index")?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

/// Map a unique-constraint failure to a conflict, anything else stays a database error
fn conflict_on_unique(err: sqlx::Error, what: String) -> MonaliasError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => MonaliasError::Conflict(what),
        _ => MonaliasError::Database(err),
    }
}

#[async_trait]
impl InstanceStore for SqliteStore {
    async fn read_instance(&self) -> MonaliasResult<InstanceIdentity> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM instance_config WHERE id = 1",
            INSTANCE_COLUMNS
        ))
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| MonaliasError::Internal("Instance identity not provisioned".to_string()))?;

        row_to_instance(&row)
    }

    async fn write_status(
        &self,
        status: InstanceStatus,
        reason: Option<&str>,
        checked_at: DateTime<Utc>,
    ) -> MonaliasResult<()> {
        let result = sqlx::query(
            "UPDATE instance_config SET status = ?1, status_reason = ?2, last_identity_check_at = ?3 WHERE id = 1",
        )
        .bind(status.as_str())
        .bind(reason)
        .bind(format_timestamp(&checked_at))
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(MonaliasError::Internal(
                "Instance identity not provisioned".to_string(),
            ));
        }
        Ok(())
    }

    async fn lock_instance(&self, reason: &str) -> MonaliasResult<()> {
        let result = sqlx::query("UPDATE instance_config SET status = ?1, status_reason = ?2 WHERE id = 1")
            .bind(InstanceStatus::Locked.as_str())
            .bind(reason)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(MonaliasError::Internal(
                "Instance identity not provisioned".to_string(),
            ));
        }
        Ok(())
    }

    async fn upsert_identity(
        &self,
        domain: &str,
        homeserver: &str,
        signing_key_id: &str,
        signing_pubkey: &str,
    ) -> MonaliasResult<InstanceIdentity> {
        sqlx::query(
            "INSERT INTO instance_config (id, domain, homeserver, signing_key_id, signing_pubkey, status)
             VALUES (1, ?1, ?2, ?3, ?4, 'OK')
             ON CONFLICT(id) DO UPDATE SET
                domain = excluded.domain,
                homeserver = excluded.homeserver,
                signing_key_id = excluded.signing_key_id,
                signing_pubkey = excluded.signing_pubkey",
        )
        .bind(domain)
        .bind(homeserver)
        .bind(signing_key_id)
        .bind(signing_pubkey)
        .execute(&self.db)
        .await?;

        self.read_instance().await
    }
}

#[async_trait]
impl AccountStore for SqliteStore {
    async fn get_account(&self, id: i64) -> MonaliasResult<Option<Account>> {
        let row = sqlx::query(&format!("SELECT {} FROM accounts WHERE id = ?1", ACCOUNT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        row.as_ref().map(row_to_account).transpose()
    }

    async fn get_account_by_handle(&self, handle: &str) -> MonaliasResult<Option<Account>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM accounts WHERE handle = ?1",
            ACCOUNT_COLUMNS
        ))
        .bind(handle)
        .fetch_optional(&self.db)
        .await?;

        row.as_ref().map(row_to_account).transpose()
    }

    async fn list_accounts(&self) -> MonaliasResult<Vec<Account>> {
        let rows = sqlx::query(&format!("SELECT {} FROM accounts ORDER BY id", ACCOUNT_COLUMNS))
            .fetch_all(&self.db)
            .await?;

        rows.iter().map(row_to_account).collect()
    }

    async fn create_account(&self, handle: &str, wallet_name: Option<&str>) -> MonaliasResult<Account> {
        let result = sqlx::query("INSERT INTO accounts (handle, wallet_name, created_at) VALUES (?1, ?2, ?3)")
            .bind(handle)
            .bind(wallet_name)
            .bind(format_timestamp(&Utc::now()))
            .execute(&self.db)
            .await
            .map_err(|e| conflict_on_unique(e, format!("Handle {} already exists", handle)))?;

        self.get_account(result.last_insert_rowid())
            .await?
            .ok_or_else(|| MonaliasError::Internal("Created account vanished".to_string()))
    }

    async fn delete_account(&self, id: i64) -> MonaliasResult<bool> {
        let result = sqlx::query("DELETE FROM accounts WHERE id = ?1")
            .bind(id)
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl AliasStore for SqliteStore {
    async fn get_alias_by_full_acct(&self, full_acct: &str) -> MonaliasResult<Option<Alias>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM aliases WHERE full_acct = ?1",
            ALIAS_COLUMNS
        ))
        .bind(full_acct)
        .fetch_optional(&self.db)
        .await?;

        row.as_ref().map(row_to_alias).transpose()
    }

    async fn get_alias(&self, id: i64) -> MonaliasResult<Option<Alias>> {
        let row = sqlx::query(&format!("SELECT {} FROM aliases WHERE id = ?1", ALIAS_COLUMNS))
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        row.as_ref().map(row_to_alias).transpose()
    }

    async fn list_aliases_for_account(&self, account_id: i64) -> MonaliasResult<Vec<Alias>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM aliases WHERE account_id = ?1 ORDER BY id",
            ALIAS_COLUMNS
        ))
        .bind(account_id)
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(row_to_alias).collect()
    }

    async fn create_alias(&self, alias: &NewAlias) -> MonaliasResult<Alias> {
        let now = format_timestamp(&Utc::now());
        let result = sqlx::query(
            "INSERT INTO aliases (account_id, full_acct, alias_label, mode, address, subaddress_index, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        )
        .bind(alias.account_id)
        .bind(&alias.full_acct)
        .bind(&alias.alias_label)
        .bind(alias.mode.as_str())
        .bind(&alias.address)
        .bind(alias.subaddress_index)
        .bind(&now)
        .execute(&self.db)
        .await
        .map_err(|e| conflict_on_unique(e, format!("Alias {} already exists", alias.full_acct)))?;

        self.require_alias(result.last_insert_rowid()).await
    }

    async fn set_alias_address(&self, id: i64, address: &str) -> MonaliasResult<Alias> {
        sqlx::query("UPDATE aliases SET address = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(address)
            .bind(format_timestamp(&Utc::now()))
            .bind(id)
            .execute(&self.db)
            .await?;

        self.require_alias(id).await
    }

    async fn set_alias_mode(&self, id: i64, mode: AliasMode) -> MonaliasResult<Alias> {
        sqlx::query("UPDATE aliases SET mode = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(mode.as_str())
            .bind(format_timestamp(&Utc::now()))
            .bind(id)
            .execute(&self.db)
            .await?;

        self.require_alias(id).await
    }

    async fn set_alias_index(&self, id: i64, index: i64) -> MonaliasResult<Alias> {
        sqlx::query(
            "UPDATE aliases SET subaddress_index = ?1, address = NULL, updated_at = ?2 WHERE id = ?3",
        )
        .bind(index)
        .bind(format_timestamp(&Utc::now()))
        .bind(id)
        .execute(&self.db)
        .await?;

        self.require_alias(id).await
    }

    async fn cache_derived_address(
        &self,
        id: i64,
        index: i64,
        address: &str,
    ) -> MonaliasResult<Option<String>> {
        let result = sqlx::query(
            "UPDATE aliases SET address = ?1, updated_at = ?2
             WHERE id = ?3 AND subaddress_index = ?4 AND (address IS NULL OR address = '')",
        )
        .bind(address)
        .bind(format_timestamp(&Utc::now()))
        .bind(id)
        .bind(index)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(Some(address.to_string()));
        }

        // Lost the race: answer with what the winner stored, if it is for this index
        let alias = self.require_alias(id).await?;
        if alias.subaddress_index != Some(index) {
            return Ok(None);
        }
        Ok(alias.stored_address().map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    async fn store() -> SqliteStore {
        SqliteStore::new(db::open_in_memory().await.unwrap())
    }

    fn dynamic(account_id: i64, full_acct: &str, index: i64) -> NewAlias {
        NewAlias {
            account_id,
            full_acct: full_acct.to_string(),
            alias_label: "tips".to_string(),
            mode: AliasMode::DynamicSubaddress,
            address: None,
            subaddress_index: Some(index),
        }
    }

    #[tokio::test]
    async fn test_instance_upsert_preserves_status() {
        let store = store().await;
        assert!(store.read_instance().await.is_err());

        let identity = store
            .upsert_identity("example.com", "https://example.com", "k1", "pub1")
            .await
            .unwrap();
        assert_eq!(identity.status, InstanceStatus::Ok);
        assert!(identity.last_identity_check_at.is_none());

        store
            .write_status(InstanceStatus::Locked, Some("identity_mismatch"), Utc::now())
            .await
            .unwrap();

        let identity = store
            .upsert_identity("example.com", "https://example.com", "k2", "pub2")
            .await
            .unwrap();
        assert_eq!(identity.signing_key_id, "k2");
        assert_eq!(identity.status, InstanceStatus::Locked);
        assert_eq!(identity.status_reason.as_deref(), Some("identity_mismatch"));
        assert!(identity.last_identity_check_at.is_some());
    }

    #[tokio::test]
    async fn test_lock_keeps_check_timestamp() {
        let store = store().await;
        store
            .upsert_identity("example.com", "https://example.com", "k1", "pub1")
            .await
            .unwrap();

        store.lock_instance("maintenance").await.unwrap();
        let identity = store.read_instance().await.unwrap();
        assert_eq!(identity.status, InstanceStatus::Locked);
        assert_eq!(identity.status_reason.as_deref(), Some("maintenance"));
        assert!(identity.last_identity_check_at.is_none());
    }

    #[tokio::test]
    async fn test_account_handles_are_unique() {
        let store = store().await;
        let account = store
            .create_account("alice$example.com", Some("alice-wallet"))
            .await
            .unwrap();
        assert_eq!(account.wallet(), Some("alice-wallet"));

        let err = store
            .create_account("alice$example.com", None)
            .await
            .unwrap_err();
        assert!(matches!(err, MonaliasError::Conflict(_)));

        let found = store
            .get_account_by_handle("alice$example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, account.id);
        assert_eq!(store.list_accounts().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_account_cascades_to_aliases() {
        let store = store().await;
        let account = store.create_account("bob$example.com", None).await.unwrap();
        let alias = store
            .create_alias(&dynamic(account.id, "bob+tips$example.com", 3))
            .await
            .unwrap();

        assert!(store.delete_account(account.id).await.unwrap());
        assert!(store.get_alias(alias.id).await.unwrap().is_none());
        assert!(!store.delete_account(account.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_cache_derived_address_keeps_first_writer() {
        let store = store().await;
        let account = store.create_account("carol$example.com", None).await.unwrap();
        let alias = store
            .create_alias(&dynamic(account.id, "carol+tips$example.com", 1))
            .await
            .unwrap();

        let first = store.cache_derived_address(alias.id, 1, "8First").await.unwrap();
        let second = store.cache_derived_address(alias.id, 1, "8Second").await.unwrap();
        assert_eq!(first.as_deref(), Some("8First"));
        assert_eq!(second.as_deref(), Some("8First"));
    }

    #[tokio::test]
    async fn test_set_index_clears_cached_address() {
        let store = store().await;
        let account = store.create_account("dave$example.com", None).await.unwrap();
        let alias = store
            .create_alias(&dynamic(account.id, "dave+tips$example.com", 1))
            .await
            .unwrap();
        store.cache_derived_address(alias.id, 1, "8Cached").await.unwrap();

        let rotated = store.set_alias_index(alias.id, 7).await.unwrap();
        assert_eq!(rotated.subaddress_index, Some(7));
        assert!(rotated.stored_address().is_none());

        assert!(matches!(
            store.set_alias_index(9999, 1).await,
            Err(MonaliasError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_cache_derived_address_rejects_stale_index() {
        let store = store().await;
        let account = store.create_account("erin$example.com", None).await.unwrap();
        let alias = store
            .create_alias(&dynamic(account.id, "erin+tips$example.com", 3))
            .await
            .unwrap();

        // Rotation lands between derivation and write-back
        store.set_alias_index(alias.id, 7).await.unwrap();
        assert_eq!(
            store.cache_derived_address(alias.id, 3, "8Sub3").await.unwrap(),
            None
        );

        let current = store.get_alias(alias.id).await.unwrap().unwrap();
        assert_eq!(current.subaddress_index, Some(7));
        assert!(current.stored_address().is_none());

        assert_eq!(
            store.cache_derived_address(alias.id, 7, "8Sub7").await.unwrap().as_deref(),
            Some("8Sub7")
        );
    }
}
