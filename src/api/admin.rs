/// Admin API Endpoints
/// Instance lock/unlock, identity checks, account and alias management
use crate::{
    auth::AdminAuth,
    context::AppContext,
    db::models::{Account, Alias, AliasMode, InstanceIdentity, NewAlias},
    error::{MonaliasError, MonaliasResult},
    metrics,
    protocol::{acct_matches_domain, build_full_acct, DOMAIN_SEPARATOR, LABEL_SEPARATOR},
    store::{AccountStore, AliasStore},
};
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Build admin API routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        // Instance identity
        .route("/admin/instance", get(get_instance))
        .route("/admin/instance/lock", post(lock_instance))
        .route("/admin/instance/unlock", post(run_identity_check))
        .route("/admin/instance/check", post(run_identity_check))
        // Accounts
        .route("/admin/accounts", get(list_accounts).post(create_account))
        .route("/admin/accounts/:id", get(get_account).delete(delete_account))
        .route("/admin/accounts/:id/aliases", post(create_alias))
        // Aliases
        .route("/admin/aliases/:id/address", put(set_alias_address))
        .route("/admin/aliases/:id/mode", put(set_alias_mode))
        .route("/admin/aliases/:id/index", put(set_alias_index))
        // Metrics
        .route("/metrics", get(prometheus_metrics))
}

// ============================================================================
// Instance
// ============================================================================

async fn get_instance(
    State(ctx): State<AppContext>,
    _auth: AdminAuth,
) -> MonaliasResult<Json<InstanceIdentity>> {
    Ok(Json(ctx.identity.read().await?))
}

#[derive(Debug, Deserialize)]
struct LockRequest {
    reason: String,
}

/// Lock the instance; resolution refuses until a check restores OK
async fn lock_instance(
    State(ctx): State<AppContext>,
    auth: AdminAuth,
    Json(req): Json<LockRequest>,
) -> MonaliasResult<Json<InstanceIdentity>> {
    let reason = req.reason.trim();
    if reason.is_empty() {
        return Err(MonaliasError::Validation("reason is required".to_string()));
    }

    ctx.identity.lock(reason).await?;
    info!(admin = %auth.user, reason = %reason, "instance.lock");

    Ok(Json(ctx.identity.read().await?))
}

/// Unlock and "check now" are the same watchdog cycle; the result may stay LOCKED
async fn run_identity_check(
    State(ctx): State<AppContext>,
    auth: AdminAuth,
) -> MonaliasResult<Json<InstanceIdentity>> {
    let snapshot = ctx.watchdog.check_once().await?;
    info!(admin = %auth.user, status = %snapshot.status, "instance.check");

    Ok(Json(ctx.identity.read().await?))
}

// ============================================================================
// Accounts
// ============================================================================

#[derive(Debug, Serialize)]
struct AccountView {
    #[serde(flatten)]
    account: Account,
    aliases: Vec<Alias>,
}

#[derive(Debug, Serialize)]
struct ListAccountsResponse {
    accounts: Vec<Account>,
}

async fn list_accounts(
    State(ctx): State<AppContext>,
    _auth: AdminAuth,
) -> MonaliasResult<Json<ListAccountsResponse>> {
    let accounts = ctx.store.list_accounts().await?;
    Ok(Json(ListAccountsResponse { accounts }))
}

async fn get_account(
    State(ctx): State<AppContext>,
    _auth: AdminAuth,
    Path(id): Path<i64>,
) -> MonaliasResult<Json<AccountView>> {
    let account = require_account(&ctx, id).await?;
    let aliases = ctx.store.list_aliases_for_account(account.id).await?;
    Ok(Json(AccountView { account, aliases }))
}

#[derive(Debug, Deserialize)]
struct CreateAccountRequest {
    handle: String,
    #[serde(default)]
    wallet_name: Option<String>,
}

async fn create_account(
    State(ctx): State<AppContext>,
    auth: AdminAuth,
    Json(req): Json<CreateAccountRequest>,
) -> MonaliasResult<(StatusCode, Json<Account>)> {
    let handle = req.handle.trim();
    validate_handle(handle, &ctx.config.service.domain)?;

    let wallet_name = req.wallet_name.as_deref().map(str::trim).filter(|w| !w.is_empty());
    let account = ctx.store.create_account(handle, wallet_name).await?;
    info!(admin = %auth.user, handle = %account.handle, "account.create");

    Ok((StatusCode::CREATED, Json(account)))
}

async fn delete_account(
    State(ctx): State<AppContext>,
    auth: AdminAuth,
    Path(id): Path<i64>,
) -> MonaliasResult<StatusCode> {
    if !ctx.store.delete_account(id).await? {
        return Err(MonaliasError::NotFound(format!("Account {} not found", id)));
    }
    info!(admin = %auth.user, account_id = id, "account.delete");
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Aliases
// ============================================================================

#[derive(Debug, Deserialize)]
struct CreateAliasRequest {
    #[serde(default)]
    alias_label: String,
    mode: AliasMode,
    #[serde(default)]
    address: Option<String>,
}

/// Create an alias under an account.
///
/// Dynamic aliases get a fresh subaddress from the account's wallet, stored
/// with its index.
async fn create_alias(
    State(ctx): State<AppContext>,
    auth: AdminAuth,
    Path(account_id): Path<i64>,
    Json(req): Json<CreateAliasRequest>,
) -> MonaliasResult<(StatusCode, Json<Alias>)> {
    let account = require_account(&ctx, account_id).await?;
    let label = req.alias_label.trim();
    if label.contains(DOMAIN_SEPARATOR) || label.contains(LABEL_SEPARATOR) {
        return Err(MonaliasError::Validation(format!(
            "alias_label may not contain '{}' or '{}'",
            DOMAIN_SEPARATOR, LABEL_SEPARATOR
        )));
    }

    let (address, subaddress_index) = match req.mode {
        AliasMode::StaticAddress => {
            let address = non_empty_address(req.address.as_deref())?;
            (Some(address), None)
        }
        AliasMode::DynamicSubaddress => {
            let (address, index) = create_subaddress(&ctx, &account, label).await?;
            (Some(address), Some(i64::from(index)))
        }
    };

    let alias = ctx
        .store
        .create_alias(&NewAlias {
            account_id: account.id,
            full_acct: build_full_acct(&account.handle, label),
            alias_label: if label.is_empty() { "default" } else { label }.to_string(),
            mode: req.mode,
            address,
            subaddress_index,
        })
        .await?;
    info!(admin = %auth.user, full_acct = %alias.full_acct, mode = %alias.mode, "alias.create");

    Ok((StatusCode::CREATED, Json(alias)))
}

#[derive(Debug, Deserialize)]
struct SetAddressRequest {
    address: String,
}

async fn set_alias_address(
    State(ctx): State<AppContext>,
    auth: AdminAuth,
    Path(id): Path<i64>,
    Json(req): Json<SetAddressRequest>,
) -> MonaliasResult<Json<Alias>> {
    let address = non_empty_address(Some(&req.address))?;
    let alias = ctx.store.set_alias_address(id, &address).await?;
    info!(admin = %auth.user, alias_id = id, "alias.set_address");
    Ok(Json(alias))
}

#[derive(Debug, Deserialize)]
struct SetModeRequest {
    mode: AliasMode,
}

/// Switch an alias's mode, keeping it resolvable
async fn set_alias_mode(
    State(ctx): State<AppContext>,
    auth: AdminAuth,
    Path(id): Path<i64>,
    Json(req): Json<SetModeRequest>,
) -> MonaliasResult<Json<Alias>> {
    let alias = require_alias(&ctx, id).await?;

    let alias = match req.mode {
        AliasMode::StaticAddress => {
            if alias.stored_address().is_none() {
                return Err(MonaliasError::Validation(
                    "Set an address before switching to STATIC_ADDRESS".to_string(),
                ));
            }
            ctx.store.set_alias_mode(id, AliasMode::StaticAddress).await?
        }
        AliasMode::DynamicSubaddress => {
            if alias.subaddress_index.is_none() {
                let account = require_account(&ctx, alias.account_id).await?;
                let (address, index) = create_subaddress(&ctx, &account, &alias.alias_label).await?;
                ctx.store.set_alias_index(id, i64::from(index)).await?;
                ctx.store.set_alias_address(id, &address).await?;
            }
            ctx.store.set_alias_mode(id, AliasMode::DynamicSubaddress).await?
        }
    };
    info!(admin = %auth.user, alias_id = id, mode = %alias.mode, "alias.set_mode");

    Ok(Json(alias))
}

#[derive(Debug, Deserialize)]
struct SetIndexRequest {
    index: u32,
}

/// Rotate a dynamic alias to another subaddress; the next resolve derives it
async fn set_alias_index(
    State(ctx): State<AppContext>,
    auth: AdminAuth,
    Path(id): Path<i64>,
    Json(req): Json<SetIndexRequest>,
) -> MonaliasResult<Json<Alias>> {
    let alias = ctx.store.set_alias_index(id, i64::from(req.index)).await?;
    info!(admin = %auth.user, alias_id = id, index = req.index, "alias.rotate");
    Ok(Json(alias))
}

// ============================================================================
// Metrics
// ============================================================================

async fn prometheus_metrics(_auth: AdminAuth) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render_metrics(),
    )
}

// ============================================================================
// Helpers
// ============================================================================

fn validate_handle(handle: &str, domain: &str) -> MonaliasResult<()> {
    let local = handle.split(DOMAIN_SEPARATOR).next().unwrap_or_default();
    if local.is_empty() || local.contains(LABEL_SEPARATOR) {
        return Err(MonaliasError::Validation(format!("Invalid handle {}", handle)));
    }
    if !acct_matches_domain(handle, domain) {
        return Err(MonaliasError::Validation(format!(
            "Handle must be local${}",
            domain
        )));
    }
    Ok(())
}

fn non_empty_address(address: Option<&str>) -> MonaliasResult<String> {
    address
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(str::to_string)
        .ok_or_else(|| MonaliasError::Validation("address is required".to_string()))
}

async fn require_account(ctx: &AppContext, id: i64) -> MonaliasResult<Account> {
    ctx.store
        .get_account(id)
        .await?
        .ok_or_else(|| MonaliasError::NotFound(format!("Account {} not found", id)))
}

async fn require_alias(ctx: &AppContext, id: i64) -> MonaliasResult<Alias> {
    ctx.store
        .get_alias(id)
        .await?
        .ok_or_else(|| MonaliasError::NotFound(format!("Alias {} not found", id)))
}

async fn create_subaddress(
    ctx: &AppContext,
    account: &Account,
    label: &str,
) -> MonaliasResult<(String, u32)> {
    let wallet = ctx.wallet.as_ref().ok_or_else(|| {
        MonaliasError::Validation("Wallet RPC is not configured".to_string())
    })?;
    let wallet_name = account.wallet().ok_or_else(|| {
        MonaliasError::Validation("Account needs a wallet_name for dynamic aliases".to_string())
    })?;

    let label = Some(label).filter(|l| !l.is_empty());
    wallet.create_subaddress(wallet_name, label).await
}
