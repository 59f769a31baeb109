/// Monero `wallet-rpc` JSON-RPC 2.0 client
use super::WalletBridge;
use crate::{
    config::WalletRpcConfig,
    error::{MonaliasError, MonaliasResult},
};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: &'static str,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct CreateAddressResult {
    address: String,
    address_index: u32,
}

#[derive(Debug, Deserialize)]
struct GetAddressResult {
    #[serde(default)]
    addresses: Vec<SubaddressEntry>,
}

#[derive(Debug, Deserialize)]
struct SubaddressEntry {
    address: String,
}

/// HTTP client for a single wallet-rpc daemon
pub struct WalletRpcClient {
    url: String,
    user: Option<String>,
    password: Option<String>,
    http_client: reqwest::Client,
    /// The daemon holds one open wallet at a time
    session: Mutex<()>,
}

impl WalletRpcClient {
    pub fn new(config: &WalletRpcConfig) -> MonaliasResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| MonaliasError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            url: config.url.clone(),
            user: config.user.clone(),
            password: config.password.clone(),
            http_client,
            session: Mutex::new(()),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Option<Value>) -> MonaliasResult<T> {
        let mut request = self.http_client.post(&self.url).json(&RpcRequest {
            jsonrpc: "2.0",
            id: "0",
            method,
            params,
        });
        if self.user.is_some() || self.password.is_some() {
            request = request.basic_auth(
                self.user.as_deref().unwrap_or_default(),
                self.password.as_deref(),
            );
        }

        let response = request
            .send()
            .await
            .map_err(|e| MonaliasError::WalletBridge(format!("{} failed: {}", method, e)))?;

        if !response.status().is_success() {
            return Err(MonaliasError::WalletBridge(format!(
                "{} returned HTTP {}",
                method,
                response.status()
            )));
        }

        let parsed: RpcResponse = response
            .json()
            .await
            .map_err(|e| MonaliasError::WalletBridge(format!("{}: invalid response: {}", method, e)))?;

        if let Some(err) = parsed.error {
            return Err(MonaliasError::WalletBridge(format!(
                "{}: rpc error {}: {}",
                method, err.code, err.message
            )));
        }

        serde_json::from_value(parsed.result.unwrap_or(Value::Null))
            .map_err(|e| MonaliasError::WalletBridge(format!("{}: unexpected result: {}", method, e)))
    }
}

#[async_trait]
impl WalletBridge for WalletRpcClient {
    async fn open_wallet(&self, name: &str) -> MonaliasResult<()> {
        let _: Value = self
            .call("open_wallet", Some(json!({ "filename": name })))
            .await?;
        Ok(())
    }

    async fn get_address(&self, index: u32) -> MonaliasResult<String> {
        let result: GetAddressResult = self
            .call(
                "get_address",
                Some(json!({ "account_index": 0, "address_index": [index] })),
            )
            .await?;

        result
            .addresses
            .into_iter()
            .next()
            .map(|entry| entry.address)
            .ok_or_else(|| MonaliasError::WalletBridge(format!("No address at index {}", index)))
    }

    async fn create_address(&self, label: Option<&str>) -> MonaliasResult<(String, u32)> {
        let mut params = json!({ "account_index": 0 });
        if let Some(label) = label.filter(|l| !l.is_empty()) {
            params["label"] = Value::String(label.to_string());
        }

        let result: CreateAddressResult = self.call("create_address", Some(params)).await?;
        Ok((result.address, result.address_index))
    }

    async fn derive_address(&self, wallet: &str, index: u32) -> MonaliasResult<String> {
        let _session = self.session.lock().await;
        self.open_wallet(wallet).await?;
        self.get_address(index).await
    }

    async fn create_subaddress(
        &self,
        wallet: &str,
        label: Option<&str>,
    ) -> MonaliasResult<(String, u32)> {
        let _session = self.session.lock().await;
        self.open_wallet(wallet).await?;
        self.create_address(label).await
    }
}
