/// Address derivation through an external Monero wallet
///
/// The resolver treats the bridge as a black box: open a named wallet, then
/// fetch the subaddress at an index.

pub mod rpc;

pub use rpc::WalletRpcClient;

use crate::error::MonaliasResult;
use async_trait::async_trait;

/// Wallet bridge collaborator
#[async_trait]
pub trait WalletBridge: Send + Sync {
    /// Make `name` the wallet subsequent calls act on
    async fn open_wallet(&self, name: &str) -> MonaliasResult<()>;

    /// Address of subaddress `index` in account 0 of the open wallet
    async fn get_address(&self, index: u32) -> MonaliasResult<String>;

    /// Create a fresh subaddress in account 0, returning `(address, index)`
    async fn create_address(&self, label: Option<&str>) -> MonaliasResult<(String, u32)>;

    /// Open `wallet` and read the subaddress at `index`.
    ///
    /// Implementations backed by a single-wallet daemon override this to
    /// hold the wallet for both calls.
    async fn derive_address(&self, wallet: &str, index: u32) -> MonaliasResult<String> {
        self.open_wallet(wallet).await?;
        self.get_address(index).await
    }

    /// Open `wallet` and create a subaddress in it
    async fn create_subaddress(
        &self,
        wallet: &str,
        label: Option<&str>,
    ) -> MonaliasResult<(String, u32)> {
        self.open_wallet(wallet).await?;
        self.create_address(label).await
    }
}
