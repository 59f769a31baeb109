/// Monalias - signed Monero alias resolution
///
/// Resolves `local$domain` (or `local+label$domain`) to a Monero address,
/// signs every answer with the instance's Ed25519 key, and refuses to serve
/// when its own published identity no longer matches its configuration.

pub mod api;
pub mod auth;
pub mod config;
pub mod context;
pub mod crypto;
pub mod db;
pub mod error;
pub mod identity;
pub mod jobs;
pub mod metrics;
pub mod protocol;
pub mod rate_limit;
pub mod resolver;
pub mod server;
pub mod store;
pub mod wallet;

pub use context::AppContext;
pub use error::{MonaliasError, MonaliasResult};
