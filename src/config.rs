/// Configuration management for the Monalias server
use crate::error::{MonaliasError, MonaliasResult};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

const SIGNING_KEY_SECRET: &str = "/run/secrets/monalias_signing_key";
const WALLET_RPC_PASSWORD_SECRET: &str = "/run/secrets/wallet_rpc_password";

/// Main server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub signing: SigningConfig,
    pub resolver: ResolverConfig,
    pub rate_limit: RateLimitConfig,
    pub identity: IdentityConfig,
    pub wallet_rpc: Option<WalletRpcConfig>,
    pub admin: AdminConfig,
}

/// Service-level configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Domain part of every served acct
    pub domain: String,
    /// Homeserver URL published in the well-known document
    pub public_base_url: String,
    pub public_bind: String,
    pub admin_bind: String,
}

/// Storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub db_path: PathBuf,
}

/// Signing key configuration
#[derive(Debug, Clone)]
pub struct SigningConfig {
    pub key_file: PathBuf,
    pub key_id: String,
}

/// Resolution behaviour
#[derive(Debug, Clone, Default)]
pub struct ResolverConfig {
    pub catch_all_address: Option<String>,
    /// When set, answers carry `expires_at = now + ttl`
    pub response_ttl: Option<Duration>,
}

/// Per-source rate limiting
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub requests_per_second: f64,
    pub burst: u32,
    pub idle_ttl: Duration,
    pub sweep_interval: Duration,
    pub retry_after: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 1.0,
            burst: 10,
            idle_ttl: Duration::from_secs(600),
            sweep_interval: Duration::from_secs(120),
            retry_after: Duration::from_secs(30),
        }
    }
}

/// Identity watchdog configuration
#[derive(Debug, Clone)]
pub struct IdentityConfig {
    pub check_interval: Duration,
    pub fetch_timeout: Duration,
    pub well_known_url: String,
}

/// Wallet RPC bridge configuration
#[derive(Debug, Clone)]
pub struct WalletRpcConfig {
    pub url: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub timeout: Duration,
}

/// Admin listener credentials
#[derive(Debug, Clone)]
pub struct AdminConfig {
    pub user: String,
    pub password: String,
}

impl ServerConfig {
    /// Load configuration from environment variables (and `.env`)
    pub fn from_env() -> MonaliasResult<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from any key lookup; empty values count as unset
    pub fn from_lookup<F>(lookup: F) -> MonaliasResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let get_or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let domain = get("MONALIAS_DOMAIN")
            .ok_or_else(|| MonaliasError::Config("MONALIAS_DOMAIN is required".to_string()))?;
        let public_base_url = get("MONALIAS_PUBLIC_BASE_URL").ok_or_else(|| {
            MonaliasError::Config("MONALIAS_PUBLIC_BASE_URL is required".to_string())
        })?;

        let key_file = get("MONALIAS_SIGNING_KEY_FILE")
            .map(PathBuf::from)
            .or_else(|| {
                let secret = PathBuf::from(SIGNING_KEY_SECRET);
                secret.exists().then_some(secret)
            })
            .ok_or_else(|| {
                MonaliasError::Config(format!(
                    "MONALIAS_SIGNING_KEY_FILE or {} is required",
                    SIGNING_KEY_SECRET
                ))
            })?;

        let admin_password = get("MONALIAS_ADMIN_PASSWORD").ok_or_else(|| {
            MonaliasError::Config("MONALIAS_ADMIN_PASSWORD is required".to_string())
        })?;

        let rate_limit = RateLimitConfig {
            requests_per_second: parse_or("MONALIAS_RATE_IP_RPS", get("MONALIAS_RATE_IP_RPS"), 1.0)?,
            burst: parse_or("MONALIAS_RATE_IP_BURST", get("MONALIAS_RATE_IP_BURST"), 10)?,
            idle_ttl: duration_or(get("MONALIAS_RATE_IDLE_TTL"), Duration::from_secs(600))?,
            sweep_interval: duration_or(get("MONALIAS_RATE_SWEEP_INTERVAL"), Duration::from_secs(120))?,
            retry_after: duration_or(get("MONALIAS_RATE_RETRY_AFTER"), Duration::from_secs(30))?,
        };

        let response_ttl = match get("MONALIAS_RESOLVE_TTL") {
            Some(raw) => Some(parse_duration(&raw)?),
            None => None,
        };

        let well_known_url = get("MONALIAS_WELL_KNOWN_URL")
            .unwrap_or_else(|| format!("https://{}/.well-known/monalias", domain));

        let wallet_rpc = match get("MONALIAS_WALLET_RPC_URL") {
            Some(url) => Some(WalletRpcConfig {
                url,
                user: get("MONALIAS_WALLET_RPC_USER"),
                password: get("MONALIAS_WALLET_RPC_PASSWORD")
                    .or_else(|| read_secret(Path::new(WALLET_RPC_PASSWORD_SECRET))),
                timeout: duration_or(get("MONALIAS_WALLET_RPC_TIMEOUT"), Duration::from_secs(10))?,
            }),
            None => None,
        };

        Ok(ServerConfig {
            service: ServiceConfig {
                domain,
                public_base_url,
                public_bind: get_or("MONALIAS_PUBLIC_BIND", "0.0.0.0:80"),
                admin_bind: get_or("MONALIAS_ADMIN_BIND", "127.0.0.1:8080"),
            },
            storage: StorageConfig {
                db_path: PathBuf::from(get_or("MONALIAS_DB_PATH", "./monalias.db")),
            },
            signing: SigningConfig {
                key_file,
                key_id: get_or("MONALIAS_SIGNING_KEY_ID", "main-2026-01"),
            },
            resolver: ResolverConfig {
                catch_all_address: get("MONALIAS_CATCHALL_ADDRESS"),
                response_ttl,
            },
            rate_limit,
            identity: IdentityConfig {
                check_interval: duration_or(get("MONALIAS_IDENTITY_INTERVAL"), Duration::from_secs(900))?,
                fetch_timeout: duration_or(get("MONALIAS_IDENTITY_TIMEOUT"), Duration::from_secs(10))?,
                well_known_url,
            },
            wallet_rpc,
            admin: AdminConfig {
                user: get_or("MONALIAS_ADMIN_USER", "admin"),
                password: admin_password,
            },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> MonaliasResult<()> {
        if self.service.domain.is_empty() || self.service.domain.contains('$') {
            return Err(MonaliasError::Config("Domain is empty or malformed".to_string()));
        }

        let base = &self.service.public_base_url;
        if !(base.starts_with("https://") || base.starts_with("http://")) {
            return Err(MonaliasError::Config(
                "Public base URL must start with http:// or https://".to_string(),
            ));
        }

        if !(self.rate_limit.requests_per_second > 0.0) {
            return Err(MonaliasError::Config(
                "Rate limit requests per second must be positive".to_string(),
            ));
        }

        if self.rate_limit.burst == 0 {
            return Err(MonaliasError::Config("Rate limit burst must be positive".to_string()));
        }

        if self.rate_limit.sweep_interval.is_zero() || self.identity.check_interval.is_zero() {
            return Err(MonaliasError::Config(
                "Sweep and identity check intervals must be positive".to_string(),
            ));
        }

        if self.signing.key_id.is_empty() {
            return Err(MonaliasError::Config("Signing key id cannot be empty".to_string()));
        }

        Ok(())
    }
}

/// Parse `90`, `90s`, `15m` or `2h`
pub fn parse_duration(raw: &str) -> MonaliasResult<Duration> {
    let raw = raw.trim();
    let (digits, multiplier) = match raw.chars().last() {
        Some('s') => (&raw[..raw.len() - 1], 1),
        Some('m') => (&raw[..raw.len() - 1], 60),
        Some('h') => (&raw[..raw.len() - 1], 3600),
        _ => (raw, 1),
    };

    let value: u64 = digits
        .trim()
        .parse()
        .map_err(|_| MonaliasError::Config(format!("Invalid duration: {}", raw)))?;

    let secs = value
        .checked_mul(multiplier)
        .ok_or_else(|| MonaliasError::Config(format!("Duration out of range: {}", raw)))?;

    Ok(Duration::from_secs(secs))
}

fn duration_or(raw: Option<String>, default: Duration) -> MonaliasResult<Duration> {
    match raw {
        Some(raw) => parse_duration(&raw),
        None => Ok(default),
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, raw: Option<String>, default: T) -> MonaliasResult<T> {
    match raw {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| MonaliasError::Config(format!("Invalid value for {}: {}", key, raw))),
        None => Ok(default),
    }
}

fn read_secret(path: &Path) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
