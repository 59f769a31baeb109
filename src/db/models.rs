/// Instance identity, account and alias records
use crate::error::MonaliasError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Tri-state identity verdict. Only `Locked` refuses resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    Ok,
    Degraded,
    Locked,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Ok => "OK",
            InstanceStatus::Degraded => "DEGRADED",
            InstanceStatus::Locked => "LOCKED",
        }
    }

    /// Gauge value exported to metrics
    pub fn as_gauge(&self) -> i64 {
        match self {
            InstanceStatus::Ok => 0,
            InstanceStatus::Degraded => 1,
            InstanceStatus::Locked => 2,
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceStatus {
    type Err = MonaliasError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OK" => Ok(InstanceStatus::Ok),
            "DEGRADED" => Ok(InstanceStatus::Degraded),
            "LOCKED" => Ok(InstanceStatus::Locked),
            other => Err(MonaliasError::Integrity(format!(
                "Unknown instance status {:?}",
                other
            ))),
        }
    }
}

/// The server's claimed public identity (single row)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceIdentity {
    pub domain: String,
    pub homeserver: String,
    pub signing_key_id: String,
    pub signing_pubkey: String,
    pub status: InstanceStatus,
    pub status_reason: Option<String>,
    pub last_identity_check_at: Option<DateTime<Utc>>,
}

/// Account record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    /// `local$domain`, globally unique
    pub handle: String,
    /// Named wallet on the wallet RPC daemon
    pub wallet_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Wallet name, ignoring an empty string
    pub fn wallet(&self) -> Option<&str> {
        self.wallet_name.as_deref().filter(|w| !w.is_empty())
    }
}

/// How an alias produces its address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AliasMode {
    StaticAddress,
    DynamicSubaddress,
}

impl AliasMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AliasMode::StaticAddress => "STATIC_ADDRESS",
            AliasMode::DynamicSubaddress => "DYNAMIC_SUBADDRESS",
        }
    }
}

impl fmt::Display for AliasMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AliasMode {
    type Err = MonaliasError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STATIC_ADDRESS" => Ok(AliasMode::StaticAddress),
            "DYNAMIC_SUBADDRESS" => Ok(AliasMode::DynamicSubaddress),
            other => Err(MonaliasError::Validation(format!(
                "Unknown alias mode {:?}",
                other
            ))),
        }
    }
}

/// Alias record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alias {
    pub id: i64,
    pub account_id: i64,
    /// Externally visible `local[+label]$domain`, globally unique
    pub full_acct: String,
    pub alias_label: String,
    pub mode: AliasMode,
    /// Fixed address (static) or cached derived address (dynamic)
    pub address: Option<String>,
    /// Wallet subaddress index (dynamic)
    pub subaddress_index: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Alias {
    /// Stored address, ignoring an empty string
    pub fn stored_address(&self) -> Option<&str> {
        self.address.as_deref().filter(|a| !a.is_empty())
    }
}

/// Insert payload for an alias
#[derive(Debug, Clone)]
pub struct NewAlias {
    pub account_id: i64,
    pub full_acct: String,
    pub alias_label: String,
    pub mode: AliasMode,
    pub address: Option<String>,
    pub subaddress_index: Option<i64>,
}
