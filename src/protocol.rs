/// Monalias wire protocol
///
/// Request/response shapes for `/_monalias/resolve`, the well-known identity
/// document, and the helpers that pick an `acct` (`local[+label]$domain`) apart.
use crate::error::{MonaliasError, MonaliasResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Literal tag that opens every canonical resolve string
pub const RESOLVE_TAG: &str = "MONALIAS_RESOLVE";

/// Response header carrying the signing key id
pub const KEY_ID_HEADER: &str = "x-monalias-key-id";

/// Response header carrying the base64 signature
pub const SIGNATURE_HEADER: &str = "x-monalias-sig";

/// Version string published in the well-known document
pub const WELL_KNOWN_VERSION: &str = "0.1";

/// Path of the well-known identity document
pub const WELL_KNOWN_PATH: &str = "/.well-known/monalias";

/// Separator between the local part and the domain
pub const DOMAIN_SEPARATOR: char = '$';

/// Separator between the handle local part and an alias label
pub const LABEL_SEPARATOR: char = '+';

/// Networks the resolver will answer for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Stagenet,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Stagenet => "stagenet",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = MonaliasError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mainnet" => Ok(Network::Mainnet),
            "stagenet" => Ok(Network::Stagenet),
            other => Err(MonaliasError::InvalidNetwork(other.to_string())),
        }
    }
}

/// How a successful resolution was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolvedKind {
    Normal,
    CatchAll,
}

/// Body of `POST /_monalias/resolve`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolveRequest {
    #[serde(default)]
    pub acct: String,
    #[serde(default)]
    pub network: String,
}

impl ResolveRequest {
    pub fn new(acct: impl Into<String>, network: impl Into<String>) -> Self {
        Self {
            acct: acct.into(),
            network: network.into(),
        }
    }

    /// Input validation: both fields present, network one of the served literals.
    ///
    /// Never touches storage or signing.
    pub fn validate(&self) -> MonaliasResult<Network> {
        if self.acct.is_empty() || self.network.is_empty() {
            return Err(MonaliasError::BadRequest(
                "acct and network are required".to_string(),
            ));
        }
        self.network.parse()
    }
}

/// Response metadata block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveMeta {
    pub display_name: Option<String>,
    pub alias: Option<String>,
    pub resolved_kind: ResolvedKind,
}

/// Success body of a resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveResponse {
    pub address: String,
    pub network: String,
    pub meta: ResolveMeta,
    /// RFC 3339 UTC, second precision; the same text is signed
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub expires_at: Option<String>,
}

/// One key entry of the well-known document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WellKnownKey {
    #[serde(default)]
    pub kid: String,
    #[serde(default)]
    pub alg: String,
    #[serde(default)]
    pub public_key: String,
    #[serde(rename = "use", default)]
    pub key_use: String,
}

/// `/.well-known/monalias` document
///
/// Missing fields read as empty, so a stripped document fails the identity
/// comparison instead of failing to parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WellKnownDocument {
    #[serde(default)]
    pub homeserver: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub keys: Vec<WellKnownKey>,
}

impl WellKnownDocument {
    /// True when some key entry carries both the given id and public key
    pub fn has_key(&self, kid: &str, public_key: &str) -> bool {
        self.keys
            .iter()
            .any(|key| key.kid == kid && key.public_key == public_key)
    }
}

/// Split an acct into `(local, domain)`; exactly one `$` is required
pub fn split_acct(acct: &str) -> Option<(&str, &str)> {
    let mut parts = acct.split(DOMAIN_SEPARATOR);
    let local = parts.next()?;
    let domain = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    Some((local, domain))
}

/// Domain suffix of `acct` equals `domain`, ignoring ASCII case
pub fn acct_matches_domain(acct: &str, domain: &str) -> bool {
    match split_acct(acct) {
        Some((_, acct_domain)) => acct_domain.eq_ignore_ascii_case(domain),
        None => false,
    }
}

/// Local part up to the first `+`; `None` when that is empty
pub fn display_name_from_acct(acct: &str) -> Option<String> {
    let local = acct.split(DOMAIN_SEPARATOR).next().unwrap_or_default();
    let name = match local.find(LABEL_SEPARATOR) {
        Some(idx) => &local[..idx],
        None => local,
    };
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Display name used for catch-all answers
pub fn catch_all_display_name(domain: &str) -> String {
    format!("{} (catch-all)", domain)
}

/// Full externally visible acct for an alias label under an account handle.
///
/// The empty label and `default` map to the handle itself.
pub fn build_full_acct(handle: &str, label: &str) -> String {
    if label.is_empty() || label == "default" {
        return handle.to_string();
    }
    match split_acct(handle) {
        Some((local, domain)) => format!("{}+{}${}", local, label, domain),
        None => handle.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_parsing() {
        assert_eq!("mainnet".parse::<Network>().unwrap(), Network::Mainnet);
        assert_eq!("stagenet".parse::<Network>().unwrap(), Network::Stagenet);
        assert!(matches!(
            "testnet".parse::<Network>(),
            Err(MonaliasError::InvalidNetwork(_))
        ));
        // Literal match only
        assert!("Mainnet".parse::<Network>().is_err());
    }

    #[test]
    fn test_validate_empty_fields() {
        assert!(matches!(
            ResolveRequest::new("", "mainnet").validate(),
            Err(MonaliasError::BadRequest(_))
        ));
        assert!(matches!(
            ResolveRequest::new("alice$example.com", "").validate(),
            Err(MonaliasError::BadRequest(_))
        ));
        assert!(matches!(
            ResolveRequest::new("alice$example.com", "regtest").validate(),
            Err(MonaliasError::InvalidNetwork(_))
        ));
        assert_eq!(
            ResolveRequest::new("alice$example.com", "stagenet")
                .validate()
                .unwrap(),
            Network::Stagenet
        );
    }

    #[test]
    fn test_acct_matches_domain() {
        assert!(acct_matches_domain("alice$example.com", "example.com"));
        assert!(acct_matches_domain("alice+tips$EXAMPLE.com", "example.com"));
        assert!(!acct_matches_domain("alice$other.org", "example.com"));
        assert!(!acct_matches_domain("alice@example.com", "example.com"));
        assert!(!acct_matches_domain("a$b$example.com", "example.com"));
    }

    #[test]
    fn test_display_name() {
        assert_eq!(display_name_from_acct("alice$example.com").as_deref(), Some("alice"));
        assert_eq!(
            display_name_from_acct("alice+donations$example.com").as_deref(),
            Some("alice")
        );
        assert_eq!(display_name_from_acct("$example.com"), None);
        assert_eq!(display_name_from_acct("+tips$example.com"), None);
    }

    #[test]
    fn test_build_full_acct() {
        assert_eq!(build_full_acct("alice$example.com", ""), "alice$example.com");
        assert_eq!(build_full_acct("alice$example.com", "default"), "alice$example.com");
        assert_eq!(
            build_full_acct("alice$example.com", "tips"),
            "alice+tips$example.com"
        );
    }

    #[test]
    fn test_response_serialization() {
        let response = ResolveResponse {
            address: "4Addr".to_string(),
            network: "mainnet".to_string(),
            meta: ResolveMeta {
                display_name: None,
                alias: Some("default".to_string()),
                resolved_kind: ResolvedKind::CatchAll,
            },
            expires_at: None,
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["meta"]["resolved_kind"], "CATCH_ALL");
        assert!(json["meta"]["display_name"].is_null());
        assert!(json.get("expires_at").is_none());
    }

    #[test]
    fn test_well_known_key_match() {
        let doc: WellKnownDocument = serde_json::from_str(
            r#"{"homeserver":"https://example.com","version":"0.1",
                "keys":[{"kid":"k1","alg":"Ed25519","public_key":"PUB","use":"sig"}]}"#,
        )
        .unwrap();
        assert!(doc.has_key("k1", "PUB"));
        assert!(!doc.has_key("k1", "OTHER"));
        assert!(!doc.has_key("k2", "PUB"));
    }

    #[test]
    fn test_stripped_well_known_parses_empty() {
        let doc: WellKnownDocument = serde_json::from_str(r#"{"keys":[{"kid":"k1"}]}"#).unwrap();
        assert!(doc.homeserver.is_empty());
        assert!(doc.version.is_empty());
        assert!(!doc.has_key("k1", "PUB"));
    }
}
