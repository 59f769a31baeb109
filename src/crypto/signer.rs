/// Resolve response signing
///
/// Builds the canonical resolve string and signs it with the instance's
/// Ed25519 key. Verifiers rebuild the same bytes from the request and the
/// response and check the `X-Monalias-Sig` header against the published key.
use crate::{
    error::{MonaliasError, MonaliasResult},
    protocol::RESOLVE_TAG,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use std::path::Path;

/// Algorithm name published in the well-known document
pub const SIGNING_ALG: &str = "Ed25519";

/// Fields that make up one canonical resolve string.
///
/// `acct` and `network` come from the request, `address` and `expires_at`
/// from the response, `key_id` from configuration.
#[derive(Debug, Clone, Copy)]
pub struct CanonicalResolve<'a> {
    pub acct: &'a str,
    pub address: &'a str,
    pub network: &'a str,
    pub expires_at: Option<&'a str>,
    pub key_id: &'a str,
}

impl CanonicalResolve<'_> {
    /// Newline-joined canonical form; an absent `expires_at` is an empty segment
    pub fn to_canonical_string(&self) -> String {
        [
            RESOLVE_TAG,
            self.acct,
            self.address,
            self.network,
            self.expires_at.unwrap_or(""),
            self.key_id,
        ]
        .join("\n")
    }
}

/// Instance signing key plus its key id
pub struct ResolveSigner {
    signing_key: SigningKey,
    key_id: String,
}

impl ResolveSigner {
    /// Create a signer from a 32-byte seed or a 64-byte keypair
    pub fn new(key_bytes: &[u8], key_id: impl Into<String>) -> MonaliasResult<Self> {
        let signing_key = match key_bytes.len() {
            32 => {
                let mut seed = [0u8; 32];
                seed.copy_from_slice(key_bytes);
                SigningKey::from_bytes(&seed)
            }
            64 => {
                let mut keypair = [0u8; 64];
                keypair.copy_from_slice(key_bytes);
                SigningKey::from_keypair_bytes(&keypair).map_err(|e| {
                    MonaliasError::Config(format!("Invalid Ed25519 keypair: {}", e))
                })?
            }
            n => {
                return Err(MonaliasError::Config(format!(
                    "Signing key must be a 32-byte seed or 64-byte keypair, got {} bytes",
                    n
                )))
            }
        };

        Ok(Self {
            signing_key,
            key_id: key_id.into(),
        })
    }

    /// Decode key material: base64 first, then hex, then the raw bytes
    pub fn from_encoded(encoded: &str, key_id: impl Into<String>) -> MonaliasResult<Self> {
        let trimmed = encoded.trim();
        let raw = STANDARD
            .decode(trimmed)
            .ok()
            .filter(|bytes| bytes.len() == 32 || bytes.len() == 64)
            .or_else(|| hex::decode(trimmed).ok())
            .unwrap_or_else(|| trimmed.as_bytes().to_vec());

        Self::new(&raw, key_id)
    }

    /// Load the signing key from a secrets file
    pub async fn load(path: &Path, key_id: impl Into<String>) -> MonaliasResult<Self> {
        let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
            MonaliasError::Config(format!("Failed to read signing key {:?}: {}", path, e))
        })?;
        Self::from_encoded(&contents, key_id)
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Get the verifying key (public key)
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Public key as published in the well-known document (standard base64)
    pub fn public_key_base64(&self) -> String {
        STANDARD.encode(self.verifying_key().to_bytes())
    }

    /// Sign raw bytes, returning the 64-byte signature
    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        let signature: Signature = self.signing_key.sign(data);
        signature.to_bytes().to_vec()
    }

    /// Sign the canonical string for a resolution, returning base64.
    ///
    /// The key id in `fields` is ignored; the signer's own id is always used.
    pub fn sign_resolve(&self, fields: CanonicalResolve<'_>) -> String {
        let canonical = CanonicalResolve {
            key_id: &self.key_id,
            ..fields
        }
        .to_canonical_string();
        STANDARD.encode(self.sign(canonical.as_bytes()))
    }
}

/// Verify a base64 signature over a canonical resolve string against a
/// base64-encoded public key. Any decoding failure counts as invalid.
pub fn verify_resolve(public_key_b64: &str, fields: CanonicalResolve<'_>, signature_b64: &str) -> bool {
    let Ok(key_bytes) = STANDARD.decode(public_key_b64) else {
        return false;
    };
    let Ok(key_bytes) = <[u8; 32]>::try_from(key_bytes.as_slice()) else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_bytes(&key_bytes) else {
        return false;
    };
    let Ok(sig_bytes) = STANDARD.decode(signature_b64) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(&sig_bytes) else {
        return false;
    };

    verifying_key
        .verify(fields.to_canonical_string().as_bytes(), &signature)
        .is_ok()
}
