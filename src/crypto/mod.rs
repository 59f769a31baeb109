/// Cryptography module for resolve signing and key management
///
/// Handles Ed25519 signing of canonical resolve strings

pub mod signer;

pub use signer::{verify_resolve, CanonicalResolve, ResolveSigner, SIGNING_ALG};
