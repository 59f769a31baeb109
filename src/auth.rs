/// Admin authentication extractor
use crate::{api::middleware::extract_basic_credentials, context::AppContext, error::MonaliasError};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use sha2::{Digest, Sha256};

/// Proof that the request carried the configured admin credentials
#[derive(Debug, Clone)]
pub struct AdminAuth {
    pub user: String,
}

#[async_trait]
impl FromRequestParts<AppContext> for AdminAuth {
    type Rejection = MonaliasError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let (user, password) =
            extract_basic_credentials(&parts.headers).ok_or(MonaliasError::Unauthorized)?;

        let admin = &state.config.admin;
        if !credentials_match(&user, &admin.user) || !credentials_match(&password, &admin.password) {
            tracing::warn!(user = %user, "admin_auth_failed");
            return Err(MonaliasError::Unauthorized);
        }

        Ok(AdminAuth { user })
    }
}

/// Compare fixed-size digests so the comparison does not depend on where inputs differ
pub fn credentials_match(given: &str, expected: &str) -> bool {
    let given = Sha256::digest(given.as_bytes());
    let expected = Sha256::digest(expected.as_bytes());
    given
        .iter()
        .zip(expected.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_match() {
        assert!(credentials_match("hunter2", "hunter2"));
        assert!(!credentials_match("hunter3", "hunter2"));
        assert!(!credentials_match("", "hunter2"));
    }
}
