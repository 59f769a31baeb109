/// Request header helpers
use axum::http::{header, HeaderMap};
use base64::{engine::general_purpose::STANDARD, Engine};

/// Extract `(user, password)` from a Basic Authorization header
pub fn extract_basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_extract_basic_credentials() {
        let mut headers = HeaderMap::new();
        assert!(extract_basic_credentials(&headers).is_none());

        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {}", STANDARD.encode("admin:pa:ss"))).unwrap(),
        );
        assert_eq!(
            extract_basic_credentials(&headers),
            Some(("admin".to_string(), "pa:ss".to_string()))
        );

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer token"));
        assert!(extract_basic_credentials(&headers).is_none());
    }
}
