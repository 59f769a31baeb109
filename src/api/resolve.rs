/// Public resolve endpoint
use crate::{
    context::AppContext,
    error::{MonaliasError, MonaliasResult},
    metrics,
    protocol::{ResolveRequest, KEY_ID_HEADER, SIGNATURE_HEADER},
    rate_limit::rate_limit_middleware,
};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderName, HeaderValue},
    middleware,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};

pub const RESOLVE_PATH: &str = "/_monalias/resolve";

/// Build the resolve route behind the per-source rate limiter
pub fn routes(ctx: AppContext) -> Router<AppContext> {
    Router::new()
        .route(RESOLVE_PATH, post(resolve))
        .route_layer(middleware::from_fn_with_state(ctx, rate_limit_middleware))
}

/// POST /_monalias/resolve
///
/// Returns the signed answer, with the key id and base64 signature in
/// response headers.
pub async fn resolve(
    State(ctx): State<AppContext>,
    payload: Result<Json<ResolveRequest>, JsonRejection>,
) -> MonaliasResult<Response> {
    let Json(request) = payload.map_err(|rejection| {
        metrics::record_resolve("bad_request");
        MonaliasError::BadRequest(rejection.body_text())
    })?;

    let signed = ctx.resolver.resolve(&request).await?;

    let mut response = Json(signed.response).into_response();
    let headers = response.headers_mut();
    headers.insert(
        HeaderName::from_static(KEY_ID_HEADER),
        header_value(&signed.key_id)?,
    );
    headers.insert(
        HeaderName::from_static(SIGNATURE_HEADER),
        header_value(&signed.signature)?,
    );

    Ok(response)
}

fn header_value(value: &str) -> MonaliasResult<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| MonaliasError::Internal(format!("Invalid header value: {}", e)))
}
