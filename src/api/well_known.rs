/// Well-known identity document
use crate::{
    context::AppContext,
    crypto::SIGNING_ALG,
    error::MonaliasResult,
    protocol::{WellKnownDocument, WellKnownKey, WELL_KNOWN_PATH, WELL_KNOWN_VERSION},
};
use axum::{extract::State, response::Json, routing::get, Router};

/// Build well-known routes
pub fn routes() -> Router<AppContext> {
    Router::new().route(WELL_KNOWN_PATH, get(well_known))
}

/// /.well-known/monalias
///
/// Publishes the homeserver and signing key from the stored instance
/// identity. The watchdog fetches this same document to check itself.
pub async fn well_known(State(ctx): State<AppContext>) -> MonaliasResult<Json<WellKnownDocument>> {
    let identity = ctx.identity.read().await?;

    Ok(Json(WellKnownDocument {
        homeserver: identity.homeserver,
        version: WELL_KNOWN_VERSION.to_string(),
        keys: vec![WellKnownKey {
            kid: identity.signing_key_id,
            alg: SIGNING_ALG.to_string(),
            public_key: identity.signing_pubkey,
            key_use: "sig".to_string(),
        }],
    }))
}
