/// API routes and handlers
pub mod admin;
pub mod health;
pub mod middleware;
pub mod resolve;
pub mod well_known;

use crate::context::AppContext;
use axum::Router;

/// Routes served on the public listener
pub fn public_routes(ctx: AppContext) -> Router<AppContext> {
    Router::new()
        .merge(resolve::routes(ctx))
        .merge(well_known::routes())
        .merge(health::routes())
}

/// Routes served on the admin listener
pub fn admin_routes() -> Router<AppContext> {
    Router::new().merge(admin::routes()).merge(health::routes())
}
