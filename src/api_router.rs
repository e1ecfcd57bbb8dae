//! Central route configuration: merges the per-module routers into the
//! application router handed to the server.

use axum::Router;
use std::sync::Arc;

use crate::shared::state::AppState;

pub fn configure_api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .merge(crate::identity::configure_identity_routes())
        .merge(crate::tickets::configure_ticket_routes())
        .merge(crate::merge::configure_merge_routes())
}
