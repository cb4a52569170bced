/// API routes and handlers
pub mod activity;
pub mod retrieve;
pub mod rpc;

use crate::context::AppContext;
use axum::Router;

/// Build API routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .merge(rpc::routes())
        .merge(activity::routes())
}
