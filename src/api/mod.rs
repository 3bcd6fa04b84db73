/// API routes and handlers
pub mod billing;
pub mod identity;
pub mod invites;
pub mod middleware;
pub mod usage;

use crate::context::AppContext;
use axum::Router;

/// Build API routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .merge(invites::routes())
        .merge(identity::routes())
        .merge(usage::routes())
        .merge(billing::routes())
}
