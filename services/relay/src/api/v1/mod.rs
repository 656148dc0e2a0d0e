//! API v1 routes.

mod events;
mod registrations;

use axum::Router;

use crate::state::AppState;

/// Create API v1 routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .nest("/events", events::routes())
        .nest("/registrations", registrations::routes())
}
