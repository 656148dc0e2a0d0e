//! Read-only view of the watched collections.

use axum::{extract::State, routing::get, Json, Router};
use docrelay_events::{EventKind, LabelMetadata};
use serde::Serialize;

use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/", get(list_registrations))
}

#[derive(Debug, Serialize)]
pub struct RegistrationResponse {
    pub path: String,
    /// Name of the path segment that carries the document ID.
    pub document_id_param: String,
    pub event_kinds: Vec<EventKind>,
    pub labels: LabelMetadata,
}

#[derive(Debug, Serialize)]
pub struct ListRegistrationsResponse {
    pub topic: String,
    pub items: Vec<RegistrationResponse>,
}

async fn list_registrations(State(state): State<AppState>) -> Json<ListRegistrationsResponse> {
    let relay = state.relay();
    let items = relay
        .registry()
        .registrations()
        .iter()
        .map(|r| RegistrationResponse {
            path: r.pattern().to_string(),
            document_id_param: r.pattern().wildcard_name().to_string(),
            event_kinds: r.event_kinds().iter().copied().collect(),
            labels: r.label_metadata().clone(),
        })
        .collect();

    Json(ListRegistrationsResponse {
        topic: relay.topic().to_string(),
        items,
    })
}
