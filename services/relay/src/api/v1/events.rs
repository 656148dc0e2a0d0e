//! Change event intake.
//!
//! The HTTP status is the acknowledgement: 2xx means the event is settled,
//! 4xx means it will never succeed, 503 means deliver it again.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use docrelay_events::{ChangeEvent, EventKind};
use serde::Serialize;
use tracing::warn;

use crate::api::error::ApiError;
use crate::api::request_id;
use crate::relay::Delivery;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/", post(publish_event))
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryResponse {
    Published {
        message_id: String,
        publish_sequence: u64,
        document_id: String,
        request_id: String,
    },
    Filtered {
        pattern: String,
        event_kind: EventKind,
        request_id: String,
    },
}

async fn publish_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<ChangeEvent>, JsonRejection>,
) -> Result<Response, ApiError> {
    let request_id = request_id(&headers);

    let Json(event) = payload.map_err(|rejection| {
        ApiError::bad_request("invalid_event", rejection.body_text())
            .with_request_id(request_id.clone())
    })?;

    if state.is_draining() {
        return Err(ApiError::shutting_down().with_request_id(request_id));
    }

    let delivery = state.relay().handle(event).await.map_err(|e| {
        warn!(request_id = %request_id, error = %e, disposition = ?e.disposition(), "event not relayed");
        ApiError::from(e).with_request_id(request_id.clone())
    })?;

    let response = match delivery {
        Delivery::Published {
            ack,
            document_id,
            publish_sequence,
        } => (
            StatusCode::OK,
            Json(DeliveryResponse::Published {
                message_id: ack.message_id,
                publish_sequence: publish_sequence.value(),
                document_id: document_id.to_string(),
                request_id,
            }),
        ),
        Delivery::Filtered { pattern, kind } => (
            StatusCode::ACCEPTED,
            Json(DeliveryResponse::Filtered {
                pattern,
                event_kind: kind,
                request_id,
            }),
        ),
    };

    Ok(response.into_response())
}
