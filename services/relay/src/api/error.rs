use axum::{
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::normalizer::NormalizeError;
use crate::pipeline::PublishError;
use crate::registry::RegistryError;
use crate::relay::RelayError;

/// Problem details body (RFC 9457 shape).
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub r#type: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    pub code: String,
    pub request_id: String,
    /// Whether the event source should deliver the event again.
    pub retryable: bool,
}

impl ProblemDetails {
    fn new(status: StatusCode, code: impl Into<String>, detail: impl Into<String>) -> Self {
        let code = code.into();
        let title = status
            .canonical_reason()
            .unwrap_or("Unknown Error")
            .to_string();
        Self {
            r#type: format!("urn:docrelay:problem:{code}"),
            title,
            status: status.as_u16(),
            detail: detail.into(),
            code,
            request_id: "unknown".to_string(),
            retryable: false,
        }
    }
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub problem: Box<ProblemDetails>,
}

impl ApiError {
    fn with_status(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        let problem = Box::new(ProblemDetails::new(status, code, message));
        Self { status, problem }
    }

    pub fn bad_request(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::BAD_REQUEST, code, message)
    }

    pub fn not_found(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::NOT_FOUND, code, message)
    }

    pub fn unprocessable(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::UNPROCESSABLE_ENTITY, code, message)
    }

    pub fn internal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::INTERNAL_SERVER_ERROR, code, message)
    }

    /// 503; the caller should deliver the event again.
    pub fn unavailable(code: impl Into<String>, message: impl Into<String>) -> Self {
        let mut err = Self::with_status(StatusCode::SERVICE_UNAVAILABLE, code, message);
        err.problem.retryable = true;
        err
    }

    pub fn shutting_down() -> Self {
        Self::unavailable("shutting_down", "Relay is shutting down")
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.problem.request_id = request_id.into();
        self
    }
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        let detail = err.to_string();
        match err {
            RelayError::Registry(RegistryError::UnknownPath(_)) => {
                Self::not_found("unknown_collection", detail)
            }
            RelayError::Registry(_) => Self::internal("registry_error", detail),
            RelayError::Normalize(NormalizeError::MissingPayload { .. }) => {
                Self::unprocessable("missing_payload", detail)
            }
            RelayError::Normalize(NormalizeError::UnsupportedEventKind { .. }) => {
                Self::unprocessable("unsupported_event_kind", detail)
            }
            RelayError::Normalize(NormalizeError::PathMismatch { .. }) => {
                Self::unprocessable("path_mismatch", detail)
            }
            RelayError::Normalize(NormalizeError::InvalidDocumentId { .. }) => {
                Self::unprocessable("invalid_document_id", detail)
            }
            RelayError::Normalize(NormalizeError::Envelope(_)) => {
                Self::internal("envelope_error", detail)
            }
            RelayError::Publish(PublishError::Exhausted { .. }) => {
                Self::unavailable("publish_exhausted", detail)
            }
            RelayError::Publish(PublishError::Abandoned { .. }) => Self::shutting_down(),
            RelayError::Publish(PublishError::Encode(_)) => Self::internal("encode_failed", detail),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(self.problem)).into_response();
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docrelay_events::EventKind;
    use docrelay_id::{DocumentId, IdError, PublishSeq};
    use rstest::rstest;
    use std::time::Duration;

    use crate::bus::BusError;

    fn exhausted() -> RelayError {
        RelayError::Publish(PublishError::Exhausted {
            document_id: DocumentId::parse("abc").unwrap(),
            sequence: PublishSeq::FIRST,
            attempts: 6,
            elapsed: Duration::from_secs(3),
            last_error: BusError::Timeout,
        })
    }

    #[rstest]
    #[case(RelayError::Registry(RegistryError::UnknownPath("/x/y".into())), 404, "unknown_collection", false)]
    #[case(
        RelayError::Normalize(NormalizeError::MissingPayload { path: "/e/a".into(), kind: EventKind::Created }),
        422, "missing_payload", false
    )]
    #[case(
        RelayError::Normalize(NormalizeError::UnsupportedEventKind { path: "/e/a".into(), kind: EventKind::Deleted }),
        422, "unsupported_event_kind", false
    )]
    #[case(
        RelayError::Normalize(NormalizeError::PathMismatch { path: "/e/a".into(), pattern: "/f/{id}".into() }),
        422, "path_mismatch", false
    )]
    #[case(
        RelayError::Normalize(NormalizeError::InvalidDocumentId {
            path: "/e/ a".into(),
            source: IdError::InvalidDocumentId { id: " a".into(), reason: "has leading or trailing whitespace" },
        }),
        422, "invalid_document_id", false
    )]
    #[case(exhausted(), 503, "publish_exhausted", true)]
    #[case(
        RelayError::Publish(PublishError::Abandoned { document_id: DocumentId::parse("abc").unwrap(), sequence: PublishSeq::FIRST }),
        503, "shutting_down", true
    )]
    fn test_relay_error_mapping(
        #[case] err: RelayError,
        #[case] status: u16,
        #[case] code: &str,
        #[case] retryable: bool,
    ) {
        let api = ApiError::from(err);
        assert_eq!(api.status.as_u16(), status);
        assert_eq!(api.problem.code, code);
        assert_eq!(api.problem.retryable, retryable);
    }
}
