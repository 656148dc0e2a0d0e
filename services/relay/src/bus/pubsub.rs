//! Pub/Sub REST publisher.
//!
//! Publishes through `POST {base_url}/v1/projects/{project}/topics/{topic}:publish`
//! with a single message per request. Message data is base64 encoded as the
//! REST API requires; attributes and ordering key are sent as-is.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use docrelay_events::BusMessage;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{Ack, BusError, MessageBus};

/// Bearer token wrapper that keeps the value out of logs.
#[derive(Clone)]
pub struct BearerToken(String);

impl BearerToken {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    fn header_value(&self) -> String {
        let raw = self.0.trim();
        if raw.starts_with("Bearer ") || raw.starts_with("bearer ") {
            raw.to_string()
        } else {
            format!("Bearer {raw}")
        }
    }
}

impl std::fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BearerToken(<redacted>)")
    }
}

/// Connection settings for the Pub/Sub REST API.
#[derive(Debug, Clone)]
pub struct PubSubConfig {
    /// API base URL (example: https://pubsub.googleapis.com).
    pub base_url: String,

    pub project: String,

    /// Passed through as `Authorization: Bearer ...`.
    pub token: Option<BearerToken>,

    pub connect_timeout: Duration,
}

#[derive(Debug, Serialize)]
struct PublishRequest<'a> {
    messages: [OutgoingMessage<'a>; 1],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OutgoingMessage<'a> {
    data: String,
    attributes: &'a BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ordering_key: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    #[serde(default)]
    message_ids: Vec<String>,
}

/// HTTP client for the Pub/Sub publish endpoint.
#[derive(Debug, Clone)]
pub struct PubSubHttpBus {
    client: reqwest::Client,
    base_url: String,
    project: String,
}

impl PubSubHttpBus {
    pub fn new(config: PubSubConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &config.token {
            let mut value = HeaderValue::from_str(&token.header_value())
                .context("Invalid Pub/Sub token format")?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .user_agent(concat!("docrelay/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .connect_timeout(config.connect_timeout)
            .build()
            .context("Failed to build Pub/Sub HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            project: config.project,
        })
    }

    fn publish_url(&self, topic: &str) -> String {
        format!(
            "{}/v1/projects/{}/topics/{}:publish",
            self.base_url, self.project, topic
        )
    }
}

/// Maps a non-success HTTP status to a bus error.
fn classify_status(status: StatusCode, body: &str) -> BusError {
    let detail = format!("status={status} body={body}");
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        BusError::Unavailable(detail)
    } else {
        BusError::Rejected(detail)
    }
}

fn classify_transport(err: reqwest::Error) -> BusError {
    if err.is_timeout() {
        BusError::Timeout
    } else {
        BusError::Unavailable(err.to_string())
    }
}

#[async_trait]
impl MessageBus for PubSubHttpBus {
    fn name(&self) -> &str {
        "pubsub"
    }

    async fn publish(&self, topic: &str, message: &BusMessage) -> Result<Ack, BusError> {
        let request = PublishRequest {
            messages: [OutgoingMessage {
                data: BASE64.encode(&message.data),
                attributes: &message.attributes,
                ordering_key: message.ordering_key.as_deref(),
            }],
        };

        let resp = self
            .client
            .post(self.publish_url(topic))
            .json(&request)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let err = classify_status(status, &body);
            warn!(topic, %status, transient = err.is_transient(), "publish request failed");
            return Err(err);
        }

        let body: PublishResponse = resp
            .json()
            .await
            .map_err(|e| BusError::Unavailable(format!("unreadable publish response: {e}")))?;

        let message_id = body
            .message_ids
            .into_iter()
            .next()
            .ok_or_else(|| BusError::Unavailable("publish response had no message id".into()))?;

        debug!(topic, message_id = %message_id, "message accepted by bus");
        Ok(Ack { message_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn message() -> BusMessage {
        BusMessage {
            data: br#"{"hello":"world"}"#.to_vec(),
            attributes: BTreeMap::from([("type".to_string(), "entries".to_string())]),
            ordering_key: Some("abc".to_string()),
        }
    }

    fn bus(server: &MockServer, token: Option<&str>) -> PubSubHttpBus {
        PubSubHttpBus::new(PubSubConfig {
            base_url: format!("{}/", server.uri()),
            project: "gatrabali".to_string(),
            token: token.map(BearerToken::new),
            connect_timeout: Duration::from_secs(1),
        })
        .unwrap()
    }

    #[rstest]
    #[case(StatusCode::INTERNAL_SERVER_ERROR, true)]
    #[case(StatusCode::SERVICE_UNAVAILABLE, true)]
    #[case(StatusCode::TOO_MANY_REQUESTS, true)]
    #[case(StatusCode::REQUEST_TIMEOUT, true)]
    #[case(StatusCode::BAD_REQUEST, false)]
    #[case(StatusCode::FORBIDDEN, false)]
    #[case(StatusCode::NOT_FOUND, false)]
    fn test_classify_status(#[case] status: StatusCode, #[case] transient: bool) {
        assert_eq!(classify_status(status, "").is_transient(), transient);
    }

    #[test]
    fn test_token_is_redacted_and_prefixed() {
        let token = BearerToken::new("secret");
        assert_eq!(format!("{token:?}"), "BearerToken(<redacted>)");
        assert_eq!(token.header_value(), "Bearer secret");
        assert_eq!(BearerToken::new("Bearer abc").header_value(), "Bearer abc");
    }

    #[tokio::test]
    async fn test_publish_sends_rest_shape_and_returns_message_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/projects/gatrabali/topics/FirestoreEvents:publish"))
            .and(header("authorization", "Bearer t0ken"))
            .and(body_partial_json(json!({
                "messages": [{
                    "data": BASE64.encode(br#"{"hello":"world"}"#),
                    "attributes": {"type": "entries"},
                    "orderingKey": "abc"
                }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"messageIds": ["42"]})))
            .expect(1)
            .mount(&server)
            .await;

        let ack = bus(&server, Some("t0ken"))
            .publish("FirestoreEvents", &message())
            .await
            .unwrap();

        assert_eq!(ack.message_id, "42");
    }

    #[tokio::test]
    async fn test_publish_maps_server_error_to_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("try later"))
            .mount(&server)
            .await;

        let err = bus(&server, None)
            .publish("FirestoreEvents", &message())
            .await
            .unwrap_err();

        assert!(matches!(err, BusError::Unavailable(ref d) if d.contains("try later")));
    }

    #[tokio::test]
    async fn test_publish_maps_client_error_to_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let err = bus(&server, None)
            .publish("FirestoreEvents", &message())
            .await
            .unwrap_err();

        assert!(matches!(err, BusError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_publish_without_message_id_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let err = bus(&server, None)
            .publish("FirestoreEvents", &message())
            .await
            .unwrap_err();

        assert!(err.is_transient());
    }
}
