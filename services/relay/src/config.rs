//! Relay configuration.
//!
//! Process settings come from the environment; watched collections come from
//! a TOML registrations file. Both are read once at startup.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use docrelay_events::{EventKind, EventKinds, LabelMetadata};
use docrelay_retry::{BackoffPolicy, RetryPolicy};
use serde::Deserialize;

use crate::bus::{BearerToken, PubSubConfig};
use crate::registry::WatchRegistry;

/// Which bus the relay publishes to.
#[derive(Debug, Clone)]
pub enum BusConfig {
    /// Log every message instead of publishing (local development).
    Log,
    PubSub(PubSubConfig),
}

/// Relay configuration (env-driven).
#[derive(Debug, Clone)]
pub struct Config {
    /// Address for the inbound event API.
    pub listen_addr: SocketAddr,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Topic every envelope is published to.
    pub topic: String,

    pub registrations_file: PathBuf,

    pub bus: BusConfig,

    pub retry: RetryPolicy,

    /// How long in-flight publishes may run after shutdown starts.
    pub shutdown_grace: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let millis = |key: &str, default: u64| -> Result<Duration> {
            let ms = var(key)
                .map(|v| v.parse::<u64>())
                .transpose()
                .with_context(|| format!("{key} must be an integer (milliseconds)."))?
                .unwrap_or(default);
            Ok(Duration::from_millis(ms))
        };

        let listen_addr: SocketAddr = var("RELAY_LISTEN_ADDR")
            .unwrap_or_else(|| "127.0.0.1:8080".to_string())
            .parse()
            .context("RELAY_LISTEN_ADDR must be a socket address (host:port).")?;

        let log_level = var("RELAY_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let topic = var("RELAY_TOPIC").unwrap_or_else(|| "FirestoreEvents".to_string());
        if topic.trim().is_empty() {
            bail!("RELAY_TOPIC must not be empty.");
        }

        let registrations_file = var("RELAY_REGISTRATIONS_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("config/registrations.toml"));

        let max_retries: u32 = var("RELAY_PUBLISH_MAX_RETRIES")
            .map(|v| v.parse())
            .transpose()
            .context("RELAY_PUBLISH_MAX_RETRIES must be an integer.")?
            .unwrap_or(docrelay_retry::DEFAULT_MAX_RETRIES);

        let retry = RetryPolicy {
            max_retries,
            max_total_wait: millis("RELAY_PUBLISH_MAX_WAIT_MS", 30_000)?,
            attempt_timeout: millis("RELAY_PUBLISH_ATTEMPT_TIMEOUT_MS", 10_000)?,
            backoff: BackoffPolicy {
                base: millis("RELAY_BACKOFF_BASE_MS", 100)?,
                max: millis("RELAY_BACKOFF_MAX_MS", 5_000)?,
                ..BackoffPolicy::default()
            },
        };
        retry.validate().context("Invalid publish retry settings")?;

        let bus = match var("RELAY_BUS").as_deref().unwrap_or("pubsub") {
            "log" => BusConfig::Log,
            "pubsub" => BusConfig::PubSub(PubSubConfig {
                base_url: var("RELAY_PUBSUB_URL")
                    .unwrap_or_else(|| "https://pubsub.googleapis.com".to_string()),
                project: var("RELAY_PUBSUB_PROJECT")
                    .context("Missing Pub/Sub project. Set RELAY_PUBSUB_PROJECT (or RELAY_BUS=log).")?,
                token: var("RELAY_PUBSUB_TOKEN")
                    .filter(|t| !t.trim().is_empty())
                    .map(BearerToken::new),
                connect_timeout: retry.attempt_timeout,
            }),
            other => bail!("RELAY_BUS must be 'pubsub' or 'log', got '{other}'."),
        };

        let shutdown_grace = millis("RELAY_SHUTDOWN_GRACE_MS", 10_000)?;

        Ok(Self {
            listen_addr,
            log_level,
            topic,
            registrations_file,
            bus,
            retry,
            shutdown_grace,
        })
    }
}

// =============================================================================
// Registrations file
// =============================================================================

/// Named trigger shorthands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// Document creation only.
    OnCreate,
    /// Creation and update.
    OnWrite,
}

impl Trigger {
    pub fn event_kinds(self) -> EventKinds {
        match self {
            Trigger::OnCreate => EventKinds::from([EventKind::Created]),
            Trigger::OnWrite => EventKinds::from([EventKind::Created, EventKind::Updated]),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RegistrationsFile {
    #[serde(default, rename = "registration")]
    registrations: Vec<RegistrationEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RegistrationEntry {
    path: String,
    trigger: Option<Trigger>,
    events: Option<Vec<EventKind>>,
    #[serde(default)]
    labels: LabelMetadata,
}

/// One entry of the registrations file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticRegistration {
    pub path: String,
    pub event_kinds: EventKinds,
    pub labels: LabelMetadata,
}

/// Parses a registrations file.
pub fn parse_registrations(text: &str) -> Result<Vec<StaticRegistration>> {
    let file: RegistrationsFile =
        toml::from_str(text).context("Registrations file is not valid TOML")?;

    file.registrations
        .into_iter()
        .map(|entry| {
            let event_kinds = match (entry.trigger, entry.events) {
                (Some(trigger), None) => trigger.event_kinds(),
                (None, Some(events)) => events.into_iter().collect(),
                (Some(_), Some(_)) => {
                    bail!("Registration '{}' sets both trigger and events.", entry.path)
                }
                (None, None) => {
                    bail!("Registration '{}' needs a trigger or events.", entry.path)
                }
            };
            Ok(StaticRegistration {
                path: entry.path,
                event_kinds,
                labels: entry.labels,
            })
        })
        .collect()
}

/// Registers every entry of the file at `path`. Returns the number added.
pub fn load_registrations(path: &Path, registry: &WatchRegistry) -> Result<usize> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read registrations file {}", path.display()))?;
    let entries = parse_registrations(&text)
        .with_context(|| format!("Invalid registrations file {}", path.display()))?;

    let count = entries.len();
    for entry in entries {
        registry
            .register(&entry.path, entry.event_kinds, entry.labels)
            .with_context(|| format!("Failed to register '{}'", entry.path))?;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[("RELAY_PUBSUB_PROJECT", "gatrabali")]).unwrap();

        assert_eq!(config.listen_addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.topic, "FirestoreEvents");
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.max_total_wait, Duration::from_secs(30));
        assert_eq!(config.shutdown_grace, Duration::from_secs(10));
        match config.bus {
            BusConfig::PubSub(pubsub) => {
                assert_eq!(pubsub.project, "gatrabali");
                assert_eq!(pubsub.base_url, "https://pubsub.googleapis.com");
                assert!(pubsub.token.is_none());
            }
            BusConfig::Log => panic!("expected pubsub bus"),
        }
    }

    #[test]
    fn test_pubsub_requires_project() {
        assert!(config(&[]).is_err());
        assert!(matches!(config(&[("RELAY_BUS", "log")]).unwrap().bus, BusConfig::Log));
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(config(&[("RELAY_BUS", "kafka")]).is_err());
        assert!(config(&[("RELAY_BUS", "log"), ("RELAY_PUBLISH_MAX_RETRIES", "many")]).is_err());
        assert!(config(&[("RELAY_BUS", "log"), ("RELAY_LISTEN_ADDR", "nowhere")]).is_err());
        assert!(config(&[
            ("RELAY_BUS", "log"),
            ("RELAY_BACKOFF_BASE_MS", "9000"),
            ("RELAY_BACKOFF_MAX_MS", "100"),
        ])
        .is_err());
        assert!(config(&[("RELAY_BUS", "log"), ("RELAY_PUBLISH_ATTEMPT_TIMEOUT_MS", "0")]).is_err());
    }

    #[test]
    fn test_parse_registrations() {
        let parsed = parse_registrations(
            r#"
            [[registration]]
            path = "/entries/{entryId}"
            trigger = "on_create"
            labels = { type = "entries" }

            [[registration]]
            path = "/entry_responses/{entryId}"
            trigger = "on_write"
            labels = { type = "responses" }

            [[registration]]
            path = "/drafts/{id}"
            events = ["updated"]
            "#,
        )
        .unwrap();

        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[0].event_kinds, EventKinds::from([EventKind::Created]));
        assert_eq!(parsed[0].labels["type"], "entries");
        assert_eq!(
            parsed[1].event_kinds,
            EventKinds::from([EventKind::Created, EventKind::Updated])
        );
        assert_eq!(parsed[2].event_kinds, EventKinds::from([EventKind::Updated]));
        assert!(parsed[2].labels.is_empty());
    }

    #[test]
    fn test_registration_needs_exactly_one_kind_source() {
        assert!(parse_registrations("[[registration]]\npath = \"/a/{id}\"\n").is_err());
        assert!(parse_registrations(
            "[[registration]]\npath = \"/a/{id}\"\ntrigger = \"on_create\"\nevents = [\"created\"]\n"
        )
        .is_err());
        assert!(parse_registrations(
            "[[registration]]\npath = \"/a/{id}\"\ntrigger = \"on_delete\"\n"
        )
        .is_err());
    }

    #[test]
    fn test_shipped_registrations_load() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/registrations.toml");
        let registry = WatchRegistry::new();

        let count = load_registrations(&path, &registry).unwrap();

        assert_eq!(count, 5);
        assert_eq!(registry.len(), 5);
        let responses = registry.resolve("/entry_responses/e1").unwrap();
        assert_eq!(responses.label_metadata()["type"], "responses");
        assert!(responses.watches(EventKind::Updated));
        assert!(!registry.resolve("/kriminal/e1").unwrap().watches(EventKind::Updated));
    }
}
