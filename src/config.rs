//! Configuration types, loaded once from the environment at startup.
//!
//! Numeric settings fall back to their defaults when absent or unparseable.
//! Routing tables and templates are parsed eagerly; malformed JSON there is
//! a startup error.

use std::time::Duration;

use crate::delivery::RetryPolicy;
use crate::delivery::client::{DEFAULT_MAX_ATTEMPTS, DEFAULT_REQUEST_TIMEOUT, DEFAULT_RETRY_BASE};
use crate::error::ConfigError;
use crate::pipeline::classifier::{PayloadSchema, Profile};
use crate::pipeline::transform::{ArchiveTemplate, ForwardTemplate};
use crate::routing::{AccountRouter, RoutingTable};

/// Durable stream connection settings.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Comma-separated server list.
    pub servers: String,
    pub token: Option<String>,
    pub stream: String,
    pub consumer: String,
    /// Subject filter applied when provisioning the consumer.
    pub filter_subject: String,
    /// Create the durable consumer at startup instead of assuming it exists.
    pub provision: bool,
    pub batch_size: usize,
    pub fetch_expires: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            servers: "nats://localhost:4222".to_string(),
            token: None,
            stream: "EVENTS".to_string(),
            consumer: "ncbaileys_processor".to_string(),
            filter_subject: "events.ncbaileys.>".to_string(),
            provision: false,
            batch_size: 1,
            fetch_expires: Duration::from_millis(1000),
        }
    }
}

/// Full relay configuration.
#[derive(Debug)]
pub struct RelayConfig {
    pub stream: StreamConfig,
    pub min_backoff_secs: u64,
    pub max_backoff_secs: u64,
    pub retry: RetryPolicy,
    /// Per-request webhook timeout.
    pub request_timeout: Duration,
    pub profile: Profile,
    pub forward_routes: RoutingTable,
    pub archive_routes: RoutingTable,
    pub forward_template: ForwardTemplate,
    pub archive_template: ArchiveTemplate,
    /// Nak stream messages whose deliveries failed instead of acking them.
    pub redeliver_failed: bool,
}

impl RelayConfig {
    /// Load from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = StreamConfig::default();
        let text = |key: &str, default: String| lookup(key).unwrap_or(default);
        let number = |key: &str, default: u64| -> u64 {
            lookup(key)
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(default)
        };
        let flag = |key: &str| {
            lookup(key)
                .map(|s| matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false)
        };

        let stream = StreamConfig {
            servers: text("NATS_SERVERS", defaults.servers),
            token: lookup("NATS_TOKEN").filter(|token| !token.is_empty()),
            stream: text("NATS_STREAM", defaults.stream),
            consumer: text("NATS_CONSUMER", defaults.consumer),
            filter_subject: text("NATS_FILTER_SUBJECT", defaults.filter_subject),
            provision: flag("NATS_PROVISION_CONSUMER"),
            batch_size: number("FETCH_BATCH_SIZE", defaults.batch_size as u64).max(1) as usize,
            fetch_expires: Duration::from_millis(number(
                "FETCH_EXPIRES_MS",
                defaults.fetch_expires.as_millis() as u64,
            )),
        };

        let retry = RetryPolicy {
            base_delay: Duration::from_millis(number(
                "DELIVERY_RETRY_BASE_MS",
                DEFAULT_RETRY_BASE.as_millis() as u64,
            )),
            max_attempts: number("DELIVERY_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS as u64)
                .clamp(1, u32::MAX as u64) as u32,
        };

        let profile = parse_profile(lookup("RELAY_PROFILE").as_deref())?
            .with_schema(parse_schema(lookup("RELAY_PAYLOAD_SCHEMA").as_deref())?);

        let forward_routes = RoutingTable::forward_from_json(
            "WABA_WEBHOOK_CONFIG",
            &text("WABA_WEBHOOK_CONFIG", "{}".into()),
        )?;
        let archive_routes = RoutingTable::from_json(
            "ARCHIVE_WEBHOOK_CONFIG",
            &text("ARCHIVE_WEBHOOK_CONFIG", "{}".into()),
        )?;
        let forward_template = ForwardTemplate::from_json(
            "WABA_MESSAGE_TEMPLATE",
            &text("WABA_MESSAGE_TEMPLATE", String::new()),
        )?;
        let archive_template = ArchiveTemplate::from_json(
            "ARCHIVE_MESSAGE_TEMPLATE",
            &text("ARCHIVE_MESSAGE_TEMPLATE", String::new()),
        )?;

        Ok(Self {
            stream,
            min_backoff_secs: number("MIN_BACKOFF_DELAY_SECONDS", 1),
            max_backoff_secs: number("MAX_BACKOFF_DELAY_SECONDS", 8),
            retry,
            request_timeout: Duration::from_millis(
                number("DELIVERY_TIMEOUT_MS", DEFAULT_REQUEST_TIMEOUT.as_millis() as u64).max(1),
            ),
            profile,
            forward_routes,
            archive_routes,
            forward_template,
            archive_template,
            redeliver_failed: flag("RELAY_REDELIVER_FAILED"),
        })
    }

    /// Move the routing tables into a router.
    pub fn take_router(&mut self) -> AccountRouter {
        AccountRouter::new(
            std::mem::take(&mut self.forward_routes),
            std::mem::take(&mut self.archive_routes),
        )
    }
}

fn parse_profile(raw: Option<&str>) -> Result<Profile, ConfigError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(Profile::full()),
        Some(name) if name.eq_ignore_ascii_case("full") => Ok(Profile::full()),
        Some(name) if name.eq_ignore_ascii_case("minimal") => Ok(Profile::minimal()),
        Some(other) => Err(ConfigError::InvalidValue {
            key: "RELAY_PROFILE".into(),
            message: format!("unknown profile '{other}' (expected full or minimal)"),
        }),
    }
}

fn parse_schema(raw: Option<&str>) -> Result<PayloadSchema, ConfigError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(PayloadSchema::Envelope),
        Some(name) if name.eq_ignore_ascii_case("envelope") => Ok(PayloadSchema::Envelope),
        Some(name) if name.eq_ignore_ascii_case("value") => Ok(PayloadSchema::Value),
        Some(other) => Err(ConfigError::InvalidValue {
            key: "RELAY_PAYLOAD_SCHEMA".into(),
            message: format!("unknown schema '{other}' (expected envelope or value)"),
        }),
    }
}
