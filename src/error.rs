//! Error types for the relay.

/// Top-level error type for the relay worker.
///
/// Anything that reaches the consumer loop as an `Error` is fatal to the
/// loop; per-message delivery failures are handled inside the pipeline and
/// never surface here.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse {key} as JSON: {source}")]
    Json {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Durable stream errors.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("Failed to connect to {servers}: {reason}")]
    Connect { servers: String, reason: String },

    #[error("Consumer {consumer} on stream {stream} unavailable: {reason}")]
    Consumer {
        stream: String,
        consumer: String,
        reason: String,
    },

    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Failed to acknowledge message on {subject}: {reason}")]
    Ack { subject: String, reason: String },

    #[error("Drain failed: {0}")]
    Drain(String),
}

/// Inbound event decoding errors.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Subject {0} does not carry an account id")]
    Subject(String),

    #[error("Malformed event payload on {subject}: {source}")]
    Payload {
        subject: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Outbound delivery errors.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Still rate limited after {attempts} attempts")]
    RateLimited { attempts: u32 },

    #[error("Webhook responded with HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("HTTP request failed: {0}")]
    Transport(String),

    #[error("Failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to sign payload: {0}")]
    Signing(String),
}

/// Result type alias for the relay.
pub type Result<T> = std::result::Result<T, Error>;
