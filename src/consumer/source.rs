//! Durable stream abstraction.
//!
//! The consumer loop only needs to fetch a bounded batch, acknowledge or
//! reject each entry, and drain the connection on shutdown.

use async_trait::async_trait;

use crate::error::StreamError;

/// One entry fetched from the stream.
#[async_trait]
pub trait StreamMessage: Send + Sync {
    fn subject(&self) -> &str;

    fn payload(&self) -> &[u8];

    /// Acknowledge; the entry will not be redelivered.
    async fn ack(&self) -> Result<(), StreamError>;

    /// Reject; the entry will be redelivered.
    async fn nak(&self) -> Result<(), StreamError>;
}

/// A pull-based, acknowledgable event stream.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Fetch up to one batch, waiting at most the configured expiry.
    /// An empty batch means the stream was idle.
    async fn fetch(&self) -> Result<Vec<Box<dyn StreamMessage>>, StreamError>;

    /// Stop pulling and close the connection once pending acks are flushed.
    async fn drain(&self) -> Result<(), StreamError>;
}
