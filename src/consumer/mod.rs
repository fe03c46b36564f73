//! Stream consumption: the poll loop and its stream backends.

pub mod backoff;
pub mod jetstream;
pub mod source;
pub mod stream_consumer;

pub use backoff::PollBackoff;
pub use jetstream::JetStreamSource;
pub use source::{EventSource, StreamMessage};
pub use stream_consumer::StreamConsumer;
