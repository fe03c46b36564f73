//! NATS JetStream backend for the consumer loop.

use async_nats::jetstream::{self, AckKind, consumer::PullConsumer};
use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::config::StreamConfig;
use crate::consumer::source::{EventSource, StreamMessage};
use crate::error::StreamError;

/// A fetched JetStream message.
struct JetStreamMessage(jetstream::Message);

#[async_trait]
impl StreamMessage for JetStreamMessage {
    fn subject(&self) -> &str {
        &self.0.message.subject
    }

    fn payload(&self) -> &[u8] {
        &self.0.message.payload
    }

    async fn ack(&self) -> Result<(), StreamError> {
        self.0.ack().await.map_err(|e| StreamError::Ack {
            subject: self.subject().to_string(),
            reason: e.to_string(),
        })
    }

    async fn nak(&self) -> Result<(), StreamError> {
        self.0
            .ack_with(AckKind::Nak(None))
            .await
            .map_err(|e| StreamError::Ack {
                subject: self.subject().to_string(),
                reason: e.to_string(),
            })
    }
}

/// Pull consumer bound to a durable JetStream consumer.
///
/// Owns the connection; `drain()` is the shutdown path.
pub struct JetStreamSource {
    client: async_nats::Client,
    consumer: PullConsumer,
    config: StreamConfig,
}

impl JetStreamSource {
    /// Connect and bind to the durable consumer. With `provision` set the
    /// consumer is created (explicit ack, filtered) if it does not exist.
    pub async fn connect(config: StreamConfig) -> Result<Self, StreamError> {
        let options = match config.token.as_deref() {
            Some(token) if !token.is_empty() => {
                async_nats::ConnectOptions::with_token(token.to_string())
            }
            _ => async_nats::ConnectOptions::new(),
        };

        let client = options
            .connect(config.servers.as_str())
            .await
            .map_err(|e| StreamError::Connect {
                servers: config.servers.clone(),
                reason: e.to_string(),
            })?;

        let consumer_error = |reason: String| StreamError::Consumer {
            stream: config.stream.clone(),
            consumer: config.consumer.clone(),
            reason,
        };

        let context = jetstream::new(client.clone());
        let stream = context
            .get_stream(&config.stream)
            .await
            .map_err(|e| consumer_error(e.to_string()))?;

        let consumer: PullConsumer = if config.provision {
            debug!(
                stream = %config.stream,
                consumer = %config.consumer,
                subject = %config.filter_subject,
                "Provisioning durable consumer"
            );
            stream
                .get_or_create_consumer(
                    &config.consumer,
                    jetstream::consumer::pull::Config {
                        durable_name: Some(config.consumer.clone()),
                        filter_subject: config.filter_subject.clone(),
                        ack_policy: jetstream::consumer::AckPolicy::Explicit,
                        ..Default::default()
                    },
                )
                .await
                .map_err(|e| consumer_error(e.to_string()))?
        } else {
            stream
                .get_consumer(&config.consumer)
                .await
                .map_err(|e| consumer_error(e.to_string()))?
        };

        info!(
            stream = %config.stream,
            consumer = %config.consumer,
            "Bound to durable consumer"
        );

        Ok(Self {
            client,
            consumer,
            config,
        })
    }
}

#[async_trait]
impl EventSource for JetStreamSource {
    async fn fetch(&self) -> Result<Vec<Box<dyn StreamMessage>>, StreamError> {
        let mut batch = self
            .consumer
            .fetch()
            .max_messages(self.config.batch_size)
            .expires(self.config.fetch_expires)
            .messages()
            .await
            .map_err(|e| StreamError::Fetch(e.to_string()))?;

        let mut messages: Vec<Box<dyn StreamMessage>> = Vec::new();
        while let Some(result) = batch.next().await {
            match result {
                Ok(message) => messages.push(Box::new(JetStreamMessage(message))),
                Err(e) => warn!(error = %e, "Error receiving message from batch"),
            }
        }
        Ok(messages)
    }

    async fn drain(&self) -> Result<(), StreamError> {
        self.client
            .drain()
            .await
            .map_err(|e| StreamError::Drain(e.to_string()))
    }
}
