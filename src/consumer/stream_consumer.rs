//! The relay's poll loop.
//!
//! Fetch a batch → process every entry → acknowledge → repeat. An empty
//! fetch sleeps for the current backoff delay, which doubles up to the
//! configured maximum and resets after the next non-empty fetch.
//!
//! Shutdown is only observed around the fetch and the idle sleep, so a batch
//! that is already being processed (HTTP calls and 429 sleeps included) runs
//! to completion and is acknowledged before the source is drained.

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::consumer::backoff::PollBackoff;
use crate::consumer::source::{EventSource, StreamMessage};
use crate::error::Result;
use crate::pipeline::processor::{EventOutcome, EventProcessor};
use crate::pipeline::types::InboundEvent;

/// Single sequential worker over an `EventSource`.
pub struct StreamConsumer<S> {
    source: S,
    processor: EventProcessor,
    backoff: PollBackoff,
    redeliver_failed: bool,
}

impl<S: EventSource> StreamConsumer<S> {
    pub fn new(source: S, processor: EventProcessor, backoff: PollBackoff) -> Self {
        Self {
            source,
            processor,
            backoff,
            redeliver_failed: false,
        }
    }

    /// Nak instead of ack entries whose deliveries failed permanently.
    pub fn with_redeliver_failed(mut self, redeliver_failed: bool) -> Self {
        self.redeliver_failed = redeliver_failed;
        self
    }

    pub fn backoff(&self) -> &PollBackoff {
        &self.backoff
    }

    /// Run until `shutdown` is cancelled or a fatal error occurs, then drain
    /// the source. A fatal error is returned after draining.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<()> {
        info!("Starting consumer loop");

        let result = self.poll_loop(&shutdown).await;
        if let Err(e) = &result {
            error!(error = %e, "Consumer loop stopped on fatal error");
        }

        info!("Draining stream connection");
        let drained = self.source.drain().await;

        result?;
        drained?;
        info!("Consumer stopped gracefully");
        Ok(())
    }

    async fn poll_loop(&mut self, shutdown: &CancellationToken) -> Result<()> {
        loop {
            let batch = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Received shutdown signal, stopping consumer");
                    return Ok(());
                }
                batch = self.source.fetch() => batch?,
            };

            if batch.is_empty() {
                let delay = self.backoff.next_delay();
                debug!(delay_ms = delay.as_millis() as u64, "No messages, backing off");
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => {
                        info!("Received shutdown signal while idle, stopping consumer");
                        return Ok(());
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
                continue;
            }

            self.process_batch(&batch).await?;
            self.backoff.reset();
        }
    }

    /// Process every entry, then settle each one. Nothing is acknowledged if
    /// an entry fails to decode.
    async fn process_batch(&self, batch: &[Box<dyn StreamMessage>]) -> Result<()> {
        debug!(message_count = batch.len(), "Received message batch");

        let mut outcomes: Vec<EventOutcome> = Vec::with_capacity(batch.len());
        for message in batch {
            let event = InboundEvent::from_stream(message.subject(), message.payload())?;
            outcomes.push(self.processor.process_event(&event).await?);
        }

        for (message, outcome) in batch.iter().zip(&outcomes) {
            self.settle(message.as_ref(), outcome).await;
        }
        Ok(())
    }

    async fn settle(&self, message: &dyn StreamMessage, outcome: &EventOutcome) {
        let subject = message.subject();

        if outcome.has_failures() && self.redeliver_failed {
            warn!(
                subject = %subject,
                failed = outcome.failed,
                "Rejecting message for redelivery"
            );
            if let Err(e) = message.nak().await {
                error!(error = %e, "Failed to reject message");
            }
            return;
        }

        if outcome.has_failures() {
            error!(
                subject = %subject,
                failed = outcome.failed,
                "Acknowledging message with failed deliveries; they will not be retried"
            );
        }
        if let Err(e) = message.ack().await {
            error!(error = %e, "Failed to acknowledge message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use std::result::Result;

    use async_trait::async_trait;

    use crate::delivery::client::DEFAULT_REQUEST_TIMEOUT;
    use crate::delivery::{DeliveryClient, RetryPolicy};
    use crate::error::StreamError;
    use crate::pipeline::classifier::{MessageClassifier, PayloadSchema, Profile};
    use crate::pipeline::transform::{ArchiveTemplate, ForwardTemplate, PayloadTransformer};
    use crate::routing::AccountRouter;

    type Journal = Arc<Mutex<Vec<&'static str>>>;

    struct JournalMessage {
        journal: Journal,
    }

    #[async_trait]
    impl StreamMessage for JournalMessage {
        fn subject(&self) -> &str {
            "events.ncbaileys.5511"
        }

        fn payload(&self) -> &[u8] {
            br#"{"messages": [{"key": {"remoteJid": "1@s.whatsapp.net", "id": "A"},
                 "message": {"conversation": "hi"}}]}"#
        }

        async fn ack(&self) -> Result<(), StreamError> {
            self.journal.lock().unwrap().push("ack");
            Ok(())
        }

        async fn nak(&self) -> Result<(), StreamError> {
            self.journal.lock().unwrap().push("nak");
            Ok(())
        }
    }

    /// Hands out `script` one fetch at a time (`n` messages per fetch) and
    /// cancels `shutdown` while returning the last entry.
    struct ScriptedSource {
        script: Mutex<VecDeque<usize>>,
        journal: Journal,
        shutdown: CancellationToken,
    }

    #[async_trait]
    impl EventSource for ScriptedSource {
        async fn fetch(&self) -> Result<Vec<Box<dyn StreamMessage>>, StreamError> {
            let mut script = self.script.lock().unwrap();
            let count = script.pop_front().unwrap_or(0);
            if script.is_empty() {
                self.shutdown.cancel();
            }
            self.journal.lock().unwrap().push("fetch");
            Ok((0..count)
                .map(|_| {
                    Box::new(JournalMessage {
                        journal: Arc::clone(&self.journal),
                    }) as Box<dyn StreamMessage>
                })
                .collect())
        }

        async fn drain(&self) -> Result<(), StreamError> {
            self.journal.lock().unwrap().push("drain");
            Ok(())
        }
    }

    fn processor() -> EventProcessor {
        // No routes: every event is skipped without any HTTP call.
        EventProcessor::new(
            AccountRouter::default(),
            MessageClassifier::new(Profile::full()),
            PayloadTransformer::new(
                ForwardTemplate::default(),
                ArchiveTemplate::default(),
                PayloadSchema::Envelope,
            ),
            DeliveryClient::new(RetryPolicy::default(), DEFAULT_REQUEST_TIMEOUT).unwrap(),
        )
    }

    async fn run_script(script: &[usize]) -> (StreamConsumer<ScriptedSource>, Vec<&'static str>) {
        let shutdown = CancellationToken::new();
        let journal: Journal = Arc::new(Mutex::new(Vec::new()));
        let source = ScriptedSource {
            script: Mutex::new(script.iter().copied().collect()),
            journal: Arc::clone(&journal),
            shutdown: shutdown.clone(),
        };
        let mut consumer = StreamConsumer::new(
            source,
            processor(),
            PollBackoff::new(Duration::from_millis(1), Duration::from_millis(16)),
        );

        tokio::time::timeout(Duration::from_secs(5), consumer.run(shutdown))
            .await
            .expect("consumer loop hung")
            .unwrap();

        let entries = journal.lock().unwrap().clone();
        (consumer, entries)
    }

    #[tokio::test]
    async fn batch_in_flight_at_shutdown_is_acked_before_drain() {
        let (_, journal) = run_script(&[2]).await;
        assert_eq!(journal, vec!["fetch", "ack", "ack", "drain"]);
    }

    #[tokio::test]
    async fn empty_fetches_grow_the_delay() {
        let (consumer, journal) = run_script(&[0, 0]).await;
        assert_eq!(journal, vec!["fetch", "fetch", "drain"]);
        assert_eq!(consumer.backoff().current(), Duration::from_millis(4));
    }

    #[tokio::test]
    async fn non_empty_fetch_resets_the_delay() {
        let (consumer, journal) = run_script(&[0, 0, 1]).await;
        assert_eq!(journal, vec!["fetch", "fetch", "fetch", "ack", "drain"]);
        assert_eq!(consumer.backoff().current(), Duration::from_millis(1));
    }
}
