//! Event processor: runs every message of an inbound event through
//! classify → route → transform → deliver.
//!
//! Delivery failures are logged and counted; they never abort the event.
//! Only a payload that cannot be decoded is reported as an error, and the
//! consumer treats that as fatal.

use serde::Serialize;
use tracing::{debug, error, info};

use crate::delivery::{DeliveryClient, DeliveryReceipt};
use crate::error::{DecodeError, DeliveryError};
use crate::pipeline::classifier::{
    ChatContext, Classification, MessageClassifier, Route, SkipReason,
};
use crate::pipeline::transform::{PayloadTransformer, RouteContext};
use crate::pipeline::types::{InboundEvent, MessageVariant, SourceMessage};
use crate::routing::{AccountRouter, WebhookDestination};

/// What happened to a single source message.
#[derive(Debug)]
pub enum MessageOutcome {
    Skipped(SkipReason),
    Forwarded(DeliveryReceipt),
    Archived(DeliveryReceipt),
    Failed { route: Route, error: DeliveryError },
}

/// Per-event tally of message outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventOutcome {
    pub forwarded: usize,
    pub archived: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl EventOutcome {
    fn record(&mut self, outcome: &MessageOutcome) {
        match outcome {
            MessageOutcome::Skipped(_) => self.skipped += 1,
            MessageOutcome::Forwarded(_) => self.forwarded += 1,
            MessageOutcome::Archived(_) => self.archived += 1,
            MessageOutcome::Failed { .. } => self.failed += 1,
        }
    }

    /// Whether any delivery in the event failed permanently.
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

/// Processes inbound events. Read-only after construction.
pub struct EventProcessor {
    router: AccountRouter,
    classifier: MessageClassifier,
    transformer: PayloadTransformer,
    delivery: DeliveryClient,
}

impl EventProcessor {
    pub fn new(
        router: AccountRouter,
        classifier: MessageClassifier,
        transformer: PayloadTransformer,
        delivery: DeliveryClient,
    ) -> Self {
        Self {
            router,
            classifier,
            transformer,
            delivery,
        }
    }

    /// Process every message in the event, in order. An account with no
    /// forward webhook has its whole event skipped, archive path included.
    pub async fn process_event(&self, event: &InboundEvent) -> Result<EventOutcome, DecodeError> {
        let messages = event.decode_messages()?;
        let mut outcome = EventOutcome::default();

        let Some(forward) = self.router.resolve_forward(&event.account_id) else {
            info!(
                account = %event.account_id,
                subject = %event.subject,
                messages = messages.len(),
                "No webhook configured for account, skipping event"
            );
            outcome.skipped = messages.len();
            return Ok(outcome);
        };

        for message in &messages {
            debug!(account = %event.account_id, message = ?message, "Source message");
            let result = self
                .process_message(&event.account_id, forward, message)
                .await;
            outcome.record(&result);
        }

        debug!(
            subject = %event.subject,
            forwarded = outcome.forwarded,
            archived = outcome.archived,
            skipped = outcome.skipped,
            failed = outcome.failed,
            "Event processed"
        );
        Ok(outcome)
    }

    async fn process_message(
        &self,
        account_id: &str,
        forward: &WebhookDestination,
        message: &SourceMessage,
    ) -> MessageOutcome {
        match self.classifier.classify(message) {
            Classification::Skip(reason) => skipped(account_id, message, reason),
            Classification::Deliver {
                route,
                variant,
                chat,
            } => {
                self.dispatch(account_id, forward, message, route, variant, &chat)
                    .await
            }
        }
    }

    /// Build and deliver the payload for an already classified message.
    async fn dispatch(
        &self,
        account_id: &str,
        forward: &WebhookDestination,
        message: &SourceMessage,
        route: Route,
        variant: &MessageVariant,
        chat: &ChatContext,
    ) -> MessageOutcome {
        let ctx = RouteContext::new(account_id, chat);
        let unsupported = SkipReason::Unsupported(variant.kind());

        match route {
            Route::Forward => {
                let Some(payload) = self.transformer.transform(message, variant, &ctx) else {
                    return skipped(account_id, message, unsupported);
                };
                self.deliver(route, account_id, message, forward, &payload)
                    .await
            }
            Route::Archive => {
                let Some(destination) = self.router.resolve_archive(account_id) else {
                    return skipped(account_id, message, SkipReason::NoDestination);
                };
                let Some(payload) = self.transformer.transform_archive(message, variant, &ctx)
                else {
                    return skipped(account_id, message, unsupported);
                };
                self.deliver(route, account_id, message, destination, &payload)
                    .await
            }
        }
    }

    async fn deliver<P: Serialize>(
        &self,
        route: Route,
        account_id: &str,
        message: &SourceMessage,
        destination: &WebhookDestination,
        payload: &P,
    ) -> MessageOutcome {
        match self.delivery.deliver(destination, payload).await {
            Ok(receipt) => {
                info!(
                    account = %account_id,
                    id = %message.id,
                    route = ?route,
                    status = receipt.status,
                    retries = receipt.retries,
                    response = %receipt.body,
                    "Message delivered"
                );
                match route {
                    Route::Forward => MessageOutcome::Forwarded(receipt),
                    Route::Archive => MessageOutcome::Archived(receipt),
                }
            }
            Err(e) => {
                error!(
                    account = %account_id,
                    id = %message.id,
                    route = ?route,
                    url = %destination.url,
                    error = %e,
                    "Delivery failed"
                );
                MessageOutcome::Failed { route, error: e }
            }
        }
    }
}

fn skipped(account_id: &str, message: &SourceMessage, reason: SkipReason) -> MessageOutcome {
    info!(
        account = %account_id,
        id = %message.id,
        reason = reason.label(),
        "Skipping message"
    );
    MessageOutcome::Skipped(reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::RetryPolicy;
    use crate::delivery::client::DEFAULT_REQUEST_TIMEOUT;
    use crate::pipeline::classifier::Profile;
    use crate::pipeline::transform::{ArchiveTemplate, ForwardTemplate};
    use crate::pipeline::types::VariantKind;
    use crate::routing::RoutingTable;
    use serde_json::{Value, json};
    use std::time::Duration;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ACCOUNT: &str = "5511";

    fn processor(forward: RoutingTable, archive: RoutingTable) -> EventProcessor {
        EventProcessor::new(
            AccountRouter::new(forward, archive),
            MessageClassifier::new(Profile::full()),
            PayloadTransformer::new(
                ForwardTemplate::default(),
                ArchiveTemplate::default(),
                Profile::full().schema,
            ),
            DeliveryClient::new(
                RetryPolicy {
                    base_delay: Duration::from_millis(1),
                    max_attempts: 2,
                },
                DEFAULT_REQUEST_TIMEOUT,
            )
            .unwrap(),
        )
    }

    fn table(url: &str, secret: Option<&str>) -> RoutingTable {
        let mut destination = WebhookDestination::new(url);
        if let Some(secret) = secret {
            destination = destination.with_secret(secret);
        }
        let mut table = RoutingTable::default();
        table.insert(ACCOUNT, destination);
        table
    }

    fn message(jid: &str, from_me: bool, body: MessageVariant) -> SourceMessage {
        SourceMessage {
            remote_jid: jid.into(),
            from_me,
            id: "MSG1".into(),
            push_name: "Alice".into(),
            participant: None,
            group_subject: None,
            timestamp: "1700000000".into(),
            status: None,
            body: Some(body),
        }
    }

    fn text(body: &str) -> MessageVariant {
        MessageVariant::Text { body: body.into() }
    }

    fn wire_text(jid: &str, from_me: bool, body: &str) -> Value {
        json!({
            "key": { "remoteJid": jid, "fromMe": from_me, "id": "W1" },
            "message": { "conversation": body }
        })
    }

    fn event(messages: Vec<Value>) -> InboundEvent {
        let payload = json!({ "messages": messages }).to_string();
        InboundEvent::from_stream("events.ncbaileys.5511", payload.as_bytes()).unwrap()
    }

    #[tokio::test]
    async fn self_sent_without_archive_route_is_skipped() {
        let p = processor(table("http://127.0.0.1:1/hook", Some("s")), RoutingTable::default());
        let forward = WebhookDestination::new("http://127.0.0.1:1/hook").with_secret("s");
        let msg = message("1234@s.whatsapp.net", true, text("sent"));

        let outcome = p.process_message(ACCOUNT, &forward, &msg).await;
        assert!(matches!(
            outcome,
            MessageOutcome::Skipped(SkipReason::NoDestination)
        ));
    }

    #[tokio::test]
    async fn variant_without_payload_is_skipped_as_unsupported() {
        let p = processor(table("http://127.0.0.1:1/hook", Some("s")), RoutingTable::default());
        let forward = WebhookDestination::new("http://127.0.0.1:1/hook").with_secret("s");
        let msg = message("1234@s.whatsapp.net", false, MessageVariant::Unknown);
        let chat = ChatContext::from_jid(&msg.remote_jid);

        let outcome = p
            .dispatch(ACCOUNT, &forward, &msg, Route::Forward, &MessageVariant::Unknown, &chat)
            .await;
        assert!(matches!(
            outcome,
            MessageOutcome::Skipped(SkipReason::Unsupported(VariantKind::Unknown))
        ));
    }

    #[tokio::test]
    async fn account_without_forward_route_skips_archive_too() {
        let archive = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&archive)
            .await;

        let p = processor(RoutingTable::default(), table(&archive.uri(), None));
        let outcome = p
            .process_event(&event(vec![
                wire_text("1234@s.whatsapp.net", true, "mine"),
                wire_text("1234@s.whatsapp.net", false, "theirs"),
            ]))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            EventOutcome {
                skipped: 2,
                ..EventOutcome::default()
            }
        );
    }

    #[tokio::test]
    async fn mixed_event_is_tallied_per_message() {
        let forward = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .up_to_n_times(1)
            .expect(1)
            .mount(&forward)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&forward)
            .await;

        let archive = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&archive)
            .await;

        let p = processor(
            table(&forward.uri(), Some("s")),
            table(&archive.uri(), None),
        );
        let outcome = p
            .process_event(&event(vec![
                wire_text("1234@s.whatsapp.net", false, "first"),
                wire_text("1234@s.whatsapp.net", true, "reply"),
                wire_text("status@broadcast", false, "story"),
                wire_text("1234@s.whatsapp.net", false, "second"),
            ]))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            EventOutcome {
                forwarded: 1,
                archived: 1,
                skipped: 1,
                failed: 1,
            }
        );
        assert!(outcome.has_failures());
    }

    #[tokio::test]
    async fn undecodable_event_is_an_error() {
        let p = processor(table("http://127.0.0.1:1/hook", Some("s")), RoutingTable::default());
        let event = InboundEvent::from_stream("events.ncbaileys.5511", b"{\"messages\": 3}").unwrap();
        assert!(matches!(
            p.process_event(&event).await,
            Err(DecodeError::Payload { .. })
        ));
    }
}
