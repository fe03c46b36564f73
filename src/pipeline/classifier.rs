//! Per-message skip / archive / forward decision.
//!
//! Rules are applied in a fixed order; the first matching skip rule wins.
//! A message that survives every rule is routed by its `fromMe` flag.

use tracing::{debug, info};

use crate::pipeline::types::{
    DIRECT_CHAT_SUFFIX, MessageVariant, STATUS_BROADCAST_JID, SourceMessage, VariantKind,
    strip_direct_suffix,
};

/// Shape of the forward payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadSchema {
    /// Full business-account webhook envelope (`object` / `entry` / `changes`).
    Envelope,
    /// Only the inner change value (`metadata` / `contacts` / `messages`).
    Value,
}

/// Deployment capability set: which variants are relayed, whether self-sent
/// messages are archived, and which forward schema is produced.
#[derive(Debug, Clone)]
pub struct Profile {
    pub name: String,
    pub supported: Vec<VariantKind>,
    pub archive_enabled: bool,
    pub schema: PayloadSchema,
}

impl Profile {
    /// Every supported variant, archiving on.
    pub fn full() -> Self {
        Self {
            name: "full".into(),
            supported: vec![
                VariantKind::Text,
                VariantKind::ExtendedText,
                VariantKind::Location,
                VariantKind::Contact,
                VariantKind::Image,
                VariantKind::Video,
                VariantKind::Document,
            ],
            archive_enabled: true,
            schema: PayloadSchema::Envelope,
        }
    }

    /// Plain text and images only; self-sent messages are dropped.
    pub fn minimal() -> Self {
        Self {
            name: "minimal".into(),
            supported: vec![VariantKind::Text, VariantKind::Image],
            archive_enabled: false,
            schema: PayloadSchema::Envelope,
        }
    }

    pub fn with_schema(mut self, schema: PayloadSchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn supports(&self, kind: VariantKind) -> bool {
        kind != VariantKind::Unknown && self.supported.contains(&kind)
    }
}

/// Why a message was not delivered anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    PendingEcho,
    StatusBroadcast,
    EmptyBody,
    Unsupported(VariantKind),
    SelfSentNotArchived,
    NoDestination,
}

impl SkipReason {
    pub fn label(&self) -> &'static str {
        match self {
            Self::PendingEcho => "pending self echo",
            Self::StatusBroadcast => "status broadcast",
            Self::EmptyBody => "empty body",
            Self::Unsupported(_) => "unsupported message",
            Self::SelfSentNotArchived => "self-sent message, archiving disabled",
            Self::NoDestination => "no destination configured",
        }
    }
}

/// Delivery path for a message that was not skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Forward,
    Archive,
}

/// Conversation facts derived from the remote jid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatContext {
    pub wa_id: String,
    pub is_group: bool,
}

impl ChatContext {
    pub fn from_jid(remote_jid: &str) -> Self {
        let is_group = !remote_jid.ends_with(DIRECT_CHAT_SUFFIX);
        let wa_id = if is_group {
            remote_jid.to_string()
        } else {
            strip_direct_suffix(remote_jid).to_string()
        };
        Self { wa_id, is_group }
    }
}

/// Outcome of classifying one message.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification<'a> {
    Skip(SkipReason),
    Deliver {
        route: Route,
        variant: &'a MessageVariant,
        chat: ChatContext,
    },
}

/// Applies the skip rules of the active profile.
#[derive(Debug, Clone)]
pub struct MessageClassifier {
    profile: Profile,
}

impl MessageClassifier {
    pub fn new(profile: Profile) -> Self {
        Self { profile }
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn classify<'a>(&self, message: &'a SourceMessage) -> Classification<'a> {
        if message.is_pending_echo() {
            return Classification::Skip(SkipReason::PendingEcho);
        }

        if message.remote_jid == STATUS_BROADCAST_JID {
            return Classification::Skip(SkipReason::StatusBroadcast);
        }

        let Some(variant) = message.body.as_ref() else {
            return Classification::Skip(SkipReason::EmptyBody);
        };

        let kind = variant.kind();
        if !self.profile.supports(kind) {
            info!(
                id = %message.id,
                kind = kind.label(),
                profile = %self.profile.name,
                "Unsupported message"
            );
            return Classification::Skip(SkipReason::Unsupported(kind));
        }

        let chat = ChatContext::from_jid(&message.remote_jid);

        let route = if message.from_me {
            if !self.profile.archive_enabled {
                return Classification::Skip(SkipReason::SelfSentNotArchived);
            }
            Route::Archive
        } else {
            Route::Forward
        };

        debug!(
            id = %message.id,
            kind = kind.label(),
            route = ?route,
            is_group = chat.is_group,
            "Message classified"
        );

        Classification::Deliver {
            route,
            variant,
            chat,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{Media, MessageStatus};

    fn make_message(remote_jid: &str, from_me: bool, body: Option<MessageVariant>) -> SourceMessage {
        SourceMessage {
            remote_jid: remote_jid.into(),
            from_me,
            id: "MSG1".into(),
            push_name: "Alice".into(),
            participant: None,
            group_subject: None,
            timestamp: "1700000000".into(),
            status: None,
            body,
        }
    }

    fn text(body: &str) -> Option<MessageVariant> {
        Some(MessageVariant::Text { body: body.into() })
    }

    fn video() -> Option<MessageVariant> {
        Some(MessageVariant::Video(Media {
            mime_type: "video/mp4".into(),
            sha256: "abc".into(),
            id: "v1".into(),
            caption: None,
            quoted: None,
        }))
    }

    #[test]
    fn forwards_incoming_direct_text() {
        let classifier = MessageClassifier::new(Profile::full());
        let msg = make_message("1234@s.whatsapp.net", false, text("hi"));
        match classifier.classify(&msg) {
            Classification::Deliver { route, chat, .. } => {
                assert_eq!(route, Route::Forward);
                assert_eq!(chat.wa_id, "1234");
                assert!(!chat.is_group);
            }
            other => panic!("expected delivery, got {other:?}"),
        }
    }

    #[test]
    fn skips_pending_self_echo() {
        let classifier = MessageClassifier::new(Profile::full());
        let mut msg = make_message("1234@s.whatsapp.net", true, text("hi"));
        msg.status = Some(MessageStatus::Pending);
        assert_eq!(
            classifier.classify(&msg),
            Classification::Skip(SkipReason::PendingEcho)
        );
    }

    #[test]
    fn pending_status_on_incoming_message_is_not_skipped() {
        let classifier = MessageClassifier::new(Profile::full());
        let mut msg = make_message("1234@s.whatsapp.net", false, text("hi"));
        msg.status = Some(MessageStatus::Pending);
        assert!(matches!(
            classifier.classify(&msg),
            Classification::Deliver { .. }
        ));
    }

    #[test]
    fn skips_status_broadcast_regardless_of_content() {
        let classifier = MessageClassifier::new(Profile::full());
        for from_me in [false, true] {
            let msg = make_message("status@broadcast", from_me, text("story"));
            assert_eq!(
                classifier.classify(&msg),
                Classification::Skip(SkipReason::StatusBroadcast)
            );
        }
    }

    #[test]
    fn skips_missing_body() {
        let classifier = MessageClassifier::new(Profile::full());
        let msg = make_message("1234@s.whatsapp.net", false, None);
        assert_eq!(
            classifier.classify(&msg),
            Classification::Skip(SkipReason::EmptyBody)
        );
    }

    #[test]
    fn unknown_is_never_supported() {
        let classifier = MessageClassifier::new(Profile::full());
        let msg = make_message("1234@s.whatsapp.net", false, Some(MessageVariant::Unknown));
        assert_eq!(
            classifier.classify(&msg),
            Classification::Skip(SkipReason::Unsupported(VariantKind::Unknown))
        );
    }

    #[test]
    fn minimal_profile_rejects_video() {
        let classifier = MessageClassifier::new(Profile::minimal());
        let msg = make_message("1234@s.whatsapp.net", false, video());
        assert_eq!(
            classifier.classify(&msg),
            Classification::Skip(SkipReason::Unsupported(VariantKind::Video))
        );
    }

    #[test]
    fn self_sent_goes_to_archive() {
        let classifier = MessageClassifier::new(Profile::full());
        let msg = make_message("1234@s.whatsapp.net", true, text("sent by me"));
        assert!(matches!(
            classifier.classify(&msg),
            Classification::Deliver {
                route: Route::Archive,
                ..
            }
        ));
    }

    #[test]
    fn minimal_profile_drops_self_sent() {
        let classifier = MessageClassifier::new(Profile::minimal());
        let msg = make_message("1234@s.whatsapp.net", true, text("sent by me"));
        assert_eq!(
            classifier.classify(&msg),
            Classification::Skip(SkipReason::SelfSentNotArchived)
        );
    }

    #[test]
    fn group_jid_is_kept_verbatim() {
        let chat = ChatContext::from_jid("120363041234@g.us");
        assert!(chat.is_group);
        assert_eq!(chat.wa_id, "120363041234@g.us");
    }
}
