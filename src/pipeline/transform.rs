//! Chat message → outbound payload mapping.
//!
//! Every payload is built from typed fields on each call; templates only
//! contribute static strings. `transform` and `transform_archive` are pure:
//! the same inputs always serialize to the same bytes.

use serde::Serialize;
use serde_json::Value;

use crate::error::ConfigError;
use crate::pipeline::classifier::{ChatContext, PayloadSchema};
use crate::pipeline::types::{Media, MessageVariant, QuotedRef, SourceMessage, strip_direct_suffix};
use crate::pipeline::vcard;

// ── Templates ───────────────────────────────────────────────────────

/// Static fields of the forward webhook envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardTemplate {
    pub object: String,
    pub field: String,
    pub messaging_product: String,
}

impl Default for ForwardTemplate {
    fn default() -> Self {
        Self {
            object: "whatsapp_business_account".into(),
            field: "messages".into(),
            messaging_product: "whatsapp".into(),
        }
    }
}

impl ForwardTemplate {
    /// Read static fields from a full envelope template. An empty string
    /// yields the defaults; malformed JSON is an error.
    pub fn from_json(key: &str, raw: &str) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let Some(template) = parse_template(key, raw)? else {
            return Ok(defaults);
        };
        Ok(Self {
            object: pointer_or(&template, "/object", defaults.object),
            field: pointer_or(&template, "/entry/0/changes/0/field", defaults.field),
            messaging_product: pointer_or(
                &template,
                "/entry/0/changes/0/value/messaging_product",
                defaults.messaging_product,
            ),
        })
    }
}

/// Static fields of the archive payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveTemplate {
    pub messaging_product: String,
    pub recipient_type: String,
}

impl Default for ArchiveTemplate {
    fn default() -> Self {
        Self {
            messaging_product: "whatsapp".into(),
            recipient_type: "individual".into(),
        }
    }
}

impl ArchiveTemplate {
    pub fn from_json(key: &str, raw: &str) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let Some(template) = parse_template(key, raw)? else {
            return Ok(defaults);
        };
        Ok(Self {
            messaging_product: pointer_or(
                &template,
                "/messaging_product",
                defaults.messaging_product,
            ),
            recipient_type: pointer_or(&template, "/recipient_type", defaults.recipient_type),
        })
    }
}

fn parse_template(key: &str, raw: &str) -> Result<Option<Value>, ConfigError> {
    if raw.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(raw)
        .map(Some)
        .map_err(|source| ConfigError::Json {
            key: key.to_string(),
            source,
        })
}

fn pointer_or(template: &Value, pointer: &str, default: String) -> String {
    template
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or(default)
}

// ── Payload shapes ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<bool>,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationBody {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContactName {
    pub formatted_name: String,
    pub first_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContactPhone {
    pub phone: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub wa_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SharedContact {
    pub name: ContactName,
    pub phones: Vec<ContactPhone>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaBody {
    pub mime_type: String,
    pub sha256: String,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentBody {
    pub mime_type: String,
    pub sha256: String,
    pub id: String,
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

/// Per-variant part of a message, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    Text { text: TextBody },
    Location { location: LocationBody },
    Contacts { contacts: Vec<SharedContact> },
    Image { image: MediaBody },
    Video { video: MediaBody },
    Document { document: DocumentBody },
}

impl MessageContent {
    /// Map a variant to its payload part. Archive text bodies carry
    /// `preview_url: false`. `Unknown` has no payload.
    pub fn from_variant(variant: &MessageVariant, archive: bool) -> Option<Self> {
        let content = match variant {
            MessageVariant::Text { body } | MessageVariant::ExtendedText { body, .. } => {
                Self::Text {
                    text: TextBody {
                        preview_url: archive.then_some(false),
                        body: body.clone(),
                    },
                }
            }
            MessageVariant::Location {
                latitude,
                longitude,
                name,
                address,
                ..
            } => Self::Location {
                location: LocationBody {
                    latitude: *latitude,
                    longitude: *longitude,
                    name: name.clone(),
                    address: address.clone(),
                },
            },
            MessageVariant::Contact {
                display_name,
                vcard,
                ..
            } => {
                let card = vcard::parse(vcard);
                let formatted_name = if card.formatted_name.is_empty() {
                    display_name.clone().unwrap_or_default()
                } else {
                    card.formatted_name
                };
                Self::Contacts {
                    contacts: vec![SharedContact {
                        name: ContactName {
                            formatted_name,
                            first_name: card.first_name,
                        },
                        phones: vec![ContactPhone {
                            phone: card.phone,
                            kind: "mobile".into(),
                            wa_id: card.wa_id,
                        }],
                    }],
                }
            }
            MessageVariant::Image(media) => Self::Image {
                image: media_body(media),
            },
            MessageVariant::Video(media) => Self::Video {
                video: media_body(media),
            },
            MessageVariant::Document { media, filename } => Self::Document {
                document: DocumentBody {
                    mime_type: media.mime_type.clone(),
                    sha256: media.sha256.clone(),
                    id: media.id.clone(),
                    filename: filename.clone(),
                    caption: media.caption.clone(),
                },
            },
            MessageVariant::Unknown => return None,
        };
        Some(content)
    }
}

fn media_body(media: &Media) -> MediaBody {
    MediaBody {
        mime_type: media.mime_type.clone(),
        sha256: media.sha256.clone(),
        id: media.id.clone(),
        caption: media.caption.clone(),
    }
}

/// Reply reference in the forward schema.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplyContext {
    pub from: String,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundMessage {
    pub from: String,
    pub id: String,
    pub timestamp: String,
    #[serde(flatten)]
    pub content: MessageContent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<ReplyContext>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileName {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Participant {
    pub name: String,
    pub wa_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContactProfile {
    pub profile: ProfileName,
    pub wa_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participant: Option<Participant>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metadata {
    pub display_phone_number: String,
    pub phone_number_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeValue {
    pub messaging_product: String,
    pub metadata: Metadata,
    pub contacts: Vec<ContactProfile>,
    pub messages: Vec<OutboundMessage>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Change {
    pub value: ChangeValue,
    pub field: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entry {
    pub id: String,
    pub changes: Vec<Change>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebhookEnvelope {
    pub object: String,
    pub entry: Vec<Entry>,
}

/// Payload for the forward path, in the selected schema.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ForwardPayload {
    Envelope(WebhookEnvelope),
    Value(ChangeValue),
}

/// Reply reference in the archive schema.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchiveContext {
    pub from: String,
    pub message_id: String,
}

/// Payload for the archive path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchivePayload {
    pub messaging_product: String,
    pub recipient_type: String,
    pub id: String,
    pub to: String,
    #[serde(flatten)]
    pub content: MessageContent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<ArchiveContext>,
}

// ── Transformer ─────────────────────────────────────────────────────

/// Routing facts the payload needs besides the message itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteContext {
    pub account_id: String,
    pub wa_id: String,
    pub is_group: bool,
}

impl RouteContext {
    pub fn new(account_id: &str, chat: &ChatContext) -> Self {
        Self {
            account_id: account_id.to_string(),
            wa_id: chat.wa_id.clone(),
            is_group: chat.is_group,
        }
    }
}

fn quoted_sender(quoted: &QuotedRef) -> String {
    strip_direct_suffix(&quoted.participant).to_string()
}

/// Builds forward and archive payloads.
#[derive(Debug, Clone)]
pub struct PayloadTransformer {
    forward: ForwardTemplate,
    archive: ArchiveTemplate,
    schema: PayloadSchema,
}

impl PayloadTransformer {
    pub fn new(forward: ForwardTemplate, archive: ArchiveTemplate, schema: PayloadSchema) -> Self {
        Self {
            forward,
            archive,
            schema,
        }
    }

    /// Build the forward webhook payload. `None` only for `Unknown`.
    pub fn transform(
        &self,
        message: &SourceMessage,
        variant: &MessageVariant,
        ctx: &RouteContext,
    ) -> Option<ForwardPayload> {
        let content = MessageContent::from_variant(variant, false)?;
        let context = variant.quoted().map(|quoted| ReplyContext {
            from: quoted_sender(quoted),
            id: quoted.stanza_id.clone(),
        });

        let contact = if ctx.is_group {
            ContactProfile {
                profile: ProfileName {
                    name: message.group_subject.clone().unwrap_or_default(),
                },
                wa_id: ctx.wa_id.clone(),
                participant: Some(Participant {
                    name: message.push_name.clone(),
                    wa_id: strip_direct_suffix(message.participant.as_deref().unwrap_or_default())
                        .to_string(),
                }),
            }
        } else {
            ContactProfile {
                profile: ProfileName {
                    name: message.push_name.clone(),
                },
                wa_id: ctx.wa_id.clone(),
                participant: None,
            }
        };

        let value = ChangeValue {
            messaging_product: self.forward.messaging_product.clone(),
            metadata: Metadata {
                display_phone_number: ctx.account_id.clone(),
                phone_number_id: ctx.account_id.clone(),
            },
            contacts: vec![contact],
            messages: vec![OutboundMessage {
                from: ctx.wa_id.clone(),
                id: message.id.clone(),
                timestamp: message.timestamp.clone(),
                content,
                context,
            }],
        };

        let payload = match self.schema {
            PayloadSchema::Envelope => ForwardPayload::Envelope(WebhookEnvelope {
                object: self.forward.object.clone(),
                entry: vec![Entry {
                    id: ctx.account_id.clone(),
                    changes: vec![Change {
                        value,
                        field: self.forward.field.clone(),
                    }],
                }],
            }),
            PayloadSchema::Value => ForwardPayload::Value(value),
        };
        Some(payload)
    }

    /// Build the archive payload for a self-sent message.
    pub fn transform_archive(
        &self,
        message: &SourceMessage,
        variant: &MessageVariant,
        ctx: &RouteContext,
    ) -> Option<ArchivePayload> {
        let content = MessageContent::from_variant(variant, true)?;
        Some(ArchivePayload {
            messaging_product: self.archive.messaging_product.clone(),
            recipient_type: self.archive.recipient_type.clone(),
            id: message.id.clone(),
            to: ctx.wa_id.clone(),
            content,
            context: variant.quoted().map(|quoted| ArchiveContext {
                from: quoted_sender(quoted),
                message_id: quoted.stanza_id.clone(),
            }),
        })
    }
}
