//! Inbound event and chat message types.
//!
//! Raw stream payloads are decoded once into `SourceMessage`s whose body is an
//! explicit `MessageVariant`. Nothing downstream probes the raw JSON shape.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::error::DecodeError;

/// Suffix that marks a direct (one-to-one) chat jid.
pub const DIRECT_CHAT_SUFFIX: &str = "@s.whatsapp.net";

/// Jid of the status broadcast pseudo-chat.
pub const STATUS_BROADCAST_JID: &str = "status@broadcast";

/// Strip the direct-chat suffix from a jid, leaving group jids untouched.
pub fn strip_direct_suffix(jid: &str) -> &str {
    jid.strip_suffix(DIRECT_CHAT_SUFFIX).unwrap_or(jid)
}

// ── Inbound event ───────────────────────────────────────────────────

/// One entry fetched from the durable stream.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub subject: String,
    pub account_id: String,
    pub raw_payload: Vec<u8>,
}

impl InboundEvent {
    /// Build an event from a stream subject of the form
    /// `events.<source>.<accountId>`.
    pub fn from_stream(subject: &str, payload: &[u8]) -> Result<Self, DecodeError> {
        let account_id = subject
            .split('.')
            .nth(2)
            .filter(|account| !account.is_empty())
            .ok_or_else(|| DecodeError::Subject(subject.to_string()))?;

        Ok(Self {
            subject: subject.to_string(),
            account_id: account_id.to_string(),
            raw_payload: payload.to_vec(),
        })
    }

    /// Decode the message list carried by this event.
    pub fn decode_messages(&self) -> Result<Vec<SourceMessage>, DecodeError> {
        let raw: RawEvent =
            serde_json::from_slice(&self.raw_payload).map_err(|source| DecodeError::Payload {
                subject: self.subject.clone(),
                source,
            })?;
        Ok(raw.messages.into_iter().map(SourceMessage::from).collect())
    }
}

// ── Source message ──────────────────────────────────────────────────

/// A chat message as captured by the protocol client.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceMessage {
    pub remote_jid: String,
    pub from_me: bool,
    pub id: String,
    pub push_name: String,
    /// Actual sender inside a group conversation.
    pub participant: Option<String>,
    /// Group subject, when the client attached one to the key.
    pub group_subject: Option<String>,
    /// Send time in seconds, already stringified.
    pub timestamp: String,
    pub status: Option<MessageStatus>,
    /// `None` when the message carries no body at all.
    pub body: Option<MessageVariant>,
}

impl SourceMessage {
    /// Whether this is a locally queued echo of our own message.
    pub fn is_pending_echo(&self) -> bool {
        self.from_me && self.status == Some(MessageStatus::Pending)
    }
}

/// Delivery status reported by the protocol client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageStatus {
    Pending,
    Other(String),
}

impl MessageStatus {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::String(s) if s == "PENDING" => Some(Self::Pending),
            // Numeric protocol code for PENDING.
            Value::Number(n) if n.as_u64() == Some(1) => Some(Self::Pending),
            Value::String(s) => Some(Self::Other(s.clone())),
            other => Some(Self::Other(other.to_string())),
        }
    }
}

// ── Message variant ─────────────────────────────────────────────────

/// Back-reference to the message being replied to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotedRef {
    pub stanza_id: String,
    pub participant: String,
}

/// Shared shape of image and video content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Media {
    pub mime_type: String,
    pub sha256: String,
    pub id: String,
    pub caption: Option<String>,
    pub quoted: Option<QuotedRef>,
}

/// The content of a chat message; exactly one case per message.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageVariant {
    Text {
        body: String,
    },
    ExtendedText {
        body: String,
        quoted: Option<QuotedRef>,
    },
    Location {
        latitude: f64,
        longitude: f64,
        name: Option<String>,
        address: Option<String>,
        quoted: Option<QuotedRef>,
    },
    Contact {
        display_name: Option<String>,
        vcard: String,
        quoted: Option<QuotedRef>,
    },
    Image(Media),
    Video(Media),
    Document {
        media: Media,
        filename: String,
    },
    Unknown,
}

/// Tag of a `MessageVariant`, used for capability checks and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariantKind {
    Text,
    ExtendedText,
    Location,
    Contact,
    Image,
    Video,
    Document,
    Unknown,
}

impl VariantKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::ExtendedText => "extended_text",
            Self::Location => "location",
            Self::Contact => "contact",
            Self::Image => "image",
            Self::Video => "video",
            Self::Document => "document",
            Self::Unknown => "unknown",
        }
    }
}

impl MessageVariant {
    pub fn kind(&self) -> VariantKind {
        match self {
            Self::Text { .. } => VariantKind::Text,
            Self::ExtendedText { .. } => VariantKind::ExtendedText,
            Self::Location { .. } => VariantKind::Location,
            Self::Contact { .. } => VariantKind::Contact,
            Self::Image(_) => VariantKind::Image,
            Self::Video(_) => VariantKind::Video,
            Self::Document { .. } => VariantKind::Document,
            Self::Unknown => VariantKind::Unknown,
        }
    }

    /// Quoted reference carried by the variant, if any.
    pub fn quoted(&self) -> Option<&QuotedRef> {
        match self {
            Self::ExtendedText { quoted, .. }
            | Self::Location { quoted, .. }
            | Self::Contact { quoted, .. } => quoted.as_ref(),
            Self::Image(media) | Self::Video(media) | Self::Document { media, .. } => {
                media.quoted.as_ref()
            }
            Self::Text { .. } | Self::Unknown => None,
        }
    }

    /// Classify raw message content. Returns `None` for a missing, null or
    /// empty body; every other shape maps to exactly one variant.
    fn from_content(content: RawContent) -> Option<Self> {
        if content.is_empty() {
            return None;
        }

        let variant = if let Some(body) = content.conversation {
            Self::Text { body }
        } else if let Some(ext) = content.extended_text_message {
            Self::ExtendedText {
                body: ext.text.unwrap_or_default(),
                quoted: quoted_from(ext.context_info),
            }
        } else if let Some(loc) = content.location_message {
            Self::Location {
                latitude: loc.degrees_latitude.unwrap_or_default(),
                longitude: loc.degrees_longitude.unwrap_or_default(),
                name: loc.name,
                address: loc.address,
                quoted: quoted_from(loc.context_info),
            }
        } else if let Some(contact) = content.contact_message {
            Self::Contact {
                display_name: contact.display_name,
                vcard: contact.vcard.unwrap_or_default(),
                quoted: quoted_from(contact.context_info),
            }
        } else if let Some(image) = content.image_message {
            Self::Image(image.into_media(None))
        } else if let Some(video) = content.video_message {
            Self::Video(video.into_media(None))
        } else if let Some(wrapper) = content.document_with_caption_message {
            let outer_context = wrapper.context_info;
            match wrapper.message.and_then(|inner| inner.document_message) {
                Some(doc) => {
                    let filename = doc.file_name.clone().unwrap_or_default();
                    Self::Document {
                        media: doc.into_media(outer_context),
                        filename,
                    }
                }
                None => Self::Unknown,
            }
        } else if let Some(doc) = content.document_message {
            let filename = doc.file_name.clone().unwrap_or_default();
            Self::Document {
                media: doc.into_media(None),
                filename,
            }
        } else {
            Self::Unknown
        };

        Some(variant)
    }
}

fn quoted_from(context: Option<RawContextInfo>) -> Option<QuotedRef> {
    let context = context?;
    let stanza_id = context.stanza_id?;
    Some(QuotedRef {
        stanza_id,
        participant: context.participant.unwrap_or_default(),
    })
}

/// Render a loosely typed JSON scalar as text.
fn json_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Stringify a message timestamp: a number, a numeric string, or a 64-bit
/// `{low, high}` long object.
fn timestamp_text(value: &Value) -> String {
    match value {
        Value::Object(map) if map.contains_key("low") => {
            let low = map.get("low").and_then(Value::as_i64).unwrap_or_default();
            let high = map.get("high").and_then(Value::as_i64).unwrap_or_default();
            let combined = (high << 32) | (low & 0xffff_ffff);
            combined.to_string()
        }
        other => json_text(other),
    }
}

// ── Raw wire shapes ─────────────────────────────────────────────────
//
// Scalar fields are read loosely: a null or oddly typed value reads as
// absent instead of failing the whole event.

/// Any JSON scalar as text; null, arrays and objects read as absent.
fn loose_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    })
}

/// `true`, `"true"` or a non-zero number; anything else is false.
fn loose_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(b) => b,
        Value::String(s) => s.trim().eq_ignore_ascii_case("true"),
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        _ => false,
    })
}

/// A number or numeric string.
fn loose_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    messages: Vec<RawWebMessage>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawWebMessage {
    key: Option<RawKey>,
    message: Option<RawContent>,
    #[serde(deserialize_with = "loose_text")]
    push_name: Option<String>,
    #[serde(deserialize_with = "loose_text")]
    participant: Option<String>,
    message_timestamp: Value,
    status: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawKey {
    #[serde(deserialize_with = "loose_text")]
    remote_jid: Option<String>,
    #[serde(deserialize_with = "loose_bool")]
    from_me: bool,
    #[serde(deserialize_with = "loose_text")]
    id: Option<String>,
    #[serde(deserialize_with = "loose_text")]
    participant: Option<String>,
    #[serde(deserialize_with = "loose_text")]
    subject: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawContent {
    #[serde(deserialize_with = "loose_text")]
    conversation: Option<String>,
    extended_text_message: Option<RawExtendedText>,
    location_message: Option<RawLocation>,
    contact_message: Option<RawContact>,
    image_message: Option<RawMedia>,
    video_message: Option<RawMedia>,
    document_with_caption_message: Option<RawDocumentWrapper>,
    document_message: Option<RawMedia>,
    #[serde(flatten)]
    other: serde_json::Map<String, Value>,
}

impl RawContent {
    fn is_empty(&self) -> bool {
        self.conversation.is_none()
            && self.extended_text_message.is_none()
            && self.location_message.is_none()
            && self.contact_message.is_none()
            && self.image_message.is_none()
            && self.video_message.is_none()
            && self.document_with_caption_message.is_none()
            && self.document_message.is_none()
            && self.other.values().all(Value::is_null)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawContextInfo {
    #[serde(deserialize_with = "loose_text")]
    stanza_id: Option<String>,
    #[serde(deserialize_with = "loose_text")]
    participant: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawExtendedText {
    #[serde(deserialize_with = "loose_text")]
    text: Option<String>,
    context_info: Option<RawContextInfo>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawLocation {
    #[serde(deserialize_with = "loose_f64")]
    degrees_latitude: Option<f64>,
    #[serde(deserialize_with = "loose_f64")]
    degrees_longitude: Option<f64>,
    #[serde(deserialize_with = "loose_text")]
    name: Option<String>,
    #[serde(deserialize_with = "loose_text")]
    address: Option<String>,
    context_info: Option<RawContextInfo>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawContact {
    #[serde(deserialize_with = "loose_text")]
    display_name: Option<String>,
    #[serde(deserialize_with = "loose_text")]
    vcard: Option<String>,
    context_info: Option<RawContextInfo>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawMedia {
    #[serde(deserialize_with = "loose_text")]
    mimetype: Option<String>,
    file_sha256: Value,
    id: Value,
    #[serde(deserialize_with = "loose_text")]
    caption: Option<String>,
    #[serde(deserialize_with = "loose_text")]
    file_name: Option<String>,
    context_info: Option<RawContextInfo>,
}

impl RawMedia {
    /// `fallback_context` is consulted when the media itself carries none.
    fn into_media(self, fallback_context: Option<RawContextInfo>) -> Media {
        Media {
            mime_type: self.mimetype.unwrap_or_default(),
            sha256: json_text(&self.file_sha256),
            id: json_text(&self.id),
            caption: self.caption.filter(|caption| !caption.is_empty()),
            quoted: quoted_from(self.context_info).or_else(|| quoted_from(fallback_context)),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawDocumentWrapper {
    message: Option<RawDocumentInner>,
    context_info: Option<RawContextInfo>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawDocumentInner {
    document_message: Option<RawMedia>,
}

impl From<RawWebMessage> for SourceMessage {
    fn from(raw: RawWebMessage) -> Self {
        let key = raw.key.unwrap_or_default();
        let participant = key.participant.or(raw.participant);
        Self {
            remote_jid: key.remote_jid.unwrap_or_default(),
            from_me: key.from_me,
            id: key.id.unwrap_or_default(),
            push_name: raw.push_name.unwrap_or_default(),
            participant,
            group_subject: key.subject,
            timestamp: timestamp_text(&raw.message_timestamp),
            status: MessageStatus::from_value(&raw.status),
            body: raw.message.and_then(MessageVariant::from_content),
        }
    }
}
