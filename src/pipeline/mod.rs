//! Message processing pipeline.
//!
//! Every message of an inbound event flows through:
//! 1. `MessageClassifier::classify()`: skip, archive or forward
//! 2. `AccountRouter`: resolve the destination for the chosen path
//! 3. `PayloadTransformer`: build the outbound payload
//! 4. `DeliveryClient::deliver()`: sign and post

pub mod classifier;
pub mod processor;
pub mod transform;
pub mod types;
pub mod vcard;

pub use classifier::{MessageClassifier, PayloadSchema, Profile};
pub use processor::{EventOutcome, EventProcessor, MessageOutcome};
pub use transform::{ArchiveTemplate, ForwardTemplate, PayloadTransformer};
pub use types::{InboundEvent, MessageVariant, SourceMessage};
