//! WABA Relay: forwards chat-client events from a durable stream to
//! business-messaging webhooks and archives self-sent messages.

pub mod config;
pub mod consumer;
pub mod delivery;
pub mod error;
pub mod pipeline;
pub mod routing;
