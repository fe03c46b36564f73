//! Signed webhook delivery.

pub mod client;
pub mod signing;

pub use client::{DeliveryClient, DeliveryReceipt, RetryPolicy};
pub use signing::{SIGNATURE_HEADER, sign_payload};
