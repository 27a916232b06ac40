//! Out-of-band inbound mail: an HTTP endpoint that accepts signed
//! notifications carrying a raw message, de-duplicates them by event id and
//! hands the message to the shared inbound dispatcher.

mod config;
mod error;
mod server;
mod signature;
mod store;

pub use config::WebhookConfig;
pub use error::{GatewayError, WebhookError};
pub use server::{
    EVENT_ID_HEADER, InboundPayload, SIGNATURE_HEADER, TIMESTAMP_HEADER, WebhookGateway,
};
pub use signature::{SignatureError, SignatureVerifier};
pub use store::{EventStatus, EventStore, InboundEvent, MemoryEventStore, StoreError};
