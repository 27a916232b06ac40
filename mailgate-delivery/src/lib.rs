//! Outbound delivery: resolves the mail exchangers of every recipient domain
//! and speaks SMTP directly to them.
//!
//! Nothing is queued. Each call to [`DeliveryEngine::deliver`] makes one pass
//! over the candidate hosts of every domain and reports which recipients were
//! accepted and which were not.

mod config;
mod dns;
mod engine;
mod error;
mod recipients;
mod smtp_transaction;
mod types;

pub use config::DeliveryConfig;
pub use dns::{DnsConfig, DnsError, DnsResolver, MailServer, MxResolver};
pub use engine::DeliveryEngine;
pub use error::{DeliveryError, HostFailure};
pub use recipients::{DomainGroup, GroupedRecipients, group_recipients};
pub use types::{DeliveryResult, Rejection};
