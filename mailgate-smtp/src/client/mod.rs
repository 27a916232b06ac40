//! SMTP client used by the delivery engine.

#[allow(clippy::module_inception)]
mod client;
mod reply;

pub use client::SmtpClient;
pub use reply::{Reply, ReplyCategory, ReplyLine};
