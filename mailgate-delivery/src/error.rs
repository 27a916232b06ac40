//! Typed errors for outbound delivery.
//!
//! [`DeliveryError`] is what callers see. [`HostFailure`] stays inside one
//! domain group and decides whether the next exchanger is worth trying.

use mailgate_smtp::{ClientError, message::MessageError};
use thiserror::Error;

use crate::{dns::DnsError, types::Rejection};

#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The envelope had no valid recipient. Raised before any network activity.
    #[error("No valid recipients")]
    NoRecipients,

    /// At least one recipient was not delivered to.
    #[error("Delivery failed for {} recipient(s): {}", .rejected.len(), join(.rejected))]
    Rejected {
        accepted: Vec<String>,
        rejected: Vec<Rejection>,
    },

    #[error(transparent)]
    Dns(#[from] DnsError),

    #[error("Unable to build message: {0}")]
    Message(#[from] MessageError),
}

fn join(rejected: &[Rejection]) -> String {
    rejected
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Why a single exchanger did not take the message.
#[derive(Debug, Clone, Error)]
pub enum HostFailure {
    /// Transport, timeout, TLS, syntax, or an unexpected reply before the
    /// message content was refused.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// Every RCPT TO was refused.
    #[error("All recipients rejected")]
    AllRecipientsRejected(Vec<Rejection>),

    /// TLS is required and the server does not offer STARTTLS.
    #[error("STARTTLS required but not offered by {0}")]
    TlsUnavailable(String),

    /// A permanent reply to DATA or to the message content.
    #[error("Message rejected: {0}")]
    MessageRejected(ClientError),
}

impl HostFailure {
    /// A permanent refusal of the message content is final for the whole
    /// domain. Anything else may succeed on another exchanger.
    #[must_use]
    pub const fn retry_next_host(&self) -> bool {
        !matches!(self, Self::MessageRejected(_))
    }

    /// `false` once the exchange itself broke down (timeout, transport or
    /// syntax), after which the server is not worth a QUIT.
    #[must_use]
    pub const fn session_intact(&self) -> bool {
        match self {
            Self::Client(err) | Self::MessageRejected(err) => err.code().is_some(),
            Self::AllRecipientsRejected(_) | Self::TlsUnavailable(_) => true,
        }
    }

    /// Classifies a failure of `DATA` or of the end-of-data sequence.
    #[must_use]
    pub fn from_data(err: ClientError) -> Self {
        if err.is_permanent() {
            Self::MessageRejected(err)
        } else {
            Self::Client(err)
        }
    }
}
