use std::fmt;

use serde::Serialize;

use crate::error::DeliveryError;

/// A recipient that did not receive the message, with the reason given by the
/// receiving server or by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub recipient: String,
    pub reason: String,
}

impl Rejection {
    pub fn new(recipient: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{} ({})", self.recipient, self.reason)
    }
}

/// Outcome of one delivery pass over every recipient of an envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryResult {
    pub accepted: Vec<String>,
    pub rejected: Vec<Rejection>,
}

impl DeliveryResult {
    /// Every recipient in `recipients` rejected for the same reason.
    #[must_use]
    pub fn rejected_all(recipients: &[String], reason: &str) -> Self {
        Self {
            accepted: Vec::new(),
            rejected: recipients
                .iter()
                .map(|recipient| Rejection::new(recipient.as_str(), reason))
                .collect(),
        }
    }

    pub fn merge(&mut self, other: Self) {
        self.accepted.extend(other.accepted);
        self.rejected.extend(other.rejected);
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.rejected.is_empty()
    }

    /// The all-or-nothing view: any rejected recipient fails the whole
    /// delivery, with the accepted list still attached to the error.
    pub fn into_result(self) -> Result<Vec<String>, DeliveryError> {
        if self.rejected.is_empty() {
            Ok(self.accepted)
        } else {
            Err(DeliveryError::Rejected {
                accepted: self.accepted,
                rejected: self.rejected,
            })
        }
    }
}
