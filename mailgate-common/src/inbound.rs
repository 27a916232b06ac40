//! The single entry point both inbound sources (the SMTP listener and the
//! webhook gateway) hand raw messages to.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InboundError {
    /// The pipeline refused the message on its content. Senders must not retry.
    #[error("{0}")]
    Rejected(String),

    /// Anything else. Senders may retry later.
    #[error("{0}")]
    Failed(String),
}

impl InboundError {
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

/// The mail-processing pipeline that receives accepted messages.
#[async_trait]
pub trait InboundProcessor: Send + Sync {
    async fn process(&self, recipient: &str, raw: &[u8]) -> Result<(), InboundError>;
}

/// Shared handle on the configured [`InboundProcessor`].
#[derive(Clone)]
pub struct InboundDispatcher {
    processor: Arc<dyn InboundProcessor>,
}

impl std::fmt::Debug for InboundDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundDispatcher").finish_non_exhaustive()
    }
}

impl InboundDispatcher {
    pub fn new(processor: Arc<dyn InboundProcessor>) -> Self {
        Self { processor }
    }

    /// Hands `raw` to the pipeline for one recipient.
    pub async fn dispatch(&self, recipient: &str, raw: &[u8]) -> Result<(), InboundError> {
        if recipient.is_empty() || raw.is_empty() {
            return Err(InboundError::Failed(
                "invalid payload: recipient and message are required".to_string(),
            ));
        }

        tracing::debug!(recipient, size = raw.len(), "Dispatching inbound message");
        self.processor.process(recipient, raw).await
    }

    /// Hands `raw` to the pipeline once per recipient, in order, stopping at
    /// the first failure.
    pub async fn dispatch_all(&self, recipients: &[String], raw: &[u8]) -> Result<(), InboundError> {
        if recipients.is_empty() {
            return Err(InboundError::Rejected("No recipient".to_string()));
        }

        for recipient in recipients {
            self.dispatch(recipient, raw).await?;
        }

        Ok(())
    }
}
