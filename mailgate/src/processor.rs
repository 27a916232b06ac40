use async_trait::async_trait;
use mailgate_common::inbound::{InboundError, InboundProcessor};
use mailparse::MailHeaderMap;

/// Inbound pipeline that records each accepted message in the log and
/// discards it. Embedders replace it with their own [`InboundProcessor`].
#[derive(Debug, Default)]
pub struct LoggingProcessor;

#[async_trait]
impl InboundProcessor for LoggingProcessor {
    async fn process(&self, recipient: &str, raw: &[u8]) -> Result<(), InboundError> {
        let (headers, _) = mailparse::parse_headers(raw)
            .map_err(|e| InboundError::Rejected(format!("Unparseable message headers: {e}")))?;

        tracing::info!(
            recipient,
            size = raw.len(),
            from = headers.get_first_value("From").unwrap_or_default(),
            subject = headers.get_first_value("Subject").unwrap_or_default(),
            message_id = headers.get_first_value("Message-ID").unwrap_or_default(),
            "Inbound message received"
        );

        Ok(())
    }
}
