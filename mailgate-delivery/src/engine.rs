use std::sync::Arc;

use futures_util::future::join_all;
use mailgate_common::{
    config::TlsPolicy,
    envelope::{Envelope, strip_line_breaks},
    internal, tracing,
};
use mailgate_smtp::{MessageBuilder, connection::relaxed_connector};
use tokio_rustls::TlsConnector;

use crate::{
    config::DeliveryConfig,
    dns::{DnsResolver, MxResolver},
    error::{DeliveryError, HostFailure},
    recipients::{DomainGroup, INVALID_RECIPIENT, group_recipients},
    smtp_transaction::SmtpTransaction,
    types::{DeliveryResult, Rejection},
};

/// Delivers envelopes straight to the recipients' exchangers.
pub struct DeliveryEngine {
    config: DeliveryConfig,
    resolver: Arc<dyn MxResolver>,
    connector: TlsConnector,
}

impl DeliveryEngine {
    /// Uses the system DNS configuration for MX lookups.
    pub fn new(config: DeliveryConfig) -> Result<Self, DeliveryError> {
        let resolver = DnsResolver::new(config.dns.clone(), config.port)?;
        Ok(Self::with_resolver(config, Arc::new(resolver)))
    }

    pub fn with_resolver(config: DeliveryConfig, resolver: Arc<dyn MxResolver>) -> Self {
        if config.tls != TlsPolicy::Disabled {
            tracing::warn!(
                "Outbound STARTTLS does not verify server certificates; TLS only protects against passive observers"
            );
        }

        Self {
            config,
            resolver,
            connector: relaxed_connector(),
        }
    }

    /// Sends `envelope` to every recipient.
    ///
    /// The message is built once and handed to each domain's exchangers in
    /// preference order until one accepts it. Domains are delivered
    /// concurrently. Fails only when nothing could be attempted; per-recipient
    /// failures are reported in [`DeliveryResult::rejected`].
    #[tracing::instrument(name = "delivery", skip_all, fields(from = %envelope.from_email))]
    pub async fn deliver(&self, envelope: &Envelope) -> Result<DeliveryResult, DeliveryError> {
        let grouped = group_recipients(&envelope.recipients());

        for invalid in &grouped.invalid {
            tracing::warn!(recipient = %invalid, "Skipping invalid recipient address");
        }

        if grouped.groups.is_empty() {
            return Err(DeliveryError::NoRecipients);
        }

        let message = MessageBuilder::new(envelope).build()?;
        let sender = strip_line_breaks(&envelope.from_email);
        let helo = self.helo_name(envelope);

        let outcomes = join_all(
            grouped
                .groups
                .iter()
                .map(|group| self.deliver_group(group, &sender, &helo, &message)),
        )
        .await;

        let mut result = DeliveryResult::default();
        for outcome in outcomes {
            result.merge(outcome);
        }
        result.rejected.extend(
            grouped
                .invalid
                .into_iter()
                .map(|recipient| Rejection::new(recipient, INVALID_RECIPIENT)),
        );

        internal!(
            level = INFO,
            "Delivered to {} recipient(s), {} rejected",
            result.accepted.len(),
            result.rejected.len()
        );

        Ok(result)
    }

    fn helo_name(&self, envelope: &Envelope) -> String {
        self.config
            .helo_name
            .as_deref()
            .or_else(|| envelope.sender_domain())
            .map_or_else(|| "localhost".to_string(), strip_line_breaks)
    }

    #[tracing::instrument(skip_all, fields(domain = %group.domain))]
    async fn deliver_group(
        &self,
        group: &DomainGroup,
        sender: &str,
        helo: &str,
        message: &[u8],
    ) -> DeliveryResult {
        let servers = match self.resolver.resolve(&group.domain).await {
            Ok(servers) => servers,
            Err(err) => {
                tracing::warn!("Unable to resolve exchangers: {err}");
                return DeliveryResult::rejected_all(&group.recipients, &err.to_string());
            }
        };

        let mut last_failure = None;

        for server in servers.iter() {
            let transaction = SmtpTransaction {
                server,
                helo,
                sender,
                recipients: &group.recipients,
                message,
                tls: self.config.tls,
                timeouts: &self.config.timeouts,
                connector: &self.connector,
            };

            match transaction.execute().await {
                Ok(result) => {
                    tracing::debug!(server = %server.address(), "Message accepted");
                    return result;
                }
                Err(failure) => {
                    tracing::warn!(server = %server.address(), "Delivery attempt failed: {failure}");
                    let retry = failure.retry_next_host();
                    last_failure = Some(failure);

                    if !retry {
                        break;
                    }
                }
            }
        }

        match last_failure {
            Some(HostFailure::AllRecipientsRejected(rejected)) => DeliveryResult {
                accepted: Vec::new(),
                rejected,
            },
            Some(failure) => DeliveryResult::rejected_all(&group.recipients, &failure.to_string()),
            None => DeliveryResult::rejected_all(&group.recipients, "No mail servers available"),
        }
    }
}
