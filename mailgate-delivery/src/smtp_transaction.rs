//! One delivery attempt against one exchanger.

use mailgate_common::{
    config::{ClientTimeouts, TlsPolicy},
    tracing,
};
use mailgate_smtp::SmtpClient;
use tokio_rustls::TlsConnector;

use crate::{
    dns::MailServer,
    error::HostFailure,
    types::{DeliveryResult, Rejection},
};

/// Everything needed to hand one message to one exchanger for the
/// recipients of one domain.
pub struct SmtpTransaction<'a> {
    pub server: &'a MailServer,
    pub helo: &'a str,
    pub sender: &'a str,
    pub recipients: &'a [String],
    pub message: &'a [u8],
    pub tls: TlsPolicy,
    pub timeouts: &'a ClientTimeouts,
    pub connector: &'a TlsConnector,
}

impl SmtpTransaction<'_> {
    /// Runs the session: greeting, EHLO, optional STARTTLS, MAIL FROM, one
    /// RCPT TO per recipient, DATA, then a best-effort QUIT.
    ///
    /// On success the result lists the recipients the server accepted and
    /// the ones it refused individually. The connection is closed on every
    /// path. QUIT is skipped when the exchange broke down, since a hung
    /// server would hold the next exchanger back for another timeout.
    #[tracing::instrument(name = "transaction", skip_all, fields(server = %self.server.address()))]
    pub async fn execute(self) -> Result<DeliveryResult, HostFailure> {
        let client =
            SmtpClient::connect(&self.server.host, self.server.port, self.timeouts.connect())
                .await?;

        let mut client = self.handshake(client).await?;
        let outcome = self.transfer(&mut client).await;

        if outcome.as_ref().err().is_none_or(HostFailure::session_intact) {
            if let Err(err) = client.quit(self.timeouts.command()).await {
                tracing::debug!("QUIT failed: {err}");
            }
        }
        client.close().await;

        outcome
    }

    async fn handshake(&self, mut client: SmtpClient) -> Result<SmtpClient, HostFailure> {
        let timeout = self.timeouts.command();

        client.read_greeting(timeout).await?;
        client.ehlo(self.helo, timeout).await?;

        if self.tls.is_disabled() {
            return Ok(client);
        }

        if client.supports("STARTTLS") {
            client = client.starttls(self.connector, self.timeouts).await?;
            client.ehlo(self.helo, timeout).await?;
            tracing::debug!("Session upgraded to TLS");
        } else if self.tls.is_required() {
            let _ = client.quit(timeout).await;
            client.close().await;
            return Err(HostFailure::TlsUnavailable(self.server.host.clone()));
        } else {
            tracing::debug!("STARTTLS not offered, continuing in plaintext");
        }

        Ok(client)
    }

    async fn transfer(&self, client: &mut SmtpClient) -> Result<DeliveryResult, HostFailure> {
        let timeout = self.timeouts.command();
        let mut result = DeliveryResult::default();

        client.mail_from(self.sender, timeout).await?;

        for recipient in self.recipients {
            let reply = client.rcpt_to(recipient, timeout).await?;

            if matches!(reply.code, 250 | 251) {
                result.accepted.push(recipient.clone());
            } else {
                tracing::info!(%recipient, code = reply.code, "Recipient rejected");
                result
                    .rejected
                    .push(Rejection::new(recipient.as_str(), reply.message()));
            }
        }

        if result.accepted.is_empty() {
            return Err(HostFailure::AllRecipientsRejected(result.rejected));
        }

        client.data(timeout).await.map_err(HostFailure::from_data)?;
        client
            .send_data(self.message, timeout)
            .await
            .map_err(HostFailure::from_data)?;

        Ok(result)
    }
}

