use std::{fmt::Write as _, net::SocketAddr, sync::Arc};

use base64::{Engine, engine::general_purpose::STANDARD};
use mailgate_common::{
    Signal,
    inbound::{InboundDispatcher, InboundError},
    incoming, internal, outgoing,
    status::Status,
    tracing,
};
use tokio::{io::AsyncWriteExt, sync::broadcast};
use tokio_rustls::TlsAcceptor;

use super::{ListenerConfig, command::Command};
use crate::{
    connection::Transport,
    data,
    error::{ClientError, ServerError},
    reader::LineReader,
};

/// State shared by every session of one listener.
pub(super) struct SessionContext {
    pub config: ListenerConfig,
    pub acceptor: Option<TlsAcceptor>,
    pub dispatcher: InboundDispatcher,
}

#[derive(Debug, PartialEq, Eq)]
enum Event {
    ConnectionKeepAlive,
    ConnectionClose,
    StartTls,
}

pub(super) struct Session {
    peer: SocketAddr,
    reader: LineReader<Transport>,
    context: Arc<SessionContext>,
    greeted: bool,
    authenticated: bool,
    sender: Option<String>,
    recipients: Vec<String>,
}

impl Session {
    pub(super) fn new(transport: Transport, peer: SocketAddr, context: Arc<SessionContext>) -> Self {
        Self {
            peer,
            reader: LineReader::new(transport),
            context,
            greeted: false,
            authenticated: false,
            sender: None,
            recipients: Vec::new(),
        }
    }

    #[tracing::instrument(name = "session", skip_all, fields(peer = %self.peer))]
    pub(super) async fn run(
        mut self,
        mut shutdown: broadcast::Receiver<Signal>,
    ) -> Result<(), ServerError> {
        internal!("Connected");

        let greeting = format!("{} ESMTP mailgate ready", self.context.config.banner);
        self.reply(Status::ServiceReady, &greeting).await?;

        loop {
            let timeout = self.context.config.timeouts.command();

            let line = tokio::select! {
                signal = shutdown.recv() => {
                    if matches!(signal, Ok(Signal::Shutdown) | Err(_)) {
                        self.reply(Status::Unavailable, "Server shutting down").await?;
                        break;
                    }
                    continue;
                }
                line = self.reader.read_line(timeout) => line,
            };

            let line = match line {
                Ok(line) => line,
                Err(ClientError::ConnectionClosed) => break,
                Err(ClientError::Timeout(_)) => {
                    tracing::warn!("Client timed out waiting for a command");
                    self.reply(Status::Unavailable, "Timeout waiting for command")
                        .await?;
                    break;
                }
                Err(ClientError::LineTooLong(_)) => {
                    self.reply(Status::SyntaxError, "Line too long").await?;
                    break;
                }
                Err(err) => return Err(err.into()),
            };

            let command = Command::parse(&line);
            incoming!("{command}");

            match self.handle(command).await? {
                Event::ConnectionKeepAlive => {}
                Event::ConnectionClose => break,
                Event::StartTls => self = self.start_tls().await?,
            }
        }

        internal!("Connection closed");
        self.reader.dispose();
        let _ = self.reader.get_mut().shutdown().await;

        Ok(())
    }

    async fn handle(&mut self, command: Command) -> Result<Event, ServerError> {
        match command {
            Command::Helo(id) => {
                self.reset();
                self.greeted = true;
                let reply = format!("{} Hello {id}", self.context.config.banner);
                self.reply(Status::Ok, &reply).await?;
            }
            Command::Ehlo(id) => {
                self.reset();
                self.greeted = true;
                let lines = self.capabilities(&id);
                self.reply_lines(Status::Ok, &lines).await?;
            }
            Command::StartTls => return self.handle_starttls().await,
            Command::Auth { mechanism, initial } => self.handle_auth(&mechanism, initial).await?,
            Command::MailFrom { address, size } => self.handle_mail(address, size).await?,
            Command::RcptTo(address) => self.handle_rcpt(address).await?,
            Command::Data => return self.handle_data().await,
            Command::Rset => {
                self.reset();
                self.reply(Status::Ok, "Ok").await?;
            }
            Command::Noop => self.reply(Status::Ok, "Ok").await?,
            Command::Vrfy => {
                self.reply(
                    Status::CannotVerify,
                    "Cannot VRFY user, but will accept message and attempt delivery",
                )
                .await?;
            }
            Command::Quit => {
                self.reply(Status::GoodBye, "Bye").await?;
                return Ok(Event::ConnectionClose);
            }
            Command::Malformed(reason) => self.reply(Status::InvalidParameters, reason).await?,
            Command::Unknown(_) => {
                self.reply(Status::SyntaxError, "Command unrecognized").await?;
            }
        }

        Ok(Event::ConnectionKeepAlive)
    }

    fn capabilities(&self, client: &str) -> Vec<String> {
        let config = &self.context.config;
        let mut lines = vec![
            format!("{} Hello {client}", config.banner),
            format!("SIZE {}", config.max_message_size),
            "8BITMIME".to_string(),
            "PIPELINING".to_string(),
        ];

        if self.context.acceptor.is_some() && !self.reader.get_ref().is_tls() {
            lines.push("STARTTLS".to_string());
        }

        if config.auth.is_some() && !self.authenticated {
            lines.push("AUTH PLAIN LOGIN".to_string());
        }

        lines
    }

    /// Clears the mail transaction.
    fn reset(&mut self) {
        self.sender = None;
        self.recipients.clear();
    }

    async fn handle_starttls(&mut self) -> Result<Event, ServerError> {
        if self.reader.get_ref().is_tls() {
            self.reply(Status::InvalidCommandSequence, "Already running TLS")
                .await?;
        } else if self.context.acceptor.is_none() {
            self.reply(Status::NotImplemented, "Command not implemented")
                .await?;
        } else if !self.reader.buffered().is_empty() {
            tracing::warn!("Client pipelined data after STARTTLS, closing");
            self.reply(Status::TransactionFailed, "Unexpected data after STARTTLS")
                .await?;
            return Ok(Event::ConnectionClose);
        } else {
            self.reply(Status::ServiceReady, "Ready to start TLS").await?;
            return Ok(Event::StartTls);
        }

        Ok(Event::ConnectionKeepAlive)
    }

    /// Replaces the plaintext transport with TLS. All session state is
    /// forgotten, as RFC 3207 requires.
    async fn start_tls(self) -> Result<Self, ServerError> {
        let context = Arc::clone(&self.context);
        let Some(acceptor) = context.acceptor.as_ref() else {
            return Ok(self);
        };

        let (transport, _) = self.reader.into_parts();
        let transport = transport
            .accept_tls(acceptor, context.config.timeouts.tls_handshake())
            .await?;

        internal!(level = DEBUG, "Connection upgraded to TLS");

        Ok(Self::new(transport, self.peer, context))
    }

    async fn handle_auth(
        &mut self,
        mechanism: &str,
        initial: Option<String>,
    ) -> Result<(), ServerError> {
        let Some(auth) = self.context.config.auth.clone() else {
            return self
                .reply(Status::NotImplemented, "Command not implemented")
                .await;
        };

        if !self.greeted {
            return self
                .reply(Status::InvalidCommandSequence, "Send HELO/EHLO first")
                .await;
        }
        if self.authenticated {
            return self
                .reply(Status::InvalidCommandSequence, "Already authenticated")
                .await;
        }
        if self.sender.is_some() {
            return self
                .reply(
                    Status::InvalidCommandSequence,
                    "AUTH not permitted during a mail transaction",
                )
                .await;
        }

        let credentials = match mechanism {
            "PLAIN" => {
                let response = match initial {
                    Some(response) => Some(response),
                    None => self.auth_response("").await?,
                };
                response.map(|response| decode_plain(&response))
            }
            "LOGIN" => {
                let username = match initial {
                    Some(username) => Some(username),
                    None => self.auth_response("VXNlcm5hbWU6").await?,
                };
                match username {
                    Some(username) => self
                        .auth_response("UGFzc3dvcmQ6")
                        .await?
                        .map(|password| decode_login(&username, &password)),
                    None => None,
                }
            }
            _ => {
                return self
                    .reply(
                        Status::ParameterNotImplemented,
                        "Unrecognized authentication type",
                    )
                    .await;
            }
        };

        match credentials {
            None => {
                self.reply(Status::InvalidParameters, "Authentication cancelled")
                    .await
            }
            Some(None) => {
                self.reply(Status::InvalidParameters, "Malformed authentication response")
                    .await
            }
            Some(Some((username, password)))
                if username == auth.username && password == auth.password =>
            {
                self.authenticated = true;
                internal!(level = DEBUG, "Authenticated as {username}");
                self.reply(Status::AuthSucceeded, "Authentication successful")
                    .await
            }
            Some(Some((username, _))) => {
                tracing::warn!(%username, "Authentication failed");
                self.reply(Status::AuthFailed, "Authentication failed").await
            }
        }
    }

    /// Sends a 334 challenge and reads the client's answer. `None` means the
    /// client cancelled with `*`.
    async fn auth_response(&mut self, challenge: &str) -> Result<Option<String>, ServerError> {
        self.reply(Status::AuthContinue, challenge).await?;

        let line = self
            .reader
            .read_line(self.context.config.timeouts.command())
            .await?;
        incoming!("<authentication response>");

        let line = line.trim();
        Ok((line != "*").then(|| line.to_string()))
    }

    async fn handle_mail(&mut self, address: String, size: Option<usize>) -> Result<(), ServerError> {
        let max = self.context.config.max_message_size;

        if !self.greeted {
            self.reply(Status::InvalidCommandSequence, "Send HELO/EHLO first")
                .await
        } else if self.context.config.auth.is_some() && !self.authenticated {
            self.reply(Status::AuthRequired, "Authentication required")
                .await
        } else if self.sender.is_some() {
            self.reply(Status::InvalidCommandSequence, "Sender already specified")
                .await
        } else if size.is_some_and(|declared| declared > max) {
            let reply = format!("Message size exceeds fixed maximum message size of {max} bytes");
            self.reply(Status::ExceededStorage, &reply).await
        } else {
            self.sender = Some(address);
            self.reply(Status::Ok, "Ok").await
        }
    }

    async fn handle_rcpt(&mut self, address: String) -> Result<(), ServerError> {
        if self.sender.is_none() {
            return self
                .reply(Status::InvalidCommandSequence, "Need MAIL command")
                .await;
        }

        let Some((_, domain)) = address
            .rsplit_once('@')
            .filter(|(local, domain)| !local.is_empty() && !domain.is_empty())
        else {
            return self.reply(Status::Error, "Invalid recipient").await;
        };

        if !self.context.config.accepts(domain) {
            let reply = format!("Relay denied for domain {domain}");
            tracing::info!(recipient = %address, "Relay denied");
            return self.reply(Status::Error, &reply).await;
        }

        if !self.recipients.contains(&address) {
            self.recipients.push(address);
        }
        self.reply(Status::Ok, "Ok").await
    }

    /// Streams the message body, enforcing the size cap line by line, then
    /// dispatches it once per recipient.
    async fn handle_data(&mut self) -> Result<Event, ServerError> {
        if self.recipients.is_empty() {
            self.reply(Status::InvalidCommandSequence, "Need RCPT command")
                .await?;
            return Ok(Event::ConnectionKeepAlive);
        }

        self.reply(Status::StartMailInput, "End data with <CR><LF>.<CR><LF>")
            .await?;

        let max = self.context.config.max_message_size;
        let timeout = self.context.config.timeouts.data();
        let mut message = Vec::new();

        loop {
            let line = match self.reader.read_raw_line(timeout).await {
                Ok(line) => line,
                Err(ClientError::LineTooLong(_)) => {
                    self.reply(Status::SyntaxError, "Line too long").await?;
                    return Ok(Event::ConnectionClose);
                }
                Err(err) => return Err(err.into()),
            };

            let Some(content) = data::decode_line(&line) else {
                break;
            };

            if message.len() + content.len() + 2 > max {
                tracing::warn!(max, "Message exceeded size limit while streaming");
                let reply = format!("Message too large, max={max} bytes");
                self.reply(Status::ExceededStorage, &reply).await?;
                return Ok(Event::ConnectionClose);
            }

            message.extend_from_slice(content);
            message.extend_from_slice(b"\r\n");
        }

        let recipients = std::mem::take(&mut self.recipients);
        self.sender = None;

        match self
            .context
            .dispatcher
            .dispatch_all(&recipients, &message)
            .await
        {
            Ok(()) => {
                internal!(
                    level = INFO,
                    "Accepted {} bytes for {} recipient(s)",
                    message.len(),
                    recipients.len()
                );
                self.reply(Status::Ok, "Ok: message accepted").await?;
            }
            Err(InboundError::Rejected(reason)) => {
                tracing::info!(%reason, "Message rejected");
                let reason = if reason.is_empty() {
                    "Message rejected".to_string()
                } else {
                    reason
                };
                self.reply(Status::Error, &reason).await?;
            }
            Err(InboundError::Failed(reason)) => {
                tracing::error!(%reason, "Inbound processing failed");
                self.reply(Status::ActionUnavailable, "Internal processing error")
                    .await?;
            }
        }

        Ok(Event::ConnectionKeepAlive)
    }

    async fn reply(&mut self, status: Status, message: &str) -> Result<(), ServerError> {
        self.reply_lines(status, &[message]).await
    }

    async fn reply_lines<L: AsRef<str>>(
        &mut self,
        status: Status,
        lines: &[L],
    ) -> Result<(), ServerError> {
        let mut buffer = String::new();

        for (idx, line) in lines.iter().enumerate() {
            let separator = if idx + 1 == lines.len() { ' ' } else { '-' };
            let line = format!("{status}{separator}{}", line.as_ref());
            outgoing!("{line}");
            let _ = write!(buffer, "{line}\r\n");
        }

        let stream = self.reader.get_mut();
        stream.write_all(buffer.as_bytes()).await?;
        stream.flush().await?;

        Ok(())
    }
}

fn decode_text(encoded: &str) -> Option<String> {
    STANDARD
        .decode(encoded)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
}

/// `authzid NUL authcid NUL passwd` (RFC 4616).
fn decode_plain(response: &str) -> Option<(String, String)> {
    let decoded = decode_text(response)?;
    let mut parts = decoded.split('\0');

    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(_authzid), Some(username), Some(password), None) => {
            Some((username.to_string(), password.to_string()))
        }
        _ => None,
    }
}

fn decode_login(username: &str, password: &str) -> Option<(String, String)> {
    Some((decode_text(username)?, decode_text(password)?))
}
