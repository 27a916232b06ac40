use std::time::Duration;

use mailgate_common::{config::ClientTimeouts, incoming, outgoing, tracing};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
};
use tokio_rustls::TlsConnector;

use super::reply::Reply;
use crate::{
    connection::Transport,
    data,
    error::{ClientError, ClientResult},
    reader::LineReader,
};

/// Drives one SMTP session as the sending side.
///
/// Each exchange writes a command and reads the complete reply block under a
/// single deadline. The session owns its reader, so exchanges never overlap.
pub struct SmtpClient<S = Transport> {
    reader: LineReader<S>,
    host: String,
    capabilities: Option<Reply>,
}

impl SmtpClient<Transport> {
    /// Opens a plaintext TCP connection to `host:port`.
    pub async fn connect(host: &str, port: u16, timeout: Duration) -> ClientResult<Self> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| ClientError::Timeout(timeout))??;

        tracing::debug!(host, port, "Connected");
        Ok(Self::new(Transport::Plain(stream), host))
    }

    /// Issues STARTTLS and performs the handshake on the same socket.
    ///
    /// The session must be re-greeted with EHLO afterwards. Fails if the
    /// server sent anything after its 220 reply, since those bytes would
    /// otherwise be read as if they had arrived over TLS.
    pub async fn starttls(
        mut self,
        connector: &TlsConnector,
        timeouts: &ClientTimeouts,
    ) -> ClientResult<Self> {
        self.send_command("STARTTLS", &[220], timeouts.command())
            .await?;

        if !self.reader.buffered().is_empty() {
            return Err(ClientError::PipelinedBeforeTls);
        }

        let (transport, _) = self.reader.into_parts();
        let transport = transport
            .connect_tls(connector, &self.host, timeouts.tls_handshake())
            .await?;

        tracing::debug!(host = %self.host, "Connection upgraded to TLS");

        Ok(Self {
            reader: LineReader::new(transport),
            host: self.host,
            capabilities: None,
        })
    }

    #[must_use]
    pub const fn is_tls(&self) -> bool {
        self.reader.get_ref().is_tls()
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> SmtpClient<S> {
    pub fn new(stream: S, host: impl Into<String>) -> Self {
        Self {
            reader: LineReader::new(stream),
            host: host.into(),
            capabilities: None,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// The reply to the most recent EHLO.
    pub const fn capabilities(&self) -> Option<&Reply> {
        self.capabilities.as_ref()
    }

    /// `true` if the last EHLO reply mentions `extension`.
    pub fn supports(&self, extension: &str) -> bool {
        self.capabilities
            .as_ref()
            .is_some_and(|reply| reply.mentions(extension))
    }

    async fn next_reply(&mut self) -> ClientResult<Reply> {
        let mut reply = None;

        loop {
            let line = self.reader.next_line().await?;
            let line = String::from_utf8_lossy(&line);
            incoming!("{line}");

            let parsed = Reply::parse_line(&line)?;
            let is_last = parsed.is_last;
            let current = Reply::push(reply, parsed)?;

            if is_last {
                return Ok(current);
            }
            reply = Some(current);
        }
    }

    /// Reads one reply block without sending anything.
    pub async fn read_reply(&mut self, timeout: Duration) -> ClientResult<Reply> {
        tokio::time::timeout(timeout, self.next_reply())
            .await
            .map_err(|_| ClientError::Timeout(timeout))?
    }

    /// Reads the server greeting, which must be a 220.
    pub async fn read_greeting(&mut self, timeout: Duration) -> ClientResult<Reply> {
        let reply = self.read_reply(timeout).await?;
        expect("greeting", reply, &[220])
    }

    /// Writes `command` and returns whatever reply comes back.
    pub async fn command(&mut self, command: &str, timeout: Duration) -> ClientResult<Reply> {
        tokio::time::timeout(timeout, async {
            outgoing!("{command}");
            let stream = self.reader.get_mut();
            stream.write_all(format!("{command}\r\n").as_bytes()).await?;
            stream.flush().await?;
            self.next_reply().await
        })
        .await
        .map_err(|_| ClientError::Timeout(timeout))?
    }

    /// Writes `command` and fails unless the reply code is one of `expected`.
    pub async fn send_command(
        &mut self,
        command: &str,
        expected: &[u16],
        timeout: Duration,
    ) -> ClientResult<Reply> {
        let reply = self.command(command, timeout).await?;
        let verb = command.split_whitespace().next().unwrap_or(command);
        expect(verb, reply, expected)
    }

    /// Sends EHLO and records the advertised capabilities.
    pub async fn ehlo(&mut self, identity: &str, timeout: Duration) -> ClientResult<Reply> {
        let reply = self
            .send_command(&format!("EHLO {identity}"), &[250], timeout)
            .await?;
        self.capabilities = Some(reply.clone());
        Ok(reply)
    }

    pub async fn mail_from(&mut self, from: &str, timeout: Duration) -> ClientResult<Reply> {
        self.send_command(&format!("MAIL FROM:<{from}>"), &[250], timeout)
            .await
    }

    /// Any well-formed reply is returned; the caller decides per recipient.
    pub async fn rcpt_to(&mut self, to: &str, timeout: Duration) -> ClientResult<Reply> {
        self.command(&format!("RCPT TO:<{to}>"), timeout).await
    }

    pub async fn data(&mut self, timeout: Duration) -> ClientResult<Reply> {
        self.send_command("DATA", &[354], timeout).await
    }

    /// Transmits `message` dot-stuffed with CRLF line endings and the
    /// end-of-data marker, then waits for the 250.
    pub async fn send_data(&mut self, message: &[u8], timeout: Duration) -> ClientResult<Reply> {
        let payload = data::encode(message);

        let reply = tokio::time::timeout(timeout, async {
            outgoing!("<{} bytes of message data>", payload.len());
            let stream = self.reader.get_mut();
            stream.write_all(&payload).await?;
            stream.flush().await?;
            self.next_reply().await
        })
        .await
        .map_err(|_| ClientError::Timeout(timeout))??;

        expect("DATA", reply, &[250])
    }

    pub async fn quit(&mut self, timeout: Duration) -> ClientResult<Reply> {
        self.send_command("QUIT", &[221], timeout).await
    }

    /// Stops the reader and shuts the transport down. Errors are ignored.
    pub async fn close(mut self) {
        self.reader.dispose();
        let _ = self.reader.get_mut().shutdown().await;
    }
}

fn expect(command: &str, reply: Reply, expected: &[u16]) -> ClientResult<Reply> {
    if expected.contains(&reply.code) {
        Ok(reply)
    } else {
        Err(ClientError::UnexpectedReply {
            command: command.to_string(),
            code: reply.code,
            message: reply.message(),
        })
    }
}
