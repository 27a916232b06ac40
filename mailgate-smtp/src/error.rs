use std::{io, sync::Arc, time::Duration};

use thiserror::Error;

/// Errors raised while driving an SMTP session as the client.
///
/// Cloneable so a failed [`LineReader`](crate::LineReader) can report the
/// same cause to every caller after the failure.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(Arc<io::Error>),

    #[error("Connection closed unexpectedly")]
    ConnectionClosed,

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// A reply line that is not `<3 digits><' ' | '-'><text>`.
    #[error("Invalid SMTP response: {0}")]
    Syntax(String),

    /// A well-formed reply whose code was not one of those expected.
    #[error("SMTP {command} failed: {code} {message}")]
    UnexpectedReply {
        command: String,
        code: u16,
        message: String,
    },

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Line exceeds {0} bytes")]
    LineTooLong(usize),

    /// The peer sent data after the STARTTLS exchange but before the handshake.
    #[error("Unexpected data buffered before TLS handshake")]
    PipelinedBeforeTls,
}

impl ClientError {
    /// Reply code carried by the error, if the peer answered at all.
    #[must_use]
    pub const fn code(&self) -> Option<u16> {
        match self {
            Self::UnexpectedReply { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// `true` for a 5xx reply.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self.code(), Some(code) if code >= 500)
    }

    /// `true` for failures of the underlying transport rather than the protocol.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::ConnectionClosed | Self::Timeout(_) | Self::Tls(_)
        )
    }
}

impl From<io::Error> for ClientError {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

/// Errors raised while starting or running the inbound listener.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to load TLS certificate from {path}: {reason}")]
    CertificateLoad { path: String, reason: String },

    #[error("Failed to load TLS private key from {path}: {reason}")]
    KeyLoad { path: String, reason: String },

    #[error("TLS error: {0}")]
    Tls(String),

    /// A session ended on a transport or protocol failure.
    #[error(transparent)]
    Session(#[from] ClientError),
}

impl From<tokio_rustls::rustls::Error> for ServerError {
    fn from(err: tokio_rustls::rustls::Error) -> Self {
        Self::Tls(err.to_string())
    }
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;
