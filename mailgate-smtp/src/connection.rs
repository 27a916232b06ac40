use std::{
    fs::File,
    io::{self, BufReader},
    path::Path,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use mailgate_common::tracing;
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    net::TcpStream,
};
use tokio_rustls::{
    TlsAcceptor, TlsConnector,
    rustls::{
        ClientConfig, DigitallySignedStruct, ServerConfig, SignatureScheme,
        client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
        pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime},
    },
};

use crate::{
    error::{ClientError, ServerError},
    server::TlsFiles,
};

/// A TCP connection that may have been upgraded to TLS in either direction.
pub enum Transport {
    Plain(TcpStream),
    Client(Box<tokio_rustls::client::TlsStream<TcpStream>>),
    Server(Box<tokio_rustls::server::TlsStream<TcpStream>>),
}

impl Transport {
    #[must_use]
    pub const fn is_tls(&self) -> bool {
        !matches!(self, Self::Plain(_))
    }

    /// Performs the client side of a STARTTLS handshake.
    pub async fn connect_tls(
        self,
        connector: &TlsConnector,
        host: &str,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let Self::Plain(stream) = self else {
            return Err(ClientError::Tls("Connection is already TLS".to_string()));
        };

        let server_name = ServerName::try_from(host.trim_end_matches('.').to_string())
            .map_err(|e| ClientError::Tls(format!("Invalid server name {host}: {e}")))?;

        let stream = tokio::time::timeout(timeout, connector.connect(server_name, stream))
            .await
            .map_err(|_| ClientError::Timeout(timeout))?
            .map_err(|e| ClientError::Tls(e.to_string()))?;

        Ok(Self::Client(Box::new(stream)))
    }

    /// Performs the server side of a STARTTLS handshake.
    pub async fn accept_tls(self, acceptor: &TlsAcceptor, timeout: Duration) -> io::Result<Self> {
        let Self::Plain(stream) = self else {
            return Err(io::Error::other("Connection is already TLS"));
        };

        let stream = tokio::time::timeout(timeout, acceptor.accept(stream))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "TLS handshake timed out"))??;

        Ok(Self::Server(Box::new(stream)))
    }
}

impl AsyncRead for Transport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Client(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Server(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Client(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Server(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Self::Client(stream) => Pin::new(stream).poll_flush(cx),
            Self::Server(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Client(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Server(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Client TLS settings for MTA-to-MTA STARTTLS.
///
/// Server certificates are accepted without validation.
pub fn relaxed_connector() -> TlsConnector {
    let config = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(NoVerifier))
        .with_no_client_auth();

    TlsConnector::from(Arc::new(config))
}

#[derive(Debug)]
struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, tokio_rustls::rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ED25519,
        ]
    }
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ServerError> {
    let certificate_error = |reason: String| ServerError::CertificateLoad {
        path: path.display().to_string(),
        reason,
    };

    let file = File::open(path).map_err(|e| certificate_error(e.to_string()))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<io::Result<Vec<_>>>()
        .map_err(|e| certificate_error(e.to_string()))?;

    if certs.is_empty() {
        return Err(certificate_error("No certificates found".to_string()));
    }

    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, ServerError> {
    let key_error = |reason: String| ServerError::KeyLoad {
        path: path.display().to_string(),
        reason,
    };

    let file = File::open(path).map_err(|e| key_error(e.to_string()))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| key_error(e.to_string()))?
        .ok_or_else(|| {
            key_error("Unable to determine key file format (expected PKCS1, PKCS8, or SEC1)".to_string())
        })
}

/// Builds the acceptor used for inbound STARTTLS from PEM files on disk.
#[tracing::instrument(level = "debug", skip_all, fields(certificate = ?files.certificate))]
pub fn load_acceptor(files: &TlsFiles) -> Result<TlsAcceptor, ServerError> {
    let (Some(certificate), Some(key)) = (&files.certificate, &files.key) else {
        return Err(ServerError::Tls(
            "Both a certificate and a key path are required".to_string(),
        ));
    };

    let certs = load_certs(certificate)?;
    let key = load_key(key)?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn missing_certificate_is_reported_with_path() {
        let files = TlsFiles {
            certificate: Some(PathBuf::from("/nonexistent/mailgate/cert.pem")),
            key: Some(PathBuf::from("/nonexistent/mailgate/key.pem")),
        };

        let Err(err) = load_acceptor(&files) else {
            panic!("loading a missing certificate must fail");
        };
        assert!(matches!(err, ServerError::CertificateLoad { .. }));
        assert!(err.to_string().contains("/nonexistent/mailgate/cert.pem"));
    }

    #[test]
    fn incomplete_paths_are_rejected() {
        let files = TlsFiles {
            certificate: Some(PathBuf::from("/etc/mailgate/cert.pem")),
            key: None,
        };

        assert!(matches!(load_acceptor(&files), Err(ServerError::Tls(_))));
    }
}
