use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use mailgate_common::{
    Signal,
    config::ClientTimeouts,
    inbound::{InboundDispatcher, InboundError, InboundProcessor},
};
use mailgate_smtp::{
    ClientError, Listener, ListenerConfig, SmtpClient, TlsFiles, connection::relaxed_connector,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::broadcast,
};

const TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Recorder {
    received: Mutex<Vec<(String, Vec<u8>)>>,
}

#[async_trait]
impl InboundProcessor for Recorder {
    async fn process(&self, recipient: &str, raw: &[u8]) -> Result<(), InboundError> {
        self.received
            .lock()
            .unwrap()
            .push((recipient.to_string(), raw.to_vec()));
        Ok(())
    }
}

/// Writes a fresh self-signed certificate for `localhost` into a temporary
/// directory.
fn self_signed() -> (TempDir, TlsFiles) {
    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let certificate = dir.path().join("certificate.crt");
    let key = dir.path().join("private.key");
    std::fs::write(&certificate, cert.pem()).unwrap();
    std::fs::write(&key, key_pair.serialize_pem()).unwrap();

    (
        dir,
        TlsFiles {
            certificate: Some(certificate),
            key: Some(key),
        },
    )
}

async fn start_listener(
    tls: TlsFiles,
    recorder: Arc<Recorder>,
) -> (SocketAddr, broadcast::Sender<Signal>) {
    let socket = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = socket.local_addr().unwrap();
    let (shutdown, receiver) = broadcast::channel(4);

    let listener = Listener::new(
        ListenerConfig {
            banner: "mx.test".to_string(),
            accepted_domains: vec!["example.com".to_string()],
            tls: Some(tls),
            ..ListenerConfig::default()
        },
        InboundDispatcher::new(recorder),
    );
    assert!(listener.tls_enabled());

    tokio::spawn(async move {
        listener.serve_on(socket, receiver).await.unwrap();
    });

    (address, shutdown)
}

#[tokio::test]
async fn session_upgrades_and_is_greeted_again() {
    let (_dir, files) = self_signed();
    let recorder = Arc::new(Recorder::default());
    let (address, shutdown) = start_listener(files, recorder.clone()).await;

    let mut client = SmtpClient::connect("localhost", address.port(), TIMEOUT)
        .await
        .unwrap();
    client.read_greeting(TIMEOUT).await.unwrap();
    client.ehlo("client.test", TIMEOUT).await.unwrap();
    assert!(client.supports("STARTTLS"));
    assert!(!client.is_tls());

    let mut client = client
        .starttls(&relaxed_connector(), &ClientTimeouts::uniform(5))
        .await
        .unwrap();
    assert!(client.is_tls());
    assert!(client.capabilities().is_none());

    client.ehlo("client.test", TIMEOUT).await.unwrap();
    assert!(client.supports("SIZE"));
    assert!(!client.supports("STARTTLS"));

    client.mail_from("sender@remote.test", TIMEOUT).await.unwrap();
    client.rcpt_to("user@example.com", TIMEOUT).await.unwrap();
    client.data(TIMEOUT).await.unwrap();
    let reply = client
        .send_data(b"Subject: secure\r\n\r\nover tls\r\n", TIMEOUT)
        .await
        .unwrap();
    assert_eq!(reply.code, 250);
    client.quit(TIMEOUT).await.unwrap();

    let received = recorder.received.lock().unwrap().clone();
    assert_eq!(
        received,
        vec![(
            "user@example.com".to_string(),
            b"Subject: secure\r\n\r\nover tls\r\n".to_vec()
        )]
    );

    shutdown.send(Signal::Shutdown).unwrap();
}

#[tokio::test]
async fn listener_closes_when_commands_follow_starttls() {
    let (_dir, files) = self_signed();
    let (address, shutdown) = start_listener(files, Arc::new(Recorder::default())).await;

    let stream = TcpStream::connect(address).await.unwrap();
    let mut client = SmtpClient::new(stream, "localhost");
    client.read_greeting(TIMEOUT).await.unwrap();
    client.ehlo("client.test", TIMEOUT).await.unwrap();

    // Both commands land in one write.
    let reply = client.command("STARTTLS\r\nNOOP", TIMEOUT).await.unwrap();
    assert_eq!(reply.code, 554);

    let closed = client.read_reply(TIMEOUT).await;
    assert!(matches!(closed, Err(ClientError::ConnectionClosed)));

    shutdown.send(Signal::Shutdown).unwrap();
}

/// A server that answers STARTTLS with its 220 and a stray reply in the same
/// write.
async fn pipelining_server() -> SocketAddr {
    let socket = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = socket.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = socket.accept().await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();

        writer.write_all(b"220 fake ESMTP\r\n").await.unwrap();

        reader.read_line(&mut line).await.unwrap();
        writer
            .write_all(b"250-fake\r\n250 STARTTLS\r\n")
            .await
            .unwrap();

        line.clear();
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(line, "STARTTLS\r\n");
        writer
            .write_all(b"220 Go ahead\r\n250 injected\r\n")
            .await
            .unwrap();

        line.clear();
        let _ = reader.read_line(&mut line).await;
    });

    address
}

#[tokio::test]
async fn client_refuses_bytes_pipelined_after_220() {
    let address = pipelining_server().await;

    let mut client = SmtpClient::connect("127.0.0.1", address.port(), TIMEOUT)
        .await
        .unwrap();
    client.read_greeting(TIMEOUT).await.unwrap();
    client.ehlo("client.test", TIMEOUT).await.unwrap();
    assert!(client.supports("STARTTLS"));

    let result = client
        .starttls(&relaxed_connector(), &ClientTimeouts::uniform(5))
        .await;
    assert!(matches!(result, Err(ClientError::PipelinedBeforeTls)));
}
