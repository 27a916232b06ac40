mod support;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mailgate_common::{
    Signal,
    config::{ClientTimeouts, TlsPolicy},
    envelope::Envelope,
    inbound::{InboundDispatcher, InboundError, InboundProcessor},
};
use mailgate_delivery::{DeliveryConfig, DeliveryEngine, MailServer};
use mailgate_smtp::{Listener, ListenerConfig, TlsFiles};
use pretty_assertions::assert_eq;
use support::StaticResolver;
use tokio::{net::TcpListener, sync::broadcast};

#[derive(Default)]
struct Mailbox {
    received: Mutex<Vec<(String, Vec<u8>)>>,
}

#[async_trait]
impl InboundProcessor for Mailbox {
    async fn process(&self, recipient: &str, raw: &[u8]) -> Result<(), InboundError> {
        self.received
            .lock()
            .unwrap()
            .push((recipient.to_string(), raw.to_vec()));
        Ok(())
    }
}

#[tokio::test]
async fn required_tls_delivers_over_starttls() {
    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let certificate = dir.path().join("certificate.crt");
    let key = dir.path().join("private.key");
    std::fs::write(&certificate, cert.pem()).unwrap();
    std::fs::write(&key, key_pair.serialize_pem()).unwrap();

    let mailbox = Arc::new(Mailbox::default());
    let listener = Listener::new(
        ListenerConfig {
            banner: "mx.x.test".to_string(),
            accepted_domains: vec!["x.com".to_string()],
            tls: Some(TlsFiles {
                certificate: Some(certificate),
                key: Some(key),
            }),
            ..ListenerConfig::default()
        },
        InboundDispatcher::new(mailbox.clone()),
    );

    let socket = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = socket.local_addr().unwrap().port();
    let (shutdown, receiver) = broadcast::channel(4);
    tokio::spawn(async move {
        listener.serve_on(socket, receiver).await.unwrap();
    });

    let resolver =
        StaticResolver::default().with("x.com", vec![MailServer::new("localhost", 10, port)]);
    let engine = DeliveryEngine::with_resolver(
        DeliveryConfig {
            tls: TlsPolicy::Required,
            timeouts: ClientTimeouts::uniform(5),
            ..DeliveryConfig::default()
        },
        Arc::new(resolver),
    );

    let envelope = Envelope::new("sender@origin.test")
        .to("a@x.com")
        .subject("Encrypted")
        .text("Sent after STARTTLS.");
    let result = engine.deliver(&envelope).await.unwrap();

    assert_eq!(result.accepted, ["a@x.com"]);
    assert!(result.rejected.is_empty());

    let received = mailbox.received.lock().unwrap().clone();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].0, "a@x.com");
    assert!(
        String::from_utf8_lossy(&received[0].1).contains("Subject: Encrypted")
    );

    shutdown.send(Signal::Shutdown).unwrap();
}
