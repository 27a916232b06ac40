use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use mailgate_common::inbound::{InboundDispatcher, InboundError, InboundProcessor};
use mailgate_webhook::{
    EVENT_ID_HEADER, EventStatus, EventStore, MemoryEventStore, SIGNATURE_HEADER,
    SignatureVerifier, TIMESTAMP_HEADER, WebhookConfig, WebhookGateway,
};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tower::ServiceExt;

const SECRET: &str = "gateway-secret";
const PATH: &str = "/api/internal/inbound-email";

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<(String, Vec<u8>)>>,
    outcome: Option<InboundError>,
    delay: Option<Duration>,
}

impl Recorder {
    fn failing(outcome: InboundError) -> Self {
        Self {
            outcome: Some(outcome),
            ..Self::default()
        }
    }

    fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl InboundProcessor for Recorder {
    async fn process(&self, recipient: &str, raw: &[u8]) -> Result<(), InboundError> {
        self.seen
            .lock()
            .unwrap()
            .push((recipient.to_string(), raw.to_vec()));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match &self.outcome {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

struct Fixture {
    router: Router,
    store: Arc<MemoryEventStore>,
    processor: Arc<Recorder>,
}

fn fixture_with(secret: Option<&str>, processor: Recorder) -> Fixture {
    fixture_with_config(
        WebhookConfig {
            shared_secret: secret.map(str::to_string),
            ..WebhookConfig::default()
        },
        processor,
    )
}

fn fixture_with_config(config: WebhookConfig, processor: Recorder) -> Fixture {
    let store = Arc::new(MemoryEventStore::new());
    let processor = Arc::new(processor);

    let gateway = WebhookGateway::new(
        config,
        store.clone(),
        InboundDispatcher::new(processor.clone()),
    );

    Fixture {
        router: gateway.router(),
        store,
        processor,
    }
}

fn fixture() -> Fixture {
    fixture_with(Some(SECRET), Recorder::default())
}

fn now() -> String {
    chrono::Utc::now().timestamp().to_string()
}

fn body(to: &str, raw: &[u8]) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "envelopeTo": to,
        "rawMimeBase64": STANDARD.encode(raw),
    }))
    .unwrap()
}

fn signed(event_id: &str, timestamp: &str, body: Vec<u8>) -> Request<Body> {
    let signature = SignatureVerifier::new(SECRET, 300).sign(timestamp, &body);

    Request::post(PATH)
        .header(TIMESTAMP_HEADER, timestamp)
        .header(SIGNATURE_HEADER, signature)
        .header(EVENT_ID_HEADER, event_id)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap()
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[test]
fn signal_header_names() {
    assert_eq!(TIMESTAMP_HEADER, "X-CM-Timestamp");
    assert_eq!(SIGNATURE_HEADER, "X-CM-Signature");
    assert_eq!(EVENT_ID_HEADER, "X-CM-Event-Id");
}

#[tokio::test]
async fn health_endpoint() {
    let fixture = fixture();
    let request = Request::get("/healthz").body(Body::empty()).unwrap();

    let (status, body) = send(&fixture.router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "ok": true }));
}

#[tokio::test]
async fn missing_secret_refuses_everything() {
    let fixture = fixture_with(None, Recorder::default());
    let request = signed("evt-1", &now(), body("user@example.com", b"raw"));

    let (status, body) = send(&fixture.router, request).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "message": "inbound secret not configured" }));
    assert_eq!(fixture.processor.calls(), 0);
}

#[tokio::test]
async fn missing_headers_are_a_bad_request() {
    let fixture = fixture();
    let request = Request::post(PATH)
        .header(TIMESTAMP_HEADER, now())
        .header(EVENT_ID_HEADER, "evt-1")
        .body(Body::from(body("user@example.com", b"raw")))
        .unwrap();

    let (status, body) = send(&fixture.router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "message": "missing signature headers" }));
    assert!(fixture.store.is_empty());
}

#[tokio::test]
async fn non_numeric_timestamp_is_a_bad_request() {
    let fixture = fixture();
    let request = signed("evt-1", "yesterday", body("user@example.com", b"raw"));

    let (status, body) = send(&fixture.router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "message": "invalid timestamp header" }));
}

#[tokio::test]
async fn stale_timestamp_is_unauthorized() {
    let fixture = fixture();
    let stale = (chrono::Utc::now().timestamp() - 301).to_string();
    let request = signed("evt-1", &stale, body("user@example.com", b"raw"));

    let (status, body) = send(&fixture.router, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({ "message": "timestamp skew too large" }));
    assert!(fixture.store.is_empty());
}

#[tokio::test]
async fn tampered_body_is_unauthorized() {
    let fixture = fixture();
    let timestamp = now();
    let original = body("user@example.com", b"raw");
    let signature = SignatureVerifier::new(SECRET, 300).sign(&timestamp, &original);

    let request = Request::post(PATH)
        .header(TIMESTAMP_HEADER, &timestamp)
        .header(SIGNATURE_HEADER, signature)
        .header(EVENT_ID_HEADER, "evt-1")
        .body(Body::from(body("attacker@example.com", b"raw")))
        .unwrap();

    let (status, body) = send(&fixture.router, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({ "message": "signature mismatch" }));
    assert_eq!(fixture.processor.calls(), 0);
}

#[tokio::test]
async fn invalid_json_is_a_bad_request() {
    let fixture = fixture();
    let request = signed("evt-1", &now(), b"not json".to_vec());

    let (status, body) = send(&fixture.router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "message": "invalid json body" }));
    assert!(fixture.store.is_empty());
}

#[tokio::test]
async fn processes_a_signed_notification() {
    let fixture = fixture();
    let request = signed("evt-1", &now(), body("user@example.com", b"Subject: hi\r\n\r\nbody"));

    let (status, body) = send(&fixture.router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "success": true }));

    let seen = fixture.processor.seen.lock().unwrap().clone();
    assert_eq!(
        seen,
        vec![(
            "user@example.com".to_string(),
            b"Subject: hi\r\n\r\nbody".to_vec()
        )]
    );

    let event = fixture.store.get("evt-1").await.unwrap().unwrap();
    assert_eq!(event.status, EventStatus::Ok);
    assert_eq!(event.error, None);
}

#[tokio::test]
async fn duplicate_event_is_not_reprocessed() {
    let fixture = fixture();

    let first = signed("evt-1", &now(), body("user@example.com", b"raw"));
    assert_eq!(send(&fixture.router, first).await.0, StatusCode::OK);

    let retry = signed("evt-1", &now(), body("user@example.com", b"raw"));
    let (status, body) = send(&fixture.router, retry).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "success": true, "duplicate": true }));
    assert_eq!(fixture.processor.calls(), 1);
}

#[tokio::test]
async fn rejection_is_a_client_error() {
    let fixture = fixture_with(
        Some(SECRET),
        Recorder::failing(InboundError::Rejected("mailbox disabled".to_string())),
    );
    let request = signed("evt-1", &now(), body("user@example.com", b"raw"));

    let (status, body) = send(&fixture.router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "success": false, "message": "mailbox disabled" }));

    let event = fixture.store.get("evt-1").await.unwrap().unwrap();
    assert_eq!(event.status, EventStatus::Failed);
    assert_eq!(event.error.as_deref(), Some("mailbox disabled"));
}

#[tokio::test]
async fn processing_failure_is_a_server_error() {
    let fixture = fixture_with(
        Some(SECRET),
        Recorder::failing(InboundError::Failed("database unavailable".to_string())),
    );
    let request = signed("evt-1", &now(), body("user@example.com", b"raw"));

    let (status, body) = send(&fixture.router, request).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "success": false, "message": "internal error" }));

    let event = fixture.store.get("evt-1").await.unwrap().unwrap();
    assert_eq!(event.status, EventStatus::Failed);
}

#[tokio::test]
async fn undecodable_message_is_recorded_as_failed() {
    let fixture = fixture();
    let payload = serde_json::to_vec(&json!({
        "envelopeTo": "user@example.com",
        "rawMimeBase64": "%%%",
    }))
    .unwrap();

    let (status, _) = send(&fixture.router, signed("evt-1", &now(), payload)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(fixture.processor.calls(), 0);

    let event = fixture.store.get("evt-1").await.unwrap().unwrap();
    assert_eq!(event.status, EventStatus::Failed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_duplicates_are_processed_once() {
    let fixture = fixture();
    let timestamp = now();

    let requests = (0..16)
        .map(|_| {
            let router = fixture.router.clone();
            let request = signed("evt-race", &timestamp, body("user@example.com", b"raw"));
            tokio::spawn(async move { send(&router, request).await })
        })
        .collect::<Vec<_>>();

    let mut duplicates = 0;
    for request in requests {
        let (status, body) = request.await.unwrap();
        assert_eq!(status, StatusCode::OK);
        if body.get("duplicate").is_some() {
            duplicates += 1;
        }
    }

    assert_eq!(duplicates, 15);
    assert_eq!(fixture.processor.calls(), 1);
}

#[tokio::test]
async fn request_timeout_does_not_abandon_a_claimed_event() {
    let fixture = fixture_with_config(
        WebhookConfig {
            shared_secret: Some(SECRET.to_string()),
            request_timeout_secs: 1,
            ..WebhookConfig::default()
        },
        Recorder::slow(Duration::from_millis(1500)),
    );

    let request = signed("evt-slow", &now(), body("user@example.com", b"raw"));
    let response = fixture.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);

    let mut status = None;
    for _ in 0..50 {
        status = fixture
            .store
            .get("evt-slow")
            .await
            .unwrap()
            .map(|event| event.status);
        if status != Some(EventStatus::Processing) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    assert_eq!(status, Some(EventStatus::Ok));
    assert_eq!(fixture.processor.calls(), 1);
}
