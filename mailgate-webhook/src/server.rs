use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::HeaderMap,
    routing::{get, post},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use mailgate_common::{
    Signal,
    inbound::{InboundDispatcher, InboundError},
    internal,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::{net::TcpListener, sync::broadcast};
use tower_http::timeout::TimeoutLayer;

use crate::{
    config::WebhookConfig,
    error::{GatewayError, WebhookError},
    signature::SignatureVerifier,
    store::{EventStatus, EventStore},
};

pub const TIMESTAMP_HEADER: &str = "X-CM-Timestamp";
pub const SIGNATURE_HEADER: &str = "X-CM-Signature";
pub const EVENT_ID_HEADER: &str = "X-CM-Event-Id";

/// Body of an inbound notification.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundPayload {
    #[serde(default)]
    pub envelope_to: String,
    #[serde(default)]
    pub raw_mime_base64: String,
}

#[derive(Clone)]
struct GatewayState {
    verifier: Option<Arc<SignatureVerifier>>,
    store: Arc<dyn EventStore>,
    dispatcher: InboundDispatcher,
}

/// HTTP entry point for signed inbound notifications.
pub struct WebhookGateway {
    config: WebhookConfig,
    state: GatewayState,
}

impl WebhookGateway {
    pub fn new(
        config: WebhookConfig,
        store: Arc<dyn EventStore>,
        dispatcher: InboundDispatcher,
    ) -> Self {
        let verifier = config
            .shared_secret
            .as_deref()
            .filter(|secret| !secret.is_empty())
            .map(|secret| Arc::new(SignatureVerifier::new(secret, config.max_skew_secs)));

        if verifier.is_none() {
            tracing::warn!(
                path = %config.path,
                "No shared secret configured, every inbound notification will be refused"
            );
        }

        Self {
            config,
            state: GatewayState {
                verifier,
                store,
                dispatcher,
            },
        }
    }

    pub const fn config(&self) -> &WebhookConfig {
        &self.config
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route(&self.config.path, post(receive))
            .route("/healthz", get(healthz))
            .with_state(self.state.clone())
            .layer(DefaultBodyLimit::max(self.config.max_body_bytes))
            .layer(TimeoutLayer::new(Duration::from_secs(
                self.config.request_timeout_secs,
            )))
    }

    /// Binds the configured address and serves until shutdown is signalled.
    pub async fn serve(self, shutdown: broadcast::Receiver<Signal>) -> Result<(), WebhookError> {
        let address = self.config.listen_address;
        let listener = TcpListener::bind(address)
            .await
            .map_err(|source| WebhookError::Bind { address, source })?;

        self.serve_on(listener, shutdown).await
    }

    pub async fn serve_on(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<Signal>,
    ) -> Result<(), WebhookError> {
        let address: Option<SocketAddr> = listener.local_addr().ok();
        tracing::info!(?address, path = %self.config.path, "Webhook gateway listening");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Webhook gateway received shutdown signal");
            })
            .await?;

        tracing::info!("Webhook gateway stopped");
        Ok(())
    }
}

async fn healthz() -> Json<Value> {
    Json(json!({ "ok": true }))
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

async fn receive(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, GatewayError> {
    let verifier = state.verifier.as_ref().ok_or(GatewayError::NotConfigured)?;

    let (Some(timestamp), Some(signature), Some(event_id)) = (
        header(&headers, TIMESTAMP_HEADER),
        header(&headers, SIGNATURE_HEADER),
        header(&headers, EVENT_ID_HEADER),
    ) else {
        return Err(GatewayError::MissingSignals);
    };

    verifier.verify(timestamp, signature, &body)?;

    let payload: InboundPayload =
        serde_json::from_slice(&body).map_err(|_| GatewayError::InvalidJson)?;

    // Detached from the request: a claimed event must reach `ok` or `failed`
    // even when the response times out.
    tokio::spawn(handle_event(state, event_id.to_string(), payload))
        .await
        .map_err(|err| GatewayError::Processing(err.to_string()))?
}

#[tracing::instrument(skip(state, payload))]
async fn handle_event(
    state: GatewayState,
    event_id: String,
    payload: InboundPayload,
) -> Result<Json<Value>, GatewayError> {
    let state = &state;
    let event_id = event_id.as_str();

    if !state.store.claim(event_id).await? {
        internal!("Duplicate notification ignored");
        return Ok(Json(json!({ "success": true, "duplicate": true })));
    }

    let Ok(raw) = STANDARD.decode(payload.raw_mime_base64.trim()) else {
        let reason = "rawMimeBase64 is not valid base64".to_string();
        record(state, event_id, EventStatus::Failed, Some(reason.clone())).await;
        return Err(GatewayError::InvalidPayload(reason));
    };

    let recipient = payload.envelope_to.trim();

    match state.dispatcher.dispatch(recipient, &raw).await {
        Ok(()) => {
            record(state, event_id, EventStatus::Ok, None).await;
            tracing::info!(recipient, size = raw.len(), "Inbound notification processed");
            Ok(Json(json!({ "success": true })))
        }
        Err(err) => {
            record(state, event_id, EventStatus::Failed, Some(err.to_string())).await;
            match err {
                InboundError::Rejected(reason) => {
                    tracing::info!(recipient, %reason, "Inbound notification rejected");
                    Err(GatewayError::Rejected(reason))
                }
                InboundError::Failed(reason) => Err(GatewayError::Processing(reason)),
            }
        }
    }
}

async fn record(state: &GatewayState, event_id: &str, status: EventStatus, error: Option<String>) {
    if let Err(err) = state.store.mark_status(event_id, status, error).await {
        tracing::error!(event_id, %status, "Failed to record event status: {err}");
    }
}
