use std::net::SocketAddr;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::{signature::SignatureError, store::StoreError};

/// Failures of the gateway server itself.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("Failed to bind webhook gateway to {address}: {source}")]
    Bind {
        address: SocketAddr,
        source: std::io::Error,
    },

    #[error("Webhook gateway error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Why a notification was not processed, mapped onto an HTTP response.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("inbound secret not configured")]
    NotConfigured,

    #[error("missing signature headers")]
    MissingSignals,

    #[error(transparent)]
    Signature(#[from] SignatureError),

    #[error("invalid json body")]
    InvalidJson,

    /// The notification verified but its content cannot be used.
    #[error("{0}")]
    InvalidPayload(String),

    /// The pipeline refused the message. Senders should not retry.
    #[error("{0}")]
    Rejected(String),

    /// The pipeline failed. Senders may retry.
    #[error("{0}")]
    Processing(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl GatewayError {
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::NotConfigured | Self::Processing(_) | Self::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::Signature(err) if !err.is_malformed() => StatusCode::UNAUTHORIZED,
            Self::MissingSignals
            | Self::Signature(_)
            | Self::InvalidJson
            | Self::InvalidPayload(_)
            | Self::Rejected(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();

        let body = match &self {
            Self::Processing(_) | Self::Store(_) => {
                tracing::error!("Inbound notification failed: {self}");
                json!({ "success": false, "message": "internal error" })
            }
            Self::InvalidPayload(message) | Self::Rejected(message) => {
                json!({ "success": false, "message": message })
            }
            _ => json!({ "message": self.to_string() }),
        };

        (status, Json(body)).into_response()
    }
}
