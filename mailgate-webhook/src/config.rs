use std::net::SocketAddr;

use serde::Deserialize;

/// Configuration for the inbound webhook gateway.
#[derive(Clone, Deserialize)]
pub struct WebhookConfig {
    /// Default: `[::]:8787`
    #[serde(default = "default_listen_address")]
    pub listen_address: SocketAddr,

    /// Route the notifications are posted to.
    ///
    /// Default: `/api/internal/inbound-email`
    #[serde(default = "default_path")]
    pub path: String,

    /// Key for the HMAC-SHA256 request signature. Without it every
    /// notification is refused.
    #[serde(default)]
    pub shared_secret: Option<String>,

    /// Largest accepted difference, either way, between the signed
    /// timestamp and the local clock.
    ///
    /// Default: 300 seconds
    #[serde(default = "default_max_skew_secs")]
    pub max_skew_secs: u64,

    /// Default: 30 seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Upper bound on a request body. The message travels base64 encoded,
    /// so this needs headroom over the SMTP size limit.
    ///
    /// Default: 36 MiB
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_listen_address() -> SocketAddr {
    SocketAddr::from(([0u16; 8], 8787))
}

fn default_path() -> String {
    "/api/internal/inbound-email".to_string()
}

const fn default_max_skew_secs() -> u64 {
    300
}

const fn default_request_timeout_secs() -> u64 {
    30
}

const fn default_max_body_bytes() -> usize {
    36 * 1024 * 1024
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            path: default_path(),
            shared_secret: None,
            max_skew_secs: default_max_skew_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl std::fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookConfig")
            .field("listen_address", &self.listen_address)
            .field("path", &self.path)
            .field("shared_secret", &self.shared_secret.as_ref().map(|_| "<redacted>"))
            .field("max_skew_secs", &self.max_skew_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_body_bytes", &self.max_body_bytes)
            .finish()
    }
}
