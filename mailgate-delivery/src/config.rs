use mailgate_common::config::{ClientTimeouts, TlsPolicy};
use serde::Deserialize;

use crate::dns::DnsConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Name announced in EHLO. Falls back to the sender's domain, then
    /// `localhost`.
    #[serde(default)]
    pub helo_name: Option<String>,

    /// Port used for every resolved exchanger.
    ///
    /// Default: 25
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub tls: TlsPolicy,

    #[serde(default)]
    pub timeouts: ClientTimeouts,

    #[serde(default)]
    pub dns: DnsConfig,
}

const fn default_port() -> u16 {
    25
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            helo_name: None,
            port: default_port(),
            tls: TlsPolicy::default(),
            timeouts: ClientTimeouts::default(),
            dns: DnsConfig::default(),
        }
    }
}
