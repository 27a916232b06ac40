//! Timeout configuration for SMTP sessions.
//!
//! Every suspension point (connect, each command exchange, the TLS handshake)
//! is bounded on its own. A timeout fails the transaction it belongs to, never
//! the process.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timeouts applied by the inbound listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerTimeouts {
    /// Time allowed for the client to send each command line.
    ///
    /// Default: 300 seconds (RFC 5321 section 4.5.3.2)
    #[serde(default = "defaults::server_command_secs")]
    pub command_secs: u64,

    /// Time allowed between lines while a message body is streaming.
    ///
    /// Default: 180 seconds
    #[serde(default = "defaults::server_data_secs")]
    pub data_secs: u64,

    /// Time allowed for the TLS handshake after STARTTLS.
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::handshake_secs")]
    pub tls_handshake_secs: u64,
}

impl Default for ServerTimeouts {
    fn default() -> Self {
        Self {
            command_secs: defaults::server_command_secs(),
            data_secs: defaults::server_data_secs(),
            tls_handshake_secs: defaults::handshake_secs(),
        }
    }
}

impl ServerTimeouts {
    #[must_use]
    pub const fn command(&self) -> Duration {
        Duration::from_secs(self.command_secs)
    }

    #[must_use]
    pub const fn data(&self) -> Duration {
        Duration::from_secs(self.data_secs)
    }

    #[must_use]
    pub const fn tls_handshake(&self) -> Duration {
        Duration::from_secs(self.tls_handshake_secs)
    }
}

/// Timeouts applied by the delivery engine.
///
/// `default_secs` bounds every operation whose own timeout is unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientTimeouts {
    /// Default: 20 seconds
    #[serde(default = "defaults::client_default_secs")]
    pub default_secs: u64,

    /// Establishing the TCP connection.
    #[serde(default)]
    pub connect_secs: Option<u64>,

    /// Writing one command and reading its full reply block.
    #[serde(default)]
    pub command_secs: Option<u64>,

    /// The TLS handshake following a 220 reply to STARTTLS.
    #[serde(default)]
    pub tls_handshake_secs: Option<u64>,
}

impl Default for ClientTimeouts {
    fn default() -> Self {
        Self {
            default_secs: defaults::client_default_secs(),
            connect_secs: None,
            command_secs: None,
            tls_handshake_secs: None,
        }
    }
}

impl ClientTimeouts {
    /// Every operation bounded by the same duration.
    #[must_use]
    pub const fn uniform(secs: u64) -> Self {
        Self {
            default_secs: secs,
            connect_secs: None,
            command_secs: None,
            tls_handshake_secs: None,
        }
    }

    #[must_use]
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs.unwrap_or(self.default_secs))
    }

    #[must_use]
    pub fn command(&self) -> Duration {
        Duration::from_secs(self.command_secs.unwrap_or(self.default_secs))
    }

    #[must_use]
    pub fn tls_handshake(&self) -> Duration {
        Duration::from_secs(self.tls_handshake_secs.unwrap_or(self.default_secs))
    }
}

mod defaults {
    pub const fn server_command_secs() -> u64 {
        300
    }

    pub const fn server_data_secs() -> u64 {
        180
    }

    pub const fn handshake_secs() -> u64 {
        30
    }

    pub const fn client_default_secs() -> u64 {
        20
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_timeouts_fall_back_to_default() {
        let timeouts = ClientTimeouts {
            connect_secs: Some(5),
            ..ClientTimeouts::default()
        };

        assert_eq!(timeouts.connect(), Duration::from_secs(5));
        assert_eq!(timeouts.command(), Duration::from_secs(20));
        assert_eq!(timeouts.tls_handshake(), Duration::from_secs(20));
    }

    #[test]
    fn test_client_timeouts_from_partial_ron() {
        let timeouts: ClientTimeouts =
            ron::from_str("(default_secs: 7, command_secs: Some(3))").expect("valid config");

        assert_eq!(timeouts.connect(), Duration::from_secs(7));
        assert_eq!(timeouts.command(), Duration::from_secs(3));
    }

    #[test]
    fn test_server_timeouts_default() {
        let timeouts = ServerTimeouts::default();
        assert_eq!(timeouts.command(), Duration::from_secs(300));
        assert_eq!(timeouts.data(), Duration::from_secs(180));
        assert_eq!(timeouts.tls_handshake(), Duration::from_secs(30));
    }
}
