//! Inbound SMTP: a closed relay that accepts mail only for configured domains
//! and hands each message to the shared inbound dispatcher.

mod command;
mod listener;
mod session;

use std::{net::SocketAddr, path::PathBuf};

use mailgate_common::config::ServerTimeouts;
use serde::Deserialize;

pub use listener::Listener;

#[derive(Debug, Clone, Deserialize)]
pub struct ListenerConfig {
    #[serde(default = "defaults::socket")]
    pub socket: SocketAddr,

    /// Host name announced in the greeting and EHLO reply.
    #[serde(default = "defaults::banner")]
    pub banner: String,

    /// Recipient domains this server accepts mail for. Anything else is
    /// refused as relaying.
    #[serde(default)]
    pub accepted_domains: Vec<String>,

    /// Default: 25 MiB
    #[serde(default = "defaults::max_message_size")]
    pub max_message_size: usize,

    /// When set, clients must authenticate with these credentials before
    /// MAIL FROM. When unset, AUTH is not offered.
    #[serde(default)]
    pub auth: Option<AuthConfig>,

    /// STARTTLS is offered only if these load at startup.
    #[serde(default)]
    pub tls: Option<TlsFiles>,

    #[serde(default)]
    pub timeouts: ServerTimeouts,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            socket: defaults::socket(),
            banner: defaults::banner(),
            accepted_domains: Vec::new(),
            max_message_size: defaults::max_message_size(),
            auth: None,
            tls: None,
            timeouts: ServerTimeouts::default(),
        }
    }
}

impl ListenerConfig {
    /// Case-insensitive membership in the accepted domain list.
    pub fn accepts(&self, domain: &str) -> bool {
        self.accepted_domains
            .iter()
            .any(|accepted| accepted.eq_ignore_ascii_case(domain))
    }
}

#[derive(Clone, Deserialize)]
pub struct AuthConfig {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TlsFiles {
    #[serde(default)]
    pub certificate: Option<PathBuf>,
    #[serde(default)]
    pub key: Option<PathBuf>,
}

mod defaults {
    use std::net::{Ipv6Addr, SocketAddr};

    pub const fn socket() -> SocketAddr {
        SocketAddr::new(std::net::IpAddr::V6(Ipv6Addr::UNSPECIFIED), 25)
    }

    pub fn banner() -> String {
        std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
    }

    pub const fn max_message_size() -> usize {
        25 * 1024 * 1024
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepted_domains_ignore_case() {
        let config = ListenerConfig {
            accepted_domains: vec!["Example.COM".to_string()],
            ..ListenerConfig::default()
        };

        assert!(config.accepts("example.com"));
        assert!(!config.accepts("other.example"));
    }

    #[test]
    fn config_from_ron() {
        let config: ListenerConfig = ron::from_str(
            r#"(
                socket: "127.0.0.1:2525",
                banner: "mx.example",
                accepted_domains: ["example.com"],
                auth: Some((username: "relay", password: "secret")),
                tls: Some((certificate: Some("/etc/mailgate/cert.pem"))),
            )"#,
        )
        .expect("valid config");

        assert_eq!(config.socket.port(), 2525);
        assert_eq!(config.max_message_size, 25 * 1024 * 1024);
        assert!(config.auth.is_some());
        assert!(config.tls.is_some_and(|tls| tls.key.is_none()));
        assert!(!format!("{:?}", config.auth).contains("secret"));
    }
}
