#![allow(dead_code)]

pub mod mock_server;

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use mailgate_delivery::{DnsError, MailServer, MxResolver};

/// Resolver answering from a fixed table. Unknown domains resolve to
/// themselves, like a domain without MX records.
#[derive(Default)]
pub struct StaticResolver {
    records: HashMap<String, Arc<Vec<MailServer>>>,
}

impl StaticResolver {
    #[must_use]
    pub fn with(mut self, domain: &str, servers: Vec<MailServer>) -> Self {
        self.records.insert(domain.to_string(), Arc::new(servers));
        self
    }
}

#[async_trait]
impl MxResolver for StaticResolver {
    async fn resolve(&self, domain: &str) -> Result<Arc<Vec<MailServer>>, DnsError> {
        Ok(self
            .records
            .get(domain)
            .cloned()
            .unwrap_or_else(|| Arc::new(vec![MailServer::new(domain, 0, 25)])))
    }
}

/// A local port with nothing listening on it.
pub async fn closed_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}
