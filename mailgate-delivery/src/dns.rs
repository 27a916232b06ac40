//! MX resolution for outbound delivery.
//!
//! Exchangers are returned in ascending preference order. A domain with no MX
//! data degrades to a single implicit exchanger, the domain itself.
//!
//! Results are cached in a `DashMap` keyed by domain. The record TTL is used,
//! bounded by `min_cache_ttl_secs` and `max_cache_ttl_secs`, unless
//! `cache_ttl_secs` overrides it.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use dashmap::DashMap;
use hickory_resolver::{
    ResolveError, TokioResolver,
    config::{ResolverConfig, ResolverOpts},
    name_server::TokioConnectionProvider,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// TTL assumed for an implicit exchanger, which has no record of its own.
const FALLBACK_TTL: u32 = 300;

#[derive(Debug, Error)]
pub enum DnsError {
    #[error("DNS lookup failed for {domain}: {source}")]
    LookupFailed {
        domain: String,
        #[source]
        source: ResolveError,
    },

    #[error("Unable to initialise DNS resolver: {0}")]
    Resolver(#[from] ResolveError),
}

#[derive(Debug, Clone, Deserialize)]
pub struct DnsConfig {
    /// Query timeout.
    ///
    /// Default: 5 seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Overrides the record TTL for every cache entry.
    #[serde(default)]
    pub cache_ttl_secs: Option<u64>,

    /// Default: 60 seconds
    #[serde(default = "default_min_cache_ttl_secs")]
    pub min_cache_ttl_secs: u64,

    /// Default: 3600 seconds
    #[serde(default = "default_max_cache_ttl_secs")]
    pub max_cache_ttl_secs: u64,
}

const fn default_timeout_secs() -> u64 {
    5
}

const fn default_min_cache_ttl_secs() -> u64 {
    60
}

const fn default_max_cache_ttl_secs() -> u64 {
    3600
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            cache_ttl_secs: None,
            min_cache_ttl_secs: default_min_cache_ttl_secs(),
            max_cache_ttl_secs: default_max_cache_ttl_secs(),
        }
    }
}

/// A candidate delivery host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailServer {
    pub host: String,
    /// MX preference, lower is tried first. 0 for the implicit exchanger.
    pub priority: u16,
    pub port: u16,
}

impl MailServer {
    #[must_use]
    pub fn new(host: impl Into<String>, priority: u16, port: u16) -> Self {
        Self {
            host: host.into(),
            priority,
            port,
        }
    }

    /// `host:port`
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Source of the exchangers for a recipient domain.
#[async_trait]
pub trait MxResolver: Send + Sync {
    /// Candidate hosts, most preferred first. Never empty on success.
    async fn resolve(&self, domain: &str) -> Result<Arc<Vec<MailServer>>, DnsError>;
}

#[derive(Debug, Clone)]
struct CachedResult {
    servers: Arc<Vec<MailServer>>,
    expires_at: Instant,
}

/// [`MxResolver`] backed by the system resolver configuration.
#[derive(Debug)]
pub struct DnsResolver {
    resolver: TokioResolver,
    cache: DashMap<String, CachedResult>,
    config: DnsConfig,
    port: u16,
}

impl DnsResolver {
    /// Uses the system resolver configuration. Every exchanger is contacted
    /// on `port`.
    pub fn new(config: DnsConfig, port: u16) -> Result<Self, DnsError> {
        let mut opts = ResolverOpts::default();
        opts.timeout = Duration::from_secs(config.timeout_secs);

        let resolver = TokioResolver::builder(TokioConnectionProvider::default())?
            .with_options(opts)
            .build();

        Ok(Self {
            resolver,
            cache: DashMap::new(),
            config,
            port,
        })
    }

    /// Uses explicit nameservers instead of the system configuration.
    #[must_use]
    pub fn with_resolver_config(
        resolver_config: ResolverConfig,
        opts: ResolverOpts,
        config: DnsConfig,
        port: u16,
    ) -> Self {
        let resolver =
            TokioResolver::builder_with_config(resolver_config, TokioConnectionProvider::default())
                .with_options(opts)
                .build();

        Self {
            resolver,
            cache: DashMap::new(),
            config,
            port,
        }
    }

    fn cache_ttl(&self, record_ttl: u32) -> Duration {
        let secs = self.config.cache_ttl_secs.unwrap_or_else(|| {
            u64::from(record_ttl).clamp(
                self.config.min_cache_ttl_secs,
                self.config.max_cache_ttl_secs,
            )
        });

        Duration::from_secs(secs)
    }

    async fn resolve_uncached(&self, domain: &str) -> Result<(Vec<MailServer>, u32), DnsError> {
        let implicit = || (vec![MailServer::new(domain, 0, self.port)], FALLBACK_TTL);

        match self.resolver.mx_lookup(domain).await {
            Ok(lookup) => {
                let ttl = lookup
                    .as_lookup()
                    .records()
                    .iter()
                    .map(hickory_resolver::proto::rr::Record::ttl)
                    .min()
                    .unwrap_or(FALLBACK_TTL);

                let mut servers: Vec<MailServer> = lookup
                    .iter()
                    .map(|mx| {
                        let host = mx.exchange().to_utf8();
                        MailServer::new(host.trim_end_matches('.'), mx.preference(), self.port)
                    })
                    .filter(|server| !server.host.is_empty())
                    .collect();

                if servers.is_empty() {
                    debug!("MX lookup for {domain} returned no usable records, using {domain}");
                    return Ok(implicit());
                }

                servers.sort_by_key(|server| server.priority);
                Ok((servers, ttl))
            }
            // hickory reports NODATA, NXDOMAIN, SERVFAIL and NOTIMP answers as
            // NoRecordsFound; all of them degrade to a direct connection.
            Err(err) if err.is_no_records_found() || err.is_nx_domain() => {
                debug!("No MX records for {domain} ({err}), using {domain}");
                Ok(implicit())
            }
            Err(source) => {
                warn!("MX lookup failed for {domain}: {source}");
                Err(DnsError::LookupFailed {
                    domain: domain.to_string(),
                    source,
                })
            }
        }
    }
}

#[async_trait]
impl MxResolver for DnsResolver {
    async fn resolve(&self, domain: &str) -> Result<Arc<Vec<MailServer>>, DnsError> {
        let domain = domain.to_ascii_lowercase();

        if let Some(cached) = self.cache.get(&domain)
            && cached.expires_at > Instant::now()
        {
            debug!("Cache hit for {domain}, {} server(s)", cached.servers.len());
            return Ok(Arc::clone(&cached.servers));
        }

        let (servers, ttl) = self.resolve_uncached(&domain).await?;
        let servers = Arc::new(servers);
        let cache_ttl = self.cache_ttl(ttl);

        self.cache.insert(
            domain.clone(),
            CachedResult {
                servers: Arc::clone(&servers),
                expires_at: Instant::now() + cache_ttl,
            },
        );

        debug!(
            "Resolved {} server(s) for {domain}, caching for {}s",
            servers.len(),
            cache_ttl.as_secs()
        );
        Ok(servers)
    }
}
