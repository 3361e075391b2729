//! Hostname resolution that does not trust a single cached answer.
//!
//! [`Resolver::resolve`] asks the system resolver first and, when that fails, queries a
//! fallback name server directly over UDP for A, AAAA and CNAME records. CNAME targets are
//! followed recursively up to a fixed depth so a looping chain fails instead of spinning.
//!
//! # Examples
//! ```rust,no_run
//! use hostcheck::dns::Resolver;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let resolver = Resolver::default();
//!     let cancel = CancellationToken::new();
//!     match resolver.resolve(&cancel, "example.com").await {
//!         Ok(ips) => println!("resolved: {:?}", ips),
//!         Err(e) => println!("lookup failed: {}", e),
//!     }
//! }
//! ```

use async_trait::async_trait;
use hickory_client::rr::RecordType;
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

pub mod query;
pub mod system;

pub use query::*;
pub use system::*;

pub const DEFAULT_FALLBACK_SERVER: SocketAddr =
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1)), 53);
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);
pub const MAX_CNAME_DEPTH: usize = 3;

#[derive(Error, Debug)]
pub enum DnsError {
    #[error("no such host")]
    NotFound,
    #[error("maximum CNAME resolution depth reached: {0}")]
    DepthExceeded(usize),
    #[error("DNS query timeout")]
    Timeout,
    #[error("DNS resolution canceled")]
    Canceled,
    #[error("invalid domain {name:?}: {reason}")]
    InvalidName { name: String, reason: String },
    #[error("failed to query {record_type} records: {message}")]
    Query {
        record_type: RecordType,
        message: String,
    },
    #[error("system resolver failed: {0}")]
    System(String),
    #[error("failed to resolve CNAME {target:?}: {source}")]
    Cname {
        target: String,
        #[source]
        source: Box<DnsError>,
    },
}

impl DnsError {
    /// The innermost error, looking through CNAME wrapping.
    pub fn root(&self) -> &DnsError {
        match self {
            DnsError::Cname { source, .. } => source.root(),
            other => other,
        }
    }
}

/// A single answer record relevant to address resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    Ip(IpAddr),
    Alias(String),
}

impl Answer {
    pub fn ip(self) -> Option<IpAddr> {
        match self {
            Answer::Ip(ip) => Some(ip),
            Answer::Alias(_) => None,
        }
    }

    pub fn alias(self) -> Option<String> {
        match self {
            Answer::Alias(target) => Some(target),
            Answer::Ip(_) => None,
        }
    }
}

/// Direct record queries against a specific name server.
#[async_trait]
pub trait RecordQuery: Send + Sync {
    async fn query(
        &self,
        server: SocketAddr,
        name: &str,
        record_type: RecordType,
    ) -> Result<Vec<Answer>, DnsError>;
}

/// The platform's view of a hostname.
#[async_trait]
pub trait SystemLookup: Send + Sync {
    async fn lookup_ip(&self, hostname: &str) -> Result<Vec<IpAddr>, DnsError>;
}

type ResolveFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<IpAddr>, DnsError>> + Send + 'a>>;

#[derive(Clone)]
pub struct Resolver {
    system: Arc<dyn SystemLookup>,
    records: Arc<dyn RecordQuery>,
    server: SocketAddr,
    timeout: Duration,
    max_depth: usize,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new(DEFAULT_FALLBACK_SERVER)
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("server", &self.server)
            .field("timeout", &self.timeout)
            .field("max_depth", &self.max_depth)
            .finish_non_exhaustive()
    }
}

impl Resolver {
    pub fn new(server: SocketAddr) -> Self {
        Self {
            system: Arc::new(SystemResolver::new(DEFAULT_QUERY_TIMEOUT)),
            records: Arc::new(UdpRecordQuery::new(DEFAULT_QUERY_TIMEOUT)),
            server,
            timeout: DEFAULT_QUERY_TIMEOUT,
            max_depth: MAX_CNAME_DEPTH,
        }
    }

    pub fn with_system(mut self, system: Arc<dyn SystemLookup>) -> Self {
        self.system = system;
        self
    }

    pub fn with_record_query(mut self, records: Arc<dyn RecordQuery>) -> Self {
        self.records = records;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn server(&self) -> SocketAddr {
        self.server
    }

    /// Resolves `hostname` through the system resolver, falling back to direct queries.
    pub async fn resolve(
        &self,
        cancel: &CancellationToken,
        hostname: &str,
    ) -> Result<Vec<IpAddr>, DnsError> {
        if let Ok(ip) = hostname.parse::<IpAddr>() {
            return Ok(vec![ip]);
        }

        let system = tokio::select! {
            _ = cancel.cancelled() => return Err(DnsError::Canceled),
            res = timeout(self.timeout, self.system.lookup_ip(hostname)) => {
                res.unwrap_or(Err(DnsError::Timeout))
            }
        };
        match system {
            Ok(ips) if !ips.is_empty() => return Ok(ips),
            Ok(_) => log::debug!("system resolver returned no addresses for {}", hostname),
            Err(e) => log::debug!(
                "system resolver failed for {}: {}, querying {}",
                hostname,
                e,
                self.server
            ),
        }

        self.lookup(cancel, hostname).await
    }

    /// Resolves `hostname` by querying the fallback server directly, bypassing caches.
    pub async fn lookup(
        &self,
        cancel: &CancellationToken,
        hostname: &str,
    ) -> Result<Vec<IpAddr>, DnsError> {
        if let Ok(ip) = hostname.parse::<IpAddr>() {
            return Ok(vec![ip]);
        }

        let ips = self.resolve_recursive(cancel, hostname, 0).await?;
        if ips.is_empty() {
            return Err(DnsError::NotFound);
        }
        Ok(ips)
    }

    fn resolve_recursive<'a>(
        &'a self,
        cancel: &'a CancellationToken,
        hostname: &'a str,
        depth: usize,
    ) -> ResolveFuture<'a> {
        Box::pin(async move {
            if depth > self.max_depth {
                return Err(DnsError::DepthExceeded(self.max_depth));
            }

            let a = self.query(cancel, hostname, RecordType::A).await?;
            let aaaa = self.query(cancel, hostname, RecordType::AAAA).await?;
            let mut ips: Vec<IpAddr> = a.into_iter().chain(aaaa).filter_map(Answer::ip).collect();

            // duplicates across CNAME branches are kept so the caller sees every record
            let cnames = self.query(cancel, hostname, RecordType::CNAME).await?;
            for target in cnames.into_iter().filter_map(Answer::alias) {
                let resolved = self
                    .resolve_recursive(cancel, &target, depth + 1)
                    .await
                    .map_err(|e| DnsError::Cname {
                        target: target.clone(),
                        source: Box::new(e),
                    })?;
                ips.extend(resolved);
            }
            Ok(ips)
        })
    }

    async fn query(
        &self,
        cancel: &CancellationToken,
        name: &str,
        record_type: RecordType,
    ) -> Result<Vec<Answer>, DnsError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(DnsError::Canceled),
            res = timeout(self.timeout, self.records.query(self.server, name, record_type)) => {
                res.map_err(|_| DnsError::Timeout)?
            }
        }
    }
}
