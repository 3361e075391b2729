use super::{DnsError, SystemLookup};
use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::system_conf;
use hickory_resolver::TokioAsyncResolver;
use std::net::IpAddr;
use std::time::Duration;

/// Resolves through the host's configured name servers and hosts file.
///
/// A fresh resolver is built per lookup so no answer is reused between tests.
#[derive(Debug, Clone)]
pub struct SystemResolver {
    timeout: Duration,
}

impl SystemResolver {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl SystemLookup for SystemResolver {
    async fn lookup_ip(&self, hostname: &str) -> Result<Vec<IpAddr>, DnsError> {
        let (config, mut opts) = match system_conf::read_system_conf() {
            Ok(conf) => conf,
            Err(e) => {
                log::warn!("Could not read system DNS config, using default: {}", e);
                (ResolverConfig::default(), ResolverOpts::default())
            }
        };
        opts.timeout = self.timeout;
        opts.cache_size = 0;

        let resolver = TokioAsyncResolver::tokio(config, opts);
        let lookup = resolver
            .lookup_ip(hostname)
            .await
            .map_err(|e| DnsError::System(e.to_string()))?;
        Ok(lookup.iter().collect())
    }
}
