use super::{Answer, DnsError, RecordQuery};
use async_trait::async_trait;
use hickory_client::rr::{Name, RData, RecordType};
use hickory_resolver::config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts};
use hickory_resolver::error::ResolveErrorKind;
use hickory_resolver::TokioAsyncResolver;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

/// Uncached UDP queries against a single name server.
#[derive(Debug, Clone)]
pub struct UdpRecordQuery {
    timeout: Duration,
}

impl UdpRecordQuery {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn resolver(&self, server: SocketAddr) -> TokioAsyncResolver {
        let mut config = ResolverConfig::new();
        config.add_name_server(NameServerConfig::new(server, Protocol::Udp));

        let mut opts = ResolverOpts::default();
        opts.ndots = 0;
        opts.timeout = self.timeout;
        opts.attempts = 1;
        opts.cache_size = 0;
        opts.use_hosts_file = false;

        TokioAsyncResolver::tokio(config, opts)
    }
}

fn fqdn(name: &str) -> Result<Name, DnsError> {
    let absolute = if name.ends_with('.') {
        name.to_string()
    } else {
        format!("{name}.")
    };
    Name::from_str(&absolute).map_err(|e| DnsError::InvalidName {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl RecordQuery for UdpRecordQuery {
    async fn query(
        &self,
        server: SocketAddr,
        name: &str,
        record_type: RecordType,
    ) -> Result<Vec<Answer>, DnsError> {
        let name = fqdn(name)?;
        let lookup = match self.resolver(server).lookup(name, record_type).await {
            Ok(lookup) => lookup,
            Err(e) => match e.kind() {
                ResolveErrorKind::NoRecordsFound { .. } => return Ok(Vec::new()),
                _ => {
                    return Err(DnsError::Query {
                        record_type,
                        message: e.to_string(),
                    })
                }
            },
        };

        // the resolver may include records from a followed alias; keep only what was asked
        let answers = lookup
            .record_iter()
            .filter(|record| record.record_type() == record_type)
            .filter_map(|record| match record.data() {
                Some(RData::A(a)) => Some(Answer::Ip(IpAddr::V4(a.0))),
                Some(RData::AAAA(aaaa)) => Some(Answer::Ip(IpAddr::V6(aaaa.0))),
                Some(RData::CNAME(cname)) => Some(Answer::Alias(cname.0.to_utf8())),
                other => {
                    log::debug!("ignoring {:?} answer for {} query", other, record_type);
                    None
                }
            })
            .collect();
        Ok(answers)
    }
}
