//! A single protocol test against one of a host's endpoints.
//!
//! A probe walks `Resolve -> Dial -> Handshake -> Scan -> Validate` exactly once. The first
//! failing stage records its error and ends the probe; fields of later stages stay unset.

pub mod client;
pub mod settings;
pub mod validate;

pub use client::*;
pub use settings::*;
pub use validate::*;

use crate::dns::{DnsError, Resolver};
use crate::network::{split_host_port, DialError, NetAddress, PublicKey, TransportKind};
use crate::utils::{duration_ms, format_duration, measure_time};
use crate::version::SemVer;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

pub const CANCELED: &str = "test canceled";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolTestResult {
    pub net_address: NetAddress,
    #[serde(default)]
    pub resolved_addresses: Vec<IpAddr>,

    pub connected: bool,
    #[serde(with = "duration_ms")]
    pub dial_time: Duration,

    pub handshake: bool,
    #[serde(with = "duration_ms")]
    pub handshake_time: Duration,

    pub scanned: bool,
    #[serde(with = "duration_ms")]
    pub scan_time: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Settings>,

    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl ProtocolTestResult {
    pub fn new(net_address: NetAddress) -> Self {
        Self {
            net_address,
            resolved_addresses: Vec::new(),
            connected: false,
            dial_time: Duration::ZERO,
            handshake: false,
            handshake_time: Duration::ZERO,
            scanned: false,
            scan_time: Duration::ZERO,
            settings: None,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// A result for an address that was rejected before any network activity.
    pub fn rejected(net_address: NetAddress, error: impl Into<String>) -> Self {
        let mut result = Self::new(net_address);
        result.errors.push(error.into());
        result
    }

    /// A result for an address that does not apply to the current network.
    pub fn skipped(net_address: NetAddress, warning: impl Into<String>) -> Self {
        let mut result = Self::new(net_address);
        result.warnings.push(warning.into());
        result
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// The release string the host reported, if the scan got that far.
    pub fn release(&self) -> Option<&str> {
        self.settings.as_ref().and_then(Settings::release)
    }
}

/// Everything a probe needs from the world besides its own client.
#[derive(Clone)]
pub struct ProbeContext {
    pub resolver: Resolver,
    pub latest_release: SemVer,
    pub tip_height: u64,
    pub dial_timeout: Duration,
    pub cancel: CancellationToken,
}

enum Stage {
    Resolve,
    Dial,
    Handshake(RawConnection),
    Scan(TransportHandle),
    Validate(Settings),
    Done,
}

pub struct Probe {
    host_key: PublicKey,
    net_address: NetAddress,
    client: Arc<dyn ProtocolClient>,
}

impl Probe {
    pub fn new(
        host_key: PublicKey,
        net_address: NetAddress,
        client: Arc<dyn ProtocolClient>,
    ) -> Self {
        Self {
            host_key,
            net_address,
            client,
        }
    }

    pub async fn run(self, ctx: &ProbeContext) -> ProtocolTestResult {
        let start = Instant::now();
        let mut result = ProtocolTestResult::new(self.net_address.clone());

        let mut stage = Stage::Resolve;
        loop {
            stage = match stage {
                Stage::Resolve => self.resolve(ctx, &mut result).await,
                Stage::Dial => self.dial(ctx, &mut result).await,
                Stage::Handshake(conn) => self.handshake(ctx, conn, &mut result).await,
                Stage::Scan(transport) => self.scan(ctx, transport, &mut result).await,
                Stage::Validate(settings) => self.validate(ctx, settings, &mut result),
                Stage::Done => break,
            };
        }

        log::debug!(
            "{} finished in {} ({} errors, {} warnings)",
            self.net_address,
            format_duration(start.elapsed()),
            result.errors.len(),
            result.warnings.len()
        );
        result
    }

    async fn resolve(&self, ctx: &ProbeContext, result: &mut ProtocolTestResult) -> Stage {
        let host = match split_host_port(&self.net_address.address) {
            Ok((host, _)) => host,
            Err(e) => {
                return fail(
                    result,
                    format!(
                        "failed to parse net address {:?}: {}",
                        self.net_address.address, e
                    ),
                )
            }
        };

        match ctx.resolver.resolve(&ctx.cancel, host).await {
            Ok(ips) => {
                result.resolved_addresses = ips;
                Stage::Dial
            }
            Err(e) if matches!(e.root(), DnsError::Canceled) => fail(result, CANCELED),
            Err(e) if matches!(e.root(), DnsError::NotFound) => fail(
                result,
                format!("DNS lookup {host:?} failed: check DNS records or wait for propagation"),
            ),
            Err(e) => fail(result, format!("failed to resolve host {host:?}: {e}")),
        }
    }

    async fn dial(&self, ctx: &ProbeContext, result: &mut ProtocolTestResult) -> Stage {
        let address = self.net_address.address.as_str();
        let dial = measure_time(|| async {
            timeout(ctx.dial_timeout, self.client.dial(address))
                .await
                .unwrap_or_else(|_| {
                    Err(DialError::Timeout {
                        address: address.to_string(),
                    })
                })
        });

        let Some((elapsed, outcome)) = until_cancelled(&ctx.cancel, dial).await else {
            return fail(result, CANCELED);
        };
        result.dial_time = elapsed;

        match outcome {
            Ok(conn) => {
                result.connected = true;
                Stage::Handshake(conn)
            }
            Err(e) => {
                let e = self.classify_dial_error(e);
                fail(result, e.to_string())
            }
        }
    }

    /// Datagram transports cannot tell a closed port from a dropped packet, so every
    /// silence is reported as an unreachable port.
    fn classify_dial_error(&self, error: DialError) -> DialError {
        if self.net_address.protocol.transport() != TransportKind::Datagram {
            return error;
        }
        match error {
            DialError::Timeout { .. }
            | DialError::Refused { .. }
            | DialError::PortUnreachable { .. } => {
                let port = split_host_port(&self.net_address.address)
                    .map(|(_, port)| port.to_string())
                    .unwrap_or_default();
                DialError::PortUnreachable { port }
            }
            other => other,
        }
    }

    async fn handshake(
        &self,
        ctx: &ProbeContext,
        conn: RawConnection,
        result: &mut ProtocolTestResult,
    ) -> Stage {
        let upgrade = measure_time(|| self.client.upgrade(conn, &self.host_key));
        let Some((elapsed, outcome)) = until_cancelled(&ctx.cancel, upgrade).await else {
            return fail(result, CANCELED);
        };
        result.handshake_time = elapsed;

        match outcome {
            Ok(transport) => {
                result.handshake = true;
                Stage::Scan(transport)
            }
            Err(e) => fail(result, format!("failed to complete handshake: {e}")),
        }
    }

    async fn scan(
        &self,
        ctx: &ProbeContext,
        mut transport: TransportHandle,
        result: &mut ProtocolTestResult,
    ) -> Stage {
        let started = Instant::now();
        let query = self.client.query_settings(&mut transport);
        let Some(outcome) = until_cancelled(&ctx.cancel, query).await else {
            return fail(result, CANCELED);
        };
        result.scan_time = started.elapsed();

        match outcome {
            Ok(settings) => {
                result.scanned = true;
                result.settings = Some(settings.clone());
                Stage::Validate(settings)
            }
            Err(e) => fail(result, format!("failed to get settings: {e}")),
        }
    }

    fn validate(
        &self,
        ctx: &ProbeContext,
        settings: Settings,
        result: &mut ProtocolTestResult,
    ) -> Stage {
        let validation = ValidationContext {
            latest_release: &ctx.latest_release,
            tip_height: ctx.tip_height,
            dialed_address: &self.net_address.address,
        };
        for finding in validate(&settings, &validation) {
            match finding {
                Finding::Warning(w) => result.warnings.push(w),
                Finding::Error(e) => result.errors.push(e),
            }
        }
        Stage::Done
    }
}

fn fail(result: &mut ProtocolTestResult, error: impl Into<String>) -> Stage {
    result.errors.push(error.into());
    Stage::Done
}

/// Runs `fut` unless `cancel` fires first.
pub async fn until_cancelled<F: Future>(cancel: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        out = fut => Some(out),
    }
}
