//! Runs every protocol test for a host concurrently and aggregates the results.

pub mod external;

pub use external::*;

use crate::dns::Resolver;
use crate::network::{
    join_host_port, split_host_port, Generation, Host, NetAddress, Protocol, PublicKey,
};
use crate::probe::{
    until_cancelled, Probe, ProbeContext, ProtocolTable, ProtocolTestResult, Settings,
};
use crate::utils::format_duration;
use crate::version::{parse_release, SemVer};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("host is on cooldown, please try again in {remaining:?}")]
    Cooldown { remaining: Duration },
    #[error("manager is shutting down")]
    Shutdown,
    #[error("failed to get initial {what}: {source}")]
    Init {
        what: &'static str,
        #[source]
        source: ExternalError,
    },
}

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Minimum time between two tests of the same host.
    pub cooldown: Duration,
    /// Upper bound on a whole host test.
    pub test_timeout: Duration,
    pub tip_refresh: Duration,
    pub release_refresh: Duration,
    pub dial_timeout: Duration,
    pub release_org: String,
    pub release_repo: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(10),
            test_timeout: Duration::from_secs(30),
            tip_refresh: Duration::from_secs(60),
            release_refresh: Duration::from_secs(15 * 60),
            dial_timeout: Duration::from_secs(15),
            release_org: "SiaFoundation".to_string(),
            release_repo: "hostd".to_string(),
        }
    }
}

/// The outcome of testing one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateResult {
    pub public_key: PublicKey,
    /// Release reported by the newest protocol that answered; empty when none did.
    pub version: String,
    /// One entry per requested address, in request order.
    pub results: Vec<ProtocolTestResult>,
    /// Probe of the rhp3 endpoint derived from the rhp2 settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rhp3: Option<ProtocolTestResult>,
}

impl AggregateResult {
    pub fn all_results(&self) -> impl Iterator<Item = &ProtocolTestResult> {
        self.results.iter().chain(self.rhp3.as_ref())
    }

    pub fn has_errors(&self) -> bool {
        self.all_results().any(ProtocolTestResult::has_errors)
    }
}

struct ManagerState {
    consensus: ConsensusState,
    latest_release: SemVer,
    cooldown: HashMap<PublicKey, Instant>,
}

struct Inner {
    config: ManagerConfig,
    protocols: ProtocolTable,
    resolver: Resolver,
    explorer: Arc<dyn Explorer>,
    releases: Arc<dyn ReleaseSource>,
    state: Mutex<ManagerState>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

/// Tests hosts on demand while keeping the chain tip and latest release up to date in the
/// background.
///
/// Dropping the manager stops the background refresh; call [`Manager::close`] to also wait
/// for in-flight tests to wind down.
pub struct Manager {
    inner: Arc<Inner>,
}

enum Slot {
    Done(ProtocolTestResult),
    Running(NetAddress, JoinHandle<ProtocolTestResult>),
}

impl Manager {
    /// Fetches the initial consensus state and latest release, then starts the refresh
    /// timers. Either fetch failing is fatal.
    pub async fn new(
        config: ManagerConfig,
        protocols: ProtocolTable,
        resolver: Resolver,
        explorer: Arc<dyn Explorer>,
        releases: Arc<dyn ReleaseSource>,
    ) -> Result<Self, ManagerError> {
        let latest_release = fetch_release(releases.as_ref(), &config)
            .await
            .map_err(|source| ManagerError::Init {
                what: "latest release",
                source,
            })?;
        let consensus = explorer
            .consensus_state()
            .await
            .map_err(|source| ManagerError::Init {
                what: "consensus state",
                source,
            })?;
        log::debug!(
            "manager starting at height {}, latest release {}",
            consensus.index.height,
            latest_release
        );

        let inner = Arc::new(Inner {
            config,
            protocols,
            resolver,
            explorer,
            releases,
            state: Mutex::new(ManagerState {
                consensus,
                latest_release,
                cooldown: HashMap::new(),
            }),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        });

        inner.tracker.spawn(Arc::clone(&inner).refresh_consensus());
        inner.tracker.spawn(Arc::clone(&inner).refresh_release());

        Ok(Self { inner })
    }

    pub fn latest_release(&self) -> SemVer {
        self.inner.lock().latest_release.clone()
    }

    pub fn consensus_state(&self) -> ConsensusState {
        self.inner.lock().consensus.clone()
    }

    /// Tests every address of `host` concurrently.
    ///
    /// Probe failures are reported inside the result; only cooldown and shutdown are
    /// returned as errors. Cancelling `cancel` stops the probes but still yields whatever
    /// they had completed.
    pub async fn test_host(
        &self,
        cancel: &CancellationToken,
        host: &Host,
    ) -> Result<AggregateResult, ManagerError> {
        let inner = &self.inner;
        // close() waits on the tracker, so it cannot return while this token is held
        let _running = inner.tracker.token();
        if inner.shutdown.is_cancelled() {
            return Err(ManagerError::Shutdown);
        }
        let (consensus, latest_release) = inner.begin_test(host.public_key)?;

        let start = Instant::now();
        log::debug!("starting host test {}", host.public_key);

        let run = inner.shutdown.child_token();
        let _run_guard = run.clone().drop_guard();
        inner.tracker.spawn(watch_run(
            run.clone(),
            cancel.clone(),
            inner.config.test_timeout,
        ));

        let legacy_allowed = consensus.legacy_allowed();
        let ctx = ProbeContext {
            resolver: inner.resolver.clone(),
            latest_release,
            tip_height: consensus.index.height,
            dial_timeout: inner.config.dial_timeout,
            cancel: run.clone(),
        };
        let sticky_version = Arc::new(OnceLock::new());

        let mut seen = HashSet::new();
        let mut slots = Vec::with_capacity(host.net_addresses.len());
        for addr in &host.net_addresses {
            let protocol = addr.protocol;
            if !seen.insert(protocol) {
                slots.push(Slot::Done(ProtocolTestResult::rejected(
                    addr.clone(),
                    format!("duplicate protocol {:?}", protocol.as_str()),
                )));
                continue;
            }
            if protocol.generation().is_legacy() && !legacy_allowed {
                slots.push(Slot::Done(ProtocolTestResult::skipped(
                    addr.clone(),
                    format!("protocol {protocol} is not supported after the v2 hardfork"),
                )));
                continue;
            }
            let Some(client) = inner.protocols.get(protocol) else {
                slots.push(Slot::Done(ProtocolTestResult::rejected(
                    addr.clone(),
                    format!("no client registered for protocol {protocol}"),
                )));
                continue;
            };

            let probe = Probe::new(host.public_key, addr.clone(), client);
            let handle = inner.tracker.spawn(run_probe(
                probe,
                protocol,
                ctx.clone(),
                Arc::clone(&sticky_version),
            ));
            slots.push(Slot::Running(addr.clone(), handle));
        }

        let mut results = Vec::with_capacity(slots.len());
        for slot in slots {
            results.push(match slot {
                Slot::Done(result) => result,
                Slot::Running(addr, handle) => match handle.await {
                    Ok(result) => result,
                    Err(e) => {
                        log::warn!("probe of {} failed: {}", addr, e);
                        ProtocolTestResult::rejected(addr, format!("probe failed: {e}"))
                    }
                },
            });
        }

        let rhp3 = if legacy_allowed && !seen.contains(&Protocol::Rhp3) {
            self.derived_rhp3(host, &results, &ctx).await
        } else {
            None
        };

        let version = infer_version(&results, rhp3.as_ref());
        log::info!(
            "host {} tested: version {:?}, elapsed {}",
            host.public_key,
            version,
            format_duration(start.elapsed())
        );

        Ok(AggregateResult {
            public_key: host.public_key,
            version,
            results,
            rhp3,
        })
    }

    /// Probes the rhp3 endpoint implied by a successful rhp2 scan: the announced host with
    /// the advertised siamux port.
    async fn derived_rhp3(
        &self,
        host: &Host,
        results: &[ProtocolTestResult],
        ctx: &ProbeContext,
    ) -> Option<ProtocolTestResult> {
        let settings = results.iter().find_map(|r| match &r.settings {
            Some(Settings::V2(s)) if r.net_address.protocol == Protocol::Rhp2 => Some(s),
            _ => None,
        })?;

        let address = match split_host_port(&settings.net_address) {
            Ok((hostname, _)) => join_host_port(hostname, &settings.siamux_port),
            Err(e) => {
                return Some(ProtocolTestResult::rejected(
                    NetAddress::new(settings.net_address.clone(), Protocol::Rhp3),
                    format!(
                        "failed to parse net address {:?}: {}",
                        settings.net_address, e
                    ),
                ))
            }
        };
        let net_address = NetAddress::new(address, Protocol::Rhp3);
        let Some(client) = self.inner.protocols.get(Protocol::Rhp3) else {
            return Some(ProtocolTestResult::rejected(
                net_address,
                "no client registered for protocol rhp3",
            ));
        };

        log::debug!("starting derived {} test", net_address);
        Some(Probe::new(host.public_key, net_address, client).run(ctx).await)
    }

    /// Stops the refresh timers, cancels in-flight tests and waits for every task.
    pub async fn close(&self) {
        self.inner.shutdown.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claims the host's cooldown slot and snapshots the shared state.
    fn begin_test(&self, key: PublicKey) -> Result<(ConsensusState, SemVer), ManagerError> {
        let now = Instant::now();
        let mut state = self.lock();
        if let Some(&expiry) = state.cooldown.get(&key) {
            if expiry > now {
                return Err(ManagerError::Cooldown {
                    remaining: expiry - now,
                });
            }
        }
        state.cooldown.retain(|_, expiry| *expiry > now);
        state.cooldown.insert(key, now + self.config.cooldown);
        Ok((state.consensus.clone(), state.latest_release.clone()))
    }

    async fn refresh_consensus(self: Arc<Self>) {
        let period = self.config.tip_refresh;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            if until_cancelled(&self.shutdown, ticker.tick()).await.is_none() {
                return;
            }
            match until_cancelled(&self.shutdown, self.explorer.consensus_state()).await {
                None => return,
                Some(Ok(consensus)) => {
                    log::debug!("tip height is now {}", consensus.index.height);
                    self.lock().consensus = consensus;
                }
                Some(Err(e)) => log::warn!("failed to update tip state: {}", e),
            }
        }
    }

    async fn refresh_release(self: Arc<Self>) {
        let period = self.config.release_refresh;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            if until_cancelled(&self.shutdown, ticker.tick()).await.is_none() {
                return;
            }
            let fetch = fetch_release(self.releases.as_ref(), &self.config);
            match until_cancelled(&self.shutdown, fetch).await {
                None => return,
                Some(Ok(release)) => self.lock().latest_release = release,
                Some(Err(e)) => log::warn!("failed to update latest release: {}", e),
            }
        }
    }
}

async fn fetch_release(
    releases: &dyn ReleaseSource,
    config: &ManagerConfig,
) -> Result<SemVer, ExternalError> {
    let name = releases
        .latest_release(&config.release_org, &config.release_repo)
        .await?;
    Ok(parse_release(&name)?)
}

/// Cancels `run` when the caller gives up or the deadline passes.
async fn watch_run(run: CancellationToken, caller: CancellationToken, deadline: Duration) {
    tokio::select! {
        _ = run.cancelled() => return,
        _ = caller.cancelled() => log::debug!("host test canceled by caller"),
        _ = tokio::time::sleep(deadline) => {
            log::debug!("host test timed out after {:?}", deadline)
        }
    }
    run.cancel();
}

async fn run_probe(
    probe: Probe,
    protocol: Protocol,
    ctx: ProbeContext,
    sticky_version: Arc<OnceLock<String>>,
) -> ProtocolTestResult {
    let mut result = probe.run(&ctx).await;
    if protocol.generation() != Generation::NEWEST {
        return result;
    }
    if let Some(release) = result.release().map(str::to_string) {
        let first = sticky_version.get_or_init(|| release.clone());
        if *first != release {
            result.errors.push(format!(
                "host is reporting multiple versions {first:?} and {release:?}"
            ));
        }
    }
    result
}

/// The release reported by the newest generation that answered, first address wins.
fn infer_version(results: &[ProtocolTestResult], rhp3: Option<&ProtocolTestResult>) -> String {
    Generation::ALL
        .into_iter()
        .find_map(|generation| {
            results
                .iter()
                .chain(rhp3)
                .filter(|r| r.net_address.protocol.generation() == generation)
                .find_map(ProtocolTestResult::release)
        })
        .unwrap_or_default()
        .to_string()
}
