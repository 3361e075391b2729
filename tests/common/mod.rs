#![allow(dead_code)]

use async_trait::async_trait;
use hickory_client::rr::RecordType;
use hostcheck::*;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const TIP_HEIGHT: u64 = 500_000;
pub const ALLOW_HEIGHT: u64 = 526_000;

pub fn key(byte: u8) -> PublicKey {
    PublicKey::new([byte; 32])
}

pub fn addr(text: &str) -> NetAddress {
    text.parse().unwrap()
}

/// Answers `good.example` and `alt.example`; everything else is unknown.
pub struct StaticSystem;

#[async_trait]
impl SystemLookup for StaticSystem {
    async fn lookup_ip(&self, hostname: &str) -> Result<Vec<IpAddr>, DnsError> {
        match hostname {
            "good.example" => Ok(vec!["203.0.113.5".parse().unwrap()]),
            "alt.example" => Ok(vec!["203.0.113.6".parse().unwrap()]),
            _ => Err(DnsError::System("no such host".to_string())),
        }
    }
}

pub struct NoRecords;

#[async_trait]
impl RecordQuery for NoRecords {
    async fn query(
        &self,
        _server: SocketAddr,
        _name: &str,
        _record_type: RecordType,
    ) -> Result<Vec<Answer>, DnsError> {
        Ok(Vec::new())
    }
}

pub fn resolver() -> Resolver {
    Resolver::default()
        .with_system(Arc::new(StaticSystem))
        .with_record_query(Arc::new(NoRecords))
}

pub fn consensus(height: u64) -> ConsensusState {
    ConsensusState {
        index: ChainIndex {
            height,
            id: format!("block-{height}"),
        },
        network: Network {
            hardfork_v2: HardforkV2 {
                allow_height: ALLOW_HEIGHT,
                require_height: ALLOW_HEIGHT + 4000,
            },
        },
    }
}

/// Serves whatever state it currently holds; `None` fails the request.
pub struct MockExplorer {
    pub state: Mutex<Option<ConsensusState>>,
    pub calls: AtomicUsize,
}

impl MockExplorer {
    pub fn at(height: u64) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(Some(consensus(height))),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(None),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn set(&self, state: Option<ConsensusState>) {
        *self.state.lock().unwrap() = state;
    }
}

#[async_trait]
impl Explorer for MockExplorer {
    async fn consensus_state(&self) -> Result<ConsensusState, ExternalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.state
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ExternalError::Other("explorer unavailable".to_string()))
    }
}

pub struct MockReleases(pub Mutex<String>);

impl MockReleases {
    pub fn latest(name: &str) -> Arc<Self> {
        Arc::new(Self(Mutex::new(name.to_string())))
    }
}

#[async_trait]
impl ReleaseSource for MockReleases {
    async fn latest_release(&self, _org: &str, _repo: &str) -> Result<String, ExternalError> {
        Ok(self.0.lock().unwrap().clone())
    }
}

#[derive(Clone, Copy, PartialEq)]
pub enum Step {
    Pass,
    Fail,
    Hang,
}

/// A protocol client whose every stage is scripted.
pub struct MockClient {
    pub dial: Step,
    pub upgrade: Step,
    pub scan_delay: Duration,
    pub settings: Settings,
    pub dials: AtomicUsize,
}

impl MockClient {
    pub fn new(settings: Settings) -> Self {
        Self {
            dial: Step::Pass,
            upgrade: Step::Pass,
            scan_delay: Duration::ZERO,
            settings,
            dials: AtomicUsize::new(0),
        }
    }

    pub fn dial(mut self, step: Step) -> Self {
        self.dial = step;
        self
    }

    pub fn upgrade(mut self, step: Step) -> Self {
        self.upgrade = step;
        self
    }

    pub fn scan_delay(mut self, delay: Duration) -> Self {
        self.scan_delay = delay;
        self
    }

    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProtocolClient for MockClient {
    async fn dial(&self, address: &str) -> Result<RawConnection, DialError> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        match self.dial {
            Step::Pass => Ok(Box::new(address.to_string())),
            Step::Fail => Err(DialError::Refused {
                address: address.to_string(),
            }),
            Step::Hang => std::future::pending().await,
        }
    }

    async fn upgrade(
        &self,
        conn: RawConnection,
        _host_key: &PublicKey,
    ) -> Result<TransportHandle, TransportError> {
        match self.upgrade {
            Step::Pass => Ok(conn),
            Step::Fail => Err(TransportError::Handshake("handshake rejected".to_string())),
            Step::Hang => std::future::pending().await,
        }
    }

    async fn query_settings(
        &self,
        _transport: &mut TransportHandle,
    ) -> Result<Settings, TransportError> {
        if !self.scan_delay.is_zero() {
            tokio::time::sleep(self.scan_delay).await;
        }
        Ok(self.settings.clone())
    }
}

pub fn v4_settings(release: &str, tip_height: u64) -> Settings {
    Settings::V4(HostSettingsV4 {
        accepting_contracts: true,
        max_collateral: Currency(100),
        max_contract_duration: 4320,
        release: release.to_string(),
        net_address: None,
        prices: HostPrices {
            storage_price: Currency(10),
            collateral: Currency(25),
            tip_height,
        },
    })
}

pub fn v2_settings(net_address: &str, siamux_port: &str, release: &str) -> Settings {
    Settings::V2(HostSettingsV2 {
        accepting_contracts: true,
        net_address: net_address.to_string(),
        siamux_port: siamux_port.to_string(),
        max_collateral: Currency(100),
        collateral: Currency(25),
        storage_price: Currency(10),
        max_duration: 4320,
        release: release.to_string(),
    })
}

pub fn v3_price_table(height: u64) -> Settings {
    Settings::V3(PriceTableV3 {
        host_block_height: height,
        max_collateral: Currency(100),
        collateral_cost: Currency(25),
        write_store_cost: Currency(10),
    })
}

pub async fn manager_with(
    config: ManagerConfig,
    protocols: ProtocolTable,
    explorer: Arc<MockExplorer>,
) -> Manager {
    Manager::new(
        config,
        protocols,
        resolver(),
        explorer,
        MockReleases::latest("v1.6.0"),
    )
    .await
    .unwrap()
}
