use crate::dns::{Resolver, DEFAULT_FALLBACK_SERVER, DEFAULT_QUERY_TIMEOUT, MAX_CNAME_DEPTH};
use crate::manager::{ManagerConfig, DEFAULT_EXPLORER_ADDRESS};
use crate::utils::{Error, Result};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// File configuration. Every section and key is optional.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub manager: ManagerSection,
    pub dns: DnsSection,
    pub explorer: ExplorerSection,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ManagerSection {
    pub cooldown_secs: u64,
    pub test_timeout_secs: u64,
    pub tip_refresh_secs: u64,
    pub release_refresh_secs: u64,
    pub dial_timeout_secs: u64,
    pub release_org: String,
    pub release_repo: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct DnsSection {
    pub fallback_server: SocketAddr,
    pub query_timeout_secs: u64,
    pub max_cname_depth: usize,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ExplorerSection {
    pub address: String,
    pub password: Option<String>,
}

impl Default for ManagerSection {
    fn default() -> Self {
        let defaults = ManagerConfig::default();
        Self {
            cooldown_secs: defaults.cooldown.as_secs(),
            test_timeout_secs: defaults.test_timeout.as_secs(),
            tip_refresh_secs: defaults.tip_refresh.as_secs(),
            release_refresh_secs: defaults.release_refresh.as_secs(),
            dial_timeout_secs: defaults.dial_timeout.as_secs(),
            release_org: defaults.release_org,
            release_repo: defaults.release_repo,
        }
    }
}

impl Default for DnsSection {
    fn default() -> Self {
        Self {
            fallback_server: DEFAULT_FALLBACK_SERVER,
            query_timeout_secs: DEFAULT_QUERY_TIMEOUT.as_secs(),
            max_cname_depth: MAX_CNAME_DEPTH,
        }
    }
}

impl Default for ExplorerSection {
    fn default() -> Self {
        Self {
            address: DEFAULT_EXPLORER_ADDRESS.to_string(),
            password: None,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let positive = [
            ("manager.test_timeout_secs", self.manager.test_timeout_secs),
            ("manager.tip_refresh_secs", self.manager.tip_refresh_secs),
            ("manager.release_refresh_secs", self.manager.release_refresh_secs),
            ("manager.dial_timeout_secs", self.manager.dial_timeout_secs),
            ("dns.query_timeout_secs", self.dns.query_timeout_secs),
        ];
        if let Some((key, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(Error::Config(format!("{key} must be greater than zero")));
        }
        Ok(())
    }

    pub fn manager_config(&self) -> ManagerConfig {
        let m = &self.manager;
        ManagerConfig {
            cooldown: Duration::from_secs(m.cooldown_secs),
            test_timeout: Duration::from_secs(m.test_timeout_secs),
            tip_refresh: Duration::from_secs(m.tip_refresh_secs),
            release_refresh: Duration::from_secs(m.release_refresh_secs),
            dial_timeout: Duration::from_secs(m.dial_timeout_secs),
            release_org: m.release_org.clone(),
            release_repo: m.release_repo.clone(),
        }
    }

    pub fn resolver(&self) -> Resolver {
        Resolver::new(self.dns.fallback_server)
            .with_timeout(Duration::from_secs(self.dns.query_timeout_secs))
            .with_max_depth(self.dns.max_cname_depth)
    }
}
