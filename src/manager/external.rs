use crate::version::VersionError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_EXPLORER_ADDRESS: &str = "https://api.siascan.com";
const GITHUB_API: &str = "https://api.github.com";
const USER_AGENT: &str = concat!("hostcheck/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Error, Debug)]
pub enum ExternalError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("no release found for {org}/{repo}")]
    NoRelease { org: String, repo: String },
    #[error("invalid release name: {0}")]
    Version(#[from] VersionError),
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainIndex {
    pub height: u64,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HardforkV2 {
    pub allow_height: u64,
    pub require_height: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    #[serde(rename = "hardforkV2")]
    pub hardfork_v2: HardforkV2,
}

/// The subset of the chain's consensus state the manager tracks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusState {
    pub index: ChainIndex,
    pub network: Network,
}

impl ConsensusState {
    /// Whether generation 2 and 3 protocols are still served at this tip.
    pub fn legacy_allowed(&self) -> bool {
        self.index.height < self.network.hardfork_v2.allow_height
    }
}

#[async_trait]
pub trait Explorer: Send + Sync {
    async fn consensus_state(&self) -> Result<ConsensusState, ExternalError>;
}

#[async_trait]
pub trait ReleaseSource: Send + Sync {
    /// The name of the most recent published release, e.g. `"v1.6.0"`.
    async fn latest_release(&self, org: &str, repo: &str) -> Result<String, ExternalError>;
}

/// HTTP client for a chain explorer's consensus API.
#[derive(Debug, Clone)]
pub struct ExplorerClient {
    client: Client,
    base: String,
    password: Option<String>,
}

impl ExplorerClient {
    pub fn new(address: impl Into<String>) -> Result<Self, ExternalError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base: address.into().trim_end_matches('/').to_string(),
            password: None,
        })
    }

    pub fn with_password(mut self, password: Option<String>) -> Self {
        self.password = password;
        self
    }
}

#[async_trait]
impl Explorer for ExplorerClient {
    async fn consensus_state(&self) -> Result<ConsensusState, ExternalError> {
        let mut request = self.client.get(format!("{}/consensus/state", self.base));
        if let Some(password) = &self.password {
            request = request.basic_auth("", Some(password));
        }
        let state = request
            .send()
            .await?
            .error_for_status()?
            .json::<ConsensusState>()
            .await?;
        Ok(state)
    }
}

#[derive(Deserialize)]
struct GithubRelease {
    #[serde(default)]
    name: String,
}

/// Reads the latest published release from the GitHub REST API.
#[derive(Debug, Clone)]
pub struct GithubReleases {
    client: Client,
    base: String,
}

impl GithubReleases {
    pub fn new() -> Result<Self, ExternalError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base: GITHUB_API.to_string(),
        })
    }
}

#[async_trait]
impl ReleaseSource for GithubReleases {
    async fn latest_release(&self, org: &str, repo: &str) -> Result<String, ExternalError> {
        let url = format!("{}/repos/{}/{}/releases/latest", self.base, org, repo);
        let release = self
            .client
            .get(url)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await?
            .error_for_status()?
            .json::<GithubRelease>()
            .await?;
        if release.name.is_empty() {
            return Err(ExternalError::NoRelease {
                org: org.to_string(),
                repo: repo.to_string(),
            });
        }
        Ok(release.name)
    }
}

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn test_consensus_state_json() {
        let json = r#"{
            "index": {"height": 500000, "id": "abc"},
            "network": {"hardforkV2": {"allowHeight": 526000, "requireHeight": 530000}}
        }"#;
        let state: ConsensusState = serde_json::from_str(json).unwrap();
        assert_eq!(state.index.height, 500_000);
        assert_eq!(state.network.hardfork_v2.require_height, 530_000);
        assert!(state.legacy_allowed());

        let mut after = state.clone();
        after.index.height = 526_000;
        assert!(!after.legacy_allowed());
    }

    #[test]
    fn test_release_name_defaults_empty() {
        let release: GithubRelease = serde_json::from_str(r#"{"tag_name": "v1.0.0"}"#).unwrap();
        assert!(release.name.is_empty());
    }
}
