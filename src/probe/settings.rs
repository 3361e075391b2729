use crate::network::Generation;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// An amount in the network's smallest currency unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Currency(pub u128);

impl Currency {
    pub const ZERO: Currency = Currency(0);

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_mul(self, n: u64) -> Option<Currency> {
        self.0.checked_mul(u128::from(n)).map(Currency)
    }
}

impl From<u128> for Currency {
    fn from(value: u128) -> Self {
        Currency(value)
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Currency {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Currency {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse()
            .map(Currency)
            .map_err(|_| serde::de::Error::custom(format!("invalid currency {text:?}")))
    }
}

/// Settings reported over the generation 2 protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostSettingsV2 {
    pub accepting_contracts: bool,
    pub net_address: String,
    pub siamux_port: String,
    pub max_collateral: Currency,
    pub collateral: Currency,
    pub storage_price: Currency,
    pub max_duration: u64,
    pub release: String,
}

/// Price table returned by the generation 3 protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceTableV3 {
    pub host_block_height: u64,
    pub max_collateral: Currency,
    pub collateral_cost: Currency,
    pub write_store_cost: Currency,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostPrices {
    pub storage_price: Currency,
    pub collateral: Currency,
    pub tip_height: u64,
}

/// Settings reported over the generation 4 protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostSettingsV4 {
    pub accepting_contracts: bool,
    pub max_collateral: Currency,
    pub max_contract_duration: u64,
    pub release: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub net_address: Option<String>,
    pub prices: HostPrices,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Settings {
    V2(HostSettingsV2),
    V3(PriceTableV3),
    V4(HostSettingsV4),
}

/// The fields validation cares about, normalised across generations.
///
/// `None` means the generation does not report that field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsView<'a> {
    pub accepting_contracts: Option<bool>,
    pub max_collateral: Currency,
    pub collateral: Currency,
    pub storage_price: Currency,
    pub max_duration: Option<u64>,
    pub height: Option<u64>,
    pub release: Option<&'a str>,
    pub net_address: Option<&'a str>,
}

impl Settings {
    pub fn generation(&self) -> Generation {
        match self {
            Settings::V2(_) => Generation::V2,
            Settings::V3(_) => Generation::V3,
            Settings::V4(_) => Generation::V4,
        }
    }

    pub fn release(&self) -> Option<&str> {
        match self {
            Settings::V2(s) => Some(&s.release),
            Settings::V3(_) => None,
            Settings::V4(s) => Some(&s.release),
        }
    }

    pub fn view(&self) -> SettingsView<'_> {
        match self {
            Settings::V2(s) => SettingsView {
                accepting_contracts: Some(s.accepting_contracts),
                max_collateral: s.max_collateral,
                collateral: s.collateral,
                storage_price: s.storage_price,
                max_duration: Some(s.max_duration),
                height: None,
                release: Some(&s.release),
                net_address: Some(&s.net_address),
            },
            Settings::V3(pt) => SettingsView {
                accepting_contracts: None,
                max_collateral: pt.max_collateral,
                collateral: pt.collateral_cost,
                storage_price: pt.write_store_cost,
                max_duration: None,
                height: Some(pt.host_block_height),
                release: None,
                net_address: None,
            },
            Settings::V4(s) => SettingsView {
                accepting_contracts: Some(s.accepting_contracts),
                max_collateral: s.max_collateral,
                collateral: s.prices.collateral,
                storage_price: s.prices.storage_price,
                max_duration: Some(s.max_contract_duration),
                height: Some(s.prices.tip_height),
                release: Some(&s.release),
                net_address: s.net_address.as_deref(),
            },
        }
    }
}
