use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio::net::lookup_host;
use tokio::time::timeout;

pub mod tcp;
pub mod udp;

pub use tcp::*;
pub use udp::*;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("missing port in address {0:?}")]
    MissingPort(String),
    #[error("missing host in address {0:?}")]
    MissingHost(String),
    #[error("too many colons in address {0:?}")]
    TooManyColons(String),
    #[error("invalid port {port:?} in address {address:?}")]
    InvalidPort { address: String, port: String },
    #[error("unknown protocol {0:?}")]
    UnknownProtocol(String),
    #[error("missing protocol in {0:?}, expected <host:port>/<protocol>")]
    MissingProtocol(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("public key must start with \"ed25519:\"")]
    MissingPrefix,
    #[error("invalid public key hex: {0}")]
    Hex(String),
    #[error("public key must be 32 bytes, got {0}")]
    Length(usize),
}

/// Connection-level failure, phrased so the host operator knows what to check.
#[derive(Error, Debug)]
pub enum DialError {
    #[error("failed to resolve host {address:?}: check DNS setup")]
    Dns { address: String },
    #[error("connection refused at {address:?}: check if the service is running and port is forwarded")]
    Refused { address: String },
    #[error("timeout connecting to {address:?}: check port forwarding or firewall")]
    Timeout { address: String },
    #[error("failed to connect to quic: check port forwarding and firewall settings for UDP port {port:?}")]
    PortUnreachable { port: String },
    #[error("failed to connect to host at {address:?}: {source}")]
    Io {
        address: String,
        #[source]
        source: std::io::Error,
    },
}

impl DialError {
    pub fn from_io(address: &str, error: std::io::Error) -> Self {
        let address = address.to_string();
        match error.kind() {
            std::io::ErrorKind::ConnectionRefused => DialError::Refused { address },
            std::io::ErrorKind::TimedOut => DialError::Timeout { address },
            _ => DialError::Io {
                address,
                source: error,
            },
        }
    }
}

/// Resolves a `host:port` dial target. Any lookup failure is reported as a DNS error.
pub async fn resolve_socket_addrs(
    address: &str,
    dial_timeout: Duration,
) -> Result<Vec<SocketAddr>, DialError> {
    let addrs: Vec<SocketAddr> = timeout(dial_timeout, lookup_host(address))
        .await
        .map_err(|_| DialError::Timeout {
            address: address.to_string(),
        })?
        .map_err(|e| {
            log::debug!("lookup of {} failed: {}", address, e);
            DialError::Dns {
                address: address.to_string(),
            }
        })?
        .collect();

    if addrs.is_empty() {
        return Err(DialError::Dns {
            address: address.to_string(),
        });
    }
    Ok(addrs)
}

/// An ed25519 host identity key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ed25519:{}", hex::encode(self.0))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for PublicKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let encoded = s.strip_prefix("ed25519:").ok_or(KeyError::MissingPrefix)?;
        let bytes = hex::decode(encoded).map_err(|e| KeyError::Hex(e.to_string()))?;
        let len = bytes.len();
        let key: [u8; 32] = bytes.try_into().map_err(|_| KeyError::Length(len))?;
        Ok(Self(key))
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Generation {
    V2,
    V3,
    V4,
}

impl Generation {
    pub const NEWEST: Generation = Generation::V4;
    /// Newest first.
    pub const ALL: [Generation; 3] = [Generation::V4, Generation::V3, Generation::V2];

    /// Legacy generations stop being served once the v2 hardfork activates.
    pub fn is_legacy(&self) -> bool {
        *self < Generation::V4
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Stream,
    Datagram,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Rhp2,
    Rhp3,
    Siamux,
    Quic,
}

impl Protocol {
    pub const ALL: [Protocol; 4] = [
        Protocol::Rhp2,
        Protocol::Rhp3,
        Protocol::Siamux,
        Protocol::Quic,
    ];

    pub fn generation(&self) -> Generation {
        match self {
            Protocol::Rhp2 => Generation::V2,
            Protocol::Rhp3 => Generation::V3,
            Protocol::Siamux | Protocol::Quic => Generation::V4,
        }
    }

    pub fn transport(&self) -> TransportKind {
        match self {
            Protocol::Quic => TransportKind::Datagram,
            Protocol::Rhp2 | Protocol::Rhp3 | Protocol::Siamux => TransportKind::Stream,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Rhp2 => "rhp2",
            Protocol::Rhp3 => "rhp3",
            Protocol::Siamux => "siamux",
            Protocol::Quic => "quic",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Protocol::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| AddressError::UnknownProtocol(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetAddress {
    pub address: String,
    pub protocol: Protocol,
}

impl NetAddress {
    pub fn new(address: impl Into<String>, protocol: Protocol) -> Self {
        Self {
            address: address.into(),
            protocol,
        }
    }
}

impl fmt::Display for NetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.protocol)
    }
}

/// Parses `host:port/protocol`.
impl FromStr for NetAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (address, protocol) = s
            .rsplit_once('/')
            .ok_or_else(|| AddressError::MissingProtocol(s.to_string()))?;
        split_host_port(address)?;
        Ok(Self::new(address, protocol.parse()?))
    }
}

/// A host under test: its identity key and every endpoint it exposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Host {
    pub public_key: PublicKey,
    #[serde(default)]
    pub net_addresses: Vec<NetAddress>,
}

/// Splits `host:port` or `[v6]:port` into its parts.
pub fn split_host_port(address: &str) -> Result<(&str, u16), AddressError> {
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| AddressError::MissingPort(address.to_string()))?;

    let host = match host.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
        Some(inner) => inner,
        None if host.contains(':') => {
            return Err(AddressError::TooManyColons(address.to_string()))
        }
        None => host,
    };
    if host.is_empty() {
        return Err(AddressError::MissingHost(address.to_string()));
    }

    let port = port.parse().map_err(|_| AddressError::InvalidPort {
        address: address.to_string(),
        port: port.to_string(),
    })?;
    Ok((host, port))
}

pub fn join_host_port(host: &str, port: &str) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_socket_addrs() {
        let addrs = resolve_socket_addrs("127.0.0.1:9984", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(addrs, vec!["127.0.0.1:9984".parse::<SocketAddr>().unwrap()]);

        let err = resolve_socket_addrs("no-port", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, DialError::Dns { .. }), "{err}");
        assert!(err.to_string().contains("check DNS setup"));
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(
            split_host_port("good.example:9984").unwrap(),
            ("good.example", 9984)
        );
        assert_eq!(split_host_port("[::1]:9984").unwrap(), ("::1", 9984));
        assert_eq!(
            split_host_port("1.2.3.4:80").unwrap(),
            ("1.2.3.4", 80)
        );
        assert!(matches!(
            split_host_port("good.example"),
            Err(AddressError::MissingPort(_))
        ));
        assert!(matches!(
            split_host_port("::1:9984"),
            Err(AddressError::TooManyColons(_))
        ));
        assert!(matches!(
            split_host_port(":9984"),
            Err(AddressError::MissingHost(_))
        ));
        assert!(matches!(
            split_host_port("good.example:99999"),
            Err(AddressError::InvalidPort { .. })
        ));
    }

    #[test]
    fn test_join_host_port() {
        assert_eq!(join_host_port("good.example", "9983"), "good.example:9983");
        assert_eq!(join_host_port("::1", "9983"), "[::1]:9983");
    }

    #[test]
    fn test_public_key_text_form() {
        let key = PublicKey::new([0xab; 32]);
        let text = key.to_string();
        assert!(text.starts_with("ed25519:abab"));
        assert_eq!(text.parse::<PublicKey>().unwrap(), key);

        assert_eq!(
            "abab".parse::<PublicKey>(),
            Err(KeyError::MissingPrefix)
        );
        assert_eq!(
            "ed25519:abab".parse::<PublicKey>(),
            Err(KeyError::Length(2))
        );
        assert!(matches!(
            "ed25519:zz".parse::<PublicKey>(),
            Err(KeyError::Hex(_))
        ));
    }

    #[test]
    fn test_net_address_from_str() {
        let addr: NetAddress = "good.example:9984/siamux".parse().unwrap();
        assert_eq!(addr, NetAddress::new("good.example:9984", Protocol::Siamux));
        assert_eq!(addr.to_string(), "good.example:9984/siamux");

        let addr: NetAddress = "[::1]:9984/QUIC".parse().unwrap();
        assert_eq!(addr.protocol, Protocol::Quic);

        assert!(matches!(
            "good.example:9984".parse::<NetAddress>(),
            Err(AddressError::MissingProtocol(_))
        ));
        assert!(matches!(
            "good.example:9984/http".parse::<NetAddress>(),
            Err(AddressError::UnknownProtocol(_))
        ));
    }

    #[test]
    fn test_host_json() {
        let json = format!(
            r#"{{"publicKey":"{}","netAddresses":[{{"address":"good.example:9984","protocol":"siamux"}}]}}"#,
            PublicKey::new([1; 32])
        );
        let host: Host = serde_json::from_str(&json).unwrap();
        assert_eq!(host.net_addresses.len(), 1);
        assert_eq!(host.net_addresses[0].protocol, Protocol::Siamux);

        let empty = format!(r#"{{"publicKey":"{}"}}"#, PublicKey::new([1; 32]));
        let host: Host = serde_json::from_str(&empty).unwrap();
        assert!(host.net_addresses.is_empty());
    }

    #[test]
    fn test_generations() {
        assert_eq!(Protocol::Quic.generation(), Generation::NEWEST);
        assert_eq!(Protocol::Siamux.generation(), Generation::NEWEST);
        assert!(Protocol::Rhp2.generation().is_legacy());
        assert!(Protocol::Rhp3.generation() > Protocol::Rhp2.generation());
        assert_eq!(Protocol::Quic.transport(), TransportKind::Datagram);
    }
}
