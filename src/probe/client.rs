use super::settings::Settings;
use crate::network::{
    dial_tcp, dial_udp, exchange_udp, version_negotiation_request, DialError, Protocol,
    PublicKey, TransportKind,
};
use async_trait::async_trait;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// A dialed but not yet authenticated connection.
pub type RawConnection = Box<dyn Any + Send>;
/// An authenticated session, ready for RPCs.
pub type TransportHandle = Box<dyn Any + Send>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("{0}")]
    Handshake(String),
    #[error("{0}")]
    Rpc(String),
    #[error("no {0} handshake implementation is available")]
    Unsupported(Protocol),
}

/// The three network steps of a protocol test.
///
/// Implementations hand opaque connection values between steps; each client only has to
/// understand the values it produced itself.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    async fn dial(&self, address: &str) -> Result<RawConnection, DialError>;

    async fn upgrade(
        &self,
        conn: RawConnection,
        host_key: &PublicKey,
    ) -> Result<TransportHandle, TransportError>;

    async fn query_settings(
        &self,
        transport: &mut TransportHandle,
    ) -> Result<Settings, TransportError>;
}

/// Maps each protocol tag to the client that speaks it.
#[derive(Clone, Default)]
pub struct ProtocolTable {
    clients: HashMap<Protocol, Arc<dyn ProtocolClient>>,
}

impl ProtocolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// A table that can only check reachability: every protocol dials over its native
    /// transport and reports the handshake as unsupported.
    pub fn dial_only(dial_timeout: Duration) -> Self {
        Protocol::ALL
            .into_iter()
            .fold(Self::new(), |table, protocol| {
                table.with(protocol, Arc::new(DialOnly::new(protocol, dial_timeout)))
            })
    }

    pub fn with(mut self, protocol: Protocol, client: Arc<dyn ProtocolClient>) -> Self {
        self.register(protocol, client);
        self
    }

    pub fn register(&mut self, protocol: Protocol, client: Arc<dyn ProtocolClient>) {
        self.clients.insert(protocol, client);
    }

    pub fn get(&self, protocol: Protocol) -> Option<Arc<dyn ProtocolClient>> {
        self.clients.get(&protocol).cloned()
    }
}

impl fmt::Debug for ProtocolTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut protocols: Vec<_> = self.clients.keys().map(Protocol::as_str).collect();
        protocols.sort_unstable();
        f.debug_struct("ProtocolTable")
            .field("protocols", &protocols)
            .finish()
    }
}

/// Opens real TCP or UDP connections without speaking the protocol on top.
///
/// Datagram endpoints only count as connected once they answer a QUIC version
/// negotiation request.
#[derive(Debug, Clone)]
pub struct DialOnly {
    protocol: Protocol,
    timeout: Duration,
}

impl DialOnly {
    pub fn new(protocol: Protocol, timeout: Duration) -> Self {
        Self { protocol, timeout }
    }
}

#[async_trait]
impl ProtocolClient for DialOnly {
    async fn dial(&self, address: &str) -> Result<RawConnection, DialError> {
        match self.protocol.transport() {
            TransportKind::Stream => {
                let stream = dial_tcp(address, self.timeout).await?;
                Ok(Box::new(stream))
            }
            TransportKind::Datagram => {
                let socket = dial_udp(address, self.timeout).await?;
                exchange_udp(
                    &socket,
                    address,
                    &version_negotiation_request(),
                    self.timeout,
                )
                .await?;
                Ok(Box::new(socket))
            }
        }
    }

    async fn upgrade(
        &self,
        _conn: RawConnection,
        _host_key: &PublicKey,
    ) -> Result<TransportHandle, TransportError> {
        Err(TransportError::Unsupported(self.protocol))
    }

    async fn query_settings(
        &self,
        _transport: &mut TransportHandle,
    ) -> Result<Settings, TransportError> {
        Err(TransportError::Unsupported(self.protocol))
    }
}

#[cfg(test)]
mod unit_tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream, UdpSocket};

    #[test]
    fn test_dial_only_table_covers_every_protocol() {
        let table = ProtocolTable::dial_only(Duration::from_secs(1));
        for protocol in Protocol::ALL {
            assert!(table.get(protocol).is_some(), "{protocol}");
        }
        assert!(ProtocolTable::new().get(Protocol::Quic).is_none());
    }

    #[tokio::test]
    async fn test_dial_only_connects_then_reports_unsupported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let client = DialOnly::new(Protocol::Siamux, Duration::from_secs(2));

        let conn = client.dial(&address).await.unwrap();
        assert!(conn.downcast_ref::<TcpStream>().is_some());

        let key = PublicKey::new([7; 32]);
        let err = client.upgrade(conn, &key).await.unwrap_err();
        assert_eq!(err, TransportError::Unsupported(Protocol::Siamux));
        assert_eq!(
            err.to_string(),
            "no siamux handshake implementation is available"
        );
    }

    #[tokio::test]
    async fn test_dial_only_datagram_needs_a_reply() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let address = server.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let mut buf = [0; 2048];
            let (_, peer) = server.recv_from(&mut buf).await.unwrap();
            server.send_to(&[0x80, 0, 0, 0, 0], peer).await.unwrap();
        });

        let client = DialOnly::new(Protocol::Quic, Duration::from_secs(2));
        let conn = client.dial(&address).await.unwrap();
        assert!(conn.downcast_ref::<UdpSocket>().is_some());
    }

    #[tokio::test]
    async fn test_dial_only_datagram_closed_port_fails() {
        let closed = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let address = closed.local_addr().unwrap().to_string();
        drop(closed);

        let client = DialOnly::new(Protocol::Quic, Duration::from_millis(500));
        let err = match client.dial(&address).await {
            Ok(_) => panic!("dial of a closed UDP port succeeded"),
            Err(e) => e,
        };
        assert!(
            matches!(err, DialError::Refused { .. } | DialError::Timeout { .. }),
            "{err}"
        );
    }
}
