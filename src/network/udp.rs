use super::{resolve_socket_addrs, DialError};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;

/// QUIC servers must pad client initial packets to at least this size, and may drop
/// anything smaller without replying.
pub const QUIC_MIN_DATAGRAM_SIZE: usize = 1200;

/// Reserved QUIC version (the `0x?a?a?a?a` greasing pattern). No server supports it, so a
/// listening server answers with a version negotiation packet.
pub const QUIC_RESERVED_VERSION: u32 = 0x1a2a_3a4a;

/// Binds a local UDP socket and connects it to `address`.
///
/// Connecting a UDP socket sends nothing, so this only proves the address resolved.
/// Use [`exchange_udp`] to find out whether anything listens on the port.
pub async fn dial_udp(address: &str, dial_timeout: Duration) -> Result<UdpSocket, DialError> {
    let remote = resolve_socket_addrs(address, dial_timeout).await?[0];

    let bind_addr = if remote.is_ipv4() {
        "0.0.0.0:0"
    } else {
        "[::]:0"
    };

    let socket = UdpSocket::bind(bind_addr)
        .await
        .map_err(|e| DialError::from_io(address, e))?;
    socket
        .connect(remote)
        .await
        .map_err(|e| DialError::from_io(address, e))?;
    Ok(socket)
}

/// Sends `payload` on a connected socket and waits for any reply.
///
/// An ICMP port-unreachable surfaces as [`DialError::Refused`], silence as
/// [`DialError::Timeout`]. Returns the size of the reply.
pub async fn exchange_udp(
    socket: &UdpSocket,
    address: &str,
    payload: &[u8],
    wait: Duration,
) -> Result<usize, DialError> {
    let sent = timeout(wait, socket.send(payload))
        .await
        .map_err(|_| DialError::Timeout {
            address: address.to_string(),
        })?
        .map_err(|e| DialError::from_io(address, e))?;

    let mut buf = [0; 2048];
    let received = timeout(wait, socket.recv(&mut buf))
        .await
        .map_err(|_| DialError::Timeout {
            address: address.to_string(),
        })?
        .map_err(|e| DialError::from_io(address, e))?;

    log::debug!(
        "UDP exchange with {}: sent {} bytes, received {} bytes",
        address,
        sent,
        received
    );
    Ok(received)
}

/// A padded QUIC long-header packet carrying [`QUIC_RESERVED_VERSION`].
pub fn version_negotiation_request() -> Vec<u8> {
    let mut packet = Vec::with_capacity(QUIC_MIN_DATAGRAM_SIZE);
    packet.push(0xc0); // long header, fixed bit
    packet.extend_from_slice(&QUIC_RESERVED_VERSION.to_be_bytes());
    packet.push(8);
    packet.extend_from_slice(b"hostchk!");
    packet.push(8);
    packet.extend_from_slice(b"hostchk?");
    packet.resize(QUIC_MIN_DATAGRAM_SIZE, 0);
    packet
}
