use super::{resolve_socket_addrs, DialError};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Opens a TCP stream to `address`, translating failures into [`DialError`].
pub async fn dial_tcp(address: &str, dial_timeout: Duration) -> Result<TcpStream, DialError> {
    let addrs = resolve_socket_addrs(address, dial_timeout).await?;
    let stream = timeout(dial_timeout, TcpStream::connect(&addrs[..]))
        .await
        .map_err(|_| DialError::Timeout {
            address: address.to_string(),
        })?
        .map_err(|e| DialError::from_io(address, e))?;

    if let (Ok(local), Ok(peer)) = (stream.local_addr(), stream.peer_addr()) {
        log::debug!("TCP connection established: {} -> {}", local, peer);
    }
    Ok(stream)
}
