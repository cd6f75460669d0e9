use crate::error::{BlockchainError, Result};
use log::debug;
use std::io::Write;
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Delivers one encoded frame to a peer. A failure means the peer is treated
/// as unreachable; callers do not retry.
pub trait Transport: Send + Sync {
    fn send(&self, addr: &str, frame: &[u8]) -> Result<()>;
}

/// Opens a fresh TCP connection per frame, writes it and closes the write
/// half so the receiver sees end-of-stream.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    connect_timeout: Duration,
}

impl TcpTransport {
    pub fn new(connect_timeout: Duration) -> TcpTransport {
        TcpTransport { connect_timeout }
    }
}

impl Transport for TcpTransport {
    fn send(&self, addr: &str, frame: &[u8]) -> Result<()> {
        let socket_addr = addr
            .to_socket_addrs()
            .map_err(|e| BlockchainError::Network(format!("Invalid address {addr}: {e}")))?
            .next()
            .ok_or_else(|| BlockchainError::Network(format!("Address {addr} did not resolve")))?;

        let mut stream = TcpStream::connect_timeout(&socket_addr, self.connect_timeout)
            .map_err(|e| BlockchainError::Network(format!("Failed to connect to {addr}: {e}")))?;
        stream
            .set_write_timeout(Some(self.connect_timeout))
            .map_err(|e| BlockchainError::Network(format!("Failed to set write timeout: {e}")))?;

        stream
            .write_all(frame)
            .map_err(|e| BlockchainError::Network(format!("Failed to send data to {addr}: {e}")))?;
        stream
            .shutdown(Shutdown::Write)
            .map_err(|e| BlockchainError::Network(format!("Failed to close stream to {addr}: {e}")))?;

        debug!("Sent {} bytes to {addr}", frame.len());
        Ok(())
    }
}
