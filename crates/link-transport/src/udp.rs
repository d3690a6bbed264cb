use crate::{Endpoint, Frame, Result, TransportError};
use parking_lot::Mutex;
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;
use tracing::{debug, info};

const MAX_DATAGRAM: usize = 65_507;

/// UDP server-side link: binds locally and talks to whichever peer sent last.
///
/// Each datagram carries exactly one JSON-encoded [`Frame`].
pub struct UdpLink {
    name: String,
    socket: UdpSocket,
    remote: Mutex<Option<SocketAddr>>,
    write_lock: Mutex<()>,
    // Reused by every receive; there is one reader per link.
    read_buf: Mutex<Vec<u8>>,
}

impl UdpLink {
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr).map_err(|e| match e.kind() {
            ErrorKind::AddrInUse => TransportError::PortInUse(addr.to_string()),
            _ => TransportError::Io(e.to_string()),
        })?;
        let local = socket
            .local_addr()
            .map_err(|e| TransportError::Io(e.to_string()))?;
        info!(%local, "udp link bound");
        Ok(Self {
            name: format!("udp://{local}"),
            socket,
            remote: Mutex::new(None),
            write_lock: Mutex::new(()),
            read_buf: Mutex::new(vec![0u8; MAX_DATAGRAM]),
        })
    }

    /// Pin the remote peer instead of learning it from inbound traffic.
    pub fn connect_to(&self, remote: SocketAddr) {
        *self.remote.lock() = Some(remote);
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket
            .local_addr()
            .map_err(|e| TransportError::Io(e.to_string()))
    }
}

impl Endpoint for UdpLink {
    fn name(&self) -> &str {
        &self.name
    }

    fn recv(&self, timeout: Duration) -> Result<Frame> {
        // A zero read timeout means "block forever" for sockets.
        let timeout = timeout.max(Duration::from_millis(1));
        self.socket
            .set_read_timeout(Some(timeout))
            .map_err(|e| TransportError::Io(e.to_string()))?;
        let mut buf = self.read_buf.lock();
        let (n, from) = self.socket.recv_from(&mut buf).map_err(|e| match e.kind() {
            ErrorKind::WouldBlock | ErrorKind::TimedOut => TransportError::Timeout,
            _ => TransportError::Io(e.to_string()),
        })?;
        {
            let mut remote = self.remote.lock();
            if *remote != Some(from) {
                debug!(%from, "udp peer changed");
                *remote = Some(from);
            }
        }
        serde_json::from_slice(&buf[..n]).map_err(|e| TransportError::Codec(e.to_string()))
    }

    fn send(&self, frame: &Frame) -> Result<()> {
        let remote = (*self.remote.lock()).ok_or(TransportError::NoPeer)?;
        let bytes = serde_json::to_vec(frame).map_err(|e| TransportError::Codec(e.to_string()))?;
        let _guard = self.write_lock.lock();
        self.socket
            .send_to(&bytes, remote)
            .map_err(|e| TransportError::Io(e.to_string()))?;
        Ok(())
    }
}
