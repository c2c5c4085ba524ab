//! UDP transport over `std::net::UdpSocket`.

use std::io;
use std::net::{SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use crate::error::{KnxError, Result};
use crate::net::transport::Transport;

/// Default time a receive call blocks before reporting "nothing yet"
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// [`Transport`] backed by a UDP socket.
///
/// The socket is created by [`bind`](Transport::bind) and dropped by
/// [`close`](Transport::close), so one transport can be bound again after a
/// disconnect.
#[derive(Debug)]
pub struct UdpTransport {
    socket: RwLock<Option<Arc<UdpSocket>>>,
    poll_interval: Duration,
}

impl UdpTransport {
    /// Create an unbound transport
    pub fn new() -> Self {
        Self::with_poll_interval(DEFAULT_POLL_INTERVAL)
    }

    /// Create an unbound transport with a custom receive poll interval
    pub fn with_poll_interval(poll_interval: Duration) -> Self {
        Self {
            socket: RwLock::new(None),
            poll_interval,
        }
    }

    /// Wrap an already configured socket (e.g. a multicast socket).
    ///
    /// [`bind`](Transport::bind) then keeps this socket and only reports its
    /// local address.
    pub fn from_socket(socket: UdpSocket) -> Result<Self> {
        let transport = Self::new();
        socket.set_read_timeout(Some(transport.poll_interval))?;
        *transport
            .socket
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(socket));
        Ok(transport)
    }

    fn socket(&self) -> Result<Arc<UdpSocket>> {
        self.socket
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(Arc::clone)
            .ok_or_else(KnxError::not_bound)
    }
}

impl Default for UdpTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn local_v4(socket: &UdpSocket) -> Result<SocketAddrV4> {
    match socket.local_addr()? {
        SocketAddr::V4(addr) => Ok(addr),
        SocketAddr::V6(_) => Err(KnxError::not_bound()),
    }
}

impl Transport for UdpTransport {
    fn bind(&self, local: SocketAddrV4) -> Result<SocketAddrV4> {
        let mut slot = self.socket.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(socket) = slot.as_ref() {
            return local_v4(socket);
        }

        let socket = UdpSocket::bind(local)?;
        socket.set_read_timeout(Some(self.poll_interval))?;
        let bound = local_v4(&socket)?;
        log::debug!("UDP transport bound to {bound}");
        *slot = Some(Arc::new(socket));
        Ok(bound)
    }

    fn send_to(&self, data: &[u8], dest: SocketAddrV4) -> Result<()> {
        let socket = self.socket()?;
        socket.send_to(data, dest).map_err(KnxError::send_failed)?;
        Ok(())
    }

    fn recv_from(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddrV4)>> {
        let socket = self.socket()?;
        match socket.recv_from(buf) {
            Ok((len, SocketAddr::V4(source))) => Ok(Some((len, source))),
            Ok((_, SocketAddr::V6(source))) => {
                log::debug!("ignoring datagram from IPv6 source {source}");
                Ok(None)
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(None)
            }
            Err(e) => Err(KnxError::receive_failed(e)),
        }
    }

    fn is_ready(&self) -> bool {
        self.socket
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn close(&self) {
        self.socket
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn loopback() -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)
    }

    #[test]
    fn test_unbound_send_fails() {
        let transport = UdpTransport::new();
        assert!(!transport.is_ready());
        let err = transport.send_to(&[0x06], loopback()).unwrap_err();
        assert!(err.is_transport());
    }

    #[test]
    fn test_send_receive_loopback() {
        let a = UdpTransport::new();
        let b = UdpTransport::new();
        let a_addr = a.bind(loopback()).unwrap();
        let b_addr = b.bind(loopback()).unwrap();
        assert_ne!(a_addr.port(), 0);

        a.send_to(&[0x06, 0x10, 0x02, 0x08], b_addr).unwrap();

        let mut buf = [0u8; 16];
        let mut received = None;
        for _ in 0..20 {
            if let Some(r) = b.recv_from(&mut buf).unwrap() {
                received = Some(r);
                break;
            }
        }
        let (len, source) = received.expect("datagram not received");
        assert_eq!(&buf[..len], &[0x06, 0x10, 0x02, 0x08]);
        assert_eq!(source, a_addr);
    }

    #[test]
    fn test_recv_times_out_with_none() {
        let transport = UdpTransport::with_poll_interval(Duration::from_millis(20));
        transport.bind(loopback()).unwrap();
        let mut buf = [0u8; 16];
        assert!(transport.recv_from(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_close_and_rebind() {
        let transport = UdpTransport::new();
        transport.bind(loopback()).unwrap();
        assert!(transport.is_ready());
        transport.close();
        assert!(!transport.is_ready());
        transport.bind(loopback()).unwrap();
        assert!(transport.is_ready());
    }
}
