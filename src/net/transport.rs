//! Network transport abstraction for KNXnet/IP communication.
//!
//! This module provides the `Transport` trait that abstracts the underlying
//! datagram channel, enabling:
//! - Testability through mock implementations
//! - Flexibility to support different transport types (UDP, multicast, ...)
//!
//! ## Design Pattern
//!
//! High-level modules ([`Processor`](crate::processor::Processor),
//! [`TunnelClient`](crate::protocol::TunnelClient)) depend on this trait,
//! and concrete sockets implement it. Both can vary independently.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use knx_tunnel::net::{MockTransport, Transport, UdpTransport};
//!
//! // Production: use real UDP socket
//! let transport: Arc<dyn Transport> = Arc::new(UdpTransport::new());
//!
//! // Testing: use the gateway simulator
//! let mock: Arc<dyn Transport> = Arc::new(MockTransport::new());
//! ```

use std::net::SocketAddrV4;

use crate::error::Result;

/// Blocking datagram transport shared between a caller thread and the
/// processor's listener thread.
///
/// All methods take `&self`: one thread sits in [`recv_from`](Self::recv_from)
/// while others send, so implementations use interior mutability.
///
/// # Examples
///
/// ## Implementing for a custom transport
///
/// ```rust,no_run
/// use std::net::SocketAddrV4;
/// use knx_tunnel::net::Transport;
/// use knx_tunnel::Result;
///
/// #[derive(Debug)]
/// struct SerialTransport;
///
/// impl Transport for SerialTransport {
///     fn bind(&self, local: SocketAddrV4) -> Result<SocketAddrV4> {
///         Ok(local)
///     }
///
///     fn send_to(&self, _data: &[u8], _dest: SocketAddrV4) -> Result<()> {
///         // Send data over serial with framing
///         Ok(())
///     }
///
///     fn recv_from(&self, _buf: &mut [u8]) -> Result<Option<(usize, SocketAddrV4)>> {
///         // Nothing arrived within the poll interval
///         Ok(None)
///     }
/// }
/// ```
pub trait Transport: Send + Sync + core::fmt::Debug {
    /// Open the channel on `local` (port 0 = any available port).
    ///
    /// Returns the effective local address.
    fn bind(&self, local: SocketAddrV4) -> Result<SocketAddrV4>;

    /// Send one datagram to `dest`.
    fn send_to(&self, data: &[u8], dest: SocketAddrV4) -> Result<()>;

    /// Receive one datagram.
    ///
    /// Blocks for at most the transport's poll interval. `Ok(None)` means
    /// nothing arrived yet; callers loop and re-check their own stop
    /// condition in between.
    fn recv_from(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddrV4)>>;

    /// Check if the transport is currently bound and usable.
    ///
    /// Default implementation returns `true`.
    fn is_ready(&self) -> bool {
        true
    }

    /// Close the transport and release resources.
    ///
    /// Default implementation does nothing.
    fn close(&self) {}
}
