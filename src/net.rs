//! Datagram transports for KNXnet/IP communication.
//!
//! The processor talks to the network only through the [`Transport`]
//! trait, so the same session code runs over a real UDP socket
//! ([`UdpTransport`]) or over the scripted gateway simulator used in tests
//! ([`MockTransport`]).

pub mod mock_transport;
pub mod transport;
pub mod udp;

pub use mock_transport::{GatewayBehavior, MockTransport};
pub use transport::Transport;
pub use udp::UdpTransport;
