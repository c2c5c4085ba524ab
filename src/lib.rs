#![doc = include_str!("../README.md")]

//! ## Modules
//!
//! - [`protocol`]: wire structures, the [`Message`](protocol::Message) codec
//!   and the [`TunnelClient`] session
//! - [`processor`]: listener thread and request/response correlation
//! - [`net`]: the [`Transport`](net::Transport) abstraction, UDP and mock
//!   implementations
//! - [`discovery`]: multicast gateway search
//! - [`config`]: session and discovery settings
//! - [`error`]: [`KnxError`] and its kinds

pub mod config;
pub mod discovery;
pub mod error;
pub mod net;
pub mod processor;
pub mod protocol;

// Re-export commonly used types
#[doc(inline)]
pub use config::{DiscoveryConfig, TunnelConfig};
#[doc(inline)]
pub use discovery::{discover_gateways, Discoverer, GatewayInfo};
#[doc(inline)]
pub use error::{KnxError, Result};
#[doc(inline)]
pub use protocol::tunnel::{ConnectionStatus, TunnelClient};
