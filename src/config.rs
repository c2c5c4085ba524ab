//! Session and discovery configuration.
//!
//! Configuration is read once and handed to [`TunnelClient`](crate::protocol::TunnelClient)
//! or [`Discoverer`](crate::discovery::Discoverer); nothing re-reads it while a
//! session runs.
//!
//! Besides the builder methods, [`TunnelConfig::from_key_values`] accepts the
//! simple `KEY=VALUE` format used for deployment files:
//!
//! ```text
//! KNX_GATEWAY_IP=192.168.1.10
//! KNX_GATEWAY_PORT=3671
//! KNX_LOCAL_IP=192.168.1.20
//! KNX_NAT=false
//! KNX_HEARTBEAT_SECS=60
//! ```

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs};
use std::time::Duration;

use crate::error::{KnxError, Result};
use crate::protocol::constants::{
    HEARTBEAT_ATTEMPTS, HEARTBEAT_INTERVAL, KNXNETIP_DEFAULT_PORT, KNXNETIP_MULTICAST_ADDR,
};

/// Settings of one tunneling session.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TunnelConfig {
    /// Gateway control endpoint
    pub gateway: SocketAddrV4,
    /// Local address to bind (port 0 = ephemeral)
    pub local_addr: SocketAddrV4,
    /// Advertise the NAT endpoint `0.0.0.0:0` instead of the local address
    pub nat_mode: bool,
    /// Time between connection-state checks
    pub heartbeat_interval: Duration,
    /// Failed checks in a row before the link is declared dead
    pub heartbeat_attempts: u8,
}

impl TunnelConfig {
    /// Configuration for `gateway` with protocol defaults.
    pub const fn new(gateway: SocketAddrV4) -> Self {
        Self {
            gateway,
            local_addr: SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0),
            nat_mode: false,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            heartbeat_attempts: HEARTBEAT_ATTEMPTS,
        }
    }

    /// Resolve `host` (name or dotted address) to an IPv4 gateway endpoint.
    ///
    /// # Errors
    ///
    /// `UnknownHost` if the name does not resolve to an IPv4 address.
    pub fn resolve(host: &str, port: u16) -> Result<Self> {
        let addrs = (host, port).to_socket_addrs().map_err(|e| {
            log::warn!("cannot resolve gateway {host}: {e}");
            KnxError::unknown_host()
        })?;

        addrs
            .into_iter()
            .find_map(|addr| match addr {
                SocketAddr::V4(v4) => Some(Self::new(v4)),
                SocketAddr::V6(_) => None,
            })
            .ok_or_else(KnxError::unknown_host)
    }

    /// Parse `KEY=VALUE` lines.
    ///
    /// `KNX_GATEWAY_IP` is required. Unknown keys and blank or `#` lines are
    /// ignored; unparsable optional values keep their default.
    ///
    /// # Errors
    ///
    /// `UnknownHost` if the gateway is missing or does not resolve.
    pub fn from_key_values(text: &str) -> Result<Self> {
        let value = |key: &str| {
            text.lines()
                .map(str::trim)
                .filter(|line| !line.starts_with('#'))
                .find_map(|line| line.strip_prefix(key)?.strip_prefix('='))
                .map(str::trim)
        };

        let port = parse_or(value("KNX_GATEWAY_PORT"), KNXNETIP_DEFAULT_PORT);
        let host = value("KNX_GATEWAY_IP").ok_or_else(KnxError::unknown_host)?;
        let mut config = Self::resolve(host, port)?;

        if let Some(local) = value("KNX_LOCAL_IP") {
            let ip = parse_or(Some(local), Ipv4Addr::UNSPECIFIED);
            config.local_addr = SocketAddrV4::new(ip, 0);
        }
        config.nat_mode = parse_or(value("KNX_NAT"), false);
        if let Some(secs) = value("KNX_HEARTBEAT_SECS") {
            config.heartbeat_interval =
                Duration::from_secs(parse_or(Some(secs), HEARTBEAT_INTERVAL.as_secs()));
        }
        Ok(config)
    }

    /// Set the local bind address
    #[must_use]
    pub const fn with_local_addr(mut self, local_addr: SocketAddrV4) -> Self {
        self.local_addr = local_addr;
        self
    }

    /// Enable or disable NAT mode
    #[must_use]
    pub const fn with_nat_mode(mut self, nat_mode: bool) -> Self {
        self.nat_mode = nat_mode;
        self
    }

    /// Set the heartbeat interval
    #[must_use]
    pub const fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the number of heartbeat attempts (at least 1)
    #[must_use]
    pub fn with_heartbeat_attempts(mut self, attempts: u8) -> Self {
        self.heartbeat_attempts = attempts.max(1);
        self
    }
}

fn parse_or<T: core::str::FromStr>(value: Option<&str>, default: T) -> T {
    match value {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            log::warn!("ignoring invalid configuration value {raw:?}");
            default
        }),
        None => default,
    }
}

/// Settings of gateway discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DiscoveryConfig {
    /// Multicast group gateways listen on
    pub multicast_group: Ipv4Addr,
    /// Discovery port
    pub port: u16,
    /// Also send the search to the subnet broadcast address of this prefix
    pub broadcast_prefix: Option<u8>,
}

impl DiscoveryConfig {
    /// Also search via subnet broadcast (`prefix_len` of the local network)
    #[must_use]
    pub const fn with_broadcast(mut self, prefix_len: u8) -> Self {
        self.broadcast_prefix = Some(prefix_len);
        self
    }

    /// Multicast destination of search requests
    pub const fn multicast_endpoint(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.multicast_group, self.port)
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            multicast_group: KNXNETIP_MULTICAST_ADDR,
            port: KNXNETIP_DEFAULT_PORT,
            broadcast_prefix: None,
        }
    }
}
