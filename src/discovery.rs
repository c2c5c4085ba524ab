//! KNX gateway discovery via SEARCH_REQUEST.
//!
//! Gateways listen on the KNXnet/IP multicast group and answer a search with
//! their control endpoint and device description. [`Discoverer`] sends the
//! search and reports every answer to a [`DiscoveryListener`]; picking a
//! gateway is left to the caller.
//!
//! ## Protocol Flow
//!
//! ```text
//! Client                          Gateway
//!   |                                |
//!   |------- SEARCH_REQUEST -------->| (multicast)
//!   |<------ SEARCH_RESPONSE --------|
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::net::Ipv4Addr;
//! use std::time::Duration;
//! use knx_tunnel::config::DiscoveryConfig;
//! use knx_tunnel::discovery::discover_gateways;
//!
//! let source = Ipv4Addr::new(192, 168, 1, 20);
//! for gateway in discover_gateways(DiscoveryConfig::default(), source, Duration::from_secs(3))? {
//!     println!("{} at {}", gateway.name.as_deref().unwrap_or("?"), gateway.control_endpoint);
//! }
//! # Ok::<(), knx_tunnel::KnxError>(())
//! ```

use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};

use crate::config::DiscoveryConfig;
use crate::error::{KnxError, Result};
use crate::net::transport::Transport;
use crate::net::udp::UdpTransport;
use crate::processor::{MessageHandler, Processor};
use crate::protocol::frame::Hpai;
use crate::protocol::message::Message;
use crate::protocol::services::{SearchRequest, SearchResponse};

/// Discovered KNX gateway information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayInfo {
    /// Control endpoint to connect a tunnel to
    pub control_endpoint: SocketAddrV4,
    /// Address the search response came from
    pub source: SocketAddrV4,
    /// Friendly name from the device description, if any
    pub name: Option<String>,
}

/// Receiver of discovered gateways.
pub trait DiscoveryListener: Send + Sync {
    /// Called on the listener thread for each search response
    fn on_gateway(&self, gateway: GatewayInfo);
}

impl<F: Fn(GatewayInfo) + Send + Sync> DiscoveryListener for F {
    fn on_gateway(&self, gateway: GatewayInfo) {
        self(gateway);
    }
}

struct Running {
    processor: Processor,
    /// Socket clone and interface used to leave the group
    membership: Option<(UdpSocket, Ipv4Addr)>,
}

/// Multicast gateway search.
pub struct Discoverer {
    config: DiscoveryConfig,
    transport: Option<Arc<dyn Transport>>,
    running: Mutex<Option<Running>>,
}

impl core::fmt::Debug for Discoverer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Discoverer")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Discoverer {
    /// Discoverer using a multicast UDP socket.
    pub const fn new(config: DiscoveryConfig) -> Self {
        Self {
            config,
            transport: None,
            running: Mutex::new(None),
        }
    }

    /// Discoverer over a caller-provided transport (no multicast membership).
    pub fn with_transport(config: DiscoveryConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            transport: Some(transport),
            running: Mutex::new(None),
        }
    }

    /// Send a search from interface `source` and report answers to `listener`.
    ///
    /// Returns as soon as the search is sent; answers arrive on the
    /// listener thread until [`stop`](Self::stop).
    ///
    /// # Errors
    ///
    /// `InvalidState` if a search is still listening; socket errors.
    pub fn start(&self, source: Ipv4Addr, listener: Arc<dyn DiscoveryListener>) -> Result<()> {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = running.take() {
            if previous.processor.is_running() {
                *running = Some(previous);
                return Err(KnxError::InvalidState);
            }
            // Listener died on its own; release what it left behind
            self.release(previous);
        }

        let mut membership = None;
        let transport: Arc<dyn Transport> = match &self.transport {
            Some(transport) => Arc::clone(transport),
            None => {
                let socket = multicast_socket(&self.config, source)?;
                membership = Some((socket.try_clone()?, source));
                Arc::new(UdpTransport::from_socket(socket)?)
            }
        };

        let processor = Processor::new(transport, Arc::new(SearchEvents { listener }))
            .skipping_unknown_services();
        let local = processor.start(SocketAddrV4::new(source, self.config.port))?;

        let endpoint = if source.is_unspecified() {
            Hpai::NAT
        } else {
            Hpai::from(SocketAddrV4::new(source, local.port()))
        };
        let search = Message::SearchRequest(SearchRequest::new(endpoint));
        processor.send(&search, self.config.multicast_endpoint())?;

        if let Some(prefix_len) = self.config.broadcast_prefix {
            let broadcast = SocketAddrV4::new(broadcast_address(source, prefix_len), self.config.port);
            if let Err(e) = processor.send(&search, broadcast) {
                log::warn!("broadcast search to {broadcast} failed: {e}");
            }
        }

        log::info!("searching gateways from {source}");
        *running = Some(Running {
            processor,
            membership,
        });
        Ok(())
    }

    /// Leave the multicast group and stop listening. Idempotent.
    pub fn stop(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(running) = running {
            self.release(running);
        }
    }

    /// True while a search is listening for answers
    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|running| running.processor.is_running())
    }

    fn release(&self, running: Running) {
        if let Some((socket, interface)) = &running.membership {
            if let Err(e) = socket.leave_multicast_v4(&self.config.multicast_group, interface) {
                log::warn!("leaving multicast group failed: {e}");
            }
        }
        running.processor.stop();
        log::debug!("discovery stopped");
    }

    /// Search for `window` and return the distinct gateways that answered.
    pub fn collect(&self, source: Ipv4Addr, window: Duration) -> Result<Vec<GatewayInfo>> {
        let found = Arc::new(Mutex::new(Vec::<GatewayInfo>::new()));
        let sink = Arc::clone(&found);
        self.start(
            source,
            Arc::new(move |gateway: GatewayInfo| {
                let mut found = sink.lock().unwrap_or_else(PoisonError::into_inner);
                if !found
                    .iter()
                    .any(|g| g.control_endpoint == gateway.control_endpoint)
                {
                    found.push(gateway);
                }
            }),
        )?;

        thread::sleep(window);
        self.stop();

        let gateways = found.lock().unwrap_or_else(PoisonError::into_inner).clone();
        Ok(gateways)
    }
}

impl Drop for Discoverer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Search from `source` for `window` over multicast and return the gateways found.
pub fn discover_gateways(
    config: DiscoveryConfig,
    source: Ipv4Addr,
    window: Duration,
) -> Result<Vec<GatewayInfo>> {
    Discoverer::new(config).collect(source, window)
}

/// Calculate broadcast address for a given IP and prefix length
pub fn broadcast_address(ip: Ipv4Addr, prefix_len: u8) -> Ipv4Addr {
    if prefix_len >= 32 {
        return ip;
    }

    let host_mask = u32::MAX >> prefix_len;
    Ipv4Addr::from(u32::from(ip) | host_mask)
}

fn multicast_socket(config: &DiscoveryConfig, source: Ipv4Addr) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.port).into())?;
    socket.join_multicast_v4(&config.multicast_group, &source)?;
    socket.set_multicast_if_v4(&source)?;
    socket.set_broadcast(true)?;
    Ok(socket.into())
}

struct SearchEvents {
    listener: Arc<dyn DiscoveryListener>,
}

impl MessageHandler for SearchEvents {
    fn on_request(&self, message: Message, source: SocketAddrV4) {
        // Our own search looped back, or another client's
        log::trace!("ignoring {:?} from {source}", message.service_type());
    }

    fn on_search_response(&self, response: SearchResponse, source: SocketAddrV4) {
        let gateway = GatewayInfo {
            control_endpoint: response.control_endpoint.resolve(source),
            source,
            name: response.friendly_name(),
        };
        log::info!(
            "found gateway {} at {}",
            gateway.name.as_deref().unwrap_or("?"),
            gateway.control_endpoint
        );
        self.listener.on_gateway(gateway);
    }

    fn on_listener_stopped(&self, error: &KnxError) {
        log::warn!("discovery listener stopped: {error}");
    }
}
