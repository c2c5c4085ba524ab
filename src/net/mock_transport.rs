//! Mock transport implementation for testing.
//!
//! [`MockTransport`] plays the gateway side of the protocol in memory: every
//! request the client sends is answered according to a [`GatewayBehavior`],
//! and tests can inject unsolicited datagrams or scripted replies.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use knx_tunnel::config::TunnelConfig;
//! use knx_tunnel::net::MockTransport;
//! use knx_tunnel::protocol::{ServiceType, TunnelClient};
//!
//! let mock = Arc::new(MockTransport::new());
//! let client = TunnelClient::new(TunnelConfig::new(mock.gateway()), mock.clone());
//!
//! client.connect().unwrap();
//! client.service(&[0x11, 0x00, 0xBC, 0xE0]).unwrap();
//!
//! // Verify what was sent
//! assert_eq!(mock.sent_of(ServiceType::TunnellingRequest).len(), 1);
//! client.disconnect().unwrap();
//! ```

use std::collections::VecDeque;
use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::{KnxError, Result};
use crate::net::transport::Transport;
use crate::protocol::constants::{ServiceType, DIB_DEVICE_INFO, E_NO_ERROR, KNXNETIP_DEFAULT_PORT};
use crate::protocol::frame::Hpai;
use crate::protocol::message::Message;
use crate::protocol::services::{
    ConnectResponse, ConnectionHeader, ConnectionResponseData, ConnectionStateResponse,
    DisconnectResponse, SearchResponse, TunnelingAck,
};

const MOCK_POLL_INTERVAL: Duration = Duration::from_millis(10);
const FIRST_EPHEMERAL_PORT: u16 = 50_000;

/// How the simulated gateway answers requests.
///
/// Every field is public; tweak it through [`MockTransport::configure`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayBehavior {
    /// Channel id handed out on connect
    pub channel_id: u8,
    /// Data endpoint put into the connect response (`None` = gateway address)
    pub data_endpoint: Option<Hpai>,
    /// Individual address put into the connect response
    pub individual_address: u16,
    pub connect_status: u8,
    pub connection_state_status: u8,
    pub disconnect_status: u8,
    pub ack_status: u8,
    /// Answer requests at all
    pub respond: bool,
    /// Service types that get no answer even when `respond` is set
    pub silent: Vec<ServiceType>,
    /// Answer search requests with a device-information DIB
    pub answer_search: bool,
    /// Friendly name reported in search responses
    pub friendly_name: String,
    /// Channel id written into tunneling acks instead of the request's
    pub ack_channel_override: Option<u8>,
    /// Sequence counter written into tunneling acks instead of the request's
    pub ack_sequence_override: Option<u8>,
    /// Channel id written into connection-state and disconnect responses
    pub response_channel_override: Option<u8>,
}

impl Default for GatewayBehavior {
    fn default() -> Self {
        Self {
            channel_id: 1,
            data_endpoint: None,
            individual_address: 0x11FA,
            connect_status: E_NO_ERROR,
            connection_state_status: E_NO_ERROR,
            disconnect_status: E_NO_ERROR,
            ack_status: E_NO_ERROR,
            respond: true,
            silent: Vec::new(),
            answer_search: true,
            friendly_name: String::from("Mock KNX IP Interface"),
            ack_channel_override: None,
            ack_sequence_override: None,
            response_channel_override: None,
        }
    }
}

#[derive(Debug)]
struct MockState {
    behavior: GatewayBehavior,
    bound: Option<SocketAddrV4>,
    next_port: u16,
    bind_count: usize,
    inbound: VecDeque<(Vec<u8>, SocketAddrV4)>,
    scripted: VecDeque<Message>,
    sent: Vec<(Vec<u8>, SocketAddrV4)>,
    fail_receive: bool,
}

/// In-memory gateway simulator implementing [`Transport`].
///
/// # Examples
///
/// ```rust
/// use knx_tunnel::net::MockTransport;
///
/// let mock = MockTransport::new();
/// mock.configure(|gateway| {
///     gateway.channel_id = 7;
///     gateway.connect_status = 0x24; // E_NO_MORE_CONNECTIONS
/// });
/// ```
#[derive(Debug)]
pub struct MockTransport {
    gateway: SocketAddrV4,
    state: Mutex<MockState>,
    arrived: Condvar,
}

impl MockTransport {
    /// Create a mock gateway at `192.168.1.10:3671`.
    pub fn new() -> Self {
        Self::with_gateway(SocketAddrV4::new(
            Ipv4Addr::new(192, 168, 1, 10),
            KNXNETIP_DEFAULT_PORT,
        ))
    }

    /// Create a mock gateway answering from `gateway`.
    pub fn with_gateway(gateway: SocketAddrV4) -> Self {
        Self {
            gateway,
            state: Mutex::new(MockState {
                behavior: GatewayBehavior::default(),
                bound: None,
                next_port: FIRST_EPHEMERAL_PORT,
                bind_count: 0,
                inbound: VecDeque::new(),
                scripted: VecDeque::new(),
                sent: Vec::new(),
                fail_receive: false,
            }),
            arrived: Condvar::new(),
        }
    }

    /// Address of the simulated gateway
    pub const fn gateway(&self) -> SocketAddrV4 {
        self.gateway
    }

    /// Change how the gateway answers.
    pub fn configure(&self, f: impl FnOnce(&mut GatewayBehavior)) {
        f(&mut self.state().behavior);
    }

    /// Answer the next request with `reply` instead of a synthesized one.
    ///
    /// Scripted replies are consumed in FIFO order, one per request.
    pub fn push_reply(&self, reply: Message) {
        self.state().scripted.push_back(reply);
    }

    /// Deliver an unsolicited message from the gateway.
    pub fn push_inbound(&self, message: &Message) {
        self.push_inbound_from(message, self.gateway);
    }

    /// Deliver an unsolicited message from an arbitrary source.
    pub fn push_inbound_from(&self, message: &Message, source: SocketAddrV4) {
        if let Ok(bytes) = message.to_bytes() {
            self.push_raw(&bytes, source);
        }
    }

    /// Deliver raw bytes from `source`, e.g. a malformed or foreign datagram.
    pub fn push_raw(&self, data: &[u8], source: SocketAddrV4) {
        self.state().inbound.push_back((data.to_vec(), source));
        self.arrived.notify_all();
    }

    /// Make the next receive call fail with an I/O error.
    pub fn fail_receive(&self) {
        self.state().fail_receive = true;
        self.arrived.notify_all();
    }

    /// Every datagram sent so far with its destination
    pub fn sent_packets(&self) -> Vec<(Vec<u8>, SocketAddrV4)> {
        self.state().sent.clone()
    }

    /// Every decodable message sent so far
    pub fn sent_messages(&self) -> Vec<Message> {
        self.state()
            .sent
            .iter()
            .filter_map(|(bytes, _)| Message::decode(bytes).ok())
            .collect()
    }

    /// Sent messages of one service type
    pub fn sent_of(&self, service_type: ServiceType) -> Vec<Message> {
        self.sent_messages()
            .into_iter()
            .filter(|m| m.service_type() == service_type)
            .collect()
    }

    /// Forget recorded datagrams.
    pub fn clear_sent(&self) {
        self.state().sent.clear();
    }

    /// Local address the transport is bound to, if any
    pub fn bound_addr(&self) -> Option<SocketAddrV4> {
        self.state().bound
    }

    /// Number of successful bind calls
    pub fn bind_count(&self) -> usize {
        self.state().bind_count
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn answer(&self, state: &mut MockState, request: &Message) -> Option<Message> {
        if !request.is_request()
            || !state.behavior.respond
            || state.behavior.silent.contains(&request.service_type())
        {
            return None;
        }
        if let Some(reply) = state.scripted.pop_front() {
            return Some(reply);
        }

        let behavior = &state.behavior;
        let response_channel = |channel: u8| behavior.response_channel_override.unwrap_or(channel);
        match request {
            Message::SearchRequest(_) => behavior
                .answer_search
                .then(|| self.search_response(&behavior.friendly_name))
                .flatten(),
            Message::ConnectRequest(_) => {
                let response = if behavior.connect_status == E_NO_ERROR {
                    ConnectResponse::accepted(
                        behavior.channel_id,
                        behavior
                            .data_endpoint
                            .unwrap_or_else(|| Hpai::from(self.gateway)),
                        ConnectionResponseData::tunnel(behavior.individual_address),
                    )
                } else {
                    ConnectResponse::refused(behavior.connect_status)
                };
                Some(Message::ConnectResponse(response))
            }
            Message::ConnectionStateRequest(r) => Some(Message::ConnectionStateResponse(
                ConnectionStateResponse::new(
                    response_channel(r.channel_id),
                    behavior.connection_state_status,
                ),
            )),
            Message::DisconnectRequest(r) => Some(Message::DisconnectResponse(
                DisconnectResponse::new(response_channel(r.channel_id), behavior.disconnect_status),
            )),
            Message::TunnelingRequest(r) => {
                let header = r.connection_header;
                Some(Message::TunnelingAck(TunnelingAck::new(
                    ConnectionHeader::new(
                        behavior.ack_channel_override.unwrap_or(header.channel_id),
                        behavior
                            .ack_sequence_override
                            .unwrap_or(header.sequence_counter),
                    ),
                    behavior.ack_status,
                )))
            }
            _ => None,
        }
    }

    fn search_response(&self, friendly_name: &str) -> Option<Message> {
        let mut dib = [0u8; 54];
        dib[0] = 54;
        dib[1] = DIB_DEVICE_INFO;
        dib[2] = 0x02; // TP1 medium
        let name = friendly_name.as_bytes();
        let len = name.len().min(30);
        dib[24..24 + len].copy_from_slice(&name[..len]);

        SearchResponse::new(Hpai::from(self.gateway), &dib)
            .ok()
            .map(Message::SearchResponse)
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MockTransport {
    fn bind(&self, local: SocketAddrV4) -> Result<SocketAddrV4> {
        let mut state = self.state();
        if let Some(bound) = state.bound {
            return Ok(bound);
        }

        let port = if local.port() == 0 {
            let port = state.next_port;
            state.next_port = state.next_port.wrapping_add(1);
            port
        } else {
            local.port()
        };
        let bound = SocketAddrV4::new(*local.ip(), port);
        state.bound = Some(bound);
        state.bind_count += 1;
        Ok(bound)
    }

    fn send_to(&self, data: &[u8], dest: SocketAddrV4) -> Result<()> {
        let mut state = self.state();
        if state.bound.is_none() {
            return Err(KnxError::not_bound());
        }
        state.sent.push((data.to_vec(), dest));

        let Ok(request) = Message::decode(data) else {
            return Ok(());
        };
        if let Some(reply) = self.answer(&mut state, &request) {
            if let Ok(bytes) = reply.to_bytes() {
                state.inbound.push_back((bytes.to_vec(), self.gateway));
                self.arrived.notify_all();
            }
        }
        Ok(())
    }

    fn recv_from(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddrV4)>> {
        let state = self.state();
        let (mut state, _) = self
            .arrived
            .wait_timeout_while(state, MOCK_POLL_INTERVAL, |s| {
                s.bound.is_some() && s.inbound.is_empty() && !s.fail_receive
            })
            .unwrap_or_else(PoisonError::into_inner);

        if state.bound.is_none() {
            return Err(KnxError::not_bound());
        }
        if state.fail_receive {
            state.fail_receive = false;
            return Err(KnxError::receive_failed(io::Error::other(
                "simulated receive failure",
            )));
        }
        let Some((data, source)) = state.inbound.pop_front() else {
            return Ok(None);
        };
        let len = data.len().min(buf.len());
        buf[..len].copy_from_slice(&data[..len]);
        Ok(Some((len, source)))
    }

    fn is_ready(&self) -> bool {
        self.state().bound.is_some()
    }

    fn close(&self) {
        let mut state = self.state();
        state.bound = None;
        state.inbound.clear();
        drop(state);
        self.arrived.notify_all();
    }
}
