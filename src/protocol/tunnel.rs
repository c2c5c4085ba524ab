//! KNXnet/IP tunneling client.
//!
//! [`TunnelClient`] manages one tunneling session with a gateway on top of a
//! [`Processor`]:
//!
//! - Connection management (CONNECT/DISCONNECT)
//! - Heartbeat / keep-alive (CONNECTIONSTATE) on a dedicated timer thread
//! - Reliable frame delivery with ACK and sequence counter checks
//! - Inbound frames acknowledged and handed to a [`FrameListener`]
//! - Connected/disconnected transitions reported to a [`StatusListener`]
//!
//! `connect`, `disconnect`, `service` and heartbeat checks are serialized on
//! the processor's exchange lock, so a response is never matched to the
//! wrong request. Teardown of a session runs exactly once, whichever path
//! ends it (caller, heartbeat, gateway, listener failure or drop).
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use knx_tunnel::config::TunnelConfig;
//! use knx_tunnel::protocol::TunnelClient;
//!
//! let config = TunnelConfig::resolve("192.168.1.10", 3671)?;
//! let client = TunnelClient::udp(config);
//!
//! client.register(Arc::new(|frame: &[u8]| println!("bus frame: {frame:02X?}")));
//! client.connect()?;
//!
//! // L_Data.req group write 1/2/3 = on
//! client.service(&[0x11, 0x00, 0xBC, 0xE0, 0x00, 0x00, 0x0A, 0x03, 0x01, 0x00, 0x81])?;
//!
//! client.disconnect()?;
//! # Ok::<(), knx_tunnel::KnxError>(())
//! ```

use std::collections::VecDeque;
use std::net::SocketAddrV4;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::TunnelConfig;
use crate::error::{KnxError, Result};
use crate::net::transport::Transport;
use crate::net::udp::UdpTransport;
use crate::processor::{MessageHandler, Processor};
use crate::protocol::constants::{status_name, E_NO_ERROR};
use crate::protocol::frame::Hpai;
use crate::protocol::message::Message;
use crate::protocol::services::{
    ConnectRequest, ConnectionHeader, ConnectionStateRequest, DisconnectRequest,
    DisconnectResponse, TunnelingAck, TunnelingRequest,
};

/// Receiver of frames tunneled from the bus.
pub trait FrameListener: Send + Sync {
    /// Called on the listener thread with the cEMI payload of each new frame
    fn on_frame(&self, frame: &[u8]);
}

impl<F: Fn(&[u8]) + Send + Sync> FrameListener for F {
    fn on_frame(&self, frame: &[u8]) {
        self(frame);
    }
}

/// Connectivity of a [`TunnelClient`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connected,
}

/// Receiver of connectivity changes.
pub trait StatusListener: Send + Sync {
    fn on_status(&self, status: ConnectionStatus);
}

impl<F: Fn(ConnectionStatus) + Send + Sync> StatusListener for F {
    fn on_status(&self, status: ConnectionStatus) {
        self(status);
    }
}

/// Per-session state, created by a successful connect
#[derive(Debug, Clone, Copy)]
struct Connected {
    /// Communication channel ID assigned by gateway
    channel_id: u8,
    /// Send sequence counter (wraps at 256)
    send_sequence: u8,
    /// Receive sequence counter (expected)
    recv_sequence: u8,
    /// HPAI advertised for this host
    local_endpoint: Hpai,
    control_endpoint: SocketAddrV4,
    data_endpoint: SocketAddrV4,
}

struct Heartbeat {
    /// Dropping the sender cancels the timer
    cancel: Sender<()>,
    handle: JoinHandle<()>,
}

struct Session {
    state: Connected,
    heartbeat: Option<Heartbeat>,
}

/// Status changes waiting for delivery, in the order the session changed
#[derive(Debug, Default)]
struct StatusQueue {
    pending: VecDeque<ConnectionStatus>,
    /// A thread is currently draining `pending`
    delivering: bool,
}

struct Inner {
    config: TunnelConfig,
    processor: Processor,
    session: Mutex<Option<Session>>,
    frame_listener: RwLock<Option<Arc<dyn FrameListener>>>,
    status_listener: RwLock<Option<Arc<dyn StatusListener>>>,
    status_queue: Mutex<StatusQueue>,
}

/// Tunneling session with a KNXnet/IP gateway.
///
/// Dropping a connected client disconnects it gracefully.
pub struct TunnelClient {
    inner: Arc<Inner>,
}

impl core::fmt::Debug for TunnelClient {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TunnelClient")
            .field("gateway", &self.inner.config.gateway)
            .field("status", &self.status())
            .field("channel_id", &self.channel_id())
            .finish_non_exhaustive()
    }
}

impl TunnelClient {
    /// Create a disconnected client talking through `transport`.
    pub fn new(config: TunnelConfig, transport: Arc<dyn Transport>) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let events = Arc::new(ProcessorEvents {
                inner: Weak::clone(weak),
            });
            Inner {
                config,
                processor: Processor::new(transport, events),
                session: Mutex::new(None),
                frame_listener: RwLock::new(None),
                status_listener: RwLock::new(None),
                status_queue: Mutex::new(StatusQueue::default()),
            }
        });
        Self { inner }
    }

    /// Create a disconnected client over UDP.
    pub fn udp(config: TunnelConfig) -> Self {
        Self::new(config, Arc::new(UdpTransport::new()))
    }

    /// Open the tunnel.
    ///
    /// # Errors
    ///
    /// - `AlreadyConnected` if a session exists
    /// - `NoResponseFromInterface` if the gateway does not answer in time
    /// - `WrongResponseType` if it answers with something else
    /// - `ResponseError` if it refuses the connection
    pub fn connect(&self) -> Result<()> {
        self.inner.connect()
    }

    /// Close the tunnel.
    ///
    /// The session is torn down whatever the gateway answers; the outcome
    /// of the DISCONNECT exchange is returned afterwards.
    ///
    /// # Errors
    ///
    /// `NotConnected` without a session, otherwise the exchange outcome.
    pub fn disconnect(&self) -> Result<()> {
        self.inner.disconnect()
    }

    /// Disconnect (if connected) and connect again.
    pub fn reconnect(&self) -> Result<()> {
        if self.is_connected() {
            if let Err(e) = self.disconnect() {
                log::warn!("disconnect before reconnect failed: {e}");
            }
        }
        self.connect()
    }

    /// Send one cEMI frame through the tunnel and wait for its ACK.
    ///
    /// The send sequence counter advances only when the ACK checks out.
    ///
    /// # Errors
    ///
    /// - `NotConnected`
    /// - `NoResponseFromInterface`, `WrongResponseType`
    /// - `WrongChannelId`, `WrongSequenceCounterValue`
    /// - `ResponseError` for a non-OK ACK status
    pub fn service(&self, frame: &[u8]) -> Result<()> {
        self.inner.service(frame)
    }

    /// Set the receiver of inbound bus frames
    pub fn register(&self, listener: Arc<dyn FrameListener>) {
        *self
            .inner
            .frame_listener
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(listener);
    }

    /// Remove the receiver of inbound bus frames
    pub fn unregister(&self) {
        self.inner
            .frame_listener
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Set the receiver of connectivity changes
    pub fn set_status_listener(&self, listener: Arc<dyn StatusListener>) {
        *self
            .inner
            .status_listener
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(listener);
    }

    pub fn status(&self) -> ConnectionStatus {
        if self.is_connected() {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::Disconnected
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected().is_some()
    }

    /// Channel id of the current session
    pub fn channel_id(&self) -> Option<u8> {
        self.inner.connected().map(|c| c.channel_id)
    }

    /// Sequence counter the next `service` call will use
    pub fn sequence_counter(&self) -> Option<u8> {
        self.inner.connected().map(|c| c.send_sequence)
    }

    /// Gateway data endpoint of the current session
    pub fn data_endpoint(&self) -> Option<SocketAddrV4> {
        self.inner.connected().map(|c| c.data_endpoint)
    }

    pub fn config(&self) -> &TunnelConfig {
        &self.inner.config
    }
}

impl Drop for TunnelClient {
    fn drop(&mut self) {
        if self.is_connected() {
            if let Err(e) = self.disconnect() {
                log::warn!("disconnect on drop failed: {e}");
            }
        }
    }
}

impl Inner {
    fn session(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn connected(&self) -> Option<Connected> {
        self.session().as_ref().map(|s| s.state)
    }

    fn status_queue(&self) -> MutexGuard<'_, StatusQueue> {
        self.status_queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish a new session and queue its `Connected` report.
    fn open_session(&self, session: Session) {
        let mut slot = self.session();
        *slot = Some(session);
        self.status_queue().pending.push_back(ConnectionStatus::Connected);
    }

    /// Take the current session and queue its `Disconnected` report.
    fn take_session(&self) -> Option<Session> {
        let mut slot = self.session();
        let session = slot.take();
        if session.is_some() {
            self.status_queue().pending.push_back(ConnectionStatus::Disconnected);
        }
        session
    }

    fn local_endpoint(&self, bound: SocketAddrV4) -> Hpai {
        if self.config.nat_mode || bound.ip().is_unspecified() {
            Hpai::NAT
        } else {
            Hpai::from(bound)
        }
    }

    fn connect(self: &Arc<Self>) -> Result<()> {
        {
            let exchange = self.processor.lock();
            if self.session().is_some() {
                return Err(KnxError::already_connected());
            }

            let bound = self.processor.start(self.config.local_addr)?;
            let local_endpoint = self.local_endpoint(bound);
            let request = Message::ConnectRequest(ConnectRequest::new(local_endpoint, local_endpoint));
            let gateway = self.config.gateway;

            let opened = match exchange.exchange(&request, gateway) {
                Ok(Some(Message::ConnectResponse(response))) if response.is_ok() => {
                    Ok(Connected {
                        channel_id: response.channel_id,
                        send_sequence: 0,
                        recv_sequence: 0,
                        local_endpoint,
                        control_endpoint: gateway,
                        data_endpoint: response
                            .data_endpoint
                            .map_or(gateway, |hpai| hpai.resolve(gateway)),
                    })
                }
                Ok(Some(Message::ConnectResponse(response))) => {
                    log::warn!(
                        "gateway {gateway} refused connection: {}",
                        status_name(response.status)
                    );
                    Err(KnxError::response_error(response.status))
                }
                Ok(Some(_)) => Err(KnxError::wrong_response_type()),
                Ok(None) => Err(KnxError::no_response()),
                Err(e) => Err(e),
            };

            let state = match opened {
                Ok(state) => state,
                Err(e) => {
                    self.processor.stop();
                    return Err(e);
                }
            };

            let heartbeat = match Heartbeat::spawn(
                Arc::downgrade(self),
                self.config.heartbeat_interval,
                self.config.heartbeat_attempts,
            ) {
                Ok(heartbeat) => heartbeat,
                Err(e) => {
                    self.processor.stop();
                    return Err(e);
                }
            };

            self.open_session(Session {
                state,
                heartbeat: Some(heartbeat),
            });
            log::info!(
                "tunnel open: channel {} via {} (data endpoint {})",
                state.channel_id,
                gateway,
                state.data_endpoint
            );
        }

        self.flush_status();
        Ok(())
    }

    fn disconnect(&self) -> Result<()> {
        let (session, outcome) = {
            let exchange = self.processor.lock();
            let Some(state) = self.connected() else {
                return Err(KnxError::not_connected());
            };

            let request =
                Message::DisconnectRequest(DisconnectRequest::new(state.channel_id, state.local_endpoint));
            let outcome = match exchange.exchange(&request, state.control_endpoint) {
                Ok(Some(Message::DisconnectResponse(response))) => {
                    if response.channel_id != state.channel_id {
                        Err(KnxError::wrong_channel_id(state.channel_id, response.channel_id))
                    } else if !response.is_ok() {
                        Err(KnxError::response_error(response.status))
                    } else {
                        Ok(())
                    }
                }
                Ok(Some(_)) => Err(KnxError::wrong_response_type()),
                Ok(None) => Err(KnxError::no_response()),
                Err(e) => Err(e),
            };

            (self.take_session(), outcome)
        };

        if let Some(session) = session {
            self.finish(session);
        }
        outcome
    }

    /// End the session without talking to the gateway.
    fn teardown(&self) {
        let session = self.take_session();
        if let Some(session) = session {
            self.finish(session);
        }
    }

    fn finish(&self, session: Session) {
        let Session { state, heartbeat } = session;
        let heartbeat = heartbeat.map(|Heartbeat { cancel, handle }| {
            drop(cancel);
            handle
        });

        self.processor.stop();

        if let Some(handle) = heartbeat {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                log::error!("heartbeat thread panicked");
            }
        }

        log::info!("tunnel closed: channel {}", state.channel_id);
        self.flush_status();
    }

    fn service(&self, frame: &[u8]) -> Result<()> {
        let exchange = self.processor.lock();
        let state = self.connected().ok_or_else(KnxError::not_connected)?;

        let header = ConnectionHeader::new(state.channel_id, state.send_sequence);
        let request = Message::TunnelingRequest(TunnelingRequest::new(header, frame)?);

        let ack = match exchange.exchange(&request, state.data_endpoint)? {
            Some(Message::TunnelingAck(ack)) => ack,
            Some(_) => return Err(KnxError::wrong_response_type()),
            None => return Err(KnxError::no_response()),
        };

        let acked = ack.connection_header;
        if acked.channel_id != state.channel_id {
            return Err(KnxError::wrong_channel_id(state.channel_id, acked.channel_id));
        }
        if acked.sequence_counter != state.send_sequence {
            return Err(KnxError::wrong_sequence_counter(
                state.send_sequence,
                acked.sequence_counter,
            ));
        }
        if !ack.is_ok() {
            return Err(KnxError::response_error(ack.status));
        }

        if let Some(session) = self.session().as_mut() {
            session.state.send_sequence = state.send_sequence.wrapping_add(1);
        }
        Ok(())
    }

    /// One CONNECTIONSTATE exchange
    fn check_connection(&self) -> Result<()> {
        let exchange = self.processor.lock();
        let state = self.connected().ok_or_else(KnxError::not_connected)?;

        let request = Message::ConnectionStateRequest(ConnectionStateRequest::new(
            state.channel_id,
            state.local_endpoint,
        ));
        match exchange.exchange(&request, state.control_endpoint)? {
            Some(Message::ConnectionStateResponse(response)) => {
                if response.channel_id != state.channel_id {
                    Err(KnxError::wrong_channel_id(state.channel_id, response.channel_id))
                } else if !response.is_ok() {
                    Err(KnxError::response_error(response.status))
                } else {
                    Ok(())
                }
            }
            Some(_) => Err(KnxError::wrong_response_type()),
            None => Err(KnxError::no_response()),
        }
    }

    /// Run one heartbeat tick. Returns false once the timer should stop.
    fn heartbeat(&self, cancel: &Receiver<()>, attempts: u8) -> bool {
        for attempt in 1..=attempts {
            match self.check_connection() {
                Ok(()) => return true,
                Err(e) if e.is_not_connected() => return false,
                Err(e) => log::warn!("heartbeat {attempt}/{attempts} failed: {e}"),
            }
            if !matches!(cancel.try_recv(), Err(TryRecvError::Empty)) {
                return false;
            }
        }

        log::error!("gateway {} not responding, closing tunnel", self.config.gateway);
        if let Err(e) = self.disconnect() {
            log::warn!("forced disconnect: {e}");
        }
        false
    }

    fn on_tunneling_request(&self, request: &TunnelingRequest) {
        let header = request.connection_header;
        let (deliver, data_endpoint) = {
            let mut session = self.session();
            let Some(state) = session.as_mut().map(|s| &mut s.state) else {
                log::debug!("tunneling request without session");
                return;
            };
            if header.channel_id != state.channel_id {
                log::warn!(
                    "dropping frame for channel {} (ours is {})",
                    header.channel_id,
                    state.channel_id
                );
                return;
            }

            if header.sequence_counter == state.recv_sequence {
                state.recv_sequence = state.recv_sequence.wrapping_add(1);
                (true, state.data_endpoint)
            } else if header.sequence_counter == state.recv_sequence.wrapping_sub(1) {
                // Repeat of a frame whose ACK got lost
                (false, state.data_endpoint)
            } else {
                log::warn!(
                    "dropping frame with sequence {} (expected {})",
                    header.sequence_counter,
                    state.recv_sequence
                );
                return;
            }
        };

        let ack = Message::TunnelingAck(TunnelingAck::new(header, E_NO_ERROR));
        if let Err(e) = self.processor.send(&ack, data_endpoint) {
            log::warn!("failed to ack sequence {}: {e}", header.sequence_counter);
        }

        if deliver {
            let listener = self
                .frame_listener
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            if let Some(listener) = listener {
                listener.on_frame(&request.cemi_data);
            }
        }
    }

    fn on_disconnect_request(&self, request: &DisconnectRequest) {
        let Some(state) = self.connected() else {
            return;
        };
        if request.channel_id != state.channel_id {
            log::warn!("ignoring disconnect for channel {}", request.channel_id);
            return;
        }

        log::info!("gateway closed channel {}", state.channel_id);
        let response =
            Message::DisconnectResponse(DisconnectResponse::new(state.channel_id, E_NO_ERROR));
        if let Err(e) = self.processor.send(&response, state.control_endpoint) {
            log::warn!("failed to answer disconnect: {e}");
        }
        self.teardown();
    }

    /// Deliver queued status changes in order.
    ///
    /// One thread delivers at a time; a change queued meanwhile (also from
    /// inside the listener) is picked up by that thread.
    fn flush_status(&self) {
        {
            let mut queue = self.status_queue();
            if queue.delivering {
                return;
            }
            queue.delivering = true;
        }

        loop {
            let status = {
                let mut queue = self.status_queue();
                let Some(status) = queue.pending.pop_front() else {
                    queue.delivering = false;
                    return;
                };
                status
            };
            let listener = self
                .status_listener
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            if let Some(listener) = listener {
                listener.on_status(status);
            }
        }
    }
}

impl Heartbeat {
    fn spawn(inner: Weak<Inner>, interval: Duration, attempts: u8) -> Result<Self> {
        let (cancel, cancelled) = mpsc::channel();
        let handle = thread::Builder::new()
            .name(String::from("knx-heartbeat"))
            .spawn(move || loop {
                match cancelled.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                }
                let Some(inner) = inner.upgrade() else {
                    return;
                };
                if !inner.heartbeat(&cancelled, attempts) {
                    return;
                }
            })?;
        Ok(Self { cancel, handle })
    }
}

/// Routes processor callbacks to the client without keeping it alive
struct ProcessorEvents {
    inner: Weak<Inner>,
}

impl MessageHandler for ProcessorEvents {
    fn on_request(&self, message: Message, _source: SocketAddrV4) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        match message {
            Message::TunnelingRequest(request) => inner.on_tunneling_request(&request),
            Message::DisconnectRequest(request) => inner.on_disconnect_request(&request),
            other => log::debug!("ignoring {:?}", other.service_type()),
        }
    }

    fn on_listener_stopped(&self, error: &KnxError) {
        if let Some(inner) = self.inner.upgrade() {
            log::warn!("connection lost: {error}");
            inner.teardown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::MockTransport;
    use crate::protocol::constants::{ServiceType, E_CONNECTION_ID, E_NO_MORE_CONNECTIONS};
    use crate::protocol::services::ConnectResponse;

    fn client() -> (Arc<MockTransport>, TunnelClient) {
        let mock = Arc::new(MockTransport::new());
        let client = TunnelClient::new(TunnelConfig::new(mock.gateway()), mock.clone());
        (mock, client)
    }

    #[test]
    fn test_connect_creates_session() {
        let (mock, client) = client();
        mock.configure(|g| g.channel_id = 7);

        client.connect().unwrap();
        assert!(client.is_connected());
        assert_eq!(client.channel_id(), Some(7));
        assert_eq!(client.sequence_counter(), Some(0));
        assert_eq!(client.data_endpoint(), Some(mock.gateway()));
    }

    #[test]
    fn test_connect_advertises_nat_endpoint_when_unbound_ip() {
        let (mock, client) = client();
        client.connect().unwrap();

        let sent = mock.sent_of(ServiceType::ConnectRequest);
        let Message::ConnectRequest(request) = &sent[0] else {
            panic!("expected connect request");
        };
        assert!(request.control_endpoint.is_nat());
        assert!(request.data_endpoint.is_nat());
    }

    #[test]
    fn test_connect_advertises_local_endpoint() {
        let mock = Arc::new(MockTransport::new());
        let local = SocketAddrV4::new([192, 168, 1, 20].into(), 0);
        let config = TunnelConfig::new(mock.gateway()).with_local_addr(local);
        let client = TunnelClient::new(config, mock.clone());
        client.connect().unwrap();

        let sent = mock.sent_of(ServiceType::ConnectRequest);
        let Message::ConnectRequest(request) = &sent[0] else {
            panic!("expected connect request");
        };
        assert_eq!(request.control_endpoint.ip_address, [192, 168, 1, 20]);
        assert_ne!(request.control_endpoint.port, 0);
    }

    #[test]
    fn test_nat_data_endpoint_resolved_to_gateway() {
        let (mock, client) = client();
        mock.configure(|g| g.data_endpoint = Some(Hpai::new([0, 0, 0, 0], 3672)));
        client.connect().unwrap();
        assert_eq!(
            client.data_endpoint(),
            Some(SocketAddrV4::new(*mock.gateway().ip(), 3672))
        );
    }

    #[test]
    fn test_connect_twice() {
        let (_, client) = client();
        client.connect().unwrap();
        assert!(client.connect().unwrap_err().is_already_connected());
        assert!(client.is_connected());
    }

    #[test]
    fn test_connect_refused() {
        let (mock, client) = client();
        mock.configure(|g| g.connect_status = E_NO_MORE_CONNECTIONS);

        let err = client.connect().unwrap_err();
        assert_eq!(err.response_status(), Some(E_NO_MORE_CONNECTIONS));
        assert!(!client.is_connected());
        assert!(!mock.is_ready());
    }

    #[test]
    fn test_connect_wrong_response_type() {
        let (mock, client) = client();
        mock.push_reply(Message::DisconnectResponse(DisconnectResponse::new(1, 0)));
        assert!(client.connect().unwrap_err().is_wrong_response_type());
        assert!(!client.is_connected());
    }

    #[test]
    fn test_scripted_connect_response() {
        let (mock, client) = client();
        mock.push_reply(Message::ConnectResponse(ConnectResponse::accepted(
            42,
            Hpai::new([192, 168, 1, 11], 3671),
            crate::protocol::services::ConnectionResponseData::tunnel(0x1101),
        )));
        client.connect().unwrap();
        assert_eq!(client.channel_id(), Some(42));
        assert_eq!(
            client.data_endpoint(),
            Some(SocketAddrV4::new([192, 168, 1, 11].into(), 3671))
        );
    }

    #[test]
    fn test_service_advances_sequence() {
        let (mock, client) = client();
        client.connect().unwrap();

        client.service(&[0x11, 0x00]).unwrap();
        client.service(&[0x11, 0x00]).unwrap();
        assert_eq!(client.sequence_counter(), Some(2));
        assert_eq!(mock.sent_of(ServiceType::TunnellingRequest).len(), 2);
    }

    #[test]
    fn test_service_wrong_sequence() {
        let (mock, client) = client();
        client.connect().unwrap();
        mock.configure(|g| g.ack_sequence_override = Some(9));

        let err = client.service(&[0x11]).unwrap_err();
        assert!(err.is_wrong_sequence_counter());
        assert_eq!(client.sequence_counter(), Some(0));
    }

    #[test]
    fn test_service_error_status() {
        let (mock, client) = client();
        client.connect().unwrap();
        mock.configure(|g| g.ack_status = 0x29);

        let err = client.service(&[0x11]).unwrap_err();
        assert_eq!(err.response_status(), Some(0x29));
        assert_eq!(client.sequence_counter(), Some(0));
    }

    #[test]
    fn test_service_requires_connection() {
        let (_, client) = client();
        assert!(client.service(&[0x11]).unwrap_err().is_not_connected());
    }

    #[test]
    fn test_disconnect_reports_error_status_after_teardown() {
        let (mock, client) = client();
        client.connect().unwrap();
        mock.configure(|g| g.disconnect_status = E_CONNECTION_ID);

        let err = client.disconnect().unwrap_err();
        assert_eq!(err.response_status(), Some(E_CONNECTION_ID));
        assert!(!client.is_connected());
        assert!(!mock.is_ready());
    }

    #[test]
    fn test_disconnect_without_session() {
        let (mock, client) = client();
        assert!(client.disconnect().unwrap_err().is_not_connected());
        assert!(mock.sent_packets().is_empty());
    }

    #[test]
    fn test_reconnect() {
        let (mock, client) = client();
        client.connect().unwrap();
        client.service(&[0x11]).unwrap();

        client.reconnect().unwrap();
        assert!(client.is_connected());
        assert_eq!(client.sequence_counter(), Some(0));
        assert_eq!(mock.sent_of(ServiceType::DisconnectRequest).len(), 1);
        assert_eq!(mock.bind_count(), 2);
    }

    #[test]
    fn test_status_listener_closure() {
        let (_, client) = client();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        client.set_status_listener(Arc::new(move |status: ConnectionStatus| {
            sink.lock().unwrap().push(status);
        }));

        client.connect().unwrap();
        client.disconnect().unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![ConnectionStatus::Connected, ConnectionStatus::Disconnected]
        );
    }

    #[test]
    fn test_immediate_gateway_disconnect_reported_after_connected() {
        let (mock, client) = client();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        client.set_status_listener(Arc::new(move |status: ConnectionStatus| {
            // Slow listener: the gateway closes the tunnel while it runs
            if status == ConnectionStatus::Connected {
                thread::sleep(Duration::from_millis(150));
            }
            sink.lock().unwrap().push(status);
        }));

        let closer = {
            let mock = Arc::clone(&mock);
            thread::spawn(move || {
                while mock.sent_of(ServiceType::ConnectRequest).is_empty() {
                    thread::sleep(Duration::from_millis(5));
                }
                thread::sleep(Duration::from_millis(50));
                mock.push_inbound(&Message::DisconnectRequest(DisconnectRequest::new(1, Hpai::NAT)));
            })
        };

        client.connect().unwrap();
        closer.join().unwrap();
        for _ in 0..200 {
            if seen.lock().unwrap().len() == 2 {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }

        assert_eq!(
            *seen.lock().unwrap(),
            vec![ConnectionStatus::Connected, ConnectionStatus::Disconnected]
        );
        assert!(!client.is_connected());
    }
}
