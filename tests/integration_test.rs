//! Integration tests for the knx-tunnel library
//!
//! Complete sessions are driven against `MockTransport`, the in-memory
//! gateway simulator, plus one session over real UDP against a minimal
//! gateway running on the loopback interface.
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --test integration_test
//! ```

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use knx_tunnel::discovery::{Discoverer, GatewayInfo};
use knx_tunnel::net::{MockTransport, Transport};
use knx_tunnel::protocol::{
    ConnectResponse, ConnectionHeader, ConnectionResponseData, ConnectionStateResponse, DisconnectRequest,
    DisconnectResponse, Hpai, Message, ServiceType, TunnelingAck, TunnelingRequest,
    E_CONNECTION_ID,
};
use knx_tunnel::{ConnectionStatus, DiscoveryConfig, TunnelClient, TunnelConfig};

const WAIT: Duration = Duration::from_secs(3);

/// Group write 1/2/3 = on, as an L_Data.req cEMI frame
const GROUP_WRITE: [u8; 11] = [0x11, 0x00, 0xBC, 0xE0, 0x00, 0x00, 0x0A, 0x03, 0x01, 0x00, 0x81];

/// Group write indication as the gateway would tunnel it to us
const GROUP_INDICATION: [u8; 11] = [0x29, 0x00, 0xBC, 0xE0, 0x11, 0x0F, 0x0A, 0x03, 0x01, 0x00, 0x80];

fn mock_client() -> (Arc<MockTransport>, TunnelClient) {
    mock_client_with(|config| config)
}

fn mock_client_with(tweak: impl FnOnce(TunnelConfig) -> TunnelConfig) -> (Arc<MockTransport>, TunnelClient) {
    let mock = Arc::new(MockTransport::new());
    let config = tweak(TunnelConfig::new(mock.gateway()));
    let client = TunnelClient::new(config, mock.clone());
    (mock, client)
}

type StatusLog = Arc<Mutex<Vec<ConnectionStatus>>>;

fn record_status(client: &TunnelClient) -> StatusLog {
    let log: StatusLog = Arc::default();
    let sink = Arc::clone(&log);
    client.set_status_listener(Arc::new(move |status: ConnectionStatus| {
        sink.lock().unwrap().push(status);
    }));
    log
}

type FrameLog = Arc<Mutex<Vec<Vec<u8>>>>;

fn record_frames(client: &TunnelClient) -> FrameLog {
    let log: FrameLog = Arc::default();
    let sink = Arc::clone(&log);
    client.register(Arc::new(move |frame: &[u8]| {
        sink.lock().unwrap().push(frame.to_vec());
    }));
    log
}

fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

fn inbound_frame(channel_id: u8, sequence: u8) -> Message {
    Message::TunnelingRequest(
        TunnelingRequest::new(ConnectionHeader::new(channel_id, sequence), &GROUP_INDICATION)
            .unwrap(),
    )
}

fn sent_ack_sequences(mock: &MockTransport) -> Vec<u8> {
    mock.sent_of(ServiceType::TunnellingAck)
        .into_iter()
        .filter_map(|m| match m {
            Message::TunnelingAck(ack) => Some(ack.connection_header.sequence_counter),
            _ => None,
        })
        .collect()
}

#[test]
fn test_full_session() {
    let (mock, client) = mock_client();
    let statuses = record_status(&client);
    let frames = record_frames(&client);

    client.connect().expect("connect");
    assert_eq!(client.status(), ConnectionStatus::Connected);

    for _ in 0..3 {
        client.service(&GROUP_WRITE).expect("service");
    }
    assert_eq!(client.sequence_counter(), Some(3));

    let sequences: Vec<u8> = mock
        .sent_of(ServiceType::TunnellingRequest)
        .into_iter()
        .filter_map(|m| match m {
            Message::TunnelingRequest(r) => Some(r.connection_header.sequence_counter),
            _ => None,
        })
        .collect();
    assert_eq!(sequences, vec![0, 1, 2]);

    mock.push_inbound(&inbound_frame(1, 0));
    assert!(wait_until(|| frames.lock().unwrap().len() == 1));
    assert_eq!(frames.lock().unwrap()[0], GROUP_INDICATION.to_vec());
    assert!(wait_until(|| sent_ack_sequences(&mock) == vec![0]));

    client.disconnect().expect("disconnect");
    assert!(!client.is_connected());
    assert_eq!(
        *statuses.lock().unwrap(),
        vec![ConnectionStatus::Connected, ConnectionStatus::Disconnected]
    );
}

#[test]
fn test_sequence_counter_wraps() {
    let (mock, client) = mock_client();
    client.connect().unwrap();

    for _ in 0..256 {
        client.service(&GROUP_WRITE).unwrap();
    }
    assert_eq!(client.sequence_counter(), Some(0));

    client.service(&GROUP_WRITE).unwrap();
    assert_eq!(client.sequence_counter(), Some(1));

    let last = mock.sent_of(ServiceType::TunnellingRequest).pop().unwrap();
    let Message::TunnelingRequest(last) = last else {
        panic!("expected tunneling request");
    };
    assert_eq!(last.connection_header.sequence_counter, 0);
}

#[test]
fn test_service_times_out_without_ack() {
    let (mock, client) = mock_client();
    client.connect().unwrap();
    mock.configure(|g| g.silent.push(ServiceType::TunnellingRequest));

    let started = Instant::now();
    let err = client.service(&GROUP_WRITE).unwrap_err();
    assert!(err.is_no_response());
    assert!(started.elapsed() >= Duration::from_secs(1));
    assert_eq!(client.sequence_counter(), Some(0));
    assert!(client.is_connected());
}

#[test]
fn test_service_accepts_ten_byte_ack() {
    let (mock, client) = mock_client();
    client.connect().unwrap();
    mock.configure(|g| g.silent.push(ServiceType::TunnellingRequest));
    let client = Arc::new(client);

    let sender = {
        let client = Arc::clone(&client);
        thread::spawn(move || client.service(&GROUP_WRITE))
    };
    assert!(wait_until(|| mock.sent_of(ServiceType::TunnellingRequest).len() == 1));
    mock.push_raw(&[0x06, 0x10, 0x04, 0x21, 0x00, 0x0A, 0x04, 0x01, 0x00, 0x00], mock.gateway());

    sender.join().unwrap().unwrap();
    assert_eq!(client.sequence_counter(), Some(1));
    assert!(client.is_connected());
}

#[test]
fn test_late_heartbeat_answer_does_not_complete_service() {
    let (mock, client) = mock_client();
    client.connect().unwrap();
    mock.configure(|g| g.silent.push(ServiceType::TunnellingRequest));
    let client = Arc::new(client);

    let sender = {
        let client = Arc::clone(&client);
        thread::spawn(move || client.service(&GROUP_WRITE))
    };
    assert!(wait_until(|| mock.sent_of(ServiceType::TunnellingRequest).len() == 1));
    mock.push_inbound(&Message::ConnectionStateResponse(ConnectionStateResponse::new(1, 0)));
    thread::sleep(Duration::from_millis(20));
    mock.push_inbound(&Message::TunnelingAck(TunnelingAck::new(ConnectionHeader::new(1, 0), 0)));

    sender.join().unwrap().unwrap();
    assert_eq!(client.sequence_counter(), Some(1));
}

#[test]
fn test_inbound_frame_ack_is_ten_bytes() {
    let (mock, client) = mock_client();
    client.connect().unwrap();

    mock.push_inbound(&inbound_frame(1, 0));
    assert!(wait_until(|| !mock.sent_of(ServiceType::TunnellingAck).is_empty()));

    let acks: Vec<_> = mock
        .sent_packets()
        .into_iter()
        .filter(|(bytes, _)| bytes.get(2..4) == Some(&[0x04, 0x21][..]))
        .collect();
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0].0, vec![0x06, 0x10, 0x04, 0x21, 0x00, 0x0A, 0x04, 0x01, 0x00, 0x00]);
}

#[test]
fn test_ack_with_wrong_channel() {
    let (mock, client) = mock_client();
    client.connect().unwrap();
    mock.configure(|g| g.ack_channel_override = Some(99));

    let err = client.service(&GROUP_WRITE).unwrap_err();
    assert!(err.is_wrong_channel_id());
    assert_eq!(client.sequence_counter(), Some(0));

    mock.configure(|g| g.ack_channel_override = None);
    client.service(&GROUP_WRITE).unwrap();
    assert_eq!(client.sequence_counter(), Some(1));
}

#[test]
fn test_disconnect_twice_notifies_once() {
    let (mock, client) = mock_client();
    let statuses = record_status(&client);
    client.connect().unwrap();

    client.disconnect().unwrap();
    assert!(client.disconnect().unwrap_err().is_not_connected());

    assert_eq!(mock.sent_of(ServiceType::DisconnectRequest).len(), 1);
    assert_eq!(
        *statuses.lock().unwrap(),
        vec![ConnectionStatus::Connected, ConnectionStatus::Disconnected]
    );
}

#[test]
fn test_disconnect_with_wrong_channel_still_tears_down() {
    let (mock, client) = mock_client();
    let statuses = record_status(&client);
    client.connect().unwrap();
    mock.configure(|g| g.response_channel_override = Some(42));

    assert!(client.disconnect().unwrap_err().is_wrong_channel_id());
    assert!(!client.is_connected());
    assert!(!mock.is_ready());
    assert_eq!(statuses.lock().unwrap().last(), Some(&ConnectionStatus::Disconnected));
}

#[test]
fn test_heartbeat_keeps_session() {
    let (mock, client) =
        mock_client_with(|c| c.with_heartbeat_interval(Duration::from_millis(30)));
    client.connect().unwrap();

    assert!(wait_until(|| mock.sent_of(ServiceType::ConnectionstateRequest).len() >= 2));
    assert!(client.is_connected());
}

#[test]
fn test_heartbeat_failure_forces_disconnect() {
    let (mock, client) =
        mock_client_with(|c| c.with_heartbeat_interval(Duration::from_millis(50)));
    let statuses = record_status(&client);
    mock.configure(|g| g.connection_state_status = E_CONNECTION_ID);
    client.connect().unwrap();

    assert!(wait_until(|| !client.is_connected()));
    assert!(wait_until(|| statuses.lock().unwrap().len() == 2));
    assert_eq!(mock.sent_of(ServiceType::ConnectionstateRequest).len(), 3);
    assert_eq!(mock.sent_of(ServiceType::DisconnectRequest).len(), 1);

    // No automatic reconnect
    thread::sleep(Duration::from_millis(150));
    assert!(!client.is_connected());
    assert_eq!(mock.sent_of(ServiceType::ConnectRequest).len(), 1);
    assert!(client.service(&GROUP_WRITE).unwrap_err().is_not_connected());
}

#[test]
fn test_listener_failure_forces_disconnect() {
    let (mock, client) = mock_client();
    let statuses = record_status(&client);
    client.connect().unwrap();

    mock.fail_receive();
    assert!(wait_until(|| !client.is_connected()));
    assert!(wait_until(|| statuses.lock().unwrap().len() == 2));
    assert_eq!(statuses.lock().unwrap()[1], ConnectionStatus::Disconnected);
    assert!(mock.sent_of(ServiceType::DisconnectRequest).is_empty());

    // Caller decides to come back
    client.reconnect().unwrap();
    assert!(client.is_connected());
}

#[test]
fn test_repeated_inbound_frame_acked_not_redelivered() {
    let (mock, client) = mock_client();
    let frames = record_frames(&client);
    client.connect().unwrap();

    mock.push_inbound(&inbound_frame(1, 0));
    mock.push_inbound(&inbound_frame(1, 0));
    mock.push_inbound(&inbound_frame(1, 1));

    assert!(wait_until(|| sent_ack_sequences(&mock).len() == 3));
    assert_eq!(sent_ack_sequences(&mock), vec![0, 0, 1]);
    assert_eq!(frames.lock().unwrap().len(), 2);
}

#[test]
fn test_unexpected_inbound_frames_dropped() {
    let (mock, client) = mock_client();
    let frames = record_frames(&client);
    client.connect().unwrap();

    mock.push_inbound(&inbound_frame(1, 5)); // out of order
    mock.push_inbound(&inbound_frame(7, 0)); // foreign channel
    mock.push_inbound(&inbound_frame(1, 0));

    assert!(wait_until(|| frames.lock().unwrap().len() == 1));
    assert_eq!(sent_ack_sequences(&mock), vec![0]);
}

#[test]
fn test_unregister_stops_delivery() {
    let (mock, client) = mock_client();
    let frames = record_frames(&client);
    client.connect().unwrap();
    client.unregister();

    mock.push_inbound(&inbound_frame(1, 0));
    assert!(wait_until(|| sent_ack_sequences(&mock).len() == 1));
    assert!(frames.lock().unwrap().is_empty());
}

#[test]
fn test_gateway_initiated_disconnect() {
    let (mock, client) = mock_client();
    let statuses = record_status(&client);
    client.connect().unwrap();

    mock.push_inbound(&Message::DisconnectRequest(DisconnectRequest::new(
        1,
        Hpai::from(mock.gateway()),
    )));

    assert!(wait_until(|| !client.is_connected()));
    assert!(wait_until(|| statuses.lock().unwrap().len() == 2));
    let responses = mock.sent_of(ServiceType::DisconnectResponse);
    assert_eq!(
        responses,
        vec![Message::DisconnectResponse(DisconnectResponse::new(1, 0))]
    );
    assert!(mock.sent_of(ServiceType::DisconnectRequest).is_empty());
}

#[test]
fn test_drop_disconnects() {
    let mock = Arc::new(MockTransport::new());
    {
        let client = TunnelClient::new(TunnelConfig::new(mock.gateway()), mock.clone());
        client.connect().unwrap();
    }
    assert_eq!(mock.sent_of(ServiceType::DisconnectRequest).len(), 1);
    assert!(!mock.is_ready());
}

#[test]
fn test_concurrent_service_calls_serialize() {
    let (mock, client) =
        mock_client_with(|c| c.with_heartbeat_interval(Duration::from_millis(5)));
    client.connect().unwrap();
    let client = Arc::new(client);

    let workers: Vec<_> = (0..2)
        .map(|_| {
            let client = Arc::clone(&client);
            thread::spawn(move || {
                for _ in 0..50 {
                    client.service(&GROUP_WRITE).unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(client.sequence_counter(), Some(100));
    assert_eq!(mock.sent_of(ServiceType::TunnellingRequest).len(), 100);
}

#[test]
fn test_discovery_is_asynchronous() {
    let mock = Arc::new(MockTransport::new());
    let discoverer = Discoverer::with_transport(DiscoveryConfig::default(), mock.clone());
    let found: Arc<Mutex<Vec<GatewayInfo>>> = Arc::default();
    let sink = Arc::clone(&found);

    discoverer
        .start(
            Ipv4Addr::new(192, 168, 1, 20),
            Arc::new(move |gateway: GatewayInfo| sink.lock().unwrap().push(gateway)),
        )
        .unwrap();
    assert!(discoverer.is_running());

    assert!(wait_until(|| found.lock().unwrap().len() == 1));
    assert_eq!(found.lock().unwrap()[0].control_endpoint, mock.gateway());
    discoverer.stop();
}

/// Minimal gateway answering one session on a real UDP socket.
///
/// Records the service type and datagram length of everything it receives.
/// Acks are written out byte by byte, as a gateway would put them on the wire.
fn spawn_loopback_gateway() -> (SocketAddrV4, thread::JoinHandle<Vec<(ServiceType, usize)>>) {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket.set_read_timeout(Some(WAIT)).unwrap();
    let SocketAddr::V4(address) = socket.local_addr().unwrap() else {
        panic!("expected IPv4 socket");
    };

    let handle = thread::spawn(move || {
        let mut seen = Vec::new();
        let mut buf = [0u8; 256];
        while let Ok((len, peer)) = socket.recv_from(&mut buf) {
            let message = Message::decode(&buf[..len]).unwrap();
            seen.push((message.service_type(), len));
            let reply = match message {
                Message::ConnectRequest(_) => Message::ConnectResponse(ConnectResponse::accepted(
                    5,
                    Hpai::from(address),
                    ConnectionResponseData::tunnel(0x11FA),
                )),
                Message::TunnelingRequest(request) => {
                    let header = request.connection_header;
                    let ack = [
                        0x06, 0x10, 0x04, 0x21, 0x00, 0x0A,
                        0x04, header.channel_id, header.sequence_counter, 0x00,
                    ];
                    socket.send_to(&ack, peer).unwrap();
                    continue;
                }
                Message::DisconnectRequest(request) => {
                    let reply = Message::DisconnectResponse(DisconnectResponse::new(request.channel_id, 0));
                    socket.send_to(&reply.to_bytes().unwrap(), peer).unwrap();
                    break;
                }
                _ => continue,
            };
            socket.send_to(&reply.to_bytes().unwrap(), peer).unwrap();
        }
        seen
    });
    (address, handle)
}

#[test]
fn test_udp_session_against_loopback_gateway() {
    let (gateway, handle) = spawn_loopback_gateway();
    let config = TunnelConfig::new(gateway)
        .with_local_addr(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0));
    let client = TunnelClient::udp(config);

    client.connect().expect("connect over UDP");
    assert_eq!(client.channel_id(), Some(5));
    client.service(&GROUP_WRITE).expect("service over UDP");
    client.disconnect().expect("disconnect over UDP");

    assert_eq!(
        handle.join().unwrap(),
        vec![
            (ServiceType::ConnectRequest, 26),
            (ServiceType::TunnellingRequest, 10 + GROUP_WRITE.len()),
            (ServiceType::DisconnectRequest, 16),
        ]
    );
}
