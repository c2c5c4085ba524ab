//! KNXnet/IP service bodies.
//!
//! One struct per service, each implementing [`ServiceBody`] so it can be
//! written after a header ([`ServiceBody::build`]) and parsed back from a
//! frame body ([`ServiceBody::parse`]).
//!
//! ## Protocol Flow
//!
//! ```text
//! Client                          Gateway
//!   |                                |
//!   |------- SEARCH_REQUEST -------->|  (multicast)
//!   |<------ SEARCH_RESPONSE --------|
//!   |                                |
//!   |------- CONNECT_REQUEST ------->|
//!   |<------ CONNECT_RESPONSE -------|
//!   |                                |
//!   |------ TUNNELING_REQUEST ------>|
//!   |<------ TUNNELING_ACK ----------|
//!   |                                |
//!   |--- CONNECTIONSTATE_REQUEST --->|  (every 60s)
//!   |<-- CONNECTIONSTATE_RESPONSE ---|
//!   |                                |
//!   |------ DISCONNECT_REQUEST ----->|
//!   |<----- DISCONNECT_RESPONSE -----|
//! ```

use crate::error::{KnxError, Result};
use crate::protocol::constants::{
    ServiceType, DIB_DEVICE_INFO, E_NO_ERROR, MAX_CEMI_SIZE, MAX_DIB_SIZE, TUNNEL_CONNECTION,
    TUNNEL_LINKLAYER,
};
use crate::protocol::frame::{Hpai, KnxnetIpHeader};

/// Body of a KNXnet/IP service frame.
pub trait ServiceBody: Sized {
    /// Service type written in the header
    const SERVICE_TYPE: ServiceType;

    /// Encoded body length in bytes
    fn body_len(&self) -> usize;

    /// Write the body (without header) into `buf`
    fn encode_body(&self, buf: &mut [u8]) -> Result<usize>;

    /// Parse the body (without header)
    fn parse(body: &[u8]) -> Result<Self>;

    /// Build the complete frame (header + body)
    ///
    /// Returns the number of bytes written to the buffer
    fn build(&self, buf: &mut [u8]) -> Result<usize> {
        let total = KnxnetIpHeader::SIZE + self.body_len();
        if buf.len() < total {
            return Err(KnxError::buffer_too_small());
        }

        let header = KnxnetIpHeader::new(Self::SERVICE_TYPE, self.body_len() as u16);
        let mut offset = header.encode(buf)?;
        offset += self.encode_body(&mut buf[offset..total])?;

        Ok(offset)
    }
}

fn ensure_len(buf: &[u8], len: usize) -> Result<()> {
    if buf.len() < len {
        return Err(KnxError::buffer_too_small());
    }
    Ok(())
}

fn ensure_body(body: &[u8], len: usize) -> Result<()> {
    if body.len() < len {
        return Err(KnxError::invalid_frame());
    }
    Ok(())
}

// =============================================================================
// Structures
// =============================================================================

/// Connection Request Information (CRI) for tunneling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionRequestInfo {
    /// Connection type (`TUNNEL_CONNECTION` = 0x04)
    pub connection_type: u8,
    /// KNX layer (`TUNNEL_LINKLAYER` = 0x02)
    pub knx_layer: u8,
}

impl ConnectionRequestInfo {
    /// Size of the CRI structure
    pub const SIZE: usize = 4;

    /// Create a new CRI for tunnel link layer connection
    pub const fn tunnel_link_layer() -> Self {
        Self {
            connection_type: TUNNEL_CONNECTION,
            knx_layer: TUNNEL_LINKLAYER,
        }
    }

    /// Encode CRI to bytes
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        ensure_len(buf, Self::SIZE)?;

        buf[0] = Self::SIZE as u8;
        buf[1] = self.connection_type;
        buf[2] = self.knx_layer;
        buf[3] = 0x00; // Reserved

        Ok(Self::SIZE)
    }

    /// Decode CRI from bytes
    pub fn decode(data: &[u8]) -> Result<Self> {
        ensure_body(data, Self::SIZE)?;
        if usize::from(data[0]) != Self::SIZE {
            return Err(KnxError::invalid_frame());
        }

        Ok(Self {
            connection_type: data[1],
            knx_layer: data[2],
        })
    }
}

/// Connection Response Data (CRD) for a tunnel connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionResponseData {
    /// Connection type (`TUNNEL_CONNECTION`)
    pub connection_type: u8,
    /// KNX individual address assigned to the tunnel
    pub individual_address: u16,
}

impl ConnectionResponseData {
    /// Size of the tunnel CRD structure
    pub const SIZE: usize = 4;

    /// Create a tunnel CRD
    pub const fn tunnel(individual_address: u16) -> Self {
        Self {
            connection_type: TUNNEL_CONNECTION,
            individual_address,
        }
    }

    /// Encode CRD to bytes
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        ensure_len(buf, Self::SIZE)?;

        buf[0] = Self::SIZE as u8;
        buf[1] = self.connection_type;
        buf[2..4].copy_from_slice(&self.individual_address.to_be_bytes());

        Ok(Self::SIZE)
    }

    /// Decode CRD from bytes
    pub fn decode(data: &[u8]) -> Result<Self> {
        ensure_body(data, Self::SIZE)?;
        if usize::from(data[0]) < Self::SIZE {
            return Err(KnxError::invalid_frame());
        }

        Ok(Self {
            connection_type: data[1],
            individual_address: u16::from_be_bytes([data[2], data[3]]),
        })
    }
}

/// Connection header for tunneling requests and acks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionHeader {
    /// Communication channel ID
    pub channel_id: u8,
    /// Sequence counter
    pub sequence_counter: u8,
}

impl ConnectionHeader {
    /// Size of the connection header
    pub const SIZE: usize = 4;

    /// Create a new connection header
    pub const fn new(channel_id: u8, sequence_counter: u8) -> Self {
        Self {
            channel_id,
            sequence_counter,
        }
    }

    /// Encode to bytes
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        ensure_len(buf, Self::SIZE)?;

        buf[0] = Self::SIZE as u8;
        buf[1] = self.channel_id;
        buf[2] = self.sequence_counter;
        buf[3] = 0x00; // Reserved

        Ok(Self::SIZE)
    }

    /// Decode from bytes
    pub fn decode(data: &[u8]) -> Result<Self> {
        ensure_body(data, Self::SIZE)?;
        if usize::from(data[0]) != Self::SIZE {
            return Err(KnxError::invalid_frame());
        }

        Ok(Self {
            channel_id: data[1],
            sequence_counter: data[2],
        })
    }
}

/// Channel id + status pair shared by several responses
fn encode_channel_status(channel_id: u8, status: u8, buf: &mut [u8]) -> Result<usize> {
    ensure_len(buf, 2)?;
    buf[0] = channel_id;
    buf[1] = status;
    Ok(2)
}

/// Channel id + reserved byte + control endpoint shared by several requests
fn encode_channel_endpoint(channel_id: u8, endpoint: &Hpai, buf: &mut [u8]) -> Result<usize> {
    ensure_len(buf, 2 + Hpai::SIZE)?;
    buf[0] = channel_id;
    buf[1] = 0x00; // Reserved
    Ok(2 + endpoint.encode(&mut buf[2..])?)
}

fn parse_channel_endpoint(body: &[u8]) -> Result<(u8, Hpai)> {
    ensure_body(body, 2 + Hpai::SIZE)?;
    Ok((body[0], Hpai::parse(&body[2..])?))
}

// =============================================================================
// Discovery
// =============================================================================

/// `SEARCH_REQUEST` service (0x0201)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchRequest {
    /// Endpoint the gateways should answer to
    pub discovery_endpoint: Hpai,
}

impl SearchRequest {
    /// Create a new `SEARCH_REQUEST`
    pub const fn new(discovery_endpoint: Hpai) -> Self {
        Self { discovery_endpoint }
    }
}

impl ServiceBody for SearchRequest {
    const SERVICE_TYPE: ServiceType = ServiceType::SearchRequest;

    fn body_len(&self) -> usize {
        Hpai::SIZE
    }

    fn encode_body(&self, buf: &mut [u8]) -> Result<usize> {
        self.discovery_endpoint.encode(buf)
    }

    fn parse(body: &[u8]) -> Result<Self> {
        Ok(Self::new(Hpai::parse(body)?))
    }
}

/// `SEARCH_RESPONSE` service (0x0202)
///
/// The description blocks (DIBs) following the control endpoint are kept
/// as raw bytes; [`SearchResponse::friendly_name`] pulls the device name
/// out of the device-information DIB when present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResponse {
    /// Gateway control endpoint
    pub control_endpoint: Hpai,
    /// Raw DIB blocks
    pub dibs: heapless::Vec<u8, MAX_DIB_SIZE>,
}

impl SearchResponse {
    /// Offset of the friendly name inside the device-information DIB
    const FRIENDLY_NAME_OFFSET: usize = 24;
    /// Length of the friendly name field
    const FRIENDLY_NAME_LEN: usize = 30;

    /// Create a new `SEARCH_RESPONSE`
    pub fn new(control_endpoint: Hpai, dibs: &[u8]) -> Result<Self> {
        Ok(Self {
            control_endpoint,
            dibs: heapless::Vec::from_slice(dibs).map_err(|_full| KnxError::payload_too_large())?,
        })
    }

    /// Device friendly name from the `DEVICE_INFO` DIB, NUL padding stripped
    pub fn friendly_name(&self) -> Option<String> {
        let mut rest: &[u8] = &self.dibs;
        while rest.len() >= 2 {
            let len = usize::from(rest[0]);
            if len < 2 || len > rest.len() {
                return None;
            }
            let (dib, tail) = rest.split_at(len);
            if dib[1] == DIB_DEVICE_INFO {
                let name = dib.get(
                    Self::FRIENDLY_NAME_OFFSET
                        ..Self::FRIENDLY_NAME_OFFSET + Self::FRIENDLY_NAME_LEN,
                )?;
                let end = name.iter().position(|&b| b == 0).unwrap_or(name.len());
                return Some(String::from_utf8_lossy(&name[..end]).into_owned());
            }
            rest = tail;
        }
        None
    }
}

impl ServiceBody for SearchResponse {
    const SERVICE_TYPE: ServiceType = ServiceType::SearchResponse;

    fn body_len(&self) -> usize {
        Hpai::SIZE + self.dibs.len()
    }

    fn encode_body(&self, buf: &mut [u8]) -> Result<usize> {
        ensure_len(buf, self.body_len())?;
        let offset = self.control_endpoint.encode(buf)?;
        buf[offset..offset + self.dibs.len()].copy_from_slice(&self.dibs);
        Ok(offset + self.dibs.len())
    }

    fn parse(body: &[u8]) -> Result<Self> {
        let control_endpoint = Hpai::parse(body)?;
        Self::new(control_endpoint, &body[Hpai::SIZE..])
    }
}

// =============================================================================
// Connection management
// =============================================================================

/// `CONNECT_REQUEST` service (0x0205)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Control endpoint (for connection management)
    pub control_endpoint: Hpai,
    /// Data endpoint (for tunneling data)
    pub data_endpoint: Hpai,
    /// Connection request information
    pub cri: ConnectionRequestInfo,
}

impl ConnectRequest {
    /// Create a new tunnel `CONNECT_REQUEST`
    pub const fn new(control_endpoint: Hpai, data_endpoint: Hpai) -> Self {
        Self {
            control_endpoint,
            data_endpoint,
            cri: ConnectionRequestInfo::tunnel_link_layer(),
        }
    }
}

impl ServiceBody for ConnectRequest {
    const SERVICE_TYPE: ServiceType = ServiceType::ConnectRequest;

    fn body_len(&self) -> usize {
        2 * Hpai::SIZE + ConnectionRequestInfo::SIZE
    }

    fn encode_body(&self, buf: &mut [u8]) -> Result<usize> {
        let mut offset = self.control_endpoint.encode(buf)?;
        offset += self.data_endpoint.encode(&mut buf[offset..])?;
        offset += self.cri.encode(&mut buf[offset..])?;
        Ok(offset)
    }

    fn parse(body: &[u8]) -> Result<Self> {
        ensure_body(body, 2 * Hpai::SIZE + ConnectionRequestInfo::SIZE)?;
        Ok(Self {
            control_endpoint: Hpai::parse(body)?,
            data_endpoint: Hpai::parse(&body[Hpai::SIZE..])?,
            cri: ConnectionRequestInfo::decode(&body[2 * Hpai::SIZE..])?,
        })
    }
}

/// `CONNECT_RESPONSE` service (0x0206)
///
/// A refused connection carries only the channel id and status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectResponse {
    /// Communication channel ID
    pub channel_id: u8,
    /// Status code (0 = OK)
    pub status: u8,
    /// Data endpoint assigned by server
    pub data_endpoint: Option<Hpai>,
    /// Connection response data
    pub crd: Option<ConnectionResponseData>,
}

impl ConnectResponse {
    /// Successful response
    pub const fn accepted(channel_id: u8, data_endpoint: Hpai, crd: ConnectionResponseData) -> Self {
        Self {
            channel_id,
            status: E_NO_ERROR,
            data_endpoint: Some(data_endpoint),
            crd: Some(crd),
        }
    }

    /// Refused response
    pub const fn refused(status: u8) -> Self {
        Self {
            channel_id: 0,
            status,
            data_endpoint: None,
            crd: None,
        }
    }

    /// Check if connection was successful
    pub const fn is_ok(&self) -> bool {
        self.status == E_NO_ERROR
    }
}

impl ServiceBody for ConnectResponse {
    const SERVICE_TYPE: ServiceType = ServiceType::ConnectResponse;

    fn body_len(&self) -> usize {
        let endpoint = if self.data_endpoint.is_some() { Hpai::SIZE } else { 0 };
        let crd = if self.data_endpoint.is_some() && self.crd.is_some() {
            ConnectionResponseData::SIZE
        } else {
            0
        };
        2 + endpoint + crd
    }

    fn encode_body(&self, buf: &mut [u8]) -> Result<usize> {
        let mut offset = encode_channel_status(self.channel_id, self.status, buf)?;
        if let Some(endpoint) = &self.data_endpoint {
            offset += endpoint.encode(&mut buf[offset..])?;
            if let Some(crd) = &self.crd {
                offset += crd.encode(&mut buf[offset..])?;
            }
        }
        Ok(offset)
    }

    fn parse(body: &[u8]) -> Result<Self> {
        ensure_body(body, 2)?;
        let channel_id = body[0];
        let status = body[1];

        let data_endpoint = if body.len() >= 2 + Hpai::SIZE {
            Some(Hpai::parse(&body[2..])?)
        } else if status == E_NO_ERROR {
            // An accepted connection must tell us where to send data
            return Err(KnxError::invalid_frame());
        } else {
            None
        };

        let crd_offset = 2 + Hpai::SIZE;
        let crd = if body.len() >= crd_offset + ConnectionResponseData::SIZE {
            Some(ConnectionResponseData::decode(&body[crd_offset..])?)
        } else {
            None
        };

        Ok(Self {
            channel_id,
            status,
            data_endpoint,
            crd,
        })
    }
}

/// `CONNECTIONSTATE_REQUEST` service (0x0207)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStateRequest {
    /// Communication channel ID
    pub channel_id: u8,
    /// Control endpoint
    pub control_endpoint: Hpai,
}

impl ConnectionStateRequest {
    /// Create a new `CONNECTIONSTATE_REQUEST`
    pub const fn new(channel_id: u8, control_endpoint: Hpai) -> Self {
        Self {
            channel_id,
            control_endpoint,
        }
    }
}

impl ServiceBody for ConnectionStateRequest {
    const SERVICE_TYPE: ServiceType = ServiceType::ConnectionstateRequest;

    fn body_len(&self) -> usize {
        2 + Hpai::SIZE
    }

    fn encode_body(&self, buf: &mut [u8]) -> Result<usize> {
        encode_channel_endpoint(self.channel_id, &self.control_endpoint, buf)
    }

    fn parse(body: &[u8]) -> Result<Self> {
        let (channel_id, control_endpoint) = parse_channel_endpoint(body)?;
        Ok(Self::new(channel_id, control_endpoint))
    }
}

/// `CONNECTIONSTATE_RESPONSE` service (0x0208)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStateResponse {
    /// Communication channel ID
    pub channel_id: u8,
    /// Status code (0 = OK)
    pub status: u8,
}

impl ConnectionStateResponse {
    /// Create a new `CONNECTIONSTATE_RESPONSE`
    pub const fn new(channel_id: u8, status: u8) -> Self {
        Self { channel_id, status }
    }

    /// Check if connection is still alive
    pub const fn is_ok(&self) -> bool {
        self.status == E_NO_ERROR
    }
}

impl ServiceBody for ConnectionStateResponse {
    const SERVICE_TYPE: ServiceType = ServiceType::ConnectionstateResponse;

    fn body_len(&self) -> usize {
        2
    }

    fn encode_body(&self, buf: &mut [u8]) -> Result<usize> {
        encode_channel_status(self.channel_id, self.status, buf)
    }

    fn parse(body: &[u8]) -> Result<Self> {
        ensure_body(body, 2)?;
        Ok(Self::new(body[0], body[1]))
    }
}

/// `DISCONNECT_REQUEST` service (0x0209)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisconnectRequest {
    /// Communication channel ID
    pub channel_id: u8,
    /// Control endpoint
    pub control_endpoint: Hpai,
}

impl DisconnectRequest {
    /// Create a new `DISCONNECT_REQUEST`
    pub const fn new(channel_id: u8, control_endpoint: Hpai) -> Self {
        Self {
            channel_id,
            control_endpoint,
        }
    }
}

impl ServiceBody for DisconnectRequest {
    const SERVICE_TYPE: ServiceType = ServiceType::DisconnectRequest;

    fn body_len(&self) -> usize {
        2 + Hpai::SIZE
    }

    fn encode_body(&self, buf: &mut [u8]) -> Result<usize> {
        encode_channel_endpoint(self.channel_id, &self.control_endpoint, buf)
    }

    fn parse(body: &[u8]) -> Result<Self> {
        let (channel_id, control_endpoint) = parse_channel_endpoint(body)?;
        Ok(Self::new(channel_id, control_endpoint))
    }
}

/// `DISCONNECT_RESPONSE` service (0x020A)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisconnectResponse {
    /// Communication channel ID
    pub channel_id: u8,
    /// Status code (0 = OK)
    pub status: u8,
}

impl DisconnectResponse {
    /// Create a new `DISCONNECT_RESPONSE`
    pub const fn new(channel_id: u8, status: u8) -> Self {
        Self { channel_id, status }
    }

    /// Check if disconnect was acknowledged
    pub const fn is_ok(&self) -> bool {
        self.status == E_NO_ERROR
    }
}

impl ServiceBody for DisconnectResponse {
    const SERVICE_TYPE: ServiceType = ServiceType::DisconnectResponse;

    fn body_len(&self) -> usize {
        2
    }

    fn encode_body(&self, buf: &mut [u8]) -> Result<usize> {
        encode_channel_status(self.channel_id, self.status, buf)
    }

    fn parse(body: &[u8]) -> Result<Self> {
        ensure_body(body, 2)?;
        Ok(Self::new(body[0], body[1]))
    }
}

// =============================================================================
// Tunneling
// =============================================================================

/// `TUNNELING_REQUEST` service (0x0420)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelingRequest {
    /// Connection header
    pub connection_header: ConnectionHeader,
    /// Tunneled bus frame (cEMI), opaque to this layer
    pub cemi_data: heapless::Vec<u8, MAX_CEMI_SIZE>,
}

impl TunnelingRequest {
    /// Create a new `TUNNELING_REQUEST`
    ///
    /// # Errors
    ///
    /// `PayloadTooLarge` if the frame does not fit a KNXnet/IP datagram.
    pub fn new(connection_header: ConnectionHeader, cemi_data: &[u8]) -> Result<Self> {
        Ok(Self {
            connection_header,
            cemi_data: heapless::Vec::from_slice(cemi_data)
                .map_err(|_full| KnxError::payload_too_large())?,
        })
    }
}

impl ServiceBody for TunnelingRequest {
    const SERVICE_TYPE: ServiceType = ServiceType::TunnellingRequest;

    fn body_len(&self) -> usize {
        ConnectionHeader::SIZE + self.cemi_data.len()
    }

    fn encode_body(&self, buf: &mut [u8]) -> Result<usize> {
        ensure_len(buf, self.body_len())?;
        let offset = self.connection_header.encode(buf)?;
        buf[offset..offset + self.cemi_data.len()].copy_from_slice(&self.cemi_data);
        Ok(offset + self.cemi_data.len())
    }

    fn parse(body: &[u8]) -> Result<Self> {
        let connection_header = ConnectionHeader::decode(body)?;
        Self::new(connection_header, &body[ConnectionHeader::SIZE..])
    }
}

/// `TUNNELING_ACK` service (0x0421)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TunnelingAck {
    /// Connection header
    pub connection_header: ConnectionHeader,
    /// Status code (0 = OK)
    pub status: u8,
}

impl TunnelingAck {
    /// Create a new `TUNNELING_ACK`
    pub const fn new(connection_header: ConnectionHeader, status: u8) -> Self {
        Self {
            connection_header,
            status,
        }
    }

    /// Check if request was acknowledged successfully
    pub const fn is_ok(&self) -> bool {
        self.status == E_NO_ERROR
    }
}

impl ServiceBody for TunnelingAck {
    const SERVICE_TYPE: ServiceType = ServiceType::TunnellingAck;

    fn body_len(&self) -> usize {
        ConnectionHeader::SIZE
    }

    // The status travels in the header's last byte
    fn encode_body(&self, buf: &mut [u8]) -> Result<usize> {
        let len = self.connection_header.encode(buf)?;
        buf[ConnectionHeader::SIZE - 1] = self.status;
        Ok(len)
    }

    fn parse(body: &[u8]) -> Result<Self> {
        let connection_header = ConnectionHeader::decode(body)?;
        Ok(Self::new(connection_header, body[ConnectionHeader::SIZE - 1]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::{E_CONNECTION_ID, E_NO_MORE_CONNECTIONS};

    #[test]
    fn test_connect_request_build() {
        let control = Hpai::new([192, 168, 1, 100], 3671);
        let data = Hpai::new([192, 168, 1, 100], 3672);
        let request = ConnectRequest::new(control, data);

        let mut buf = [0u8; 32];
        let len = request.build(&mut buf).unwrap();

        assert_eq!(len, 26);
        assert_eq!(&buf[0..6], &[0x06, 0x10, 0x02, 0x05, 0x00, 0x1A]);
        assert_eq!(&buf[22..26], &[0x04, 0x04, 0x02, 0x00]); // CRI
    }

    #[test]
    fn test_build_buffer_too_small() {
        let request = ConnectRequest::new(Hpai::NAT, Hpai::NAT);
        let mut buf = [0u8; 20];
        assert!(request.build(&mut buf).is_err());
    }

    #[test]
    fn test_connect_response_parse() {
        let body = [
            0x05, 0x00, // Channel=5, Status=OK
            0x08, 0x01, 192, 168, 1, 10, 0x0E, 0x57, // HPAI
            0x04, 0x04, 0x11, 0x0F, // CRD, address 1.1.15
        ];

        let response = ConnectResponse::parse(&body).unwrap();
        assert!(response.is_ok());
        assert_eq!(response.channel_id, 5);
        assert_eq!(response.data_endpoint, Some(Hpai::new([192, 168, 1, 10], 3671)));
        assert_eq!(response.crd, Some(ConnectionResponseData::tunnel(0x110F)));
    }

    #[test]
    fn test_connect_response_refused_short_body() {
        let response = ConnectResponse::parse(&[0x00, E_NO_MORE_CONNECTIONS]).unwrap();
        assert!(!response.is_ok());
        assert_eq!(response.data_endpoint, None);
        assert_eq!(response, ConnectResponse::refused(E_NO_MORE_CONNECTIONS));
    }

    #[test]
    fn test_connect_response_ok_without_endpoint() {
        assert!(ConnectResponse::parse(&[0x05, 0x00]).unwrap_err().is_invalid_frame());
    }

    #[test]
    fn test_connection_header() {
        let header = ConnectionHeader::new(5, 10);
        let mut buf = [0u8; 4];
        let len = header.encode(&mut buf).unwrap();

        assert_eq!(len, 4);
        assert_eq!(buf, [0x04, 0x05, 0x0A, 0x00]);

        let decoded = ConnectionHeader::decode(&buf).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_connection_header_bad_length() {
        assert!(ConnectionHeader::decode(&[0x05, 0x05, 0x0A, 0x00]).is_err());
    }

    #[test]
    fn test_tunneling_ack() {
        let ack = TunnelingAck::new(ConnectionHeader::new(3, 15), 0);

        let mut buf = [0u8; 16];
        let len = ack.build(&mut buf).unwrap();

        assert_eq!(len, 10);
        assert_eq!(&buf[..10], &[0x06, 0x10, 0x04, 0x21, 0x00, 0x0A, 0x04, 0x03, 0x0F, 0x00]);
        assert!(ack.is_ok());
    }

    #[test]
    fn test_tunneling_ack_status_in_header() {
        let ack = TunnelingAck::parse(&[0x04, 0x03, 0x0F, E_CONNECTION_ID]).unwrap();
        assert_eq!(ack.connection_header, ConnectionHeader::new(3, 15));
        assert_eq!(ack.status, E_CONNECTION_ID);
        assert!(!ack.is_ok());

        let mut buf = [0u8; 16];
        let len = ack.build(&mut buf).unwrap();
        assert_eq!(&buf[6..len], &[0x04, 0x03, 0x0F, E_CONNECTION_ID]);
    }

    #[test]
    fn test_tunneling_request_payload() {
        let cemi = [0x29, 0x00, 0xBC, 0xE0, 0x11, 0x0F, 0x0A, 0x03, 0x01, 0x00, 0x81];
        let request = TunnelingRequest::new(ConnectionHeader::new(1, 7), &cemi).unwrap();

        let mut buf = [0u8; 32];
        let len = request.build(&mut buf).unwrap();
        assert_eq!(len, 6 + 4 + cemi.len());

        let parsed = TunnelingRequest::parse(&buf[6..len]).unwrap();
        assert_eq!(parsed.connection_header.sequence_counter, 7);
        assert_eq!(&parsed.cemi_data[..], &cemi);
    }

    #[test]
    fn test_tunneling_request_too_large() {
        let cemi = [0u8; MAX_CEMI_SIZE + 1];
        let err = TunnelingRequest::new(ConnectionHeader::new(1, 0), &cemi).unwrap_err();
        assert!(err.is_payload_too_large());
    }

    #[test]
    fn test_connection_state_response() {
        let response = ConnectionStateResponse::parse(&[0x03, E_CONNECTION_ID]).unwrap();
        assert_eq!(response.channel_id, 3);
        assert!(!response.is_ok());
    }

    #[test]
    fn test_search_response_friendly_name() {
        let mut dib = [0u8; 54];
        dib[0] = 54;
        dib[1] = DIB_DEVICE_INFO;
        dib[24..24 + 10].copy_from_slice(b"KNX IP BAO");

        let response = SearchResponse::new(Hpai::new([192, 168, 1, 250], 3671), &dib).unwrap();
        assert_eq!(response.friendly_name().as_deref(), Some("KNX IP BAO"));
    }

    #[test]
    fn test_search_response_without_device_info() {
        let supported_families = [0x04, 0x02, 0x04, 0x01];
        let response =
            SearchResponse::new(Hpai::new([192, 168, 1, 250], 3671), &supported_families).unwrap();
        assert_eq!(response.friendly_name(), None);
    }
}
