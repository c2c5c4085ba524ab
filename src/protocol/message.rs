//! Typed KNXnet/IP messages.
//!
//! [`Message`] is the unit the processor sends, receives and correlates.
//! Decoding validates the header, dispatches on the service type and parses
//! the matching body; encoding is its exact inverse.
//!
//! ## Example
//!
//! ```rust
//! use knx_tunnel::protocol::{ConnectionStateResponse, Message};
//!
//! let message = Message::ConnectionStateResponse(ConnectionStateResponse::new(7, 0));
//! let bytes = message.to_bytes().unwrap();
//! assert_eq!(Message::decode(&bytes).unwrap(), message);
//! ```

use core::time::Duration;

use crate::error::{KnxError, Result};
use crate::protocol::constants::{
    ServiceType, CONNECTIONSTATE_REQUEST_TIMEOUT, CONNECT_REQUEST_TIMEOUT,
    DISCONNECT_REQUEST_TIMEOUT, MAX_FRAME_SIZE, TUNNELING_REQUEST_TIMEOUT,
};
use crate::protocol::frame::KnxnetIpFrame;
use crate::protocol::services::{
    ConnectRequest, ConnectResponse, ConnectionStateRequest, ConnectionStateResponse,
    DisconnectRequest, DisconnectResponse, SearchRequest, SearchResponse, ServiceBody,
    TunnelingAck, TunnelingRequest,
};

/// Fixed-capacity buffer holding one encoded frame
pub type FrameBuffer = heapless::Vec<u8, MAX_FRAME_SIZE>;

/// Whether a message opens an exchange or answers one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Sent unsolicited; the peer is expected to answer
    Request,
    /// Answer to a request
    Response,
}

/// A KNXnet/IP message of one of the supported services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    SearchRequest(SearchRequest),
    SearchResponse(SearchResponse),
    ConnectRequest(ConnectRequest),
    ConnectResponse(ConnectResponse),
    ConnectionStateRequest(ConnectionStateRequest),
    ConnectionStateResponse(ConnectionStateResponse),
    DisconnectRequest(DisconnectRequest),
    DisconnectResponse(DisconnectResponse),
    TunnelingRequest(TunnelingRequest),
    TunnelingAck(TunnelingAck),
}

impl Message {
    /// Decode a message from a received datagram.
    ///
    /// # Errors
    ///
    /// - `InvalidHeader` if the header magic is wrong
    /// - `UnexpectedServiceType` for service types not handled here
    /// - `InvalidFrame` for inconsistent lengths or malformed bodies
    pub fn decode(data: &[u8]) -> Result<Self> {
        let frame = KnxnetIpFrame::parse(data)?;
        let body = frame.body();

        Ok(match frame.service_type() {
            ServiceType::SearchRequest => Self::SearchRequest(SearchRequest::parse(body)?),
            ServiceType::SearchResponse => Self::SearchResponse(SearchResponse::parse(body)?),
            ServiceType::ConnectRequest => Self::ConnectRequest(ConnectRequest::parse(body)?),
            ServiceType::ConnectResponse => Self::ConnectResponse(ConnectResponse::parse(body)?),
            ServiceType::ConnectionstateRequest => {
                Self::ConnectionStateRequest(ConnectionStateRequest::parse(body)?)
            }
            ServiceType::ConnectionstateResponse => {
                Self::ConnectionStateResponse(ConnectionStateResponse::parse(body)?)
            }
            ServiceType::DisconnectRequest => {
                Self::DisconnectRequest(DisconnectRequest::parse(body)?)
            }
            ServiceType::DisconnectResponse => {
                Self::DisconnectResponse(DisconnectResponse::parse(body)?)
            }
            ServiceType::TunnellingRequest => {
                Self::TunnelingRequest(TunnelingRequest::parse(body)?)
            }
            ServiceType::TunnellingAck => Self::TunnelingAck(TunnelingAck::parse(body)?),
        })
    }

    /// Encode the message (header + body) into `buf`.
    ///
    /// Returns the number of bytes written.
    pub fn encode_into(&self, buf: &mut [u8]) -> Result<usize> {
        match self {
            Self::SearchRequest(m) => m.build(buf),
            Self::SearchResponse(m) => m.build(buf),
            Self::ConnectRequest(m) => m.build(buf),
            Self::ConnectResponse(m) => m.build(buf),
            Self::ConnectionStateRequest(m) => m.build(buf),
            Self::ConnectionStateResponse(m) => m.build(buf),
            Self::DisconnectRequest(m) => m.build(buf),
            Self::DisconnectResponse(m) => m.build(buf),
            Self::TunnelingRequest(m) => m.build(buf),
            Self::TunnelingAck(m) => m.build(buf),
        }
    }

    /// Encode the message into a fixed-capacity frame buffer.
    pub fn to_bytes(&self) -> Result<FrameBuffer> {
        let mut buf = [0u8; MAX_FRAME_SIZE];
        let len = self.encode_into(&mut buf)?;
        FrameBuffer::from_slice(&buf[..len]).map_err(|_full| KnxError::payload_too_large())
    }

    /// Service type identifier of this message
    pub const fn service_type(&self) -> ServiceType {
        match self {
            Self::SearchRequest(_) => ServiceType::SearchRequest,
            Self::SearchResponse(_) => ServiceType::SearchResponse,
            Self::ConnectRequest(_) => ServiceType::ConnectRequest,
            Self::ConnectResponse(_) => ServiceType::ConnectResponse,
            Self::ConnectionStateRequest(_) => ServiceType::ConnectionstateRequest,
            Self::ConnectionStateResponse(_) => ServiceType::ConnectionstateResponse,
            Self::DisconnectRequest(_) => ServiceType::DisconnectRequest,
            Self::DisconnectResponse(_) => ServiceType::DisconnectResponse,
            Self::TunnelingRequest(_) => ServiceType::TunnellingRequest,
            Self::TunnelingAck(_) => ServiceType::TunnellingAck,
        }
    }

    /// Request or response
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::SearchRequest(_)
            | Self::ConnectRequest(_)
            | Self::ConnectionStateRequest(_)
            | Self::DisconnectRequest(_)
            | Self::TunnelingRequest(_) => MessageKind::Request,
            Self::SearchResponse(_)
            | Self::ConnectResponse(_)
            | Self::ConnectionStateResponse(_)
            | Self::DisconnectResponse(_)
            | Self::TunnelingAck(_) => MessageKind::Response,
        }
    }

    /// How long a sender should wait for the answer to this message.
    ///
    /// Responses are never waited on; they report zero.
    pub const fn timeout(&self) -> Duration {
        match self {
            Self::ConnectRequest(_) => CONNECT_REQUEST_TIMEOUT,
            Self::ConnectionStateRequest(_) => CONNECTIONSTATE_REQUEST_TIMEOUT,
            Self::DisconnectRequest(_) => DISCONNECT_REQUEST_TIMEOUT,
            Self::TunnelingRequest(_) => TUNNELING_REQUEST_TIMEOUT,
            // Search answers arrive asynchronously, nobody blocks on them
            Self::SearchRequest(_)
            | Self::SearchResponse(_)
            | Self::ConnectResponse(_)
            | Self::ConnectionStateResponse(_)
            | Self::DisconnectResponse(_)
            | Self::TunnelingAck(_) => Duration::ZERO,
        }
    }

    /// Service type of the response that answers this message.
    ///
    /// `None` for response-kind messages.
    pub const fn expected_response(&self) -> Option<ServiceType> {
        match self {
            Self::SearchRequest(_) => Some(ServiceType::SearchResponse),
            Self::ConnectRequest(_) => Some(ServiceType::ConnectResponse),
            Self::ConnectionStateRequest(_) => Some(ServiceType::ConnectionstateResponse),
            Self::DisconnectRequest(_) => Some(ServiceType::DisconnectResponse),
            Self::TunnelingRequest(_) => Some(ServiceType::TunnellingAck),
            Self::SearchResponse(_)
            | Self::ConnectResponse(_)
            | Self::ConnectionStateResponse(_)
            | Self::DisconnectResponse(_)
            | Self::TunnelingAck(_) => None,
        }
    }

    /// True for request-kind messages
    pub const fn is_request(&self) -> bool {
        matches!(self.kind(), MessageKind::Request)
    }
}
