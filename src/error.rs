//! Error types for KNXnet/IP tunneling operations.
//!
//! Errors are grouped by category (protocol, connection, tunneling,
//! transport). The concrete kind of each category stays internal; callers
//! inspect errors through the `is_*` helper methods so new kinds can be
//! added without breaking matches downstream.

use std::io;

use thiserror::Error;

/// Result type alias for KNX operations.
pub type Result<T> = core::result::Result<T, KnxError>;

// =============================================================================
// Error Kind Enums (Internal)
// =============================================================================

/// Protocol error variants (internal)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProtocolErrorKind {
    /// Header length / protocol version bytes are not `0x06 0x10`
    InvalidHeader,
    /// Service type identifier is not one this engine speaks
    UnexpectedServiceType,
    /// Structure inside the frame is malformed or truncated
    InvalidFrame,
    PayloadTooLarge,
    BufferTooSmall,
}

/// Connection error variants (internal)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectionErrorKind {
    AlreadyConnected,
    NotConnected,
    UnknownHost,
    NoResponseFromInterface,
    /// Gateway answered with a non-zero status code
    ResponseError(u8),
    WrongResponseType,
    /// Listener thread terminated while a caller waited on it
    ListenerStopped,
}

/// Tunneling error variants (internal)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TunnelingErrorKind {
    WrongChannelId { expected: u8, actual: u8 },
    WrongSequenceCounterValue { expected: u8, actual: u8 },
}

/// Transport error variants (internal)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransportErrorKind {
    SendFailed,
    ReceiveFailed,
    NotBound,
    SocketError,
}

// =============================================================================
// Main Error Type
// =============================================================================

/// KNX protocol error type.
///
/// This is the error type returned by every fallible operation in the crate.
#[derive(Debug, Error)]
pub enum KnxError {
    /// Codec errors (header, service type, malformed bodies)
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    /// Session errors (connect, disconnect, responses)
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),
    /// Tunneling errors (channel id, sequence counter)
    #[error("tunneling error: {0}")]
    Tunneling(#[from] TunnelingError),
    /// Socket errors
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    /// Operation not valid in the current state (e.g. starting twice)
    #[error("invalid state")]
    InvalidState,
}

// =============================================================================
// Structured Error Types
// =============================================================================

/// Protocol error
#[derive(Debug, Error)]
#[error("{kind:?}")]
pub struct ProtocolError {
    kind: ProtocolErrorKind,
}

impl ProtocolError {
    pub(crate) const fn new(kind: ProtocolErrorKind) -> Self {
        Self { kind }
    }

    /// Check if the header magic was wrong
    pub fn is_invalid_header(&self) -> bool {
        matches!(self.kind, ProtocolErrorKind::InvalidHeader)
    }

    /// Check if the service type identifier was unknown
    pub fn is_unexpected_service_type(&self) -> bool {
        matches!(self.kind, ProtocolErrorKind::UnexpectedServiceType)
    }

    /// Check if the frame body was malformed
    pub fn is_invalid_frame(&self) -> bool {
        matches!(self.kind, ProtocolErrorKind::InvalidFrame)
    }
}

/// Connection error
#[derive(Debug, Error)]
#[error("{kind:?}")]
pub struct ConnectionError {
    kind: ConnectionErrorKind,
}

impl ConnectionError {
    pub(crate) const fn new(kind: ConnectionErrorKind) -> Self {
        Self { kind }
    }

    /// Check if this is a timeout waiting for the interface
    pub fn is_no_response(&self) -> bool {
        matches!(self.kind, ConnectionErrorKind::NoResponseFromInterface)
    }

    /// Status code carried by a `ResponseError`
    pub fn response_status(&self) -> Option<u8> {
        match self.kind {
            ConnectionErrorKind::ResponseError(status) => Some(status),
            _ => None,
        }
    }
}

/// Tunneling error
#[derive(Debug, Error)]
#[error("{kind:?}")]
pub struct TunnelingError {
    kind: TunnelingErrorKind,
}

impl TunnelingError {
    pub(crate) const fn new(kind: TunnelingErrorKind) -> Self {
        Self { kind }
    }
}

/// Transport error with the underlying I/O error, if any
#[derive(Debug, Error)]
#[error("{kind:?}")]
pub struct TransportError {
    kind: TransportErrorKind,
    #[source]
    source: Option<io::Error>,
}

impl TransportError {
    pub(crate) fn new(kind: TransportErrorKind, source: Option<io::Error>) -> Self {
        Self { kind, source }
    }

    /// Check if the transport was used before `bind`
    pub fn is_not_bound(&self) -> bool {
        matches!(self.kind, TransportErrorKind::NotBound)
    }
}

// =============================================================================
// Convenience Constructors for KnxError
// =============================================================================

impl KnxError {
    // Protocol errors
    #[inline]
    pub(crate) const fn invalid_header() -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::InvalidHeader))
    }

    #[inline]
    pub(crate) const fn unexpected_service_type() -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::UnexpectedServiceType))
    }

    #[inline]
    pub(crate) const fn invalid_frame() -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::InvalidFrame))
    }

    #[inline]
    pub(crate) const fn payload_too_large() -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::PayloadTooLarge))
    }

    #[inline]
    pub(crate) const fn buffer_too_small() -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::BufferTooSmall))
    }

    // Connection errors
    pub(crate) const fn already_connected() -> Self {
        Self::Connection(ConnectionError::new(ConnectionErrorKind::AlreadyConnected))
    }

    pub(crate) const fn not_connected() -> Self {
        Self::Connection(ConnectionError::new(ConnectionErrorKind::NotConnected))
    }

    pub(crate) const fn unknown_host() -> Self {
        Self::Connection(ConnectionError::new(ConnectionErrorKind::UnknownHost))
    }

    pub(crate) const fn no_response() -> Self {
        Self::Connection(ConnectionError::new(
            ConnectionErrorKind::NoResponseFromInterface,
        ))
    }

    pub(crate) const fn response_error(status: u8) -> Self {
        Self::Connection(ConnectionError::new(ConnectionErrorKind::ResponseError(
            status,
        )))
    }

    pub(crate) const fn wrong_response_type() -> Self {
        Self::Connection(ConnectionError::new(ConnectionErrorKind::WrongResponseType))
    }

    pub(crate) const fn listener_stopped() -> Self {
        Self::Connection(ConnectionError::new(ConnectionErrorKind::ListenerStopped))
    }

    // Tunneling errors
    pub(crate) const fn wrong_channel_id(expected: u8, actual: u8) -> Self {
        Self::Tunneling(TunnelingError::new(TunnelingErrorKind::WrongChannelId {
            expected,
            actual,
        }))
    }

    pub(crate) const fn wrong_sequence_counter(expected: u8, actual: u8) -> Self {
        Self::Tunneling(TunnelingError::new(
            TunnelingErrorKind::WrongSequenceCounterValue { expected, actual },
        ))
    }

    // Transport errors
    pub(crate) fn send_failed(source: io::Error) -> Self {
        Self::Transport(TransportError::new(
            TransportErrorKind::SendFailed,
            Some(source),
        ))
    }

    pub(crate) fn receive_failed(source: io::Error) -> Self {
        Self::Transport(TransportError::new(
            TransportErrorKind::ReceiveFailed,
            Some(source),
        ))
    }

    pub(crate) fn not_bound() -> Self {
        Self::Transport(TransportError::new(TransportErrorKind::NotBound, None))
    }

    // Predicates

    /// Header magic mismatch while decoding.
    pub fn is_invalid_header(&self) -> bool {
        matches!(self, Self::Protocol(e) if e.is_invalid_header())
    }

    /// Unknown service type identifier while decoding.
    pub fn is_unexpected_service_type(&self) -> bool {
        matches!(self, Self::Protocol(e) if e.is_unexpected_service_type())
    }

    /// Malformed frame body or length field.
    pub fn is_invalid_frame(&self) -> bool {
        matches!(self, Self::Protocol(e) if e.is_invalid_frame())
    }

    pub fn is_payload_too_large(&self) -> bool {
        matches!(self, Self::Protocol(e) if e.kind == ProtocolErrorKind::PayloadTooLarge)
    }

    pub fn is_already_connected(&self) -> bool {
        self.connection_kind() == Some(ConnectionErrorKind::AlreadyConnected)
    }

    pub fn is_not_connected(&self) -> bool {
        self.connection_kind() == Some(ConnectionErrorKind::NotConnected)
    }

    pub fn is_unknown_host(&self) -> bool {
        self.connection_kind() == Some(ConnectionErrorKind::UnknownHost)
    }

    /// The interface did not answer within the exchange timeout.
    pub fn is_no_response(&self) -> bool {
        self.connection_kind() == Some(ConnectionErrorKind::NoResponseFromInterface)
    }

    /// The interface answered with a non-zero status.
    pub fn is_response_error(&self) -> bool {
        matches!(
            self.connection_kind(),
            Some(ConnectionErrorKind::ResponseError(_))
        )
    }

    pub fn is_wrong_response_type(&self) -> bool {
        self.connection_kind() == Some(ConnectionErrorKind::WrongResponseType)
    }

    pub fn is_listener_stopped(&self) -> bool {
        self.connection_kind() == Some(ConnectionErrorKind::ListenerStopped)
    }

    pub fn is_wrong_channel_id(&self) -> bool {
        matches!(
            self,
            Self::Tunneling(TunnelingError {
                kind: TunnelingErrorKind::WrongChannelId { .. }
            })
        )
    }

    pub fn is_wrong_sequence_counter(&self) -> bool {
        matches!(
            self,
            Self::Tunneling(TunnelingError {
                kind: TunnelingErrorKind::WrongSequenceCounterValue { .. }
            })
        )
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Status code carried by a `ResponseError`.
    pub fn response_status(&self) -> Option<u8> {
        match self {
            Self::Connection(e) => e.response_status(),
            _ => None,
        }
    }

    fn connection_kind(&self) -> Option<ConnectionErrorKind> {
        match self {
            Self::Connection(e) => Some(e.kind),
            _ => None,
        }
    }
}

impl From<io::Error> for KnxError {
    fn from(source: io::Error) -> Self {
        Self::Transport(TransportError::new(
            TransportErrorKind::SocketError,
            Some(source),
        ))
    }
}
