//! KNXnet/IP protocol constants and service type identifiers.

use core::time::Duration;
use std::net::Ipv4Addr;

/// KNXnet/IP protocol version 1.0
pub const KNXNETIP_VERSION_10: u8 = 0x10;

/// Standard KNXnet/IP header length (6 bytes)
pub const HEADER_SIZE_10: u8 = 0x06;

/// Standard UDP port for KNXnet/IP communication
pub const KNXNETIP_DEFAULT_PORT: u16 = 3671;

/// Maximum size of a KNXnet/IP frame
pub const MAX_FRAME_SIZE: usize = 256;

/// Maximum size of a tunneled bus frame (frame minus header and connection header)
pub const MAX_CEMI_SIZE: usize = MAX_FRAME_SIZE - 6 - 4;

/// Maximum size of the DIB block area kept from a `SEARCH_RESPONSE`
pub const MAX_DIB_SIZE: usize = MAX_FRAME_SIZE - 6 - 8;

/// KNXnet/IP multicast address used for discovery and routing
pub const KNXNETIP_MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(224, 0, 23, 12);

// =============================================================================
// Timeouts
// =============================================================================

/// Time to wait for a `CONNECT_RESPONSE`
pub const CONNECT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Time to wait for a `CONNECTIONSTATE_RESPONSE`
pub const CONNECTIONSTATE_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Time to wait for a `DISCONNECT_RESPONSE`
pub const DISCONNECT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Time to wait for a `TUNNELING_ACK`
pub const TUNNELING_REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

/// Recommended heartbeat interval (KNX standard: 60 seconds)
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

/// Number of `CONNECTIONSTATE_REQUEST` attempts before the link is declared dead
pub const HEARTBEAT_ATTEMPTS: u8 = 3;

// =============================================================================
// Service Type Identifiers
// =============================================================================

/// KNXnet/IP service type identifiers handled by this engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ServiceType {
    /// `SEARCH_REQUEST` - Gateway discovery request
    SearchRequest = 0x0201,
    /// `SEARCH_RESPONSE` - Gateway discovery response
    SearchResponse = 0x0202,
    /// `CONNECT_REQUEST` - Connection request
    ConnectRequest = 0x0205,
    /// `CONNECT_RESPONSE` - Connection response
    ConnectResponse = 0x0206,
    /// `CONNECTIONSTATE_REQUEST` - Connection state request (heartbeat)
    ConnectionstateRequest = 0x0207,
    /// `CONNECTIONSTATE_RESPONSE` - Connection state response
    ConnectionstateResponse = 0x0208,
    /// `DISCONNECT_REQUEST` - Disconnect request
    DisconnectRequest = 0x0209,
    /// `DISCONNECT_RESPONSE` - Disconnect response
    DisconnectResponse = 0x020A,
    /// `TUNNELLING_REQUEST` - Tunnelling data request
    TunnellingRequest = 0x0420,
    /// `TUNNELLING_ACK` - Tunnelling acknowledgement
    TunnellingAck = 0x0421,
}

impl ServiceType {
    /// Convert a u16 to `ServiceType`
    pub const fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0201 => Some(Self::SearchRequest),
            0x0202 => Some(Self::SearchResponse),
            0x0205 => Some(Self::ConnectRequest),
            0x0206 => Some(Self::ConnectResponse),
            0x0207 => Some(Self::ConnectionstateRequest),
            0x0208 => Some(Self::ConnectionstateResponse),
            0x0209 => Some(Self::DisconnectRequest),
            0x020A => Some(Self::DisconnectResponse),
            0x0420 => Some(Self::TunnellingRequest),
            0x0421 => Some(Self::TunnellingAck),
            _ => None,
        }
    }

    /// Convert `ServiceType` to u16
    pub const fn to_u16(self) -> u16 {
        self as u16
    }
}

// =============================================================================
// Connection Type Codes
// =============================================================================

/// Connection type for `TUNNEL_CONNECTION`
pub const TUNNEL_CONNECTION: u8 = 0x04;

/// KNX layer for `TUNNEL_LINKLAYER`
pub const TUNNEL_LINKLAYER: u8 = 0x02;

// =============================================================================
// Host Protocol Codes
// =============================================================================

/// IPv4 UDP protocol
pub const IPV4_UDP: u8 = 0x01;

/// IPv4 TCP protocol
pub const IPV4_TCP: u8 = 0x02;

// =============================================================================
// DIB Type Codes
// =============================================================================

/// Device information DIB
pub const DIB_DEVICE_INFO: u8 = 0x01;

// =============================================================================
// Error Codes
// =============================================================================

/// Error code for successful operation
pub const E_NO_ERROR: u8 = 0x00;

/// Error code for unknown or inactive channel id
pub const E_CONNECTION_ID: u8 = 0x21;

/// Error code for connection type not supported
pub const E_CONNECTION_TYPE: u8 = 0x22;

/// Error code for connection option not supported
pub const E_CONNECTION_OPTION: u8 = 0x23;

/// Error code for no more connections available
pub const E_NO_MORE_CONNECTIONS: u8 = 0x24;

/// Error code for data connection error
pub const E_DATA_CONNECTION: u8 = 0x26;

/// Error code for KNX connection error
pub const E_KNX_CONNECTION: u8 = 0x27;

/// Error code for tunnelling layer not supported
pub const E_TUNNELLING_LAYER: u8 = 0x29;

/// Human readable name of a KNXnet/IP status code
pub const fn status_name(status: u8) -> &'static str {
    match status {
        E_NO_ERROR => "E_NO_ERROR",
        E_CONNECTION_ID => "E_CONNECTION_ID",
        E_CONNECTION_TYPE => "E_CONNECTION_TYPE",
        E_CONNECTION_OPTION => "E_CONNECTION_OPTION",
        E_NO_MORE_CONNECTIONS => "E_NO_MORE_CONNECTIONS",
        E_DATA_CONNECTION => "E_DATA_CONNECTION",
        E_KNX_CONNECTION => "E_KNX_CONNECTION",
        E_TUNNELLING_LAYER => "E_TUNNELLING_LAYER",
        _ => "E_UNKNOWN",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_type_round_trip() {
        for raw in [
            0x0201, 0x0202, 0x0205, 0x0206, 0x0207, 0x0208, 0x0209, 0x020A, 0x0420, 0x0421,
        ] {
            let service = ServiceType::from_u16(raw).unwrap();
            assert_eq!(service.to_u16(), raw);
        }
    }

    #[test]
    fn test_unknown_service_type() {
        assert_eq!(ServiceType::from_u16(0x0203), None); // DESCRIPTION_REQUEST
        assert_eq!(ServiceType::from_u16(0x0530), None); // ROUTING_INDICATION
        assert_eq!(ServiceType::from_u16(0xFFFF), None);
    }

    #[test]
    fn test_status_name() {
        assert_eq!(status_name(0x00), "E_NO_ERROR");
        assert_eq!(status_name(0x24), "E_NO_MORE_CONNECTIONS");
        assert_eq!(status_name(0x99), "E_UNKNOWN");
    }
}
