//! KNXnet/IP frame header and endpoint structures.
//!
//! ## Frame Structure
//!
//! All KNXnet/IP frames follow this structure:
//!
//! ```text
//! ┌─────────────────────────────┐
//! │  Header (6 bytes)           │
//! │  - Header Length: 0x06      │
//! │  - Protocol Version: 0x10   │
//! │  - Service Type: 2 bytes    │
//! │  - Total Length: 2 bytes    │
//! ├─────────────────────────────┤
//! │  Body (variable)            │
//! │  - Service-specific data    │
//! └─────────────────────────────┘
//! ```
//!
//! The first two bytes never change for protocol version 1.0 and act as the
//! frame magic: anything else is rejected with an invalid-header error before
//! the service type is even looked at.

use std::net::{Ipv4Addr, SocketAddrV4};

use crate::error::{KnxError, Result};
use crate::protocol::constants::{ServiceType, HEADER_SIZE_10, IPV4_UDP, KNXNETIP_VERSION_10};

/// KNXnet/IP frame header (6 bytes)
///
/// ```text
/// ┌──────────────┬──────────────┬─────────────────────┐
/// │ Header Len   │ Protocol Ver │  Service Type ID    │
/// │   (1 byte)   │   (1 byte)   │     (2 bytes)       │
/// ├──────────────┴──────────────┴─────────────────────┤
/// │           Total Length (2 bytes)                   │
/// └────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnxnetIpHeader {
    /// Service type identifier
    pub service_type: ServiceType,
    /// Total length of frame (header + body)
    pub total_length: u16,
}

impl KnxnetIpHeader {
    /// Size of the header in bytes
    pub const SIZE: usize = 6;

    /// Create a new header for a body of `body_length` bytes
    pub const fn new(service_type: ServiceType, body_length: u16) -> Self {
        Self {
            service_type,
            total_length: Self::SIZE as u16 + body_length,
        }
    }

    /// Parse a header from a byte slice
    ///
    /// # Errors
    ///
    /// - `BufferTooSmall` if fewer than 6 bytes are available
    /// - `InvalidHeader` if header length or protocol version are wrong
    /// - `UnexpectedServiceType` if the service type is not handled here
    #[inline]
    pub fn parse(data: &[u8]) -> Result<Self> {
        let Some(bytes) = data.get(..Self::SIZE) else {
            return Err(KnxError::buffer_too_small());
        };

        if bytes[0] != HEADER_SIZE_10 || bytes[1] != KNXNETIP_VERSION_10 {
            return Err(KnxError::invalid_header());
        }

        let service_type = ServiceType::from_u16(u16::from_be_bytes([bytes[2], bytes[3]]))
            .ok_or_else(KnxError::unexpected_service_type)?;
        let total_length = u16::from_be_bytes([bytes[4], bytes[5]]);

        Ok(Self {
            service_type,
            total_length,
        })
    }

    /// Encode the header into a byte buffer
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < Self::SIZE {
            return Err(KnxError::buffer_too_small());
        }

        buf[0] = HEADER_SIZE_10;
        buf[1] = KNXNETIP_VERSION_10;
        buf[2..4].copy_from_slice(&self.service_type.to_u16().to_be_bytes());
        buf[4..6].copy_from_slice(&self.total_length.to_be_bytes());

        Ok(Self::SIZE)
    }

    /// Get the expected body length from the header
    pub const fn body_length(&self) -> u16 {
        self.total_length.saturating_sub(Self::SIZE as u16)
    }
}

/// Zero-copy view of a KNXnet/IP frame
#[derive(Debug)]
pub struct KnxnetIpFrame<'a> {
    data: &'a [u8],
    header: KnxnetIpHeader,
}

impl<'a> KnxnetIpFrame<'a> {
    /// Parse a KNXnet/IP frame from a datagram.
    ///
    /// Bytes after `total_length` are ignored.
    ///
    /// # Errors
    ///
    /// Header errors from [`KnxnetIpHeader::parse`], plus `InvalidFrame` when
    /// the length field is shorter than the header or longer than the datagram.
    #[inline]
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let header = KnxnetIpHeader::parse(data)?;
        let total = usize::from(header.total_length);

        if total < KnxnetIpHeader::SIZE || data.len() < total {
            return Err(KnxError::invalid_frame());
        }

        Ok(Self {
            data: &data[..total],
            header,
        })
    }

    /// Get the frame header
    #[inline]
    pub const fn header(&self) -> &KnxnetIpHeader {
        &self.header
    }

    /// Get the service type
    #[inline]
    pub const fn service_type(&self) -> ServiceType {
        self.header.service_type
    }

    /// Get the frame body (payload after header)
    #[inline]
    pub fn body(&self) -> &'a [u8] {
        &self.data[KnxnetIpHeader::SIZE..]
    }

    /// Get the complete frame data
    #[inline]
    pub fn data(&self) -> &'a [u8] {
        self.data
    }
}

/// Host Protocol Address Information (HPAI)
///
/// Structure containing endpoint information (IP address and port).
///
/// ```text
/// ┌──────────────┬──────────────┬─────────────────────┐
/// │ Structure Len│ Host Protocol│   IP Address        │
/// │   (1 byte)   │   (1 byte)   │   (4 bytes IPv4)    │
/// ├──────────────┴──────────────┴─────────────────────┤
/// │                Port (2 bytes)                      │
/// └────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Hpai {
    /// Host protocol code (`IPV4_UDP`)
    pub host_protocol: u8,
    /// IPv4 address (4 bytes)
    pub ip_address: [u8; 4],
    /// UDP port
    pub port: u16,
}

impl Hpai {
    /// Size of HPAI structure for IPv4
    pub const SIZE: usize = 8;

    /// NAT endpoint (0.0.0.0:0): the peer replies to the datagram source
    pub const NAT: Self = Self::new([0, 0, 0, 0], 0);

    /// Create a new HPAI for IPv4 UDP
    pub const fn new(ip_address: [u8; 4], port: u16) -> Self {
        Self {
            host_protocol: IPV4_UDP,
            ip_address,
            port,
        }
    }

    /// True for the `0.0.0.0:0` NAT endpoint
    pub const fn is_nat(&self) -> bool {
        matches!(self.ip_address, [0, 0, 0, 0]) && self.port == 0
    }

    /// Endpoint as a socket address
    pub fn socket_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::from(self.ip_address), self.port)
    }

    /// Endpoint as a socket address, replacing NAT / unspecified parts with `fallback`.
    ///
    /// Gateways behind NAT or answering a NAT request put `0.0.0.0` (and
    /// sometimes port 0) in their HPAI; traffic then goes back to the
    /// address the datagram came from.
    pub fn resolve(&self, fallback: SocketAddrV4) -> SocketAddrV4 {
        let ip = if self.ip_address == [0, 0, 0, 0] {
            *fallback.ip()
        } else {
            Ipv4Addr::from(self.ip_address)
        };
        let port = if self.port == 0 { fallback.port() } else { self.port };
        SocketAddrV4::new(ip, port)
    }

    /// Parse HPAI from bytes
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(KnxError::invalid_frame());
        }

        if usize::from(data[0]) != Self::SIZE {
            return Err(KnxError::invalid_frame());
        }

        Ok(Self {
            host_protocol: data[1],
            ip_address: [data[2], data[3], data[4], data[5]],
            port: u16::from_be_bytes([data[6], data[7]]),
        })
    }

    /// Encode HPAI into bytes
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < Self::SIZE {
            return Err(KnxError::buffer_too_small());
        }

        buf[0] = Self::SIZE as u8;
        buf[1] = self.host_protocol;
        buf[2..6].copy_from_slice(&self.ip_address);
        buf[6..8].copy_from_slice(&self.port.to_be_bytes());

        Ok(Self::SIZE)
    }
}

impl From<SocketAddrV4> for Hpai {
    fn from(addr: SocketAddrV4) -> Self {
        Self::new(addr.ip().octets(), addr.port())
    }
}

impl core::fmt::Display for Hpai {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.socket_addr())
    }
}
