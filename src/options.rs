//! DHCP options as defined in RFC 2132.
//!
//! DHCP uses options to convey configuration parameters between servers and clients.
//! Each option has a code (1 byte), length (1 byte), and variable-length data,
//! except Pad (0) and End (255) which are a single byte.
//!
//! Incoming options are kept as raw bytes keyed by code (see
//! [`DhcpMessage`](crate::DhcpMessage)); this module names the codes the server
//! understands and encodes the typed options it sends.

use std::net::Ipv4Addr;

use crate::error::Error;

/// DHCP option codes used by this server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OptionCode {
    /// Padding (no operation). Used for alignment.
    Pad = 0,
    /// Subnet mask (RFC 2132 §3.3).
    SubnetMask = 1,
    /// Router/gateway addresses (RFC 2132 §3.5).
    Router = 3,
    /// DNS server addresses (RFC 2132 §3.8).
    DnsServer = 6,
    /// Requested IP address (RFC 2132 §9.1).
    RequestedIpAddress = 50,
    /// IP address lease time in seconds (RFC 2132 §9.2).
    LeaseTime = 51,
    /// DHCP message type (RFC 2132 §9.6).
    MessageType = 53,
    /// Server identifier (RFC 2132 §9.7).
    ServerIdentifier = 54,
    /// End of options marker.
    End = 255,
}

/// DHCP message types (Option 53) as defined in RFC 2132 §9.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Client broadcast to locate servers.
    Discover = 1,
    /// Server response to DISCOVER with IP offer.
    Offer = 2,
    /// Client request for offered parameters.
    Request = 3,
    /// Client indicates address is already in use.
    Decline = 4,
    /// Server acknowledgement with configuration.
    Ack = 5,
    /// Server negative acknowledgement.
    Nak = 6,
    /// Client releases IP address.
    Release = 7,
    /// Client requests config without IP allocation.
    Inform = 8,
}

impl TryFrom<u8> for MessageType {
    type Error = Error;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Discover),
            2 => Ok(Self::Offer),
            3 => Ok(Self::Request),
            4 => Ok(Self::Decline),
            5 => Ok(Self::Ack),
            6 => Ok(Self::Nak),
            7 => Ok(Self::Release),
            8 => Ok(Self::Inform),
            other => Err(Error::UnknownMessageType(other)),
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Discover => write!(f, "DISCOVER"),
            Self::Offer => write!(f, "OFFER"),
            Self::Request => write!(f, "REQUEST"),
            Self::Decline => write!(f, "DECLINE"),
            Self::Ack => write!(f, "ACK"),
            Self::Nak => write!(f, "NAK"),
            Self::Release => write!(f, "RELEASE"),
            Self::Inform => write!(f, "INFORM"),
        }
    }
}

/// A typed DHCP option the server knows how to put on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DhcpOption {
    /// DHCP message type (Option 53).
    MessageType(MessageType),
    /// Subnet mask (Option 1).
    SubnetMask(Ipv4Addr),
    /// Default gateway (Option 3). Only a single router is ever advertised.
    Router(Ipv4Addr),
    /// DNS server (Option 6).
    DnsServer(Ipv4Addr),
    /// Server identifier - IP of the DHCP server (Option 54).
    ServerIdentifier(Ipv4Addr),
    /// Lease time in seconds (Option 51).
    LeaseTime(u32),
    /// Client's requested IP address (Option 50).
    RequestedIpAddress(Ipv4Addr),
}

impl DhcpOption {
    /// Returns the RFC 2132 option code for this option.
    pub fn option_code(&self) -> u8 {
        match self {
            Self::MessageType(_) => OptionCode::MessageType as u8,
            Self::SubnetMask(_) => OptionCode::SubnetMask as u8,
            Self::Router(_) => OptionCode::Router as u8,
            Self::DnsServer(_) => OptionCode::DnsServer as u8,
            Self::ServerIdentifier(_) => OptionCode::ServerIdentifier as u8,
            Self::LeaseTime(_) => OptionCode::LeaseTime as u8,
            Self::RequestedIpAddress(_) => OptionCode::RequestedIpAddress as u8,
        }
    }

    /// Appends the option in wire format (code + length + data) to `buffer`.
    pub fn encode_into(&self, buffer: &mut Vec<u8>) {
        buffer.push(self.option_code());
        match self {
            Self::MessageType(message_type) => {
                buffer.push(1);
                buffer.push(*message_type as u8);
            }
            Self::SubnetMask(addr)
            | Self::Router(addr)
            | Self::DnsServer(addr)
            | Self::ServerIdentifier(addr)
            | Self::RequestedIpAddress(addr) => {
                buffer.push(4);
                buffer.extend_from_slice(&addr.octets());
            }
            Self::LeaseTime(seconds) => {
                buffer.push(4);
                buffer.extend_from_slice(&seconds.to_be_bytes());
            }
        }
    }

    /// Encodes the option to a fresh buffer.
    pub fn encode(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(6);
        self.encode_into(&mut buffer);
        buffer
    }
}
