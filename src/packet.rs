//! DHCP packet parsing and encoding per RFC 2131.
//!
//! A DHCP packet consists of a fixed 236-byte header followed by a 4-byte
//! magic cookie and variable-length options. Incoming requests are decoded
//! into a [`DhcpMessage`]; outgoing replies are described by a [`Reply`] and
//! serialized with [`Reply::encode`].
//!
//! # Packet Structure
//!
//! ```text
//! 0                   1                   2                   3
//! 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     op (1)    |   htype (1)   |   hlen (1)    |   hops (1)    |
//! +---------------+---------------+---------------+---------------+
//! |                            xid (4)                            |
//! +-------------------------------+-------------------------------+
//! |           secs (2)            |           flags (2)           |
//! +-------------------------------+-------------------------------+
//! |                          ciaddr (4)                           |
//! +---------------------------------------------------------------+
//! |                          yiaddr (4)                           |
//! +---------------------------------------------------------------+
//! |                          siaddr (4)                           |
//! +---------------------------------------------------------------+
//! |                          giaddr (4)                           |
//! +---------------------------------------------------------------+
//! |                          chaddr (16)                          |
//! +---------------------------------------------------------------+
//! |                          sname (64)                           |
//! +---------------------------------------------------------------+
//! |                          file (128)                           |
//! +---------------------------------------------------------------+
//! |                    magic cookie (4) = 99.130.83.99            |
//! +---------------------------------------------------------------+
//! |                          options (variable)                   |
//! +---------------------------------------------------------------+
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::options::{DhcpOption, MessageType, OptionCode};

/// DHCP magic cookie that identifies DHCP packets (vs BOOTP).
pub const DHCP_MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];

const DHCP_CHADDR_OFFSET: usize = 28;
const DHCP_CHADDR_SIZE: usize = 16;
const DHCP_SNAME_SIZE: usize = 64;
const DHCP_FILE_SIZE: usize = 128;

const DHCP_MAGIC_COOKIE_OFFSET: usize =
    DHCP_CHADDR_OFFSET + DHCP_CHADDR_SIZE + DHCP_SNAME_SIZE + DHCP_FILE_SIZE;

/// Size of the fixed header portion including magic cookie.
pub const DHCP_FIXED_HEADER_SIZE: usize = DHCP_MAGIC_COOKIE_OFFSET + DHCP_MAGIC_COOKIE.len();

/// Encoded size of the reply options: six TLVs plus the End marker.
const REPLY_OPTIONS_SIZE: usize = 3 + 5 * 6 + 1;

/// BOOTP/DHCP operation code for client requests.
pub const BOOTREQUEST: u8 = 1;

/// BOOTP/DHCP operation code for server replies.
pub const BOOTREPLY: u8 = 2;

/// Hardware type for Ethernet (most common).
pub const HTYPE_ETHERNET: u8 = 1;

/// Hardware address length for Ethernet (6 bytes).
pub const HLEN_ETHERNET: u8 = 6;

/// An Ethernet hardware address, the key of every lease table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(octets: [u8; 6]) -> Self {
        Self(octets)
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            a, b, c, d, e, g
        )
    }
}

impl FromStr for MacAddress {
    type Err = Error;

    /// Accepts `aa:bb:cc:dd:ee:ff` or `AA-BB-CC-DD-EE-FF`.
    fn from_str(value: &str) -> Result<Self> {
        let invalid = || Error::InvalidConfig(format!("invalid MAC address '{}'", value));

        let mut octets = [0u8; 6];
        let mut parts = value.split([':', '-']);
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or_else(invalid)?;
            if part.len() != 2 || !part.bytes().all(|byte| byte.is_ascii_hexdigit()) {
                return Err(invalid());
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(Self(octets))
    }
}

/// A decoded DHCP packet.
///
/// Options are kept as raw bytes keyed by option code; typed accessors such
/// as [`requested_ip`](Self::requested_ip) interpret the few the server uses.
#[derive(Debug, Clone)]
pub struct DhcpMessage {
    /// Operation code: [`BOOTREQUEST`] (1) or [`BOOTREPLY`] (2).
    pub op: u8,
    pub htype: u8,
    pub hlen: u8,
    pub hops: u8,

    /// Transaction ID chosen by client, echoed in replies.
    pub xid: u32,
    pub secs: u16,

    /// Flags. Bit 15 (0x8000) = broadcast flag.
    pub flags: u16,

    pub ciaddr: Ipv4Addr,
    pub yiaddr: Ipv4Addr,
    pub siaddr: Ipv4Addr,
    pub giaddr: Ipv4Addr,

    /// Client hardware address, zero padded to 16 bytes.
    pub chaddr: [u8; 16],

    /// Raw option payloads by code. Pad and End never appear here.
    pub options: BTreeMap<u8, Vec<u8>>,
}

impl DhcpMessage {
    /// Decodes a DHCP packet from raw bytes.
    ///
    /// # Errors
    ///
    /// - [`Error::Malformed`] if the buffer is shorter than 240 bytes
    /// - [`Error::BadMagicCookie`] if bytes 236..240 are not `63 82 53 63`
    ///
    /// A missing message type is not a decode error; see
    /// [`message_type`](Self::message_type).
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < DHCP_FIXED_HEADER_SIZE {
            return Err(Error::Malformed(format!(
                "packet too short: {} bytes (minimum {})",
                data.len(),
                DHCP_FIXED_HEADER_SIZE
            )));
        }

        let mut cookie = [0u8; 4];
        cookie.copy_from_slice(&data[DHCP_MAGIC_COOKIE_OFFSET..DHCP_FIXED_HEADER_SIZE]);
        if cookie != DHCP_MAGIC_COOKIE {
            return Err(Error::BadMagicCookie(cookie));
        }

        let mut chaddr = [0u8; 16];
        chaddr.copy_from_slice(&data[DHCP_CHADDR_OFFSET..DHCP_CHADDR_OFFSET + DHCP_CHADDR_SIZE]);

        Ok(Self {
            op: data[0],
            htype: data[1],
            hlen: data[2],
            hops: data[3],
            xid: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            secs: u16::from_be_bytes([data[8], data[9]]),
            flags: u16::from_be_bytes([data[10], data[11]]),
            ciaddr: Ipv4Addr::new(data[12], data[13], data[14], data[15]),
            yiaddr: Ipv4Addr::new(data[16], data[17], data[18], data[19]),
            siaddr: Ipv4Addr::new(data[20], data[21], data[22], data[23]),
            giaddr: Ipv4Addr::new(data[24], data[25], data[26], data[27]),
            chaddr,
            options: Self::decode_options(&data[DHCP_FIXED_HEADER_SIZE..]),
        })
    }

    /// Walks the TLV area until End or the end of the buffer.
    ///
    /// A trailing option cut short by the buffer end is dropped; everything
    /// before it is kept.
    fn decode_options(data: &[u8]) -> BTreeMap<u8, Vec<u8>> {
        let mut options = BTreeMap::new();
        let mut index = 0;

        while index < data.len() {
            let code = data[index];

            if code == OptionCode::Pad as u8 {
                index += 1;
                continue;
            }

            if code == OptionCode::End as u8 {
                break;
            }

            let Some(&length) = data.get(index + 1) else {
                break;
            };
            let start = index + 2;
            let end = start + length as usize;
            let Some(value) = data.get(start..end) else {
                break;
            };

            options.insert(code, value.to_vec());
            index = end;
        }

        options
    }

    /// Returns the raw payload of an option, if present.
    pub fn option(&self, code: u8) -> Option<&[u8]> {
        self.options.get(&code).map(Vec::as_slice)
    }

    /// Returns the DHCP message type (Option 53).
    ///
    /// # Errors
    ///
    /// - [`Error::NoMessageType`] if option 53 is absent or empty
    /// - [`Error::UnknownMessageType`] if its value is not 1..=8
    pub fn message_type(&self) -> Result<MessageType> {
        let value = self
            .option(OptionCode::MessageType as u8)
            .and_then(|data| data.first())
            .ok_or(Error::NoMessageType)?;
        MessageType::try_from(*value)
    }

    /// Returns the requested IP address (Option 50) if present and 4 bytes long.
    pub fn requested_ip(&self) -> Option<Ipv4Addr> {
        self.option(OptionCode::RequestedIpAddress as u8)
            .and_then(ipv4_from_bytes)
    }

    /// Returns the server identifier (Option 54) if present and 4 bytes long.
    pub fn server_identifier(&self) -> Option<Ipv4Addr> {
        self.option(OptionCode::ServerIdentifier as u8)
            .and_then(ipv4_from_bytes)
    }

    /// The first six bytes of `chaddr`, regardless of `hlen`.
    pub fn client_mac(&self) -> MacAddress {
        let mut octets = [0u8; 6];
        octets.copy_from_slice(&self.chaddr[..6]);
        MacAddress(octets)
    }

}

fn ipv4_from_bytes(data: &[u8]) -> Option<Ipv4Addr> {
    let octets: [u8; 4] = data.try_into().ok()?;
    Some(Ipv4Addr::from(octets))
}

/// Everything needed to emit an OFFER or ACK.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub message_type: MessageType,
    pub xid: u32,
    pub client_mac: MacAddress,
    pub your_ip: Ipv4Addr,
    pub subnet_mask: Ipv4Addr,
    /// Advertised both as the router and as the server identifier.
    pub server_ip: Ipv4Addr,
    pub dns_server: Ipv4Addr,
    pub lease_time: u32,
}

impl Reply {
    /// Options in the order they are written to the wire.
    pub fn options(&self) -> [DhcpOption; 6] {
        [
            DhcpOption::MessageType(self.message_type),
            DhcpOption::SubnetMask(self.subnet_mask),
            DhcpOption::Router(self.server_ip),
            DhcpOption::DnsServer(self.dns_server),
            DhcpOption::ServerIdentifier(self.server_ip),
            DhcpOption::LeaseTime(self.lease_time),
        ]
    }

    /// Serializes the reply as a BOOTREPLY.
    ///
    /// ciaddr, siaddr and giaddr are zero, `chaddr` is the client MAC padded
    /// to 16 bytes, sname/file are empty. No trailing padding is added.
    pub fn encode(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(DHCP_FIXED_HEADER_SIZE + REPLY_OPTIONS_SIZE);

        packet.push(BOOTREPLY);
        packet.push(HTYPE_ETHERNET);
        packet.push(HLEN_ETHERNET);
        packet.push(0);

        packet.extend_from_slice(&self.xid.to_be_bytes());
        packet.extend_from_slice(&0u16.to_be_bytes());
        packet.extend_from_slice(&0u16.to_be_bytes());

        packet.extend_from_slice(&Ipv4Addr::UNSPECIFIED.octets());
        packet.extend_from_slice(&self.your_ip.octets());
        packet.extend_from_slice(&Ipv4Addr::UNSPECIFIED.octets());
        packet.extend_from_slice(&Ipv4Addr::UNSPECIFIED.octets());

        let mut chaddr = [0u8; DHCP_CHADDR_SIZE];
        chaddr[..6].copy_from_slice(&self.client_mac.octets());
        packet.extend_from_slice(&chaddr);

        packet.resize(DHCP_MAGIC_COOKIE_OFFSET, 0);
        packet.extend_from_slice(&DHCP_MAGIC_COOKIE);

        for option in self.options() {
            option.encode_into(&mut packet);
        }

        packet.push(OptionCode::End as u8);
        packet
    }
}
