//! Error types for the DHCP server.
//!
//! All fallible operations in this crate return [`Result<T>`], which uses
//! the [`Error`] enum for error variants.

use std::net::Ipv4Addr;

/// Errors that can occur during DHCP server operation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File system or network I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (config file).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The datagram is too short to hold a DHCP header.
    #[error("Malformed DHCP packet: {0}")]
    Malformed(String),

    /// Bytes 236..240 are not the DHCP magic cookie.
    ///
    /// Plain BOOTP traffic and random garbage on port 67 end up here.
    #[error("Bad magic cookie: {0:02x?}")]
    BadMagicCookie([u8; 4]),

    /// The packet carries no usable message type option (53).
    #[error("Packet has no DHCP message type")]
    NoMessageType,

    /// Option 53 holds a value this server does not know.
    #[error("Unknown DHCP message type: {0}")]
    UnknownMessageType(u8),

    /// Every address in the range is bound or offered to another client.
    #[error("No available IP addresses in pool")]
    PoolExhausted,

    /// A REQUEST named an address outside the range or held by another client.
    ///
    /// Only produced by [`Leases::try_commit`](crate::Leases::try_commit).
    #[error("Address {0} is not available to this client")]
    AddressUnavailable(Ipv4Addr),

    /// Invalid server configuration.
    ///
    /// Returned by [`Config::validate`](crate::Config::validate) when the
    /// configuration contains invalid values (e.g., range_start > range_end).
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The server socket could not be created or bound.
    ///
    /// Typically occurs when binding to port 67 without root privileges,
    /// or when another DHCP server already owns the port. This is fatal:
    /// the serve loop never starts.
    #[error("Bind failure: {0}")]
    Bind(String),
}

/// A specialized Result type for DHCP operations.
pub type Result<T> = std::result::Result<T, Error>;
