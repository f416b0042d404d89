//! # bridgelease
//!
//! A minimal DHCPv4 server for handing out addresses on a private bridge
//! network (a virtual-machine host bridge, a lab switch, a test harness).
//!
//! ## Features
//!
//! - DISCOVER/OFFER and REQUEST/ACK exchanges over UDP
//! - Short-lived offer reservations and longer bound leases, kept in memory
//! - Lazy expiry on lookup plus a periodic sweep
//! - Optional strict REQUEST validation
//! - Async/await with Tokio
//!
//! ## Quick Start
//!
//! ```no_run
//! use bridgelease::{Config, DhcpServer};
//!
//! #[tokio::main]
//! async fn main() -> bridgelease::Result<()> {
//!     let config = Config::load_or_create("config.json")?;
//!     let server = DhcpServer::bind(config)?;
//!     let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//!     server.run(shutdown_rx).await
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`Config`] - Server configuration (address range, lease duration, DNS, etc.)
//! - [`DhcpServer`] - UDP transport loop listening on port 67
//! - [`ProtocolHandler`] - Turns requests into OFFER and ACK replies
//! - [`Leases`] - Thread-safe in-memory lease pool
//! - [`DhcpMessage`] / [`Reply`] - Packet decoding and reply encoding
//! - [`DhcpOption`] - DHCP option types per RFC 2132

pub mod config;
pub mod error;
pub mod handler;
pub mod lease;
pub mod options;
pub mod packet;
pub mod server;

pub use config::{Config, Subnet};
pub use error::{Error, Result};
pub use handler::ProtocolHandler;
pub use lease::{Lease, LeaseState, Leases};
pub use options::{DhcpOption, MessageType};
pub use packet::{DhcpMessage, MacAddress, Reply};
pub use server::DhcpServer;
