//! Client for the strongSwan VICI control protocol.
//!
//! VICI messages are trees of named sections, lists and key/value pairs
//! carried in length-prefixed packets over a UNIX socket. This crate builds
//! request messages ([`RequestBuilder`]), parses responses and event
//! streams into [`Section`] trees ([`TreeStreamParser`]), and drives the IKE
//! daemon's connection lifecycle through [`IkeClient`].
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use vici::{IkeClient, IkeConnection, Proposal};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut client = IkeClient::connect(vici::DEFAULT_SOCKET_PATH)?;
//!
//! let mut conn = IkeConnection::new(
//!     "gw",
//!     Proposal::new("aes128", "sha256", "modp2048"),
//!     Proposal::new("aes128", "sha256", ""),
//! );
//! conn.remote_addrs.push("198.51.100.1".to_string());
//! client.create_connection(&conn)?;
//! client.start_connection("gw", Duration::from_secs(10))?;
//!
//! let stats = client.get_connection_stats("gw")?;
//! println!("established {}s, {} bytes in", stats.ike.established, stats.child.bytes_in);
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod client;
pub mod parser;
pub mod transport;
pub mod tree;
mod types;
pub mod wire;

pub use builder::{Request, RequestBuilder};
pub use client::IkeClient;
pub use parser::{ParseStatus, ParserState, TreeStreamParser, parse_message};
pub use transport::{Transport, UnixTransport};
pub use tree::{Node, Section};
pub use types::*;
pub use wire::{DEFAULT_SOCKET_PATH, Packet, PacketType};
