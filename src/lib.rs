//! rust-vici: async client for the strongSwan VICI protocol
//!
//! This crate talks to the charon daemon's VICI (Versatile IKE
//! Configuration Interface) management socket: loading connections, keys
//! and certificates, controlling IKE and CHILD security associations,
//! querying daemon state, and consuming asynchronous event notifications.
//!
//! # Architecture
//!
//! ```text
//! caller ──> Session ──> command channel ──> Transport #1 ──> charon
//!                                                               │
//! consumer <── event queue <── reader loop <── Transport #2 <───┘
//! ```
//!
//! A [`Session`] opens two connections to the daemon socket. Commands are
//! serialized on the first behind a fair mutex; registered events arrive
//! independently on the second, so streamed commands and event delivery
//! never stall each other.
//!
//! # Quick Start
//!
//! ```no_run
//! use rust_vici::{Message, Session};
//!
//! # async fn example() -> Result<(), rust_vici::Error> {
//! let session = Session::connect("/var/run/charon.vici").await?;
//!
//! let version = session.version().await?;
//! println!("daemon: {:?}", version.get_str("daemon"));
//!
//! session.subscribe(&["ike-updown"]).await?;
//! let event = session.next_event().await?;
//! println!("event {}: {:?}", event.name, event.message);
//!
//! for sa in session.list_sas(Message::new()).await? {
//!     println!("sa: {sa:?}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`message`]: the recursive key/value tree and its binary codec
//! - [`packet`]: packet types and their payload layout
//! - [`transport`]: length-prefixed framing over a stream socket
//! - [`session`]: the command channel, event listener, and client handle
//! - [`error`]: error taxonomy and recoverability classification

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

mod commands;
pub mod error;
pub mod message;
pub mod packet;
pub mod session;
pub mod transport;

// Re-export commonly used types at the crate root
pub use error::{Error, Result};
pub use message::{Message, Value};
pub use packet::{Packet, PacketType};
pub use session::{Event, Session, SessionConfig, DEFAULT_SOCKET_PATH};
pub use transport::{Transport, MAX_PACKET_LEN};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
