//! Broadcast relay for a small publish/subscribe TCP transport.
//!
//! Peers that cannot reach each other over multicast connect to one relay
//! process. Every publish frame a peer sends is forwarded to every other
//! connected peer, in the order the relay decoded it.
//!
//! - [`protocol`] defines the handshake bytes and publish framing.
//! - [`connection`] owns one accepted socket: its serialized write path and
//!   the decode loop that drives relaying from that peer's task.
//! - [`registry`] is the locked set of live connections.
//! - [`relay`] fans a message out to every registry member but its origin.
//! - [`acceptor`] binds the listening port, greets and registers new sockets.
//! - [`stats`] keeps throughput counters and the periodic reporter.
//! - [`client`] is the peer side, used by the CLI and the integration tests.
//! - [`cli`] parses the `serve`, `publish` and `listen` subcommands.

pub mod acceptor;
pub mod cli;
pub mod client;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod stats;

pub use acceptor::Acceptor;
pub use client::RelayClient;
pub use error::{RelayError, Result};
pub use protocol::Message;
pub use relay::Relay;
