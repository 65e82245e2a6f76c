//! TLS record layer (RFC 8446 §5).
//!
//! Sans-I/O: the caller moves bytes between a socket and
//! [`TlsConnection`] with `feed_data` / `poll_output`, and reacts to
//! [`TlsEvent`]s. [`TlsClient`] and [`TlsServer`] are thin role
//! wrappers around the same connection object.

pub mod codec;
pub mod connection;

pub mod client;
pub mod server;

pub use client::TlsClient;
pub use connection::{TlsConnection, TlsEvent};
pub use server::TlsServer;
