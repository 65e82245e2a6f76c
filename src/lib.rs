#![cfg_attr(not(feature = "std"), no_std)]
#![forbid(unsafe_code)]

//! Sans-I/O TLS 1.3 (RFC 8446) endpoint core.
//!
//! Three layers, leaves first:
//!
//! - [`codec`]: big-endian integers, length-prefixed vectors, QUIC
//!   varints.
//! - [`tls`]: handshake message and extension codecs, the transcript
//!   hash, the HKDF key schedule, session tickets, and the client and
//!   server state machines.
//! - [`record`]: TLSPlaintext/TLSCiphertext framing and the sans-I/O
//!   [`TlsConnection`] driven with `feed_data` / `poll_output`.
//!
//! The crate owns no sockets, spawns no threads, and reads no clocks;
//! randomness and timestamps come in through the configs. Cryptographic
//! primitives are provided by the RustCrypto crates behind the traits
//! in [`crypto`].

#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod codec;
pub mod error;

pub mod crypto;
pub mod tls;

pub mod record;

pub use error::Error;
pub use record::{TlsClient, TlsConnection, TlsEvent, TlsServer};
pub use tls::handshake::{
    CertValidator, EarlyDataState, Role, ServerTlsConfig, TlsConfig, TlsEngine,
};
pub use tls::{AlertDescription, CipherSuite, KeyLog, NamedGroup, SignatureScheme, Ticket};
