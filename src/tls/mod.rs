//! TLS 1.3 core: wire codecs, key schedule, and the handshake engine.
//!
//! The engine produces and consumes raw handshake messages and derives
//! traffic secrets; it never touches records or sockets. The record
//! layer in [`crate::record`] frames engine output into TLSPlaintext /
//! TLSCiphertext and feeds reassembled messages back in.

pub mod alert;
pub mod cipher;
pub mod extensions;
pub mod handshake;
pub mod key_schedule;
pub mod keylog;
pub mod messages;
pub mod ticket;
pub mod transcript;

pub use alert::AlertDescription;
pub use cipher::{CipherSuite, HashAlg, NamedGroup, SignatureScheme};
pub use handshake::{Role, ServerTlsConfig, TlsConfig, TlsEngine};
pub use keylog::{KeyLog, NoKeyLog};
pub use ticket::Ticket;

use crate::error::Error;
use key_schedule::Secret;

/// A contiguous period during which one (key, IV) pair protects one
/// direction of the connection. Sequence numbers restart at every
/// epoch change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Epoch {
    /// Unprotected records (first flights).
    Plaintext,
    /// 0-RTT early data under the client early traffic secret.
    EarlyData,
    /// Handshake traffic keys.
    Handshake,
    /// Application traffic keys, including post-KeyUpdate generations.
    Application,
}

/// Traffic secrets handed from the engine to the record layer.
///
/// Either side may be absent: early-data keys exist only in the
/// client→server direction, and a KeyUpdate replaces one direction at a
/// time. The suite rides along because early-data keys are derived
/// before the record layer learns the negotiated suite.
pub struct DerivedSecrets {
    pub epoch: Epoch,
    pub suite: cipher::CipherSuite,
    pub send: Option<Secret>,
    pub recv: Option<Secret>,
}

/// The handshake-driving interface the record layer consumes.
pub trait TlsSession {
    /// Process one or more complete handshake messages received at `epoch`.
    fn read_handshake(&mut self, epoch: Epoch, data: &[u8]) -> Result<(), Error>;

    /// Write pending outgoing handshake bytes into `buf`.
    ///
    /// Returns `(bytes_written, epoch)`; `(0, _)` when nothing is pending.
    fn write_handshake(&mut self, buf: &mut [u8]) -> Result<(usize, Epoch), Error>;

    /// Pull the next batch of traffic secrets derived since the last call.
    fn derived_secrets(&mut self) -> Option<DerivedSecrets>;

    /// Whether the handshake has completed on this side.
    fn is_complete(&self) -> bool;

    /// Negotiated ALPN protocol, if any.
    fn alpn(&self) -> Option<&[u8]>;
}
