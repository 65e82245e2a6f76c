//! Running transcript hash over handshake messages.
//!
//! The hash function is only fixed once a cipher suite is negotiated, so
//! the transcript starts out buffering raw bytes and replays them into
//! the right hasher on [`TranscriptHash::select`]. Intermediate hashes
//! are taken by cloning the state, never by rewinding — the PSK binder
//! computation relies on clone-plus-extend.
//!
//! After HelloRetryRequest the first ClientHello is replaced by a
//! synthetic `message_hash` handshake message
//! ([`TranscriptHash::retry_substitute`], RFC 8446 §4.4.1).

use crate::error::{Error, ResourceError};
use crate::tls::cipher::{HashAlg, MAX_HASH_LEN};
use crate::tls::messages::HandshakeType;
use sha2::{Digest as _, Sha256, Sha384};

/// A finalized transcript hash value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Digest {
    bytes: [u8; MAX_HASH_LEN],
    len: usize,
}

impl Digest {
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[derive(Clone)]
enum State {
    /// Hash not chosen yet; raw handshake bytes accumulate.
    Buffering(heapless::Vec<u8, 2048>),
    Sha256(Sha256),
    Sha384(Sha384),
}

/// Rolling transcript hash.
#[derive(Clone)]
pub struct TranscriptHash {
    state: State,
}

impl Default for TranscriptHash {
    fn default() -> Self {
        Self::new()
    }
}

impl TranscriptHash {
    /// Start buffering; the hash is chosen later via [`select`](Self::select).
    pub fn new() -> Self {
        Self {
            state: State::Buffering(heapless::Vec::new()),
        }
    }

    /// Start with a known hash (resumption knows it from the ticket).
    pub fn new_with(alg: HashAlg) -> Self {
        Self {
            state: match alg {
                HashAlg::Sha256 => State::Sha256(Sha256::new()),
                HashAlg::Sha384 => State::Sha384(Sha384::new()),
            },
        }
    }

    /// The selected hash, if any.
    pub fn alg(&self) -> Option<HashAlg> {
        match &self.state {
            State::Buffering(_) => None,
            State::Sha256(_) => Some(HashAlg::Sha256),
            State::Sha384(_) => Some(HashAlg::Sha384),
        }
    }

    /// Feed handshake message bytes in wire order.
    pub fn update(&mut self, message: &[u8]) -> Result<(), Error> {
        match &mut self.state {
            State::Buffering(buf) => buf
                .extend_from_slice(message)
                .map_err(|_| ResourceError::BufferExhausted.into()),
            State::Sha256(h) => {
                h.update(message);
                Ok(())
            }
            State::Sha384(h) => {
                h.update(message);
                Ok(())
            }
        }
    }

    /// Fix the hash algorithm, replaying any buffered bytes.
    pub fn select(&mut self, alg: HashAlg) {
        if let State::Buffering(buf) = &self.state {
            let mut fresh = Self::new_with(alg);
            match &mut fresh.state {
                State::Sha256(h) => h.update(buf.as_slice()),
                State::Sha384(h) => h.update(buf.as_slice()),
                State::Buffering(_) => unreachable!(),
            }
            self.state = fresh.state;
        }
    }

    /// Current hash of everything fed so far. The algorithm must have
    /// been selected.
    pub fn current_hash(&self) -> Result<Digest, Error> {
        match &self.state {
            State::Buffering(_) => Err(Error::InvalidState),
            _ => Ok(self.hash_with(self.alg().ok_or(Error::InvalidState)?, &[])),
        }
    }

    /// Hash of (everything fed so far || `extra`) under `alg`, without
    /// touching this transcript. This is the clone-plus-extend primitive
    /// behind PSK binders over a truncated ClientHello.
    pub fn hash_with(&self, alg: HashAlg, extra: &[u8]) -> Digest {
        let mut bytes = [0u8; MAX_HASH_LEN];
        let len = match (&self.state, alg) {
            (State::Buffering(buf), HashAlg::Sha256) => {
                let mut h = Sha256::new();
                h.update(buf.as_slice());
                h.update(extra);
                bytes[..32].copy_from_slice(&h.finalize());
                32
            }
            (State::Buffering(buf), HashAlg::Sha384) => {
                let mut h = Sha384::new();
                h.update(buf.as_slice());
                h.update(extra);
                bytes[..48].copy_from_slice(&h.finalize());
                48
            }
            (State::Sha256(h), HashAlg::Sha256) => {
                let mut h = h.clone();
                h.update(extra);
                let d = h.finalize();
                bytes[..32].copy_from_slice(&d);
                32
            }
            (State::Sha384(h), HashAlg::Sha384) => {
                let mut h = h.clone();
                h.update(extra);
                let d = h.finalize();
                bytes[..48].copy_from_slice(&d);
                48
            }
            // Asking for a different hash than the one in progress is a
            // caller bug; fall back to hashing nothing.
            _ => 0,
        };
        Digest { bytes, len }
    }

    /// Apply the HelloRetryRequest substitution: replace the transcript
    /// contents with `message_hash(Hash(ClientHello1))`.
    ///
    /// Must be called after feeding ClientHello1 and before feeding the
    /// HelloRetryRequest itself.
    pub fn retry_substitute(&mut self, alg: HashAlg) -> Result<(), Error> {
        let ch1_hash = self.hash_with(alg, &[]);

        let mut fresh = Self::new_with(alg);
        let header = [
            HandshakeType::MessageHash as u8,
            0,
            0,
            ch1_hash.len() as u8,
        ];
        fresh.update(&header)?;
        fresh.update(ch1_hash.as_slice())?;
        self.state = fresh.state;
        Ok(())
    }
}
