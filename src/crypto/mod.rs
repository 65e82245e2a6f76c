//! Cryptographic provider traits and bundled implementations.
//!
//! The TLS core needs AEAD record protection, HKDF for the key schedule,
//! and signature operations for CertificateVerify. The traits here define
//! those collaborators; `rustcrypto` provides software implementations
//! backed by the RustCrypto crates. Raw primitives (block ciphers, curves,
//! hashes) are never implemented in this crate.

pub mod ecdsa_p256;
pub mod ed25519;
pub mod rustcrypto;

use crate::error::Error;

/// Authenticated Encryption with Associated Data.
///
/// TLS 1.3 mandates AES-128-GCM; AES-256-GCM and ChaCha20-Poly1305 are
/// the other suites this crate negotiates. All three use 12-byte nonces
/// and 16-byte tags.
pub trait Aead {
    /// Key length in bytes.
    const KEY_LEN: usize;
    /// Nonce length in bytes (always 12 in TLS 1.3).
    const NONCE_LEN: usize = 12;
    /// Authentication tag length in bytes (always 16 in TLS 1.3).
    const TAG_LEN: usize = 16;

    /// Encrypt in place.
    ///
    /// `buf[..payload_len]` contains the plaintext. The buffer must have
    /// room for the authentication tag (`buf.len() >= payload_len + TAG_LEN`).
    ///
    /// Returns the total length of ciphertext + tag.
    fn seal_in_place(
        &self,
        nonce: &[u8],
        aad: &[u8],
        buf: &mut [u8],
        payload_len: usize,
    ) -> Result<usize, Error>;

    /// Decrypt in place.
    ///
    /// `buf[..ciphertext_len]` contains ciphertext + authentication tag.
    ///
    /// Returns the plaintext length on success.
    fn open_in_place(
        &self,
        nonce: &[u8],
        aad: &[u8],
        buf: &mut [u8],
        ciphertext_len: usize,
    ) -> Result<usize, Error>;
}

/// HMAC-based Key Derivation Function (RFC 5869).
///
/// The entire RFC 8446 §7.1 key schedule is built from Extract and
/// Expand. HMAC itself is obtained as `Extract(salt=key, ikm=message)`,
/// which is HMAC by construction.
pub trait Hkdf {
    /// Hash output length in bytes (32 for SHA-256, 48 for SHA-384).
    const HASH_LEN: usize;

    /// HKDF-Extract: derive a pseudorandom key from salt and input keying material.
    fn extract(&self, salt: &[u8], ikm: &[u8], prk: &mut [u8]);

    /// HKDF-Expand: expand a pseudorandom key with info into output keying material.
    fn expand(&self, prk: &[u8], info: &[u8], okm: &mut [u8]) -> Result<(), Error>;
}
