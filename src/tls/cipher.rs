//! Negotiated-parameter bindings: cipher suites, named groups and
//! signature schemes, plus runtime AEAD/HKDF dispatch for the suite the
//! peer picked.
//!
//! GREASE and forward compatibility require that unknown codepoints
//! decode to an `Unknown` arm instead of failing; only the codec for
//! strictly-bounded enums (like ContentType) rejects.

use crate::crypto::rustcrypto::{
    Aes128GcmAead, Aes256GcmAead, ChaCha20Poly1305Aead, HkdfSha256, HkdfSha384,
};
use crate::crypto::{Aead, Hkdf};
use crate::error::Error;

/// Largest hash output across supported suites (SHA-384).
pub const MAX_HASH_LEN: usize = 48;

/// AEAD tag length, fixed across all TLS 1.3 suites.
pub const TAG_LEN: usize = 16;

/// Hash function bound to a cipher suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlg {
    Sha256,
    Sha384,
}

impl HashAlg {
    pub fn output_len(self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Sha384 => 48,
        }
    }

    /// One-shot hash of `data` into `out`; returns the digest length.
    pub fn hash(self, data: &[u8], out: &mut [u8; MAX_HASH_LEN]) -> usize {
        use sha2::Digest;
        match self {
            Self::Sha256 => {
                let d = sha2::Sha256::digest(data);
                out[..32].copy_from_slice(&d);
                32
            }
            Self::Sha384 => {
                let d = sha2::Sha384::digest(data);
                out[..48].copy_from_slice(&d);
                48
            }
        }
    }
}

/// TLS 1.3 cipher suites this crate negotiates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherSuite {
    Aes128GcmSha256,
    Aes256GcmSha384,
    ChaCha20Poly1305Sha256,
}

/// All suites in default preference order.
pub const ALL_SUITES: &[CipherSuite] = &[
    CipherSuite::Aes128GcmSha256,
    CipherSuite::Aes256GcmSha384,
    CipherSuite::ChaCha20Poly1305Sha256,
];

impl CipherSuite {
    pub fn to_u16(self) -> u16 {
        match self {
            Self::Aes128GcmSha256 => 0x1301,
            Self::Aes256GcmSha384 => 0x1302,
            Self::ChaCha20Poly1305Sha256 => 0x1303,
        }
    }

    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            0x1301 => Some(Self::Aes128GcmSha256),
            0x1302 => Some(Self::Aes256GcmSha384),
            0x1303 => Some(Self::ChaCha20Poly1305Sha256),
            _ => None,
        }
    }

    pub fn hash(self) -> HashAlg {
        match self {
            Self::Aes256GcmSha384 => HashAlg::Sha384,
            _ => HashAlg::Sha256,
        }
    }

    pub fn key_len(self) -> usize {
        match self {
            Self::Aes128GcmSha256 => 16,
            _ => 32,
        }
    }

    pub fn iv_len(self) -> usize {
        12
    }

    pub fn hash_len(self) -> usize {
        self.hash().output_len()
    }
}

/// Named groups (RFC 8446 §4.2.7). X25519 and P-256 are implemented;
/// the rest are recognized so peer offers decode cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamedGroup {
    X25519,
    Secp256r1,
    Secp384r1,
    Secp521r1,
    X448,
    Ffdhe2048,
    Ffdhe3072,
    Ffdhe4096,
    Ffdhe6144,
    Ffdhe8192,
    Unknown(u16),
}

impl NamedGroup {
    pub fn to_u16(self) -> u16 {
        match self {
            Self::Secp256r1 => 0x0017,
            Self::Secp384r1 => 0x0018,
            Self::Secp521r1 => 0x0019,
            Self::X25519 => 0x001d,
            Self::X448 => 0x001e,
            Self::Ffdhe2048 => 0x0100,
            Self::Ffdhe3072 => 0x0101,
            Self::Ffdhe4096 => 0x0102,
            Self::Ffdhe6144 => 0x0103,
            Self::Ffdhe8192 => 0x0104,
            Self::Unknown(v) => v,
        }
    }

    pub fn from_u16(v: u16) -> Self {
        match v {
            0x0017 => Self::Secp256r1,
            0x0018 => Self::Secp384r1,
            0x0019 => Self::Secp521r1,
            0x001d => Self::X25519,
            0x001e => Self::X448,
            0x0100 => Self::Ffdhe2048,
            0x0101 => Self::Ffdhe3072,
            0x0102 => Self::Ffdhe4096,
            0x0103 => Self::Ffdhe6144,
            0x0104 => Self::Ffdhe8192,
            other => Self::Unknown(other),
        }
    }

    /// Whether this crate can actually run the key exchange.
    pub fn is_supported(self) -> bool {
        matches!(self, Self::X25519 | Self::Secp256r1)
    }
}

/// Signature schemes (RFC 8446 §4.2.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureScheme {
    RsaPssRsaeSha256,
    RsaPssRsaeSha384,
    RsaPssRsaeSha512,
    EcdsaSecp256r1Sha256,
    EcdsaSecp384r1Sha384,
    Ed25519,
    Unknown(u16),
}

impl SignatureScheme {
    pub fn to_u16(self) -> u16 {
        match self {
            Self::EcdsaSecp256r1Sha256 => 0x0403,
            Self::EcdsaSecp384r1Sha384 => 0x0503,
            Self::RsaPssRsaeSha256 => 0x0804,
            Self::RsaPssRsaeSha384 => 0x0805,
            Self::RsaPssRsaeSha512 => 0x0806,
            Self::Ed25519 => 0x0807,
            Self::Unknown(v) => v,
        }
    }

    pub fn from_u16(v: u16) -> Self {
        match v {
            0x0403 => Self::EcdsaSecp256r1Sha256,
            0x0503 => Self::EcdsaSecp384r1Sha384,
            0x0804 => Self::RsaPssRsaeSha256,
            0x0805 => Self::RsaPssRsaeSha384,
            0x0806 => Self::RsaPssRsaeSha512,
            0x0807 => Self::Ed25519,
            other => Self::Unknown(other),
        }
    }
}

/// Schemes offered in ClientHello signature_algorithms.
pub const DEFAULT_SIGNATURE_SCHEMES: &[SignatureScheme] = &[
    SignatureScheme::Ed25519,
    SignatureScheme::EcdsaSecp256r1Sha256,
    SignatureScheme::EcdsaSecp384r1Sha384,
    SignatureScheme::RsaPssRsaeSha256,
    SignatureScheme::RsaPssRsaeSha384,
    SignatureScheme::RsaPssRsaeSha512,
];

/// Record-protection AEAD for the negotiated suite.
///
/// A closed tagged union, dispatched by match — one variant per suite.
pub enum SuiteAead {
    Aes128Gcm(Aes128GcmAead),
    Aes256Gcm(Aes256GcmAead),
    ChaCha20Poly1305(ChaCha20Poly1305Aead),
}

impl SuiteAead {
    pub fn new(suite: CipherSuite, key: &[u8]) -> Result<Self, Error> {
        Ok(match suite {
            CipherSuite::Aes128GcmSha256 => Self::Aes128Gcm(Aes128GcmAead::new(key)?),
            CipherSuite::Aes256GcmSha384 => Self::Aes256Gcm(Aes256GcmAead::new(key)?),
            CipherSuite::ChaCha20Poly1305Sha256 => {
                Self::ChaCha20Poly1305(ChaCha20Poly1305Aead::new(key)?)
            }
        })
    }

    pub fn seal_in_place(
        &self,
        nonce: &[u8],
        aad: &[u8],
        buf: &mut [u8],
        payload_len: usize,
    ) -> Result<usize, Error> {
        match self {
            Self::Aes128Gcm(a) => a.seal_in_place(nonce, aad, buf, payload_len),
            Self::Aes256Gcm(a) => a.seal_in_place(nonce, aad, buf, payload_len),
            Self::ChaCha20Poly1305(a) => a.seal_in_place(nonce, aad, buf, payload_len),
        }
    }

    pub fn open_in_place(
        &self,
        nonce: &[u8],
        aad: &[u8],
        buf: &mut [u8],
        ciphertext_len: usize,
    ) -> Result<usize, Error> {
        match self {
            Self::Aes128Gcm(a) => a.open_in_place(nonce, aad, buf, ciphertext_len),
            Self::Aes256Gcm(a) => a.open_in_place(nonce, aad, buf, ciphertext_len),
            Self::ChaCha20Poly1305(a) => a.open_in_place(nonce, aad, buf, ciphertext_len),
        }
    }
}

/// HKDF over the negotiated hash.
#[derive(Debug, Clone, Copy)]
pub struct SuiteHkdf {
    alg: HashAlg,
}

impl SuiteHkdf {
    pub fn new(alg: HashAlg) -> Self {
        Self { alg }
    }

    pub fn alg(self) -> HashAlg {
        self.alg
    }

    pub fn hash_len(self) -> usize {
        self.alg.output_len()
    }

    /// HKDF-Extract into `prk`; returns the PRK length.
    pub fn extract(self, salt: &[u8], ikm: &[u8], prk: &mut [u8; MAX_HASH_LEN]) -> usize {
        match self.alg {
            HashAlg::Sha256 => {
                HkdfSha256.extract(salt, ikm, &mut prk[..32]);
                32
            }
            HashAlg::Sha384 => {
                HkdfSha384.extract(salt, ikm, &mut prk[..48]);
                48
            }
        }
    }

    pub fn expand(self, prk: &[u8], info: &[u8], okm: &mut [u8]) -> Result<(), Error> {
        match self.alg {
            HashAlg::Sha256 => HkdfSha256.expand(prk, info, okm),
            HashAlg::Sha384 => HkdfSha384.expand(prk, info, okm),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suite_codepoints() {
        assert_eq!(CipherSuite::Aes128GcmSha256.to_u16(), 0x1301);
        assert_eq!(CipherSuite::Aes256GcmSha384.to_u16(), 0x1302);
        assert_eq!(CipherSuite::ChaCha20Poly1305Sha256.to_u16(), 0x1303);
        for &s in ALL_SUITES {
            assert_eq!(CipherSuite::from_u16(s.to_u16()), Some(s));
        }
        assert_eq!(CipherSuite::from_u16(0x1304), None);
    }

    #[test]
    fn suite_bindings() {
        assert_eq!(CipherSuite::Aes128GcmSha256.key_len(), 16);
        assert_eq!(CipherSuite::Aes128GcmSha256.hash_len(), 32);
        assert_eq!(CipherSuite::Aes256GcmSha384.key_len(), 32);
        assert_eq!(CipherSuite::Aes256GcmSha384.hash_len(), 48);
        assert_eq!(CipherSuite::ChaCha20Poly1305Sha256.key_len(), 32);
        assert_eq!(CipherSuite::ChaCha20Poly1305Sha256.hash_len(), 32);
    }

    #[test]
    fn named_group_unknown_fallback() {
        assert_eq!(NamedGroup::from_u16(0x001d), NamedGroup::X25519);
        assert_eq!(NamedGroup::from_u16(0x0017), NamedGroup::Secp256r1);
        // GREASE value must not fail.
        let g = NamedGroup::from_u16(0x0a0a);
        assert_eq!(g, NamedGroup::Unknown(0x0a0a));
        assert_eq!(g.to_u16(), 0x0a0a);
        assert!(!g.is_supported());
    }

    #[test]
    fn signature_scheme_unknown_fallback() {
        assert_eq!(SignatureScheme::from_u16(0x0807), SignatureScheme::Ed25519);
        let s = SignatureScheme::from_u16(0xfe0d);
        assert_eq!(s, SignatureScheme::Unknown(0xfe0d));
        assert_eq!(s.to_u16(), 0xfe0d);
    }

    #[test]
    fn suite_aead_dispatch_roundtrip() {
        for &suite in ALL_SUITES {
            let key = [0x42u8; 32];
            let aead = SuiteAead::new(suite, &key[..suite.key_len()]).unwrap();
            let nonce = [0x01u8; 12];
            let mut buf = [0u8; 64];
            buf[..5].copy_from_slice(b"hello");
            let ct = aead.seal_in_place(&nonce, b"aad", &mut buf, 5).unwrap();
            let pt = aead.open_in_place(&nonce, b"aad", &mut buf, ct).unwrap();
            assert_eq!(&buf[..pt], b"hello");
        }
    }

    #[test]
    fn suite_hkdf_lengths() {
        let mut prk = [0u8; MAX_HASH_LEN];
        let h = SuiteHkdf::new(HashAlg::Sha256);
        assert_eq!(h.extract(&[0u8; 32], &[0u8; 32], &mut prk), 32);
        let h = SuiteHkdf::new(HashAlg::Sha384);
        assert_eq!(h.extract(&[0u8; 48], &[0u8; 48], &mut prk), 48);
    }

    #[test]
    fn hash_one_shot() {
        use hex_literal::hex;
        let mut out = [0u8; MAX_HASH_LEN];
        let n = HashAlg::Sha256.hash(b"", &mut out);
        assert_eq!(n, 32);
        assert_eq!(
            &out[..32],
            hex!("e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855")
        );
    }
}
