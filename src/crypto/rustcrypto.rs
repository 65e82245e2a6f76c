//! RustCrypto-backed implementations of the crypto provider traits.

use crate::crypto::{Aead as AeadTrait, Hkdf as HkdfTrait};
use crate::error::{CryptoError, Error};

// ---- HKDF ----

/// HKDF using SHA-256 (via the `hkdf` crate).
#[derive(Default, Clone, Copy)]
pub struct HkdfSha256;

impl HkdfTrait for HkdfSha256 {
    const HASH_LEN: usize = 32;

    fn extract(&self, salt: &[u8], ikm: &[u8], prk: &mut [u8]) {
        let (out, _) = hkdf::Hkdf::<sha2::Sha256>::extract(Some(salt), ikm);
        prk[..32].copy_from_slice(&out);
    }

    fn expand(&self, prk: &[u8], info: &[u8], okm: &mut [u8]) -> Result<(), Error> {
        let hk = hkdf::Hkdf::<sha2::Sha256>::from_prk(prk)
            .map_err(|_| Error::Crypto(CryptoError::HkdfFailure))?;
        hk.expand(info, okm)
            .map_err(|_| Error::Crypto(CryptoError::HkdfFailure))
    }
}

/// HKDF using SHA-384.
#[derive(Default, Clone, Copy)]
pub struct HkdfSha384;

impl HkdfTrait for HkdfSha384 {
    const HASH_LEN: usize = 48;

    fn extract(&self, salt: &[u8], ikm: &[u8], prk: &mut [u8]) {
        let (out, _) = hkdf::Hkdf::<sha2::Sha384>::extract(Some(salt), ikm);
        prk[..48].copy_from_slice(&out);
    }

    fn expand(&self, prk: &[u8], info: &[u8], okm: &mut [u8]) -> Result<(), Error> {
        let hk = hkdf::Hkdf::<sha2::Sha384>::from_prk(prk)
            .map_err(|_| Error::Crypto(CryptoError::HkdfFailure))?;
        hk.expand(info, okm)
            .map_err(|_| Error::Crypto(CryptoError::HkdfFailure))
    }
}

// ---- AEAD ----

macro_rules! rustcrypto_aead {
    ($name:ident, $cipher:ty, $key_len:expr) => {
        pub struct $name {
            cipher: $cipher,
        }

        impl $name {
            pub fn new(key: &[u8]) -> Result<Self, Error> {
                use aes_gcm::KeyInit;
                if key.len() != $key_len {
                    return Err(Error::InvalidState);
                }
                let cipher = <$cipher>::new_from_slice(key).map_err(|_| Error::InvalidState)?;
                Ok(Self { cipher })
            }
        }

        impl AeadTrait for $name {
            const KEY_LEN: usize = $key_len;

            fn seal_in_place(
                &self,
                nonce: &[u8],
                aad: &[u8],
                buf: &mut [u8],
                payload_len: usize,
            ) -> Result<usize, Error> {
                use aes_gcm::aead::AeadInPlace;

                if nonce.len() != Self::NONCE_LEN {
                    return Err(Error::InvalidState);
                }
                let total = payload_len + Self::TAG_LEN;
                if buf.len() < total {
                    return Err(Error::BufferTooSmall { needed: total });
                }

                let nonce = aes_gcm::Nonce::from_slice(nonce);
                let tag = self
                    .cipher
                    .encrypt_in_place_detached(nonce, aad, &mut buf[..payload_len])
                    .map_err(|_| Error::InvalidState)?;
                buf[payload_len..total].copy_from_slice(&tag);
                Ok(total)
            }

            fn open_in_place(
                &self,
                nonce: &[u8],
                aad: &[u8],
                buf: &mut [u8],
                ciphertext_len: usize,
            ) -> Result<usize, Error> {
                use aes_gcm::aead::AeadInPlace;

                if nonce.len() != Self::NONCE_LEN || ciphertext_len < Self::TAG_LEN {
                    return Err(Error::Crypto(CryptoError::AeadOpenFailure));
                }
                if buf.len() < ciphertext_len {
                    return Err(Error::BufferTooSmall {
                        needed: ciphertext_len,
                    });
                }

                let payload_len = ciphertext_len - Self::TAG_LEN;
                let mut tag = [0u8; 16];
                tag.copy_from_slice(&buf[payload_len..ciphertext_len]);
                let nonce = aes_gcm::Nonce::from_slice(nonce);
                self.cipher
                    .decrypt_in_place_detached(
                        nonce,
                        aad,
                        &mut buf[..payload_len],
                        aes_gcm::Tag::from_slice(&tag),
                    )
                    .map_err(|_| Error::Crypto(CryptoError::AeadOpenFailure))?;
                Ok(payload_len)
            }
        }
    };
}

rustcrypto_aead!(Aes128GcmAead, aes_gcm::Aes128Gcm, 16);
rustcrypto_aead!(Aes256GcmAead, aes_gcm::Aes256Gcm, 32);

/// ChaCha20-Poly1305 AEAD.
pub struct ChaCha20Poly1305Aead {
    cipher: chacha20poly1305::ChaCha20Poly1305,
}

impl ChaCha20Poly1305Aead {
    pub fn new(key: &[u8]) -> Result<Self, Error> {
        use chacha20poly1305::KeyInit;
        if key.len() != 32 {
            return Err(Error::InvalidState);
        }
        let cipher = chacha20poly1305::ChaCha20Poly1305::new_from_slice(key)
            .map_err(|_| Error::InvalidState)?;
        Ok(Self { cipher })
    }
}

impl AeadTrait for ChaCha20Poly1305Aead {
    const KEY_LEN: usize = 32;

    fn seal_in_place(
        &self,
        nonce: &[u8],
        aad: &[u8],
        buf: &mut [u8],
        payload_len: usize,
    ) -> Result<usize, Error> {
        use chacha20poly1305::aead::AeadInPlace;

        if nonce.len() != Self::NONCE_LEN {
            return Err(Error::InvalidState);
        }
        let total = payload_len + Self::TAG_LEN;
        if buf.len() < total {
            return Err(Error::BufferTooSmall { needed: total });
        }

        let nonce = chacha20poly1305::Nonce::from_slice(nonce);
        let tag = self
            .cipher
            .encrypt_in_place_detached(nonce, aad, &mut buf[..payload_len])
            .map_err(|_| Error::InvalidState)?;
        buf[payload_len..total].copy_from_slice(&tag);
        Ok(total)
    }

    fn open_in_place(
        &self,
        nonce: &[u8],
        aad: &[u8],
        buf: &mut [u8],
        ciphertext_len: usize,
    ) -> Result<usize, Error> {
        use chacha20poly1305::aead::AeadInPlace;

        if nonce.len() != Self::NONCE_LEN || ciphertext_len < Self::TAG_LEN {
            return Err(Error::Crypto(CryptoError::AeadOpenFailure));
        }
        if buf.len() < ciphertext_len {
            return Err(Error::BufferTooSmall {
                needed: ciphertext_len,
            });
        }

        let payload_len = ciphertext_len - Self::TAG_LEN;
        let mut tag = [0u8; 16];
        tag.copy_from_slice(&buf[payload_len..ciphertext_len]);
        let nonce = chacha20poly1305::Nonce::from_slice(nonce);
        self.cipher
            .decrypt_in_place_detached(
                nonce,
                aad,
                &mut buf[..payload_len],
                chacha20poly1305::Tag::from_slice(&tag),
            )
            .map_err(|_| Error::Crypto(CryptoError::AeadOpenFailure))?;
        Ok(payload_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn hkdf_sha256_extract_zeros() {
        // RFC 8448 §3: Extract(salt=0^32, ikm=0^32)
        let hkdf = HkdfSha256;
        let mut prk = [0u8; 32];
        hkdf.extract(&[0u8; 32], &[0u8; 32], &mut prk);
        assert_eq!(
            prk,
            hex!("33ad0a1c607ec03b09e6cd9893680ce210adf300aa1f2660e1b22e10f170f92a")
        );
    }

    #[test]
    fn hkdf_sha384_lengths() {
        let hkdf = HkdfSha384;
        let mut prk = [0u8; 48];
        hkdf.extract(&[0u8; 48], &[0u8; 48], &mut prk);
        assert_ne!(prk, [0u8; 48]);

        let mut okm = [0u8; 48];
        hkdf.expand(&prk, b"info", &mut okm).unwrap();
        assert_ne!(okm, [0u8; 48]);
    }

    fn seal_open_roundtrip<A: AeadTrait>(aead: &A) {
        let nonce = [0x11u8; 12];
        let aad = b"record header";
        let plaintext = b"attack at dawn";

        let mut buf = [0u8; 64];
        buf[..plaintext.len()].copy_from_slice(plaintext);
        let ct_len = aead
            .seal_in_place(&nonce, aad, &mut buf, plaintext.len())
            .unwrap();
        assert_eq!(ct_len, plaintext.len() + 16);

        let pt_len = aead.open_in_place(&nonce, aad, &mut buf, ct_len).unwrap();
        assert_eq!(&buf[..pt_len], plaintext);
    }

    fn flipped_bit_fails<A: AeadTrait>(aead: &A) {
        let nonce = [0x22u8; 12];
        let aad = b"aad";
        let plaintext = b"payload";

        let mut buf = [0u8; 64];
        buf[..plaintext.len()].copy_from_slice(plaintext);
        let ct_len = aead
            .seal_in_place(&nonce, aad, &mut buf, plaintext.len())
            .unwrap();

        // Flip one bit in the ciphertext.
        buf[0] ^= 0x01;
        assert_eq!(
            aead.open_in_place(&nonce, aad, &mut buf, ct_len),
            Err(Error::Crypto(CryptoError::AeadOpenFailure))
        );

        // Restore and flip the AAD instead.
        buf[0] ^= 0x01;
        assert_eq!(
            aead.open_in_place(&nonce, b"axd", &mut buf, ct_len),
            Err(Error::Crypto(CryptoError::AeadOpenFailure))
        );
    }

    #[test]
    fn aes128_roundtrip_and_tamper() {
        let aead = Aes128GcmAead::new(&[0x42u8; 16]).unwrap();
        seal_open_roundtrip(&aead);
        flipped_bit_fails(&aead);
    }

    #[test]
    fn aes256_roundtrip_and_tamper() {
        let aead = Aes256GcmAead::new(&[0x42u8; 32]).unwrap();
        seal_open_roundtrip(&aead);
        flipped_bit_fails(&aead);
    }

    #[test]
    fn chacha_roundtrip_and_tamper() {
        let aead = ChaCha20Poly1305Aead::new(&[0x42u8; 32]).unwrap();
        seal_open_roundtrip(&aead);
        flipped_bit_fails(&aead);
    }

    #[test]
    fn wrong_key_length_rejected() {
        assert!(Aes128GcmAead::new(&[0u8; 32]).is_err());
        assert!(Aes256GcmAead::new(&[0u8; 16]).is_err());
        assert!(ChaCha20Poly1305Aead::new(&[0u8; 16]).is_err());
    }
}
