//! Ed25519 signing and verification for TLS 1.3 CertificateVerify.
//!
//! Covers the pieces the handshake needs: building the RFC 8446 §4.4.3
//! signed content, signing with a 32-byte seed, verifying against a
//! public key pulled out of a DER certificate, and constructing a
//! minimal DER certificate for tests and pinned-cert deployments.

use crate::error::{CryptoError, Error};

/// TLS 1.3 signature algorithm code for Ed25519.
pub const ED25519_ALGORITHM: u16 = 0x0807;

const SERVER_CONTEXT: &[u8] = b"TLS 1.3, server CertificateVerify";
const CLIENT_CONTEXT: &[u8] = b"TLS 1.3, client CertificateVerify";

/// Maximum signed-content size: 64 pad bytes + context (33) + 0x00 + 48-byte hash.
pub const MAX_CV_CONTENT: usize = 64 + 33 + 1 + 48;

/// Build the content covered by a CertificateVerify signature (RFC 8446 §4.4.3):
/// 64 bytes of 0x20, the role context string, a zero byte, and the
/// transcript hash up to and including the Certificate message.
pub fn build_cv_content(server: bool, transcript_hash: &[u8]) -> ([u8; MAX_CV_CONTENT], usize) {
    let context = if server { SERVER_CONTEXT } else { CLIENT_CONTEXT };
    let mut content = [0u8; MAX_CV_CONTENT];
    let mut off = 0;

    for b in content.iter_mut().take(64) {
        *b = 0x20;
    }
    off += 64;

    content[off..off + context.len()].copy_from_slice(context);
    off += context.len();

    content[off] = 0x00;
    off += 1;

    content[off..off + transcript_hash.len()].copy_from_slice(transcript_hash);
    off += transcript_hash.len();

    (content, off)
}

/// Sign CertificateVerify content with a 32-byte Ed25519 seed.
///
/// Returns the 64-byte signature.
pub fn sign_certificate_verify(
    seed: &[u8; 32],
    server: bool,
    transcript_hash: &[u8],
) -> Result<[u8; 64], Error> {
    use ed25519_dalek::{Signer, SigningKey};

    let signing_key = SigningKey::from_bytes(seed);
    let (content, content_len) = build_cv_content(server, transcript_hash);
    let signature = signing_key.sign(&content[..content_len]);
    Ok(signature.to_bytes())
}

/// Verify an Ed25519 CertificateVerify signature.
pub fn verify_certificate_verify(
    public_key: &[u8; 32],
    signature: &[u8],
    server: bool,
    transcript_hash: &[u8],
) -> Result<(), Error> {
    use ed25519_dalek::{Signature, Verifier, VerifyingKey};

    let verifying_key = VerifyingKey::from_bytes(public_key)
        .map_err(|_| Error::Crypto(CryptoError::SignatureInvalid))?;

    let sig_array: [u8; 64] = signature
        .try_into()
        .map_err(|_| Error::Crypto(CryptoError::SignatureInvalid))?;
    let signature = Signature::from_bytes(&sig_array);

    let (content, content_len) = build_cv_content(server, transcript_hash);
    verifying_key
        .verify(&content[..content_len], &signature)
        .map_err(|_| Error::Crypto(CryptoError::SignatureInvalid))
}

/// Extract an Ed25519 public key from a DER-encoded certificate.
///
/// Minimal ASN.1 scan: locate the Ed25519 OID (1.3.101.112), then the
/// following BIT STRING holding the 32-byte key. Full X.509 path
/// processing belongs to the caller's validator.
pub fn extract_ed25519_pubkey_from_cert(cert_der: &[u8]) -> Result<[u8; 32], Error> {
    // Ed25519 OID in DER: 06 03 2b 65 70
    let ed25519_oid: &[u8] = &[0x06, 0x03, 0x2b, 0x65, 0x70];

    let oid_pos = find_subsequence(cert_der, ed25519_oid)
        .ok_or(Error::Crypto(CryptoError::SignatureInvalid))?;
    let after_oid = oid_pos + ed25519_oid.len();

    // The SubjectPublicKeyInfo places the key in a BIT STRING:
    // tag 0x03, length 33 (one unused-bits byte + 32 key bytes).
    for i in after_oid..cert_der.len().saturating_sub(34) {
        if cert_der[i] == 0x03 && cert_der[i + 1] == 33 {
            if cert_der[i + 2] != 0x00 {
                return Err(Error::Crypto(CryptoError::SignatureInvalid));
            }
            let key_start = i + 3;
            let mut pubkey = [0u8; 32];
            pubkey.copy_from_slice(&cert_der[key_start..key_start + 32]);
            return Ok(pubkey);
        }
    }

    Err(Error::Crypto(CryptoError::SignatureInvalid))
}

/// Derive the Ed25519 public key from a 32-byte seed.
pub fn ed25519_public_key_from_seed(seed: &[u8; 32]) -> [u8; 32] {
    let signing_key = ed25519_dalek::SigningKey::from_bytes(seed);
    signing_key.verifying_key().to_bytes()
}

/// Build a minimal DER certificate carrying an Ed25519 public key.
///
/// The structure is just enough X.509 for CertificateVerify and
/// pinned-cert matching; the embedded certificate signature is a
/// placeholder, so it will not pass a real chain validator.
pub fn build_ed25519_cert_der(public_key: &[u8; 32], out: &mut [u8]) -> Result<usize, Error> {
    #[rustfmt::skip]
    let template: &[u8] = &[
        // SEQUENCE (Certificate)
        0x30, 0x81, 0xd4,
          // SEQUENCE (TBSCertificate)
          0x30, 0x81, 0x87,
            // [0] EXPLICIT INTEGER v3 (2)
            0xa0, 0x03, 0x02, 0x01, 0x02,
            // INTEGER serialNumber = 1
            0x02, 0x01, 0x01,
            // SEQUENCE (signature algorithm OID = Ed25519)
            0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70,
            // SEQUENCE (issuer: CN=milli-tls)
            0x30, 0x14,
              0x31, 0x12, 0x30, 0x10,
                0x06, 0x03, 0x55, 0x04, 0x03,   // OID 2.5.4.3 (CN)
                0x0c, 0x09,                     // UTF8String length 9
                b'm', b'i', b'l', b'l', b'i', b'-', b't', b'l', b's',
            // SEQUENCE (validity)
            0x30, 0x1e,
              0x17, 0x0d, b'2', b'5', b'0', b'1', b'0', b'1', b'0', b'0', b'0', b'0', b'0', b'0', b'Z',
              0x17, 0x0d, b'3', b'5', b'0', b'1', b'0', b'1', b'0', b'0', b'0', b'0', b'0', b'0', b'Z',
            // SEQUENCE (subject: CN=milli-tls)
            0x30, 0x14,
              0x31, 0x12, 0x30, 0x10,
                0x06, 0x03, 0x55, 0x04, 0x03,
                0x0c, 0x09,
                b'm', b'i', b'l', b'l', b'i', b'-', b't', b'l', b's',
            // SEQUENCE (SubjectPublicKeyInfo)
            0x30, 0x2a,
              0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70,
              // BIT STRING: unused-bits byte + 32-byte key placeholder
              0x03, 0x21, 0x00,
              0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
              0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
              0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
              0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
          // SEQUENCE (signatureAlgorithm = Ed25519)
          0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70,
          // BIT STRING (placeholder signature)
          0x03, 0x41, 0x00,
          0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
          0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
          0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
          0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
          0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
          0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
          0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
          0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    ];

    let total = template.len();
    if out.len() < total {
        return Err(Error::BufferTooSmall { needed: total });
    }
    out[..total].copy_from_slice(template);

    // The key sits right after the SPKI BIT STRING header (03 21 00).
    let pubkey_offset = find_subsequence(&out[..total], &[0x03, 0x21, 0x00])
        .ok_or(Error::InvalidState)?
        + 3;
    out[pubkey_offset..pubkey_offset + 32].copy_from_slice(public_key);

    Ok(total)
}

/// Find the first occurrence of `needle` in `haystack`.
pub(crate) fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    (0..=(haystack.len() - needle.len())).find(|&i| haystack[i..i + needle.len()] == *needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_roundtrip() {
        let seed = [0x42u8; 32];
        let transcript_hash = [0xabu8; 32];

        let signature = sign_certificate_verify(&seed, true, &transcript_hash).unwrap();
        let pubkey = ed25519_public_key_from_seed(&seed);
        verify_certificate_verify(&pubkey, &signature, true, &transcript_hash).unwrap();
    }

    #[test]
    fn verify_rejects_role_confusion() {
        // A server signature must not verify as a client signature.
        let seed = [0x42u8; 32];
        let transcript_hash = [0xabu8; 32];
        let signature = sign_certificate_verify(&seed, true, &transcript_hash).unwrap();
        let pubkey = ed25519_public_key_from_seed(&seed);
        assert!(verify_certificate_verify(&pubkey, &signature, false, &transcript_hash).is_err());
    }

    #[test]
    fn verify_rejects_wrong_hash() {
        let seed = [0x42u8; 32];
        let signature = sign_certificate_verify(&seed, true, &[0xabu8; 32]).unwrap();
        let pubkey = ed25519_public_key_from_seed(&seed);
        assert!(verify_certificate_verify(&pubkey, &signature, true, &[0xacu8; 32]).is_err());
    }

    #[test]
    fn sha384_length_hash_accepted() {
        let seed = [0x17u8; 32];
        let transcript_hash = [0x5au8; 48];
        let signature = sign_certificate_verify(&seed, true, &transcript_hash).unwrap();
        let pubkey = ed25519_public_key_from_seed(&seed);
        verify_certificate_verify(&pubkey, &signature, true, &transcript_hash).unwrap();
    }

    #[test]
    fn cv_content_layout() {
        let (content, len) = build_cv_content(true, &[0x11u8; 32]);
        assert_eq!(len, 64 + 33 + 1 + 32);
        assert!(content[..64].iter().all(|&b| b == 0x20));
        assert_eq!(&content[64..97], SERVER_CONTEXT);
        assert_eq!(content[97], 0x00);
        assert_eq!(&content[98..130], &[0x11u8; 32]);
    }

    #[test]
    fn cert_roundtrip() {
        let seed = [0x99u8; 32];
        let pubkey = ed25519_public_key_from_seed(&seed);

        let mut buf = [0u8; 512];
        let len = build_ed25519_cert_der(&pubkey, &mut buf).unwrap();
        let extracted = extract_ed25519_pubkey_from_cert(&buf[..len]).unwrap();
        assert_eq!(extracted, pubkey);
    }

    #[test]
    fn extract_from_garbage_fails() {
        assert!(extract_ed25519_pubkey_from_cert(&[0xde, 0xad, 0xbe, 0xef]).is_err());
    }

    #[test]
    fn bad_signature_length_rejected() {
        let pubkey = ed25519_public_key_from_seed(&[0x42u8; 32]);
        assert!(verify_certificate_verify(&pubkey, &[0u8; 63], true, &[0u8; 32]).is_err());
    }
}
