//! ECDSA-P256 (secp256r1 with SHA-256) signing and verification for
//! TLS 1.3 CertificateVerify, plus minimal DER certificate plumbing.

use crate::crypto::ed25519::{build_cv_content, find_subsequence};
use crate::error::{CryptoError, Error};

/// TLS 1.3 signature algorithm code for ECDSA with secp256r1 and SHA-256.
pub const ECDSA_SECP256R1_SHA256: u16 = 0x0403;

// secp256r1 OID 1.2.840.10045.3.1.7 in DER.
const SECP256R1_OID: &[u8] = &[0x06, 0x08, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07];

/// Sign CertificateVerify content with a 32-byte P-256 private scalar.
///
/// Returns the DER-encoded ECDSA signature (typically 70–72 bytes). The
/// content is hashed with SHA-256 inside the signing operation, which is
/// exactly what `ecdsa_secp256r1_sha256` prescribes.
pub fn sign_certificate_verify(
    scalar: &[u8],
    server: bool,
    transcript_hash: &[u8],
) -> Result<heapless::Vec<u8, 128>, Error> {
    use p256::ecdsa::{signature::Signer, SigningKey};

    let scalar: [u8; 32] = scalar.try_into().map_err(|_| Error::InvalidState)?;
    let signing_key =
        SigningKey::from_bytes((&scalar).into()).map_err(|_| Error::InvalidState)?;

    let (content, content_len) = build_cv_content(server, transcript_hash);
    let signature: p256::ecdsa::DerSignature = signing_key.sign(&content[..content_len]);

    let mut result = heapless::Vec::new();
    result
        .extend_from_slice(signature.as_bytes())
        .map_err(|_| Error::InvalidState)?;
    Ok(result)
}

/// Verify an ECDSA-P256 CertificateVerify signature.
///
/// `public_key` is the SEC1-encoded point (65 bytes uncompressed);
/// `signature` is DER-encoded.
pub fn verify_certificate_verify(
    public_key: &[u8],
    signature: &[u8],
    server: bool,
    transcript_hash: &[u8],
) -> Result<(), Error> {
    use p256::ecdsa::{signature::Verifier, VerifyingKey};

    let verifying_key = VerifyingKey::from_sec1_bytes(public_key)
        .map_err(|_| Error::Crypto(CryptoError::SignatureInvalid))?;
    let sig = p256::ecdsa::DerSignature::try_from(signature)
        .map_err(|_| Error::Crypto(CryptoError::SignatureInvalid))?;

    let (content, content_len) = build_cv_content(server, transcript_hash);
    verifying_key
        .verify(&content[..content_len], &sig)
        .map_err(|_| Error::Crypto(CryptoError::SignatureInvalid))
}

/// Extract a P-256 public key from a DER-encoded certificate.
///
/// Locates the secp256r1 OID, then the SubjectPublicKeyInfo BIT STRING
/// holding the uncompressed point (0x04 || x || y).
pub fn extract_p256_pubkey_from_cert(cert_der: &[u8]) -> Result<heapless::Vec<u8, 72>, Error> {
    let oid_pos = find_subsequence(cert_der, SECP256R1_OID)
        .ok_or(Error::Crypto(CryptoError::SignatureInvalid))?;
    let after_oid = oid_pos + SECP256R1_OID.len();

    // BIT STRING: tag 0x03, length 66 (unused-bits byte + 65-byte point).
    for i in after_oid..cert_der.len().saturating_sub(66) {
        if cert_der[i] == 0x03 {
            let (len, hdr) = parse_asn1_length(&cert_der[i + 1..])?;
            if len == 66 {
                let content_start = i + 1 + hdr;
                if cert_der.get(content_start) != Some(&0x00) {
                    return Err(Error::Crypto(CryptoError::SignatureInvalid));
                }
                let key_start = content_start + 1;
                let key_end = key_start + 65;
                if key_end > cert_der.len() {
                    return Err(Error::Crypto(CryptoError::SignatureInvalid));
                }
                let mut pubkey = heapless::Vec::new();
                pubkey
                    .extend_from_slice(&cert_der[key_start..key_end])
                    .map_err(|_| Error::InvalidState)?;
                return Ok(pubkey);
            }
        }
    }

    Err(Error::Crypto(CryptoError::SignatureInvalid))
}

/// Whether a DER-encoded certificate carries a P-256 key.
pub fn cert_has_p256_key(cert_der: &[u8]) -> bool {
    find_subsequence(cert_der, SECP256R1_OID).is_some()
}

/// Derive the SEC1 uncompressed public key from a 32-byte private scalar.
pub fn p256_public_key_from_scalar(scalar: &[u8; 32]) -> Result<heapless::Vec<u8, 72>, Error> {
    use p256::ecdsa::SigningKey;

    let signing_key = SigningKey::from_bytes(scalar.into()).map_err(|_| Error::InvalidState)?;
    let encoded = signing_key.verifying_key().to_encoded_point(false);

    let mut result = heapless::Vec::new();
    result
        .extend_from_slice(encoded.as_bytes())
        .map_err(|_| Error::InvalidState)?;
    Ok(result)
}

/// Build a minimal DER certificate carrying a P-256 public key.
///
/// Like the Ed25519 builder: enough structure for CertificateVerify and
/// pinning, placeholder certificate signature.
pub fn build_p256_cert_der(public_key: &[u8], out: &mut [u8]) -> Result<usize, Error> {
    if public_key.len() != 65 || public_key[0] != 0x04 {
        return Err(Error::InvalidState);
    }

    // ecPublicKey OID 1.2.840.10045.2.1 followed by secp256r1.
    let algo_seq_inner: &[u8] = &[
        0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01, 0x06, 0x08, 0x2a, 0x86, 0x48,
        0xce, 0x3d, 0x03, 0x01, 0x07,
    ];
    // CN = "milli-tls": SET { SEQUENCE { OID 2.5.4.3, UTF8String } }
    let cn_rdn: &[u8] = &[
        0x31, 0x12, 0x30, 0x10, 0x06, 0x03, 0x55, 0x04, 0x03, 0x0c, 0x09, b'm', b'i', b'l',
        b'l', b'i', b'-', b't', b'l', b's',
    ];
    let validity: &[u8] = &[
        0x30, 0x1e, 0x17, 0x0d, b'2', b'5', b'0', b'1', b'0', b'1', b'0', b'0', b'0', b'0',
        b'0', b'0', b'Z', 0x17, 0x0d, b'3', b'5', b'0', b'1', b'0', b'1', b'0', b'0', b'0',
        b'0', b'0', b'0', b'Z',
    ];
    // ecdsaWithSHA256 OID 1.2.840.10045.4.3.2
    let ecdsa_sha256_algo: &[u8] = &[
        0x30, 0x0a, 0x06, 0x08, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x04, 0x03, 0x02,
    ];
    let version_bytes: &[u8] = &[0xa0, 0x03, 0x02, 0x01, 0x02];
    let serial_bytes: &[u8] = &[0x02, 0x01, 0x01];

    let bit_string_len = 1 + 65;
    let spki_inner_len = (2 + algo_seq_inner.len()) + (2 + bit_string_len);

    let fake_sig_len = 8;
    let fake_sig_bitstring_len = 1 + fake_sig_len;

    // ---- TBSCertificate ----
    let mut tbs = [0u8; 256];
    let mut tbs_off = 0;
    for part in [version_bytes, serial_bytes, ecdsa_sha256_algo] {
        tbs[tbs_off..tbs_off + part.len()].copy_from_slice(part);
        tbs_off += part.len();
    }
    for part in [&[0x30, 0x14][..], cn_rdn, validity, &[0x30, 0x14][..], cn_rdn] {
        tbs[tbs_off..tbs_off + part.len()].copy_from_slice(part);
        tbs_off += part.len();
    }

    // SPKI
    tbs[tbs_off] = 0x30;
    tbs_off += 1;
    tbs_off += write_asn1_length(spki_inner_len, &mut tbs[tbs_off..])?;
    tbs[tbs_off] = 0x30;
    tbs[tbs_off + 1] = algo_seq_inner.len() as u8;
    tbs_off += 2;
    tbs[tbs_off..tbs_off + algo_seq_inner.len()].copy_from_slice(algo_seq_inner);
    tbs_off += algo_seq_inner.len();
    tbs[tbs_off] = 0x03;
    tbs[tbs_off + 1] = bit_string_len as u8;
    tbs[tbs_off + 2] = 0x00;
    tbs_off += 3;
    tbs[tbs_off..tbs_off + 65].copy_from_slice(public_key);
    tbs_off += 65;

    let tbs_len = tbs_off;

    // ---- Outer Certificate ----
    let tbs_seq_encoded_len = 1 + asn1_length_size(tbs_len) + tbs_len;
    let outer_content_len = tbs_seq_encoded_len
        + ecdsa_sha256_algo.len()
        + 1
        + asn1_length_size(fake_sig_bitstring_len)
        + fake_sig_bitstring_len;
    let total = 1 + asn1_length_size(outer_content_len) + outer_content_len;
    if out.len() < total {
        return Err(Error::BufferTooSmall { needed: total });
    }

    let mut off = 0;
    out[off] = 0x30;
    off += 1;
    off += write_asn1_length(outer_content_len, &mut out[off..])?;

    out[off] = 0x30;
    off += 1;
    off += write_asn1_length(tbs_len, &mut out[off..])?;
    out[off..off + tbs_len].copy_from_slice(&tbs[..tbs_len]);
    off += tbs_len;

    out[off..off + ecdsa_sha256_algo.len()].copy_from_slice(ecdsa_sha256_algo);
    off += ecdsa_sha256_algo.len();

    out[off] = 0x03;
    off += 1;
    off += write_asn1_length(fake_sig_bitstring_len, &mut out[off..])?;
    out[off] = 0x00;
    off += 1;
    for b in out[off..off + fake_sig_len].iter_mut() {
        *b = 0xaa;
    }
    off += fake_sig_len;

    Ok(off)
}

/// Parse a DER length field. Returns (length_value, bytes_consumed).
fn parse_asn1_length(data: &[u8]) -> Result<(usize, usize), Error> {
    match data.first() {
        None => Err(Error::Crypto(CryptoError::SignatureInvalid)),
        Some(&b) if b < 0x80 => Ok((b as usize, 1)),
        Some(0x81) => match data.get(1) {
            Some(&l) => Ok((l as usize, 2)),
            None => Err(Error::Crypto(CryptoError::SignatureInvalid)),
        },
        Some(0x82) => {
            if data.len() < 3 {
                return Err(Error::Crypto(CryptoError::SignatureInvalid));
            }
            Ok((((data[1] as usize) << 8) | (data[2] as usize), 3))
        }
        _ => Err(Error::Crypto(CryptoError::SignatureInvalid)),
    }
}

fn asn1_length_size(len: usize) -> usize {
    if len < 0x80 {
        1
    } else if len < 0x100 {
        2
    } else {
        3
    }
}

fn write_asn1_length(len: usize, out: &mut [u8]) -> Result<usize, Error> {
    let size = asn1_length_size(len);
    if out.len() < size {
        return Err(Error::BufferTooSmall { needed: size });
    }
    match size {
        1 => out[0] = len as u8,
        2 => {
            out[0] = 0x81;
            out[1] = len as u8;
        }
        _ => {
            out[0] = 0x82;
            out[1] = (len >> 8) as u8;
            out[2] = (len & 0xff) as u8;
        }
    }
    Ok(size)
}
