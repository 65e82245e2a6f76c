//! TLSPlaintext / TLSCiphertext framing, nonce construction, and
//! in-place record protection (RFC 8446 §5).

use crate::error::{CryptoError, DecodeError, Error};
use crate::tls::cipher::{SuiteAead, TAG_LEN};

/// TLS record content types. Strictly bounded: unknown values are a
/// decode error, not a GREASE case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ContentType {
    ChangeCipherSpec = 20,
    Alert = 21,
    Handshake = 22,
    ApplicationData = 23,
}

impl ContentType {
    pub fn from_u8(v: u8) -> Result<Self, Error> {
        match v {
            20 => Ok(Self::ChangeCipherSpec),
            21 => Ok(Self::Alert),
            22 => Ok(Self::Handshake),
            23 => Ok(Self::ApplicationData),
            _ => Err(DecodeError::InvalidValue.into()),
        }
    }
}

/// TLS record header (5 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub content_type: ContentType,
    pub legacy_version: u16,
    pub length: u16,
}

/// Record header size.
pub const RECORD_HEADER_LEN: usize = 5;

/// Maximum plaintext fragment (RFC 8446 §5.1).
pub const MAX_PLAINTEXT: usize = 16384;

/// Maximum protected payload: plaintext + inner type + expansion
/// (RFC 8446 §5.2).
pub const MAX_CIPHERTEXT_PAYLOAD: usize = MAX_PLAINTEXT + 256;

/// Encode a record header.
pub fn encode_record_header(
    ct: ContentType,
    length: u16,
    buf: &mut [u8],
) -> Result<usize, Error> {
    if buf.len() < RECORD_HEADER_LEN {
        return Err(Error::BufferTooSmall {
            needed: RECORD_HEADER_LEN,
        });
    }
    buf[0] = ct as u8;
    buf[1] = 0x03;
    buf[2] = 0x03; // legacy_record_version
    buf[3] = (length >> 8) as u8;
    buf[4] = (length & 0xff) as u8;
    Ok(RECORD_HEADER_LEN)
}

/// Decode a record header from at least 5 bytes.
pub fn decode_record_header(data: &[u8]) -> Result<RecordHeader, Error> {
    if data.len() < RECORD_HEADER_LEN {
        return Err(DecodeError::Truncated.into());
    }
    let content_type = ContentType::from_u8(data[0])?;
    let legacy_version = ((data[1] as u16) << 8) | (data[2] as u16);
    let length = ((data[3] as u16) << 8) | (data[4] as u16);
    Ok(RecordHeader {
        content_type,
        legacy_version,
        length,
    })
}

/// AEAD nonce: static IV XOR the left-padded 64-bit sequence number
/// (RFC 8446 §5.3).
pub fn build_nonce(iv: &[u8; 12], seq: u64) -> [u8; 12] {
    let mut nonce = *iv;
    let seq_bytes = seq.to_be_bytes();
    for i in 0..8 {
        nonce[4 + i] ^= seq_bytes[i];
    }
    nonce
}

/// Encrypt a record in place.
///
/// `buf[..payload_len]` holds the plaintext; the inner content type is
/// appended before sealing. The AAD is the TLSCiphertext header.
/// Returns the protected payload length (plaintext + 1 + tag).
pub fn seal_record(
    aead: &SuiteAead,
    nonce: &[u8; 12],
    buf: &mut [u8],
    payload_len: usize,
    inner_content_type: ContentType,
) -> Result<usize, Error> {
    let inner_len = payload_len + 1;
    if buf.len() < inner_len + TAG_LEN {
        return Err(Error::BufferTooSmall {
            needed: inner_len + TAG_LEN,
        });
    }
    buf[payload_len] = inner_content_type as u8;

    let outer_len = (inner_len + TAG_LEN) as u16;
    let aad = [
        ContentType::ApplicationData as u8,
        0x03,
        0x03,
        (outer_len >> 8) as u8,
        (outer_len & 0xff) as u8,
    ];

    aead.seal_in_place(nonce, &aad, buf, inner_len)
}

/// Decrypt a record in place.
///
/// `buf[..ciphertext_len]` holds the protected payload; the AAD is the
/// received record header. Returns `(content_len, inner_content_type)`
/// after stripping zero padding.
pub fn open_record(
    aead: &SuiteAead,
    nonce: &[u8; 12],
    buf: &mut [u8],
    ciphertext_len: usize,
    record_header: &[u8; RECORD_HEADER_LEN],
) -> Result<(usize, ContentType), Error> {
    if ciphertext_len > MAX_CIPHERTEXT_PAYLOAD {
        return Err(DecodeError::Overlong.into());
    }
    let plaintext_len = aead.open_in_place(nonce, record_header, buf, ciphertext_len)?;
    find_inner_content_type(&buf[..plaintext_len])
}

/// Strip zero padding and pull out the true content type: the last
/// non-zero byte of the decrypted plaintext (RFC 8446 §5.4).
pub fn find_inner_content_type(plaintext: &[u8]) -> Result<(usize, ContentType), Error> {
    let mut pos = plaintext.len();
    while pos > 0 && plaintext[pos - 1] == 0 {
        pos -= 1;
    }
    if pos == 0 {
        // All padding, no content type: authenticated garbage.
        return Err(CryptoError::AeadOpenFailure.into());
    }
    let ct = ContentType::from_u8(plaintext[pos - 1])?;
    Ok((pos - 1, ct))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::cipher::CipherSuite;

    #[test]
    fn record_header_roundtrip() {
        let mut buf = [0u8; 16];
        let n = encode_record_header(ContentType::Handshake, 42, &mut buf).unwrap();
        assert_eq!(n, 5);
        let hdr = decode_record_header(&buf[..5]).unwrap();
        assert_eq!(hdr.content_type, ContentType::Handshake);
        assert_eq!(hdr.legacy_version, 0x0303);
        assert_eq!(hdr.length, 42);
    }

    #[test]
    fn invalid_content_type_rejected() {
        let data = [0xff, 0x03, 0x03, 0x00, 0x01];
        assert_eq!(
            decode_record_header(&data),
            Err(Error::Decode(DecodeError::InvalidValue))
        );
        assert!(decode_record_header(&[0x17, 0x03, 0x03, 0x00]).is_err());
    }

    #[test]
    fn nonce_construction() {
        let iv = [0u8; 12];
        assert_eq!(build_nonce(&iv, 0), [0u8; 12]);

        let nonce1 = build_nonce(&iv, 1);
        assert_eq!(nonce1[11], 1);
        assert_eq!(nonce1[10], 0);

        // XOR, not overwrite.
        let iv2 = [0xff; 12];
        let nonce2 = build_nonce(&iv2, 1);
        assert_eq!(nonce2[11], 0xfe);
        assert_eq!(nonce2[..4], [0xff; 4]);
    }

    #[test]
    fn seal_open_roundtrip() {
        let suite = CipherSuite::Aes128GcmSha256;
        let aead = SuiteAead::new(suite, &[0x42; 16]).unwrap();
        let iv = [0x11u8; 12];
        let nonce = build_nonce(&iv, 0);

        let mut buf = [0u8; 128];
        buf[..5].copy_from_slice(b"hello");
        let ct_len = seal_record(&aead, &nonce, &mut buf, 5, ContentType::ApplicationData).unwrap();
        assert_eq!(ct_len, 5 + 1 + TAG_LEN);

        let mut header = [0u8; RECORD_HEADER_LEN];
        encode_record_header(ContentType::ApplicationData, ct_len as u16, &mut header).unwrap();

        let (len, inner) = open_record(&aead, &nonce, &mut buf, ct_len, &header).unwrap();
        assert_eq!(inner, ContentType::ApplicationData);
        assert_eq!(&buf[..len], b"hello");
    }

    #[test]
    fn open_rejects_wrong_sequence() {
        let suite = CipherSuite::Aes128GcmSha256;
        let aead = SuiteAead::new(suite, &[0x42; 16]).unwrap();
        let iv = [0x11u8; 12];

        let mut buf = [0u8; 128];
        buf[..3].copy_from_slice(b"abc");
        let ct_len =
            seal_record(&aead, &build_nonce(&iv, 0), &mut buf, 3, ContentType::Alert).unwrap();

        let mut header = [0u8; RECORD_HEADER_LEN];
        encode_record_header(ContentType::ApplicationData, ct_len as u16, &mut header).unwrap();

        // Decrypting with the next sequence number must fail.
        assert!(open_record(&aead, &build_nonce(&iv, 1), &mut buf, ct_len, &header).is_err());
    }

    #[test]
    fn padding_stripped() {
        let data = [0x41, ContentType::Handshake as u8, 0x00, 0x00];
        let (len, ct) = find_inner_content_type(&data).unwrap();
        assert_eq!(len, 1);
        assert_eq!(ct, ContentType::Handshake);
    }

    #[test]
    fn all_zero_plaintext_rejected() {
        assert!(find_inner_content_type(&[0u8; 8]).is_err());
        assert!(find_inner_content_type(&[]).is_err());
    }

    #[test]
    fn oversized_ciphertext_rejected() {
        let suite = CipherSuite::Aes128GcmSha256;
        let aead = SuiteAead::new(suite, &[0x42; 16]).unwrap();
        let nonce = [0u8; 12];
        let mut buf = [0u8; 1];
        let header = [23, 3, 3, 0xff, 0xff];
        assert_eq!(
            open_record(&aead, &nonce, &mut buf, MAX_CIPHERTEXT_PAYLOAD + 1, &header),
            Err(Error::Decode(DecodeError::Overlong))
        );
    }
}
