//! TLS 1.3 handshake message encoding and decoding.
//!
//! Handshake message format:
//!   HandshakeType (1 byte)
//!   Length (3 bytes, big-endian)
//!   Body (Length bytes)
//!
//! Messages own their decoded fields; the extension lists inside them
//! are [`Extension`] values decoded with the right context.

use crate::codec::{Reader, Writer};
use crate::error::{DecodeError, Error, ProtocolViolation};
use crate::tls::cipher::SignatureScheme;
use crate::tls::extensions::{
    decode_extensions, encode_extensions, extensions_wire_len, Extension, ExtensionContext,
};

/// TLS handshake message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HandshakeType {
    ClientHello = 1,
    ServerHello = 2,
    NewSessionTicket = 4,
    EndOfEarlyData = 5,
    EncryptedExtensions = 8,
    Certificate = 11,
    CertificateRequest = 13,
    CertificateVerify = 15,
    Finished = 20,
    KeyUpdate = 24,
    /// Synthetic transcript input after HelloRetryRequest; never on the wire.
    MessageHash = 254,
}

impl HandshakeType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::ClientHello),
            2 => Some(Self::ServerHello),
            4 => Some(Self::NewSessionTicket),
            5 => Some(Self::EndOfEarlyData),
            8 => Some(Self::EncryptedExtensions),
            11 => Some(Self::Certificate),
            13 => Some(Self::CertificateRequest),
            15 => Some(Self::CertificateVerify),
            20 => Some(Self::Finished),
            24 => Some(Self::KeyUpdate),
            _ => None,
        }
    }
}

/// Handshake message header size (type + 3-byte length).
pub const HEADER_LEN: usize = 4;

/// The fixed ServerHello.random that marks a HelloRetryRequest
/// (RFC 8446 §4.1.3: SHA-256 of "HelloRetryRequest").
pub const HELLO_RETRY_REQUEST_RANDOM: [u8; 32] = [
    0xcf, 0x21, 0xad, 0x74, 0xe5, 0x9a, 0x61, 0x11, 0xbe, 0x1d, 0x8c, 0x02, 0x1e, 0x65, 0xb8,
    0x91, 0xc2, 0xa2, 0x11, 0x16, 0x7a, 0xbb, 0x8c, 0x5e, 0x07, 0x9e, 0x09, 0xe2, 0xc8, 0xa8,
    0x33, 0x9c,
];

/// Downgrade sentinels in the last 8 bytes of ServerHello.random
/// (RFC 8446 §4.1.3).
pub const DOWNGRADE_SENTINEL_TLS12: [u8; 8] = [0x44, 0x4f, 0x57, 0x4e, 0x47, 0x52, 0x44, 0x01];
pub const DOWNGRADE_SENTINEL_TLS11: [u8; 8] = [0x44, 0x4f, 0x57, 0x4e, 0x47, 0x52, 0x44, 0x00];

/// Whether a ServerHello.random carries a downgrade sentinel.
pub fn detect_downgrade(random: &[u8; 32]) -> bool {
    random[24..] == DOWNGRADE_SENTINEL_TLS12 || random[24..] == DOWNGRADE_SENTINEL_TLS11
}

/// Read a handshake header: returns (type byte, body length).
pub fn read_handshake_header(data: &[u8]) -> Result<(u8, usize), Error> {
    if data.len() < HEADER_LEN {
        return Err(DecodeError::Truncated.into());
    }
    let msg_type = data[0];
    let length = ((data[1] as usize) << 16) | ((data[2] as usize) << 8) | (data[3] as usize);
    Ok((msg_type, length))
}

/// Encode a complete message: header plus a body produced by `f`.
/// Returns the total length written.
pub fn encode_message<F>(msg_type: HandshakeType, out: &mut [u8], f: F) -> Result<usize, Error>
where
    F: for<'a> FnOnce(&mut Writer<'a>) -> Result<(), Error>,
{
    let mut w = Writer::new(out);
    w.u8(msg_type as u8)?;
    w.length_prefixed(3, f)?;
    Ok(w.len())
}

/// ClientHello (RFC 8446 §4.1.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHello {
    pub random: [u8; 32],
    /// Echoed verbatim by the server; 0–32 bytes.
    pub legacy_session_id: heapless::Vec<u8, 32>,
    /// Raw codepoints, GREASE included.
    pub cipher_suites: heapless::Vec<u16, 32>,
    pub extensions: heapless::Vec<Extension, 16>,
}

impl ClientHello {
    pub fn body_len(&self) -> usize {
        2 + 32
            + 1
            + self.legacy_session_id.len()
            + 2
            + 2 * self.cipher_suites.len()
            + 2
            + extensions_wire_len(&self.extensions)
    }

    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.body_len()
    }

    pub fn encode(&self, out: &mut [u8]) -> Result<usize, Error> {
        encode_message(HandshakeType::ClientHello, out, |w| {
            w.u16(0x0303)?;
            w.slice(&self.random)?;
            w.vec8(&self.legacy_session_id)?;
            w.length_prefixed(2, |w| {
                for &cs in &self.cipher_suites {
                    w.u16(cs)?;
                }
                Ok(())
            })?;
            // legacy_compression_methods: the single null method
            w.u8(1)?;
            w.u8(0)?;
            encode_extensions(w, &self.extensions)
        })
    }

    /// Decode a ClientHello body (after the 4-byte header).
    pub fn decode(body: &[u8]) -> Result<Self, Error> {
        let mut r = Reader::new(body);
        let _legacy_version = r.u16()?;

        let random: [u8; 32] = r
            .take(32)?
            .try_into()
            .map_err(|_| Error::from(DecodeError::Truncated))?;

        let sid = r.vec8()?;
        let mut legacy_session_id = heapless::Vec::new();
        legacy_session_id
            .extend_from_slice(sid)
            .map_err(|_| Error::from(DecodeError::Overlong))?;

        let mut suites = Reader::new(r.vec16()?);
        let mut cipher_suites = heapless::Vec::new();
        while !suites.is_empty() {
            // Very long offers (GREASE plus a TLS 1.2 tail) keep only
            // what fits; selection never needs more.
            let _ = cipher_suites.push(suites.u16()?);
        }

        let compression = r.vec8()?;
        if compression != [0x00] {
            return Err(ProtocolViolation::IllegalParameter.into());
        }

        let extensions = decode_extensions(r.vec16()?, ExtensionContext::ClientHello)?;
        if !r.is_empty() {
            return Err(DecodeError::Overlong.into());
        }

        Ok(Self {
            random,
            legacy_session_id,
            cipher_suites,
            extensions,
        })
    }
}

/// ServerHello and HelloRetryRequest share this shape; HRR is
/// distinguished by [`HELLO_RETRY_REQUEST_RANDOM`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHello {
    pub random: [u8; 32],
    pub legacy_session_id_echo: heapless::Vec<u8, 32>,
    pub cipher_suite: u16,
    pub extensions: heapless::Vec<Extension, 16>,
}

impl ServerHello {
    pub fn is_hello_retry_request(&self) -> bool {
        self.random == HELLO_RETRY_REQUEST_RANDOM
    }

    pub fn body_len(&self) -> usize {
        2 + 32 + 1 + self.legacy_session_id_echo.len() + 2 + 1
            + extensions_wire_len(&self.extensions)
    }

    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.body_len()
    }

    pub fn encode(&self, out: &mut [u8]) -> Result<usize, Error> {
        encode_message(HandshakeType::ServerHello, out, |w| {
            w.u16(0x0303)?;
            w.slice(&self.random)?;
            w.vec8(&self.legacy_session_id_echo)?;
            w.u16(self.cipher_suite)?;
            w.u8(0)?; // legacy_compression_method
            encode_extensions(w, &self.extensions)
        })
    }

    pub fn decode(body: &[u8]) -> Result<Self, Error> {
        let mut r = Reader::new(body);
        let _legacy_version = r.u16()?;

        let random: [u8; 32] = r
            .take(32)?
            .try_into()
            .map_err(|_| Error::from(DecodeError::Truncated))?;

        let sid = r.vec8()?;
        let mut legacy_session_id_echo = heapless::Vec::new();
        legacy_session_id_echo
            .extend_from_slice(sid)
            .map_err(|_| Error::from(DecodeError::Overlong))?;

        let cipher_suite = r.u16()?;

        if r.u8()? != 0 {
            return Err(ProtocolViolation::IllegalParameter.into());
        }

        let ctx = if random == HELLO_RETRY_REQUEST_RANDOM {
            ExtensionContext::HelloRetryRequest
        } else {
            ExtensionContext::ServerHello
        };
        let extensions = decode_extensions(r.vec16()?, ctx)?;
        if !r.is_empty() {
            return Err(DecodeError::Overlong.into());
        }

        Ok(Self {
            random,
            legacy_session_id_echo,
            cipher_suite,
            extensions,
        })
    }
}

/// EncryptedExtensions (RFC 8446 §4.3.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedExtensions {
    pub extensions: heapless::Vec<Extension, 16>,
}

impl EncryptedExtensions {
    pub fn wire_len(&self) -> usize {
        HEADER_LEN + extensions_wire_len(&self.extensions)
    }

    pub fn encode(&self, out: &mut [u8]) -> Result<usize, Error> {
        encode_message(HandshakeType::EncryptedExtensions, out, |w| {
            encode_extensions(w, &self.extensions)
        })
    }

    pub fn decode(body: &[u8]) -> Result<Self, Error> {
        let mut r = Reader::new(body);
        let extensions = decode_extensions(r.vec16()?, ExtensionContext::EncryptedExtensions)?;
        if !r.is_empty() {
            return Err(DecodeError::Overlong.into());
        }
        Ok(Self { extensions })
    }
}

/// One certificate in a Certificate message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateEntry {
    pub cert_data: heapless::Vec<u8, 2048>,
    /// Per-certificate extensions, kept raw (OCSP staples and the like
    /// are outside this crate's concern but must round-trip).
    pub extensions_raw: heapless::Vec<u8, 256>,
}

/// Certificate (RFC 8446 §4.4.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    pub context: heapless::Vec<u8, 32>,
    pub entries: heapless::Vec<CertificateEntry, 3>,
}

impl Certificate {
    pub fn body_len(&self) -> usize {
        1 + self.context.len()
            + 3
            + self
                .entries
                .iter()
                .map(|e| 3 + e.cert_data.len() + 2 + e.extensions_raw.len())
                .sum::<usize>()
    }

    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.body_len()
    }

    pub fn encode(&self, out: &mut [u8]) -> Result<usize, Error> {
        encode_message(HandshakeType::Certificate, out, |w| {
            w.vec8(&self.context)?;
            w.length_prefixed(3, |w| {
                for e in &self.entries {
                    w.vec24(&e.cert_data)?;
                    w.vec16(&e.extensions_raw)?;
                }
                Ok(())
            })
        })
    }

    pub fn decode(body: &[u8]) -> Result<Self, Error> {
        let mut r = Reader::new(body);

        let ctx = r.vec8()?;
        let mut context = heapless::Vec::new();
        context
            .extend_from_slice(ctx)
            .map_err(|_| Error::from(DecodeError::Overlong))?;

        let mut list = Reader::new(r.vec24()?);
        let mut entries = heapless::Vec::new();
        while !list.is_empty() {
            let cert = list.vec24()?;
            if cert.is_empty() {
                return Err(DecodeError::InvalidValue.into());
            }
            let exts = list.vec16()?;

            let mut cert_data = heapless::Vec::new();
            cert_data
                .extend_from_slice(cert)
                .map_err(|_| Error::from(DecodeError::Overlong))?;
            let mut extensions_raw = heapless::Vec::new();
            extensions_raw
                .extend_from_slice(exts)
                .map_err(|_| Error::from(DecodeError::Overlong))?;

            entries
                .push(CertificateEntry {
                    cert_data,
                    extensions_raw,
                })
                .map_err(|_| Error::from(DecodeError::Overlong))?;
        }

        if !r.is_empty() {
            return Err(DecodeError::Overlong.into());
        }
        Ok(Self { context, entries })
    }
}

/// CertificateVerify (RFC 8446 §4.4.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateVerify {
    pub algorithm: SignatureScheme,
    pub signature: heapless::Vec<u8, 512>,
}

impl CertificateVerify {
    pub fn wire_len(&self) -> usize {
        HEADER_LEN + 2 + 2 + self.signature.len()
    }

    pub fn encode(&self, out: &mut [u8]) -> Result<usize, Error> {
        encode_message(HandshakeType::CertificateVerify, out, |w| {
            w.u16(self.algorithm.to_u16())?;
            w.vec16(&self.signature)
        })
    }

    pub fn decode(body: &[u8]) -> Result<Self, Error> {
        let mut r = Reader::new(body);
        let algorithm = SignatureScheme::from_u16(r.u16()?);
        let sig = r.vec16()?;
        let mut signature = heapless::Vec::new();
        signature
            .extend_from_slice(sig)
            .map_err(|_| Error::from(DecodeError::Overlong))?;
        if !r.is_empty() {
            return Err(DecodeError::Overlong.into());
        }
        Ok(Self {
            algorithm,
            signature,
        })
    }
}

/// Finished (RFC 8446 §4.4.4): exactly Hash.output_len bytes of HMAC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finished {
    pub verify_data: heapless::Vec<u8, 48>,
}

impl Finished {
    pub fn new(verify_data: &[u8]) -> Result<Self, Error> {
        let mut v = heapless::Vec::new();
        v.extend_from_slice(verify_data)
            .map_err(|_| Error::from(DecodeError::Overlong))?;
        Ok(Self { verify_data: v })
    }

    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.verify_data.len()
    }

    pub fn encode(&self, out: &mut [u8]) -> Result<usize, Error> {
        encode_message(HandshakeType::Finished, out, |w| w.slice(&self.verify_data))
    }

    /// Decode with the negotiated hash length enforced.
    pub fn decode(body: &[u8], hash_len: usize) -> Result<Self, Error> {
        if body.len() != hash_len {
            return Err(DecodeError::InvalidValue.into());
        }
        Self::new(body)
    }
}

/// NewSessionTicket (RFC 8446 §4.6.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSessionTicket {
    pub ticket_lifetime: u32,
    pub ticket_age_add: u32,
    pub ticket_nonce: heapless::Vec<u8, 32>,
    pub ticket: heapless::Vec<u8, 256>,
    pub extensions: heapless::Vec<Extension, 4>,
}

impl NewSessionTicket {
    /// Maximum permitted lifetime: seven days (RFC 8446 §4.6.1).
    pub const MAX_LIFETIME_SECS: u32 = 604_800;

    /// The advertised max_early_data_size, if the early_data extension
    /// is present.
    pub fn max_early_data(&self) -> Option<u32> {
        self.extensions.iter().find_map(|e| match e {
            Extension::EarlyData(Some(max)) => Some(*max),
            _ => None,
        })
    }

    pub fn body_len(&self) -> usize {
        4 + 4 + 1 + self.ticket_nonce.len() + 2 + self.ticket.len() + {
            2 + self
                .extensions
                .iter()
                .map(Extension::wire_len)
                .sum::<usize>()
        }
    }

    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.body_len()
    }

    pub fn encode(&self, out: &mut [u8]) -> Result<usize, Error> {
        encode_message(HandshakeType::NewSessionTicket, out, |w| {
            w.u32(self.ticket_lifetime)?;
            w.u32(self.ticket_age_add)?;
            w.vec8(&self.ticket_nonce)?;
            w.vec16(&self.ticket)?;
            encode_extensions(w, &self.extensions)
        })
    }

    pub fn decode(body: &[u8]) -> Result<Self, Error> {
        let mut r = Reader::new(body);
        let ticket_lifetime = r.u32()?;
        if ticket_lifetime > Self::MAX_LIFETIME_SECS {
            return Err(ProtocolViolation::IllegalParameter.into());
        }
        let ticket_age_add = r.u32()?;

        let nonce = r.vec8()?;
        let mut ticket_nonce = heapless::Vec::new();
        ticket_nonce
            .extend_from_slice(nonce)
            .map_err(|_| Error::from(DecodeError::Overlong))?;

        let t = r.vec16()?;
        if t.is_empty() {
            return Err(DecodeError::InvalidValue.into());
        }
        let mut ticket = heapless::Vec::new();
        ticket
            .extend_from_slice(t)
            .map_err(|_| Error::from(DecodeError::Overlong))?;

        let ext_list = decode_extensions(r.vec16()?, ExtensionContext::NewSessionTicket)?;
        let mut extensions = heapless::Vec::new();
        for e in ext_list {
            extensions
                .push(e)
                .map_err(|_| Error::from(DecodeError::Overlong))?;
        }

        if !r.is_empty() {
            return Err(DecodeError::Overlong.into());
        }
        Ok(Self {
            ticket_lifetime,
            ticket_age_add,
            ticket_nonce,
            ticket,
            extensions,
        })
    }
}

/// KeyUpdate (RFC 8446 §4.6.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyUpdate {
    pub request_update: bool,
}

impl KeyUpdate {
    pub fn wire_len(&self) -> usize {
        HEADER_LEN + 1
    }

    pub fn encode(&self, out: &mut [u8]) -> Result<usize, Error> {
        encode_message(HandshakeType::KeyUpdate, out, |w| {
            w.u8(self.request_update as u8)
        })
    }

    pub fn decode(body: &[u8]) -> Result<Self, Error> {
        if body.len() != 1 {
            return Err(DecodeError::Truncated.into());
        }
        match body[0] {
            0 => Ok(Self {
                request_update: false,
            }),
            1 => Ok(Self {
                request_update: true,
            }),
            _ => Err(ProtocolViolation::IllegalParameter.into()),
        }
    }
}

/// Encode an EndOfEarlyData message (empty body).
pub fn encode_end_of_early_data(out: &mut [u8]) -> Result<usize, Error> {
    encode_message(HandshakeType::EndOfEarlyData, out, |_| Ok(()))
}

/// CertificateRequest (RFC 8446 §4.3.2). Only parsed — this crate never
/// generates one, and answers with an empty Certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRequest {
    pub context: heapless::Vec<u8, 32>,
}

impl CertificateRequest {
    pub fn decode(body: &[u8]) -> Result<Self, Error> {
        let mut r = Reader::new(body);
        let ctx = r.vec8()?;
        let mut context = heapless::Vec::new();
        context
            .extend_from_slice(ctx)
            .map_err(|_| Error::from(DecodeError::Overlong))?;
        // The extension list (signature_algorithms etc.) is read past;
        // an empty client Certificate ignores its contents.
        let _ = r.vec16()?;
        if !r.is_empty() {
            return Err(DecodeError::Overlong.into());
        }
        Ok(Self { context })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::cipher::NamedGroup;
    use crate::tls::extensions::{KeyShare, KeyShareEntry, SupportedVersions, TLS13_VERSION};

    fn sample_client_hello() -> ClientHello {
        let mut versions = heapless::Vec::new();
        versions.push(TLS13_VERSION).unwrap();
        let mut shares = heapless::Vec::new();
        shares
            .push(KeyShareEntry::new(NamedGroup::X25519, &[0x42; 32]).unwrap())
            .unwrap();

        let mut extensions = heapless::Vec::new();
        extensions
            .push(Extension::SupportedVersions(SupportedVersions::List(
                versions,
            )))
            .unwrap();
        extensions
            .push(Extension::KeyShare(KeyShare::ClientShares(shares)))
            .unwrap();

        let mut cipher_suites = heapless::Vec::new();
        cipher_suites.push(0x1301).unwrap();
        cipher_suites.push(0x1303).unwrap();

        let mut legacy_session_id = heapless::Vec::new();
        legacy_session_id.extend_from_slice(&[0xaa; 32]).unwrap();

        ClientHello {
            random: [0x42; 32],
            legacy_session_id,
            cipher_suites,
            extensions,
        }
    }

    #[test]
    fn client_hello_roundtrip() {
        let ch = sample_client_hello();
        let mut buf = [0u8; 1024];
        let len = ch.encode(&mut buf).unwrap();
        assert_eq!(len, ch.wire_len());

        let (msg_type, body_len) = read_handshake_header(&buf[..len]).unwrap();
        assert_eq!(msg_type, HandshakeType::ClientHello as u8);
        assert_eq!(body_len + HEADER_LEN, len);

        let decoded = ClientHello::decode(&buf[HEADER_LEN..len]).unwrap();
        assert_eq!(decoded, ch);

        // Byte-exact re-encode.
        let mut buf2 = [0u8; 1024];
        let len2 = decoded.encode(&mut buf2).unwrap();
        assert_eq!(&buf[..len], &buf2[..len2]);
    }

    #[test]
    fn client_hello_rejects_compression() {
        let ch = sample_client_hello();
        let mut buf = [0u8; 1024];
        let len = ch.encode(&mut buf).unwrap();

        // Patch compression methods to [1, 0] (deflate offered).
        let comp_off = HEADER_LEN + 2 + 32 + 1 + 32 + 2 + 4;
        assert_eq!(buf[comp_off], 1);
        assert_eq!(buf[comp_off + 1], 0);
        buf[comp_off + 1] = 1;
        assert_eq!(
            ClientHello::decode(&buf[HEADER_LEN..len]),
            Err(Error::Protocol(ProtocolViolation::IllegalParameter))
        );
    }

    #[test]
    fn server_hello_roundtrip() {
        let mut extensions = heapless::Vec::new();
        extensions
            .push(Extension::SupportedVersions(SupportedVersions::Selected(
                TLS13_VERSION,
            )))
            .unwrap();
        extensions
            .push(Extension::KeyShare(KeyShare::ServerShare(
                KeyShareEntry::new(NamedGroup::X25519, &[0xbb; 32]).unwrap(),
            )))
            .unwrap();

        let sh = ServerHello {
            random: [0x17; 32],
            legacy_session_id_echo: heapless::Vec::new(),
            cipher_suite: 0x1301,
            extensions,
        };

        let mut buf = [0u8; 512];
        let len = sh.encode(&mut buf).unwrap();
        assert_eq!(len, sh.wire_len());

        let decoded = ServerHello::decode(&buf[HEADER_LEN..len]).unwrap();
        assert_eq!(decoded, sh);
        assert!(!decoded.is_hello_retry_request());
    }

    #[test]
    fn hello_retry_request_detected() {
        let mut extensions = heapless::Vec::new();
        extensions
            .push(Extension::SupportedVersions(SupportedVersions::Selected(
                TLS13_VERSION,
            )))
            .unwrap();
        extensions
            .push(Extension::KeyShare(KeyShare::RetrySelectedGroup(
                NamedGroup::X25519,
            )))
            .unwrap();

        let hrr = ServerHello {
            random: HELLO_RETRY_REQUEST_RANDOM,
            legacy_session_id_echo: heapless::Vec::new(),
            cipher_suite: 0x1301,
            extensions,
        };

        let mut buf = [0u8; 256];
        let len = hrr.encode(&mut buf).unwrap();
        let decoded = ServerHello::decode(&buf[HEADER_LEN..len]).unwrap();
        assert!(decoded.is_hello_retry_request());
        match decoded.extensions.iter().find(|e| matches!(e, Extension::KeyShare(_))) {
            Some(Extension::KeyShare(KeyShare::RetrySelectedGroup(g))) => {
                assert_eq!(*g, NamedGroup::X25519)
            }
            other => panic!("bad key_share decode: {other:?}"),
        }
    }

    #[test]
    fn downgrade_sentinel_detection() {
        let mut random = [0x55u8; 32];
        assert!(!detect_downgrade(&random));
        random[24..].copy_from_slice(&DOWNGRADE_SENTINEL_TLS12);
        assert!(detect_downgrade(&random));
        random[24..].copy_from_slice(&DOWNGRADE_SENTINEL_TLS11);
        assert!(detect_downgrade(&random));
    }

    #[test]
    fn certificate_roundtrip() {
        let mut cert_data = heapless::Vec::new();
        cert_data.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]).unwrap();
        let mut extensions_raw = heapless::Vec::new();
        extensions_raw.extend_from_slice(&[0x00, 0x00]).unwrap();

        let mut entries = heapless::Vec::new();
        entries
            .push(CertificateEntry {
                cert_data,
                extensions_raw,
            })
            .unwrap();

        let cert = Certificate {
            context: heapless::Vec::new(),
            entries,
        };

        let mut buf = [0u8; 256];
        let len = cert.encode(&mut buf).unwrap();
        assert_eq!(len, cert.wire_len());

        let decoded = Certificate::decode(&buf[HEADER_LEN..len]).unwrap();
        assert_eq!(decoded, cert);
    }

    #[test]
    fn certificate_empty_entry_rejected() {
        // certificate_list with a zero-length cert_data.
        let body = [
            0x00, // context
            0x00, 0x00, 0x05, // list length
            0x00, 0x00, 0x00, // cert_data length 0
            0x00, 0x00, // extensions length 0
        ];
        assert!(Certificate::decode(&body).is_err());
    }

    #[test]
    fn certificate_verify_roundtrip() {
        let mut signature = heapless::Vec::new();
        signature.extend_from_slice(&[0xaa; 64]).unwrap();
        let cv = CertificateVerify {
            algorithm: SignatureScheme::Ed25519,
            signature,
        };

        let mut buf = [0u8; 256];
        let len = cv.encode(&mut buf).unwrap();
        assert_eq!(len, cv.wire_len());

        let decoded = CertificateVerify::decode(&buf[HEADER_LEN..len]).unwrap();
        assert_eq!(decoded, cv);
    }

    #[test]
    fn finished_exact_length() {
        let fin = Finished::new(&[0xab; 32]).unwrap();
        let mut buf = [0u8; 64];
        let len = fin.encode(&mut buf).unwrap();
        assert_eq!(len, 36);

        let decoded = Finished::decode(&buf[HEADER_LEN..len], 32).unwrap();
        assert_eq!(decoded, fin);
        // SHA-384 length mismatch must fail.
        assert!(Finished::decode(&buf[HEADER_LEN..len], 48).is_err());
    }

    #[test]
    fn new_session_ticket_roundtrip() {
        let mut ticket_nonce = heapless::Vec::new();
        ticket_nonce.extend_from_slice(&[0x01]).unwrap();
        let mut ticket = heapless::Vec::new();
        ticket.extend_from_slice(&[0x5a; 16]).unwrap();
        let mut extensions = heapless::Vec::new();
        extensions.push(Extension::EarlyData(Some(16384))).unwrap();

        let nst = NewSessionTicket {
            ticket_lifetime: 7200,
            ticket_age_add: 0x1234_5678,
            ticket_nonce,
            ticket,
            extensions,
        };

        let mut buf = [0u8; 256];
        let len = nst.encode(&mut buf).unwrap();
        assert_eq!(len, nst.wire_len());

        let decoded = NewSessionTicket::decode(&buf[HEADER_LEN..len]).unwrap();
        assert_eq!(decoded, nst);
        assert_eq!(decoded.max_early_data(), Some(16384));
    }

    #[test]
    fn new_session_ticket_lifetime_capped() {
        let mut ticket_nonce = heapless::Vec::new();
        ticket_nonce.extend_from_slice(&[0x01]).unwrap();
        let mut ticket = heapless::Vec::new();
        ticket.extend_from_slice(&[0x5a; 16]).unwrap();

        let nst = NewSessionTicket {
            ticket_lifetime: NewSessionTicket::MAX_LIFETIME_SECS + 1,
            ticket_age_add: 0,
            ticket_nonce,
            ticket,
            extensions: heapless::Vec::new(),
        };
        let mut buf = [0u8; 256];
        let len = nst.encode(&mut buf).unwrap();
        assert!(NewSessionTicket::decode(&buf[HEADER_LEN..len]).is_err());
    }

    #[test]
    fn key_update_codec() {
        for request in [false, true] {
            let ku = KeyUpdate {
                request_update: request,
            };
            let mut buf = [0u8; 8];
            let len = ku.encode(&mut buf).unwrap();
            assert_eq!(len, ku.wire_len());
            assert_eq!(KeyUpdate::decode(&buf[HEADER_LEN..len]).unwrap(), ku);
        }
        // Any other value is illegal.
        assert_eq!(
            KeyUpdate::decode(&[2]),
            Err(Error::Protocol(ProtocolViolation::IllegalParameter))
        );
    }

    #[test]
    fn end_of_early_data_is_empty() {
        let mut buf = [0u8; 8];
        let len = encode_end_of_early_data(&mut buf).unwrap();
        assert_eq!(len, HEADER_LEN);
        let (msg_type, body_len) = read_handshake_header(&buf[..len]).unwrap();
        assert_eq!(msg_type, HandshakeType::EndOfEarlyData as u8);
        assert_eq!(body_len, 0);
    }

    #[test]
    fn certificate_request_context_parsed() {
        let body = [
            0x04, 0xde, 0xad, 0xbe, 0xef, // context
            0x00, 0x00, // empty extensions
        ];
        let cr = CertificateRequest::decode(&body).unwrap();
        assert_eq!(cr.context.as_slice(), &[0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn handshake_type_unknown_values() {
        assert_eq!(HandshakeType::from_u8(0), None);
        assert_eq!(HandshakeType::from_u8(3), None);
        assert_eq!(HandshakeType::from_u8(99), None);
    }

    #[test]
    fn read_handshake_header_truncated() {
        assert!(read_handshake_header(&[]).is_err());
        assert!(read_handshake_header(&[0x01, 0x00, 0x00]).is_err());
        let (t, l) = read_handshake_header(&[0x01, 0x00, 0x00, 0x05]).unwrap();
        assert_eq!(t, 1);
        assert_eq!(l, 5);
    }
}
