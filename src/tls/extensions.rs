//! TLS 1.3 extension codec.
//!
//! Extensions are a closed tagged union keyed by the 2-byte extension
//! type. Three of them change shape with the enclosing handshake
//! message (key_share, supported_versions, pre_shared_key), so decoding
//! takes an [`ExtensionContext`]. Unknown types are preserved in an
//! [`Extension::Unknown`] arm for inspection but are never re-emitted.

use crate::codec::{varint_len, Reader, Writer};
use crate::error::{DecodeError, Error, ProtocolViolation};
use crate::tls::cipher::{NamedGroup, SignatureScheme};

// Extension type codes (canonical table; duplicated codepoints across
// registries never collide here).
pub const EXT_SERVER_NAME: u16 = 0x0000;
pub const EXT_SUPPORTED_GROUPS: u16 = 0x000a;
pub const EXT_SIGNATURE_ALGORITHMS: u16 = 0x000d;
pub const EXT_ALPN: u16 = 0x0010;
pub const EXT_RECORD_SIZE_LIMIT: u16 = 0x001c;
pub const EXT_PRE_SHARED_KEY: u16 = 0x0029;
pub const EXT_EARLY_DATA: u16 = 0x002a;
pub const EXT_SUPPORTED_VERSIONS: u16 = 0x002b;
pub const EXT_PSK_KEY_EXCHANGE_MODES: u16 = 0x002d;
pub const EXT_KEY_SHARE: u16 = 0x0033;
pub const EXT_QUIC_TRANSPORT_PARAMS: u16 = 0x0039;

/// TLS 1.3 protocol version codepoint.
pub const TLS13_VERSION: u16 = 0x0304;

/// Which handshake message the extension list belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionContext {
    ClientHello,
    ServerHello,
    HelloRetryRequest,
    EncryptedExtensions,
    NewSessionTicket,
}

/// One entry in a key_share list: a group and its public key bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyShareEntry {
    pub group: NamedGroup,
    pub key_exchange: heapless::Vec<u8, 72>,
}

impl KeyShareEntry {
    pub fn new(group: NamedGroup, key: &[u8]) -> Result<Self, Error> {
        let mut key_exchange = heapless::Vec::new();
        key_exchange
            .extend_from_slice(key)
            .map_err(|_| Error::Resource(crate::error::ResourceError::BufferExhausted))?;
        Ok(Self {
            group,
            key_exchange,
        })
    }

    fn wire_len(&self) -> usize {
        2 + 2 + self.key_exchange.len()
    }

    fn encode(&self, w: &mut Writer<'_>) -> Result<(), Error> {
        w.u16(self.group.to_u16())?;
        w.vec16(&self.key_exchange)
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self, Error> {
        let group = NamedGroup::from_u16(r.u16()?);
        let key = r.vec16()?;
        Self::new(group, key)
    }
}

/// key_share is polymorphic over the enclosing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyShare {
    /// ClientHello: zero or more offered shares.
    ClientShares(heapless::Vec<KeyShareEntry, 3>),
    /// ServerHello: the single chosen share.
    ServerShare(KeyShareEntry),
    /// HelloRetryRequest: just the group the client must retry with.
    RetrySelectedGroup(NamedGroup),
}

/// supported_versions: a list in ClientHello, a single selected version
/// in ServerHello and HelloRetryRequest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupportedVersions {
    List(heapless::Vec<u16, 4>),
    Selected(u16),
}

/// A PSK identity: the opaque ticket plus its obfuscated age.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PskIdentity {
    pub identity: heapless::Vec<u8, 256>,
    pub obfuscated_ticket_age: u32,
}

/// The ClientHello pre_shared_key payload. Binder values occupy the
/// tail of the ClientHello; [`PskOffer::binders_wire_len`] tells the
/// handshake layer how many trailing bytes to exclude from the
/// binder transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PskOffer {
    pub identities: heapless::Vec<PskIdentity, 2>,
    pub binders: heapless::Vec<heapless::Vec<u8, 48>, 2>,
}

impl PskOffer {
    /// Wire size of the binders list, including its 2-byte length prefix.
    pub fn binders_wire_len(&self) -> usize {
        2 + self
            .binders
            .iter()
            .map(|b| 1 + b.len())
            .sum::<usize>()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreSharedKey {
    /// ClientHello: identities plus binders.
    Offer(PskOffer),
    /// ServerHello: index of the accepted identity.
    SelectedIdentity(u16),
}

/// psk_key_exchange_modes values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PskKeyExchangeMode {
    PskKe,
    PskDheKe,
    Unknown(u8),
}

impl PskKeyExchangeMode {
    pub fn to_u8(self) -> u8 {
        match self {
            Self::PskKe => 0,
            Self::PskDheKe => 1,
            Self::Unknown(v) => v,
        }
    }

    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::PskKe,
            1 => Self::PskDheKe,
            other => Self::Unknown(other),
        }
    }
}

/// QUIC transport parameters (RFC 9000 §18), carried as a TLS extension
/// when the handshake runs inside QUIC.
///
/// Encoded as (id: varint, length: varint, value) triples. Unknown ids
/// are preserved in `grease` and re-emitted on encode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportParams {
    pub max_idle_timeout: u64,
    pub max_udp_payload_size: u64,
    pub initial_max_data: u64,
    pub initial_max_stream_data_bidi_local: u64,
    pub initial_max_stream_data_bidi_remote: u64,
    pub initial_max_stream_data_uni: u64,
    pub initial_max_streams_bidi: u64,
    pub initial_max_streams_uni: u64,
    pub ack_delay_exponent: u64,
    pub max_ack_delay: u64,
    pub active_connection_id_limit: u64,
    /// Unrecognized parameters, preserved verbatim.
    pub grease: heapless::Vec<(u64, heapless::Vec<u8, 16>), 4>,
}

const PARAM_MAX_IDLE_TIMEOUT: u64 = 0x01;
const PARAM_MAX_UDP_PAYLOAD_SIZE: u64 = 0x03;
const PARAM_INITIAL_MAX_DATA: u64 = 0x04;
const PARAM_INITIAL_MAX_STREAM_DATA_BIDI_LOCAL: u64 = 0x05;
const PARAM_INITIAL_MAX_STREAM_DATA_BIDI_REMOTE: u64 = 0x06;
const PARAM_INITIAL_MAX_STREAM_DATA_UNI: u64 = 0x07;
const PARAM_INITIAL_MAX_STREAMS_BIDI: u64 = 0x08;
const PARAM_INITIAL_MAX_STREAMS_UNI: u64 = 0x09;
const PARAM_ACK_DELAY_EXPONENT: u64 = 0x0a;
const PARAM_MAX_ACK_DELAY: u64 = 0x0b;
const PARAM_ACTIVE_CONNECTION_ID_LIMIT: u64 = 0x0e;

impl TransportParams {
    /// Transport parameters with sensible defaults.
    pub fn default_params() -> Self {
        Self {
            max_idle_timeout: 30_000,
            max_udp_payload_size: 65527,
            initial_max_data: 1_048_576,
            initial_max_stream_data_bidi_local: 262_144,
            initial_max_stream_data_bidi_remote: 262_144,
            initial_max_stream_data_uni: 262_144,
            initial_max_streams_bidi: 100,
            initial_max_streams_uni: 100,
            ack_delay_exponent: 3,
            max_ack_delay: 25,
            active_connection_id_limit: 2,
            grease: heapless::Vec::new(),
        }
    }

    fn int_params(&self) -> [(u64, u64); 11] {
        [
            (PARAM_MAX_IDLE_TIMEOUT, self.max_idle_timeout),
            (PARAM_MAX_UDP_PAYLOAD_SIZE, self.max_udp_payload_size),
            (PARAM_INITIAL_MAX_DATA, self.initial_max_data),
            (
                PARAM_INITIAL_MAX_STREAM_DATA_BIDI_LOCAL,
                self.initial_max_stream_data_bidi_local,
            ),
            (
                PARAM_INITIAL_MAX_STREAM_DATA_BIDI_REMOTE,
                self.initial_max_stream_data_bidi_remote,
            ),
            (
                PARAM_INITIAL_MAX_STREAM_DATA_UNI,
                self.initial_max_stream_data_uni,
            ),
            (PARAM_INITIAL_MAX_STREAMS_BIDI, self.initial_max_streams_bidi),
            (PARAM_INITIAL_MAX_STREAMS_UNI, self.initial_max_streams_uni),
            (PARAM_ACK_DELAY_EXPONENT, self.ack_delay_exponent),
            (PARAM_MAX_ACK_DELAY, self.max_ack_delay),
            (
                PARAM_ACTIVE_CONNECTION_ID_LIMIT,
                self.active_connection_id_limit,
            ),
        ]
    }

    pub fn wire_len(&self) -> usize {
        let ints: usize = self
            .int_params()
            .iter()
            .map(|&(id, v)| varint_len(id) + varint_len(varint_len(v) as u64) + varint_len(v))
            .sum();
        let grease: usize = self
            .grease
            .iter()
            .map(|(id, v)| varint_len(*id) + varint_len(v.len() as u64) + v.len())
            .sum();
        ints + grease
    }

    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), Error> {
        for (id, value) in self.int_params() {
            w.varint(id)?;
            w.varint(varint_len(value) as u64)?;
            w.varint(value)?;
        }
        for (id, value) in &self.grease {
            w.varint(*id)?;
            w.varint(value.len() as u64)?;
            w.slice(value)?;
        }
        Ok(())
    }

    pub fn decode(data: &[u8]) -> Result<Self, Error> {
        let mut params = Self {
            max_idle_timeout: 0,
            max_udp_payload_size: 65527,
            initial_max_data: 0,
            initial_max_stream_data_bidi_local: 0,
            initial_max_stream_data_bidi_remote: 0,
            initial_max_stream_data_uni: 0,
            initial_max_streams_bidi: 0,
            initial_max_streams_uni: 0,
            ack_delay_exponent: 3,
            max_ack_delay: 25,
            active_connection_id_limit: 2,
            grease: heapless::Vec::new(),
        };

        let mut r = Reader::new(data);
        while !r.is_empty() {
            let id = r.varint()?;
            let len = r.varint()? as usize;
            let value = r.take(len).map_err(|_| Error::from(DecodeError::Overlong))?;

            match id {
                PARAM_MAX_IDLE_TIMEOUT
                | PARAM_MAX_UDP_PAYLOAD_SIZE
                | PARAM_INITIAL_MAX_DATA
                | PARAM_INITIAL_MAX_STREAM_DATA_BIDI_LOCAL
                | PARAM_INITIAL_MAX_STREAM_DATA_BIDI_REMOTE
                | PARAM_INITIAL_MAX_STREAM_DATA_UNI
                | PARAM_INITIAL_MAX_STREAMS_BIDI
                | PARAM_INITIAL_MAX_STREAMS_UNI
                | PARAM_ACK_DELAY_EXPONENT
                | PARAM_MAX_ACK_DELAY
                | PARAM_ACTIVE_CONNECTION_ID_LIMIT => {
                    let mut vr = Reader::new(value);
                    let v = vr.varint()?;
                    match id {
                        PARAM_MAX_IDLE_TIMEOUT => params.max_idle_timeout = v,
                        PARAM_MAX_UDP_PAYLOAD_SIZE => params.max_udp_payload_size = v,
                        PARAM_INITIAL_MAX_DATA => params.initial_max_data = v,
                        PARAM_INITIAL_MAX_STREAM_DATA_BIDI_LOCAL => {
                            params.initial_max_stream_data_bidi_local = v
                        }
                        PARAM_INITIAL_MAX_STREAM_DATA_BIDI_REMOTE => {
                            params.initial_max_stream_data_bidi_remote = v
                        }
                        PARAM_INITIAL_MAX_STREAM_DATA_UNI => {
                            params.initial_max_stream_data_uni = v
                        }
                        PARAM_INITIAL_MAX_STREAMS_BIDI => params.initial_max_streams_bidi = v,
                        PARAM_INITIAL_MAX_STREAMS_UNI => params.initial_max_streams_uni = v,
                        PARAM_ACK_DELAY_EXPONENT => params.ack_delay_exponent = v,
                        PARAM_MAX_ACK_DELAY => params.max_ack_delay = v,
                        PARAM_ACTIVE_CONNECTION_ID_LIMIT => {
                            params.active_connection_id_limit = v
                        }
                        _ => unreachable!(),
                    }
                }
                _ => {
                    // Preserve unknown ids so GREASE round-trips.
                    let mut body = heapless::Vec::new();
                    if body.extend_from_slice(value).is_ok() {
                        let _ = params.grease.push((id, body));
                    }
                }
            }
        }

        Ok(params)
    }
}

/// A decoded TLS extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extension {
    ServerName(heapless::String<64>),
    SupportedGroups(heapless::Vec<NamedGroup, 8>),
    SignatureAlgorithms(heapless::Vec<SignatureScheme, 8>),
    Alpn(heapless::Vec<heapless::Vec<u8, 16>, 4>),
    SupportedVersions(SupportedVersions),
    KeyShare(KeyShare),
    PreSharedKey(PreSharedKey),
    PskModes(heapless::Vec<PskKeyExchangeMode, 2>),
    /// Empty in ClientHello and EncryptedExtensions; carries
    /// max_early_data_size in NewSessionTicket.
    EarlyData(Option<u32>),
    RecordSizeLimit(u16),
    QuicTransportParams(TransportParams),
    /// Preserved for inspection; never re-encoded.
    Unknown {
        ext_type: u16,
        body: heapless::Vec<u8, 512>,
    },
}

impl Extension {
    pub fn ext_type(&self) -> u16 {
        match self {
            Self::ServerName(_) => EXT_SERVER_NAME,
            Self::SupportedGroups(_) => EXT_SUPPORTED_GROUPS,
            Self::SignatureAlgorithms(_) => EXT_SIGNATURE_ALGORITHMS,
            Self::Alpn(_) => EXT_ALPN,
            Self::SupportedVersions(_) => EXT_SUPPORTED_VERSIONS,
            Self::KeyShare(_) => EXT_KEY_SHARE,
            Self::PreSharedKey(_) => EXT_PRE_SHARED_KEY,
            Self::PskModes(_) => EXT_PSK_KEY_EXCHANGE_MODES,
            Self::EarlyData(_) => EXT_EARLY_DATA,
            Self::RecordSizeLimit(_) => EXT_RECORD_SIZE_LIMIT,
            Self::QuicTransportParams(_) => EXT_QUIC_TRANSPORT_PARAMS,
            Self::Unknown { ext_type, .. } => *ext_type,
        }
    }

    fn body_len(&self) -> usize {
        match self {
            Self::ServerName(name) => 2 + 1 + 2 + name.len(),
            Self::SupportedGroups(groups) => 2 + 2 * groups.len(),
            Self::SignatureAlgorithms(schemes) => 2 + 2 * schemes.len(),
            Self::Alpn(protocols) => 2 + protocols.iter().map(|p| 1 + p.len()).sum::<usize>(),
            Self::SupportedVersions(SupportedVersions::List(versions)) => 1 + 2 * versions.len(),
            Self::SupportedVersions(SupportedVersions::Selected(_)) => 2,
            Self::KeyShare(KeyShare::ClientShares(entries)) => {
                2 + entries.iter().map(KeyShareEntry::wire_len).sum::<usize>()
            }
            Self::KeyShare(KeyShare::ServerShare(entry)) => entry.wire_len(),
            Self::KeyShare(KeyShare::RetrySelectedGroup(_)) => 2,
            Self::PreSharedKey(PreSharedKey::Offer(offer)) => {
                let identities: usize = offer
                    .identities
                    .iter()
                    .map(|i| 2 + i.identity.len() + 4)
                    .sum();
                2 + identities + offer.binders_wire_len()
            }
            Self::PreSharedKey(PreSharedKey::SelectedIdentity(_)) => 2,
            Self::PskModes(modes) => 1 + modes.len(),
            Self::EarlyData(None) => 0,
            Self::EarlyData(Some(_)) => 4,
            Self::RecordSizeLimit(_) => 2,
            Self::QuicTransportParams(tp) => tp.wire_len(),
            Self::Unknown { .. } => 0,
        }
    }

    /// Total encoded size (type + length + body). Zero for `Unknown`,
    /// which is suppressed on encode.
    pub fn wire_len(&self) -> usize {
        match self {
            Self::Unknown { .. } => 0,
            _ => 4 + self.body_len(),
        }
    }

    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), Error> {
        if matches!(self, Self::Unknown { .. }) {
            return Ok(());
        }
        w.u16(self.ext_type())?;
        w.length_prefixed(2, |w| self.encode_body(w))
    }

    fn encode_body(&self, w: &mut Writer<'_>) -> Result<(), Error> {
        match self {
            Self::ServerName(name) => w.length_prefixed(2, |w| {
                w.u8(0)?; // host_name
                w.vec16(name.as_bytes())
            }),
            Self::SupportedGroups(groups) => w.length_prefixed(2, |w| {
                for g in groups {
                    w.u16(g.to_u16())?;
                }
                Ok(())
            }),
            Self::SignatureAlgorithms(schemes) => w.length_prefixed(2, |w| {
                for s in schemes {
                    w.u16(s.to_u16())?;
                }
                Ok(())
            }),
            Self::Alpn(protocols) => w.length_prefixed(2, |w| {
                for p in protocols {
                    w.vec8(p)?;
                }
                Ok(())
            }),
            Self::SupportedVersions(SupportedVersions::List(versions)) => {
                w.length_prefixed(1, |w| {
                    for v in versions {
                        w.u16(*v)?;
                    }
                    Ok(())
                })
            }
            Self::SupportedVersions(SupportedVersions::Selected(v)) => w.u16(*v),
            Self::KeyShare(KeyShare::ClientShares(entries)) => w.length_prefixed(2, |w| {
                for e in entries {
                    e.encode(w)?;
                }
                Ok(())
            }),
            Self::KeyShare(KeyShare::ServerShare(entry)) => entry.encode(w),
            Self::KeyShare(KeyShare::RetrySelectedGroup(group)) => w.u16(group.to_u16()),
            Self::PreSharedKey(PreSharedKey::Offer(offer)) => {
                w.length_prefixed(2, |w| {
                    for id in &offer.identities {
                        w.vec16(&id.identity)?;
                        w.u32(id.obfuscated_ticket_age)?;
                    }
                    Ok(())
                })?;
                w.length_prefixed(2, |w| {
                    for b in &offer.binders {
                        w.vec8(b)?;
                    }
                    Ok(())
                })
            }
            Self::PreSharedKey(PreSharedKey::SelectedIdentity(idx)) => w.u16(*idx),
            Self::PskModes(modes) => w.length_prefixed(1, |w| {
                for m in modes {
                    w.u8(m.to_u8())?;
                }
                Ok(())
            }),
            Self::EarlyData(None) => Ok(()),
            Self::EarlyData(Some(max)) => w.u32(*max),
            Self::RecordSizeLimit(limit) => w.u16(*limit),
            Self::QuicTransportParams(tp) => tp.encode(w),
            Self::Unknown { .. } => Ok(()),
        }
    }

    /// Decode one extension (type, length, body) from `r`.
    pub fn decode(r: &mut Reader<'_>, ctx: ExtensionContext) -> Result<Self, Error> {
        let ext_type = r.u16()?;
        let body = r.vec16()?;

        match Self::decode_body(ext_type, body, ctx) {
            Ok(Some(ext)) => Ok(ext),
            Ok(None) => Ok(Self::unknown(ext_type, body)),
            Err(e) => {
                if Self::error_is_fatal(ext_type) {
                    Err(e)
                } else {
                    // RFC 8446 §4.2 permits ignoring this one; keep the
                    // bytes around for inspection.
                    Ok(Self::unknown(ext_type, body))
                }
            }
        }
    }

    fn unknown(ext_type: u16, body: &[u8]) -> Self {
        let mut stored = heapless::Vec::new();
        // Bodies beyond capacity (e.g. jumbo padding) lose their bytes
        // but keep the type code.
        let _ = stored.extend_from_slice(body);
        Self::Unknown {
            ext_type,
            body: stored,
        }
    }

    /// Malformed key exchange material must abort the handshake; a
    /// malformed name or protocol list may be dropped.
    fn error_is_fatal(ext_type: u16) -> bool {
        matches!(
            ext_type,
            EXT_KEY_SHARE
                | EXT_SUPPORTED_VERSIONS
                | EXT_PRE_SHARED_KEY
                | EXT_PSK_KEY_EXCHANGE_MODES
                | EXT_EARLY_DATA
                | EXT_RECORD_SIZE_LIMIT
                | EXT_QUIC_TRANSPORT_PARAMS
        )
    }

    fn decode_body(
        ext_type: u16,
        body: &[u8],
        ctx: ExtensionContext,
    ) -> Result<Option<Self>, Error> {
        use ExtensionContext as Ctx;
        let mut r = Reader::new(body);

        let ext = match ext_type {
            EXT_SERVER_NAME => {
                if body.is_empty() {
                    // Server echo in EncryptedExtensions is empty.
                    Self::ServerName(heapless::String::new())
                } else {
                    let mut list = Reader::new(r.vec16()?);
                    let name_type = list.u8()?;
                    if name_type != 0 {
                        return Err(DecodeError::InvalidValue.into());
                    }
                    let name = list.vec16()?;
                    let s = core::str::from_utf8(name)
                        .map_err(|_| Error::from(DecodeError::InvalidValue))?;
                    let mut stored = heapless::String::new();
                    stored
                        .push_str(s)
                        .map_err(|_| Error::from(DecodeError::Overlong))?;
                    Self::ServerName(stored)
                }
            }
            EXT_SUPPORTED_GROUPS => {
                let mut list = Reader::new(r.vec16()?);
                let mut groups = heapless::Vec::new();
                while !list.is_empty() {
                    let g = NamedGroup::from_u16(list.u16()?);
                    // Overflow just drops the tail; peers may offer
                    // long GREASE-padded lists.
                    let _ = groups.push(g);
                }
                Self::SupportedGroups(groups)
            }
            EXT_SIGNATURE_ALGORITHMS => {
                let mut list = Reader::new(r.vec16()?);
                let mut schemes = heapless::Vec::new();
                while !list.is_empty() {
                    let _ = schemes.push(SignatureScheme::from_u16(list.u16()?));
                }
                Self::SignatureAlgorithms(schemes)
            }
            EXT_ALPN => {
                let mut list = Reader::new(r.vec16()?);
                let mut protocols = heapless::Vec::new();
                while !list.is_empty() {
                    let name = list.vec8()?;
                    if name.is_empty() {
                        return Err(DecodeError::InvalidValue.into());
                    }
                    let mut p = heapless::Vec::new();
                    p.extend_from_slice(name)
                        .map_err(|_| Error::from(DecodeError::Overlong))?;
                    protocols
                        .push(p)
                        .map_err(|_| Error::from(DecodeError::Overlong))?;
                }
                Self::Alpn(protocols)
            }
            EXT_SUPPORTED_VERSIONS => match ctx {
                Ctx::ClientHello => {
                    let mut list = Reader::new(r.vec8()?);
                    let mut versions = heapless::Vec::new();
                    while !list.is_empty() {
                        let _ = versions.push(list.u16()?);
                    }
                    Self::SupportedVersions(SupportedVersions::List(versions))
                }
                Ctx::ServerHello | Ctx::HelloRetryRequest => {
                    Self::SupportedVersions(SupportedVersions::Selected(r.u16()?))
                }
                _ => return Err(ProtocolViolation::ExtensionInWrongContext.into()),
            },
            EXT_KEY_SHARE => match ctx {
                Ctx::ClientHello => {
                    let mut list = Reader::new(r.vec16()?);
                    let mut entries: heapless::Vec<KeyShareEntry, 3> = heapless::Vec::new();
                    while !list.is_empty() {
                        let group = NamedGroup::from_u16(list.u16()?);
                        let key = list.vec16()?;
                        if key.is_empty() {
                            return Err(DecodeError::InvalidValue.into());
                        }
                        // Duplicate groups are illegal.
                        if entries.iter().any(|e| e.group == group) {
                            return Err(ProtocolViolation::IllegalParameter.into());
                        }
                        // Shares we cannot run anyway (large FFDHE
                        // blobs and the like) stay unparsed.
                        if key.len() <= 72 {
                            let _ = entries.push(KeyShareEntry::new(group, key)?);
                        }
                    }
                    Self::KeyShare(KeyShare::ClientShares(entries))
                }
                Ctx::ServerHello => Self::KeyShare(KeyShare::ServerShare(KeyShareEntry::decode(
                    &mut r,
                )?)),
                Ctx::HelloRetryRequest => {
                    Self::KeyShare(KeyShare::RetrySelectedGroup(NamedGroup::from_u16(r.u16()?)))
                }
                _ => return Err(ProtocolViolation::ExtensionInWrongContext.into()),
            },
            EXT_PRE_SHARED_KEY => match ctx {
                Ctx::ClientHello => {
                    let mut ids = Reader::new(r.vec16()?);
                    let mut identities = heapless::Vec::new();
                    while !ids.is_empty() {
                        let identity_bytes = ids.vec16()?;
                        if identity_bytes.is_empty() {
                            return Err(DecodeError::InvalidValue.into());
                        }
                        let mut identity = heapless::Vec::new();
                        identity
                            .extend_from_slice(identity_bytes)
                            .map_err(|_| Error::from(DecodeError::Overlong))?;
                        let obfuscated_ticket_age = ids.u32()?;
                        identities
                            .push(PskIdentity {
                                identity,
                                obfuscated_ticket_age,
                            })
                            .map_err(|_| Error::from(DecodeError::Overlong))?;
                    }
                    let mut raw_binders = Reader::new(r.vec16()?);
                    let mut binders = heapless::Vec::new();
                    while !raw_binders.is_empty() {
                        let b = raw_binders.vec8()?;
                        if b.len() < 32 {
                            return Err(DecodeError::InvalidValue.into());
                        }
                        let mut binder = heapless::Vec::new();
                        binder
                            .extend_from_slice(b)
                            .map_err(|_| Error::from(DecodeError::Overlong))?;
                        binders
                            .push(binder)
                            .map_err(|_| Error::from(DecodeError::Overlong))?;
                    }
                    if binders.len() != identities.len() {
                        return Err(ProtocolViolation::IllegalParameter.into());
                    }
                    Self::PreSharedKey(PreSharedKey::Offer(PskOffer {
                        identities,
                        binders,
                    }))
                }
                Ctx::ServerHello => {
                    Self::PreSharedKey(PreSharedKey::SelectedIdentity(r.u16()?))
                }
                _ => return Err(ProtocolViolation::ExtensionInWrongContext.into()),
            },
            EXT_PSK_KEY_EXCHANGE_MODES => {
                if ctx != Ctx::ClientHello {
                    return Err(ProtocolViolation::ExtensionInWrongContext.into());
                }
                let mut list = Reader::new(r.vec8()?);
                let mut modes = heapless::Vec::new();
                while !list.is_empty() {
                    let _ = modes.push(PskKeyExchangeMode::from_u8(list.u8()?));
                }
                Self::PskModes(modes)
            }
            EXT_EARLY_DATA => match ctx {
                Ctx::ClientHello | Ctx::EncryptedExtensions => {
                    if !body.is_empty() {
                        return Err(DecodeError::InvalidValue.into());
                    }
                    Self::EarlyData(None)
                }
                Ctx::NewSessionTicket => Self::EarlyData(Some(r.u32()?)),
                _ => return Err(ProtocolViolation::ExtensionInWrongContext.into()),
            },
            EXT_RECORD_SIZE_LIMIT => {
                let limit = r.u16()?;
                // RFC 8449 §4: TLS 1.3 bounds the limit to [64, 2^14+1].
                if !(64..=16385).contains(&limit) {
                    return Err(ProtocolViolation::IllegalParameter.into());
                }
                Self::RecordSizeLimit(limit)
            }
            EXT_QUIC_TRANSPORT_PARAMS => Self::QuicTransportParams(TransportParams::decode(body)?),
            _ => return Ok(None),
        };

        Ok(Some(ext))
    }
}

/// Decode an extension list (2-byte total length already stripped).
///
/// Rejects duplicate extension types, and enforces that a ClientHello
/// pre_shared_key comes last.
pub fn decode_extensions(
    data: &[u8],
    ctx: ExtensionContext,
) -> Result<heapless::Vec<Extension, 16>, Error> {
    let mut r = Reader::new(data);
    let mut extensions: heapless::Vec<Extension, 16> = heapless::Vec::new();
    let mut seen: heapless::Vec<u16, 24> = heapless::Vec::new();

    while !r.is_empty() {
        let ext = Extension::decode(&mut r, ctx)?;
        let ext_type = ext.ext_type();

        if seen.contains(&ext_type) {
            return Err(ProtocolViolation::DuplicateExtension.into());
        }
        let _ = seen.push(ext_type);

        if ctx == ExtensionContext::ClientHello {
            if let Some(prev) = extensions.last() {
                if prev.ext_type() == EXT_PRE_SHARED_KEY {
                    // pre_shared_key must terminate the list.
                    return Err(ProtocolViolation::IllegalParameter.into());
                }
            }
        }

        extensions
            .push(ext)
            .map_err(|_| Error::from(DecodeError::Overlong))?;
    }

    Ok(extensions)
}

/// Encode an extension list with its 2-byte total length. `Unknown`
/// entries are suppressed.
pub fn encode_extensions(w: &mut Writer<'_>, extensions: &[Extension]) -> Result<(), Error> {
    w.length_prefixed(2, |w| {
        for ext in extensions {
            ext.encode(w)?;
        }
        Ok(())
    })
}

/// Total wire size of an encoded extension list, including the 2-byte
/// list length.
pub fn extensions_wire_len(extensions: &[Extension]) -> usize {
    2 + extensions.iter().map(Extension::wire_len).sum::<usize>()
}

/// Find an extension by type.
pub fn find_extension<'a>(extensions: &'a [Extension], ext_type: u16) -> Option<&'a Extension> {
    extensions.iter().find(|e| e.ext_type() == ext_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(ext: &Extension, ctx: ExtensionContext) -> Extension {
        let mut buf = [0u8; 1024];
        let mut w = Writer::new(&mut buf);
        ext.encode(&mut w).unwrap();
        let len = w.len();
        assert_eq!(len, ext.wire_len(), "wire_len mismatch for {ext:?}");

        let mut r = Reader::new(&buf[..len]);
        let decoded = Extension::decode(&mut r, ctx).unwrap();
        assert!(r.is_empty());
        decoded
    }

    #[test]
    fn server_name_roundtrip() {
        let ext = Extension::ServerName(heapless::String::try_from("example.com").unwrap());
        assert_eq!(roundtrip(&ext, ExtensionContext::ClientHello), ext);
    }

    #[test]
    fn supported_groups_roundtrip() {
        let mut groups = heapless::Vec::new();
        groups.push(NamedGroup::X25519).unwrap();
        groups.push(NamedGroup::Secp256r1).unwrap();
        let ext = Extension::SupportedGroups(groups);
        assert_eq!(roundtrip(&ext, ExtensionContext::ClientHello), ext);
    }

    #[test]
    fn key_share_polymorphism() {
        let entry = KeyShareEntry::new(NamedGroup::X25519, &[0x42; 32]).unwrap();

        let mut shares = heapless::Vec::new();
        shares.push(entry.clone()).unwrap();
        let ch = Extension::KeyShare(KeyShare::ClientShares(shares));
        assert_eq!(roundtrip(&ch, ExtensionContext::ClientHello), ch);

        let sh = Extension::KeyShare(KeyShare::ServerShare(entry));
        assert_eq!(roundtrip(&sh, ExtensionContext::ServerHello), sh);

        let hrr = Extension::KeyShare(KeyShare::RetrySelectedGroup(NamedGroup::X25519));
        assert_eq!(roundtrip(&hrr, ExtensionContext::HelloRetryRequest), hrr);
    }

    #[test]
    fn supported_versions_polymorphism() {
        let mut versions = heapless::Vec::new();
        versions.push(TLS13_VERSION).unwrap();
        let list = Extension::SupportedVersions(SupportedVersions::List(versions));
        assert_eq!(roundtrip(&list, ExtensionContext::ClientHello), list);

        let sel = Extension::SupportedVersions(SupportedVersions::Selected(TLS13_VERSION));
        assert_eq!(roundtrip(&sel, ExtensionContext::ServerHello), sel);
    }

    #[test]
    fn psk_offer_roundtrip_and_binder_len() {
        let mut identity = heapless::Vec::new();
        identity.extend_from_slice(&[0x11; 16]).unwrap();
        let mut identities = heapless::Vec::new();
        identities
            .push(PskIdentity {
                identity,
                obfuscated_ticket_age: 0x12345678,
            })
            .unwrap();
        let mut binder = heapless::Vec::new();
        binder.extend_from_slice(&[0u8; 32]).unwrap();
        let mut binders = heapless::Vec::new();
        binders.push(binder).unwrap();

        let offer = PskOffer {
            identities,
            binders,
        };
        assert_eq!(offer.binders_wire_len(), 2 + 1 + 32);

        let ext = Extension::PreSharedKey(PreSharedKey::Offer(offer));
        assert_eq!(roundtrip(&ext, ExtensionContext::ClientHello), ext);

        let sel = Extension::PreSharedKey(PreSharedKey::SelectedIdentity(0));
        assert_eq!(roundtrip(&sel, ExtensionContext::ServerHello), sel);
    }

    #[test]
    fn early_data_shapes() {
        let empty = Extension::EarlyData(None);
        assert_eq!(roundtrip(&empty, ExtensionContext::ClientHello), empty);

        let nst = Extension::EarlyData(Some(16384));
        assert_eq!(roundtrip(&nst, ExtensionContext::NewSessionTicket), nst);
    }

    #[test]
    fn record_size_limit_bounds() {
        let ext = Extension::RecordSizeLimit(512);
        assert_eq!(roundtrip(&ext, ExtensionContext::ClientHello), ext);

        // 63 is below the TLS 1.3 floor.
        let mut buf = [0u8; 16];
        let mut w = Writer::new(&mut buf);
        w.u16(EXT_RECORD_SIZE_LIMIT).unwrap();
        w.u16(2).unwrap();
        w.u16(63).unwrap();
        let len = w.len();
        let mut r = Reader::new(&buf[..len]);
        assert_eq!(
            Extension::decode(&mut r, ExtensionContext::ClientHello),
            Err(Error::Protocol(ProtocolViolation::IllegalParameter))
        );
    }

    #[test]
    fn unknown_preserved_but_not_reemitted() {
        // A GREASE extension: type 0x3a3a with a 3-byte body.
        let mut buf = [0u8; 16];
        let mut w = Writer::new(&mut buf);
        w.u16(0x3a3a).unwrap();
        w.u16(3).unwrap();
        w.slice(&[1, 2, 3]).unwrap();
        let len = w.len();

        let mut r = Reader::new(&buf[..len]);
        let ext = Extension::decode(&mut r, ExtensionContext::ClientHello).unwrap();
        match &ext {
            Extension::Unknown { ext_type, body } => {
                assert_eq!(*ext_type, 0x3a3a);
                assert_eq!(body.as_slice(), &[1, 2, 3]);
            }
            other => panic!("expected Unknown, got {other:?}"),
        }

        // Re-encoding writes nothing.
        assert_eq!(ext.wire_len(), 0);
        let mut out = [0u8; 16];
        let mut w = Writer::new(&mut out);
        ext.encode(&mut w).unwrap();
        assert_eq!(w.len(), 0);
    }

    #[test]
    fn duplicate_extension_rejected() {
        let mut buf = [0u8; 32];
        let mut w = Writer::new(&mut buf);
        for _ in 0..2 {
            w.u16(EXT_RECORD_SIZE_LIMIT).unwrap();
            w.u16(2).unwrap();
            w.u16(512).unwrap();
        }
        let len = w.len();
        assert_eq!(
            decode_extensions(&buf[..len], ExtensionContext::ClientHello),
            Err(Error::Protocol(ProtocolViolation::DuplicateExtension))
        );
    }

    #[test]
    fn psk_must_be_last_in_client_hello() {
        let mut buf = [0u8; 80];
        let mut w = Writer::new(&mut buf);
        // pre_shared_key (selected-identity shape is invalid in CH, but
        // the ordering check trips first on the *next* extension).
        w.u16(EXT_PRE_SHARED_KEY).unwrap();
        w.u16(59).unwrap();
        // identities: one 16-byte identity
        w.u16(22).unwrap();
        w.u16(16).unwrap();
        w.slice(&[0x11; 16]).unwrap();
        w.u32(0).unwrap();
        // binders: one 32-byte binder
        w.u16(33).unwrap();
        w.u8(32).unwrap();
        w.slice(&[0u8; 32]).unwrap();
        // then a trailing extension
        w.u16(EXT_RECORD_SIZE_LIMIT).unwrap();
        w.u16(2).unwrap();
        w.u16(512).unwrap();
        let len = w.len();
        assert_eq!(
            decode_extensions(&buf[..len], ExtensionContext::ClientHello),
            Err(Error::Protocol(ProtocolViolation::IllegalParameter))
        );
    }

    #[test]
    fn malformed_key_share_is_fatal() {
        // key_share in ServerHello with a truncated key.
        let mut buf = [0u8; 16];
        let mut w = Writer::new(&mut buf);
        w.u16(EXT_KEY_SHARE).unwrap();
        w.u16(4).unwrap();
        w.u16(0x001d).unwrap();
        w.u16(32).unwrap(); // claims 32 key bytes, none follow
        let len = w.len();
        let mut r = Reader::new(&buf[..len]);
        assert!(Extension::decode(&mut r, ExtensionContext::ServerHello).is_err());
    }

    #[test]
    fn malformed_server_name_is_dropped_not_fatal() {
        // server_name with a bogus name_type; ignorable per RFC 8446 §4.2.
        let mut buf = [0u8; 16];
        let mut w = Writer::new(&mut buf);
        w.u16(EXT_SERVER_NAME).unwrap();
        w.u16(5).unwrap();
        w.u16(3).unwrap();
        w.u8(7).unwrap(); // not host_name
        w.u16(0).unwrap();
        let len = w.len();
        let mut r = Reader::new(&buf[..len]);
        let ext = Extension::decode(&mut r, ExtensionContext::ClientHello).unwrap();
        assert!(matches!(ext, Extension::Unknown { ext_type: 0, .. }));
    }

    #[test]
    fn transport_params_roundtrip() {
        let params = TransportParams::default_params();
        let mut buf = [0u8; 256];
        let mut w = Writer::new(&mut buf);
        params.encode(&mut w).unwrap();
        let len = w.len();
        assert_eq!(len, params.wire_len());

        let decoded = TransportParams::decode(&buf[..len]).unwrap();
        assert_eq!(decoded, params);
    }

    #[test]
    fn transport_params_grease_preserved_and_reemitted() {
        let mut params = TransportParams::default_params();
        let mut val = heapless::Vec::new();
        val.extend_from_slice(&[0xaa, 0xbb]).unwrap();
        params.grease.push((0x1b57, val)).unwrap();

        let mut buf = [0u8; 256];
        let mut w = Writer::new(&mut buf);
        params.encode(&mut w).unwrap();
        let len = w.len();
        assert_eq!(len, params.wire_len());

        let decoded = TransportParams::decode(&buf[..len]).unwrap();
        assert_eq!(decoded.grease.len(), 1);
        assert_eq!(decoded.grease[0].0, 0x1b57);
        assert_eq!(decoded.grease[0].1.as_slice(), &[0xaa, 0xbb]);
    }

    #[test]
    fn transport_params_overlong_value_rejected() {
        // id=1, claims 4-byte value with only 1 byte present.
        let data = [0x01, 0x04, 0x25];
        assert!(TransportParams::decode(&data).is_err());
    }

    #[test]
    fn extension_list_roundtrip() {
        let mut groups = heapless::Vec::new();
        groups.push(NamedGroup::X25519).unwrap();
        let mut versions = heapless::Vec::new();
        versions.push(TLS13_VERSION).unwrap();

        let exts = [
            Extension::SupportedGroups(groups),
            Extension::SupportedVersions(SupportedVersions::List(versions)),
            Extension::RecordSizeLimit(4096),
        ];

        let mut buf = [0u8; 256];
        let mut w = Writer::new(&mut buf);
        encode_extensions(&mut w, &exts).unwrap();
        let len = w.len();
        assert_eq!(len, extensions_wire_len(&exts));

        let mut r = Reader::new(&buf[..len]);
        let body = r.vec16().unwrap();
        let decoded = decode_extensions(body, ExtensionContext::ClientHello).unwrap();
        assert_eq!(decoded.len(), 3);
        assert!(find_extension(&decoded, EXT_RECORD_SIZE_LIMIT).is_some());
        assert!(find_extension(&decoded, EXT_ALPN).is_none());
    }

    #[test]
    fn early_data_wrong_context_fatal() {
        let mut buf = [0u8; 8];
        let mut w = Writer::new(&mut buf);
        w.u16(EXT_EARLY_DATA).unwrap();
        w.u16(0).unwrap();
        let len = w.len();
        let mut r = Reader::new(&buf[..len]);
        assert_eq!(
            Extension::decode(&mut r, ExtensionContext::ServerHello),
            Err(Error::Protocol(ProtocolViolation::ExtensionInWrongContext))
        );
    }
}
