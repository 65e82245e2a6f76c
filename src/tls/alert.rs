//! TLS 1.3 alerts (RFC 8446 §6).

use crate::error::{
    ConfigError, CryptoError, DecodeError, Error, ProtocolViolation, ResourceError,
};

/// TLS alert description codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AlertDescription {
    CloseNotify = 0,
    UnexpectedMessage = 10,
    BadRecordMac = 20,
    RecordOverflow = 22,
    HandshakeFailure = 40,
    BadCertificate = 42,
    CertificateExpired = 45,
    CertificateUnknown = 46,
    IllegalParameter = 47,
    UnknownCa = 48,
    DecodeError = 50,
    DecryptError = 51,
    ProtocolVersion = 70,
    InsufficientSecurity = 71,
    InternalError = 80,
    UserCanceled = 90,
    MissingExtension = 109,
    UnsupportedExtension = 110,
    UnrecognizedName = 112,
    NoApplicationProtocol = 120,
}

impl AlertDescription {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::CloseNotify),
            10 => Some(Self::UnexpectedMessage),
            20 => Some(Self::BadRecordMac),
            22 => Some(Self::RecordOverflow),
            40 => Some(Self::HandshakeFailure),
            42 => Some(Self::BadCertificate),
            45 => Some(Self::CertificateExpired),
            46 => Some(Self::CertificateUnknown),
            47 => Some(Self::IllegalParameter),
            48 => Some(Self::UnknownCa),
            50 => Some(Self::DecodeError),
            51 => Some(Self::DecryptError),
            70 => Some(Self::ProtocolVersion),
            71 => Some(Self::InsufficientSecurity),
            80 => Some(Self::InternalError),
            90 => Some(Self::UserCanceled),
            109 => Some(Self::MissingExtension),
            110 => Some(Self::UnsupportedExtension),
            112 => Some(Self::UnrecognizedName),
            120 => Some(Self::NoApplicationProtocol),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Alerts that end the connection without being an error.
    pub fn is_graceful(self) -> bool {
        matches!(self, Self::CloseNotify | Self::UserCanceled)
    }
}

/// Alert level codes. TLS 1.3 treats everything but close_notify and
/// user_canceled as fatal regardless of the transmitted level.
pub const LEVEL_WARNING: u8 = 1;
pub const LEVEL_FATAL: u8 = 2;

/// Decode a 2-byte alert payload into (level, description).
pub fn decode_alert(data: &[u8]) -> Result<(u8, u8), Error> {
    if data.len() != 2 {
        return Err(DecodeError::Truncated.into());
    }
    Ok((data[0], data[1]))
}

/// Encode an alert payload.
pub fn encode_alert(level: u8, desc: AlertDescription) -> [u8; 2] {
    [level, desc.to_u8()]
}

/// Map a local error to the alert this side must emit before closing.
///
/// Transport errors and connection-API misuse produce no alert. The
/// Config mapping is the server's answer to a negotiation dead end;
/// a client suppresses it and keeps its misconfiguration local (the
/// record layer consults the role before emitting).
pub fn alert_for_error(err: &Error) -> Option<AlertDescription> {
    match err {
        Error::Decode(_) => Some(AlertDescription::DecodeError),
        Error::Protocol(v) => Some(match v {
            ProtocolViolation::UnexpectedMessage => AlertDescription::UnexpectedMessage,
            ProtocolViolation::IllegalParameter => AlertDescription::IllegalParameter,
            ProtocolViolation::MissingExtension => AlertDescription::MissingExtension,
            ProtocolViolation::DuplicateExtension => AlertDescription::IllegalParameter,
            ProtocolViolation::ExtensionInWrongContext => AlertDescription::UnsupportedExtension,
            ProtocolViolation::UnsupportedVersion => AlertDescription::ProtocolVersion,
        }),
        Error::Crypto(c) => Some(match c {
            CryptoError::AeadOpenFailure => AlertDescription::BadRecordMac,
            CryptoError::SignatureInvalid => AlertDescription::DecryptError,
            CryptoError::FinishedMismatch => AlertDescription::DecryptError,
            CryptoError::HkdfFailure => AlertDescription::InternalError,
        }),
        Error::Resource(r) => Some(match r {
            ResourceError::BufferExhausted => AlertDescription::InternalError,
            ResourceError::SequenceNumberOverflow => AlertDescription::InternalError,
        }),
        Error::Config(c) => Some(match c {
            ConfigError::NoCommonCipher => AlertDescription::HandshakeFailure,
            ConfigError::NoCommonGroup => AlertDescription::HandshakeFailure,
            ConfigError::NoCommonSignatureScheme => AlertDescription::HandshakeFailure,
        }),
        Error::BufferTooSmall { .. } => Some(AlertDescription::InternalError),
        Error::Transport(_)
        | Error::PeerAlert(_)
        | Error::WouldBlock
        | Error::InvalidState
        | Error::Closed => None,
    }
}
