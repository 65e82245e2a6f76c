/// Wire decoding failures (RFC 8446 §6: these surface as `decode_error`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// The reader ran out of bytes mid-field.
    Truncated,
    /// A length field exceeds the enclosing frame.
    Overlong,
    /// A strictly-bounded enum carried an unrecognized value.
    InvalidValue,
    /// A record carried a content type not valid in the current state.
    UnexpectedContentType,
}

/// Peer behavior that violates RFC 8446 ordering or content rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolViolation {
    /// A handshake message arrived that the current state does not accept.
    UnexpectedMessage,
    /// A field carried a forbidden or inconsistent value.
    IllegalParameter,
    /// A mandatory extension is absent.
    MissingExtension,
    /// The same extension type appeared twice in one message.
    DuplicateExtension,
    /// An extension appeared in a message that may not carry it.
    ExtensionInWrongContext,
    /// The peer does not speak TLS 1.3.
    UnsupportedVersion,
}

/// Cryptographic verification failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    /// AEAD open failed (authentication tag mismatch).
    AeadOpenFailure,
    /// CertificateVerify signature did not verify.
    SignatureInvalid,
    /// Finished MAC or PSK binder mismatch.
    FinishedMismatch,
    /// HKDF expand refused (label too long, output too large).
    HkdfFailure,
}

/// Local resource exhaustion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceError {
    /// A fixed-capacity buffer overflowed.
    BufferExhausted,
    /// A record sequence number reached 2^64 - 1.
    SequenceNumberOverflow,
}

/// Byte-stream conditions from the transport. These never emit alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// Orderly end of stream.
    Eof,
    /// Connection reset by peer.
    Reset,
}

/// Negotiation dead ends — nothing both sides support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    NoCommonCipher,
    NoCommonGroup,
    NoCommonSignatureScheme,
}

/// Top-level crate error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Malformed bytes on the wire.
    Decode(DecodeError),
    /// Peer violated the protocol.
    Protocol(ProtocolViolation),
    /// Cryptographic check failed.
    Crypto(CryptoError),
    /// Local resource exhausted.
    Resource(ResourceError),
    /// Transport-level condition.
    Transport(TransportError),
    /// No mutually acceptable parameters.
    Config(ConfigError),
    /// The peer sent a fatal alert with this description code.
    PeerAlert(u8),
    /// Caller-provided buffer too small.
    BufferTooSmall { needed: usize },
    /// Would block — no data available.
    WouldBlock,
    /// Invalid state for the requested operation.
    InvalidState,
    /// Connection is closed.
    Closed,
}

impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Self {
        Error::Decode(e)
    }
}

impl From<ProtocolViolation> for Error {
    fn from(e: ProtocolViolation) -> Self {
        Error::Protocol(e)
    }
}

impl From<CryptoError> for Error {
    fn from(e: CryptoError) -> Self {
        Error::Crypto(e)
    }
}

impl From<ResourceError> for Error {
    fn from(e: ResourceError) -> Self {
        Error::Resource(e)
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Error::Transport(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e)
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Decode(e) => write!(f, "decode error: {e:?}"),
            Error::Protocol(e) => write!(f, "protocol violation: {e:?}"),
            Error::Crypto(e) => write!(f, "crypto failure: {e:?}"),
            Error::Resource(e) => write!(f, "resource error: {e:?}"),
            Error::Transport(e) => write!(f, "transport error: {e:?}"),
            Error::Config(e) => write!(f, "configuration error: {e:?}"),
            Error::PeerAlert(desc) => write!(f, "peer sent fatal alert {desc}"),
            Error::BufferTooSmall { needed } => {
                write!(f, "buffer too small, need {needed} bytes")
            }
            Error::WouldBlock => write!(f, "would block"),
            Error::InvalidState => write!(f, "invalid state"),
            Error::Closed => write!(f, "connection closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_conversions() {
        let e: Error = DecodeError::Truncated.into();
        assert_eq!(e, Error::Decode(DecodeError::Truncated));
        let e: Error = ProtocolViolation::UnexpectedMessage.into();
        assert_eq!(e, Error::Protocol(ProtocolViolation::UnexpectedMessage));
        let e: Error = CryptoError::AeadOpenFailure.into();
        assert_eq!(e, Error::Crypto(CryptoError::AeadOpenFailure));
        let e: Error = ConfigError::NoCommonCipher.into();
        assert_eq!(e, Error::Config(ConfigError::NoCommonCipher));
    }

    #[test]
    fn display_is_informative() {
        extern crate std;
        use std::string::ToString;
        let s = Error::BufferTooSmall { needed: 42 }.to_string();
        assert!(s.contains("42"));
        let s = Error::PeerAlert(40).to_string();
        assert!(s.contains("40"));
    }
}
