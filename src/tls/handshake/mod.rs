//! TLS 1.3 handshake engine.
//!
//! One [`TlsEngine`] drives either role:
//!
//! ```text
//! client: Start -> WaitServerHello -> WaitEncryptedExtensions ->
//!         WaitCertCr -> WaitCert -> WaitCertificateVerify ->
//!         WaitServerFinished -> Connected
//!         (HelloRetryRequest loops through WaitServerHello exactly once)
//!
//! server: WaitClientHello -> [WaitEndOfEarlyData] ->
//!         WaitClientFinished -> Connected
//! ```
//!
//! The engine consumes complete handshake messages, produces outgoing
//! flights tagged with the epoch that must protect them, and hands
//! traffic secrets to the record layer through [`DerivedSecrets`].

mod client;
mod server;

use core::cell::RefCell;

use crate::error::{Error, ProtocolViolation};
use crate::tls::cipher::{
    CipherSuite, NamedGroup, SignatureScheme, SuiteHkdf, ALL_SUITES,
};
use crate::tls::extensions::TransportParams;
use crate::tls::key_schedule::{self, KeySchedule, Secret};
use crate::tls::keylog::{KeyLog, NO_KEY_LOG};
use crate::tls::messages::{
    read_handshake_header, HandshakeType, KeyUpdate, HEADER_LEN,
};
use crate::tls::ticket::{Ticket, TicketStore};
use crate::tls::transcript::TranscriptHash;
use crate::tls::{DerivedSecrets, Epoch, TlsSession};

/// Client or server role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Handshake states for both roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandshakeState {
    // --- Client ---
    Start,
    WaitServerHello,
    WaitEncryptedExtensions,
    /// Certificate or CertificateRequest may arrive next.
    WaitCertCr,
    WaitCert,
    WaitCertificateVerify,
    WaitServerFinished,

    // --- Server ---
    WaitClientHello,
    WaitEndOfEarlyData,
    WaitClientFinished,

    // --- Shared ---
    Connected,
}

/// Where 0-RTT stands on this connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EarlyDataState {
    NotOffered,
    Offered,
    Accepted,
    Rejected,
}

/// Chain validation hook, called at the CertificateVerify boundary with
/// the end-entity certificate and the name the client asked for.
/// Full X.509 path building is the implementation's concern, not ours.
pub trait CertValidator {
    fn validate(&self, end_entity_der: &[u8], server_name: &str) -> Result<(), Error>;
}

/// Default group preference.
pub const DEFAULT_GROUPS: &[NamedGroup] = &[NamedGroup::X25519, NamedGroup::Secp256r1];

/// Schemes the bundled verifier can actually check.
pub const DEFAULT_VERIFY_SCHEMES: &[SignatureScheme] = &[
    SignatureScheme::Ed25519,
    SignatureScheme::EcdsaSecp256r1Sha256,
];

/// Configuration for a client-side engine.
pub struct TlsConfig {
    /// Server name for SNI; empty disables the extension.
    pub server_name: heapless::String<64>,
    /// ALPN protocols to offer, most preferred first.
    pub alpn_protocols: &'static [&'static [u8]],
    /// Cipher suites to offer, most preferred first.
    pub cipher_suites: &'static [CipherSuite],
    /// Groups for supported_groups, most preferred first. A key share
    /// is generated only for the first; HelloRetryRequest covers the rest.
    pub groups: &'static [NamedGroup],
    /// Signature schemes accepted in the server CertificateVerify.
    pub signature_schemes: &'static [SignatureScheme],
    /// DER-encoded pinned server certificates. Empty skips pinning.
    pub pinned_certs: &'static [&'static [u8]],
    /// Chain validation hook, called before signature verification.
    pub validator: Option<&'static dyn CertValidator>,
    /// NSS-format key log sink.
    pub key_log: &'static dyn KeyLog,
    /// Our record_size_limit to advertise, if any.
    pub record_size_limit: Option<u16>,
    /// Session ticket to resume with.
    pub ticket: Option<Ticket>,
    /// Offer 0-RTT when the ticket permits it.
    pub enable_early_data: bool,
    /// QUIC transport parameters; `Some` enables the extension.
    pub transport_params: Option<TransportParams>,
    /// Caller's clock, milliseconds. Used for ticket ages only.
    pub now_ms: u64,
}

impl TlsConfig {
    pub fn new(server_name: &str) -> Self {
        Self {
            server_name: heapless::String::try_from(server_name).unwrap_or_default(),
            alpn_protocols: &[],
            cipher_suites: ALL_SUITES,
            groups: DEFAULT_GROUPS,
            signature_schemes: DEFAULT_VERIFY_SCHEMES,
            pinned_certs: &[],
            validator: None,
            key_log: &NO_KEY_LOG,
            record_size_limit: None,
            ticket: None,
            enable_early_data: false,
            transport_params: None,
            now_ms: 0,
        }
    }
}

/// Configuration for a server-side engine.
pub struct ServerTlsConfig {
    /// DER-encoded server certificate. Ed25519 and P-256 keys are
    /// auto-detected.
    pub cert_der: &'static [u8],
    /// 32-byte private key (Ed25519 seed or P-256 scalar) matching the
    /// certificate.
    pub private_key_der: &'static [u8],
    /// ALPN protocols supported, most preferred first.
    pub alpn_protocols: &'static [&'static [u8]],
    /// Cipher suite preference order.
    pub cipher_suites: &'static [CipherSuite],
    /// Group preference order.
    pub groups: &'static [NamedGroup],
    /// NSS-format key log sink.
    pub key_log: &'static dyn KeyLog,
    /// Our record_size_limit to advertise, if any.
    pub record_size_limit: Option<u16>,
    /// Shared ticket store; `None` disables resumption entirely.
    pub ticket_store: Option<&'static RefCell<TicketStore>>,
    /// How many NewSessionTickets to issue after the handshake.
    pub send_tickets: u8,
    /// Ticket lifetime in seconds, clamped to seven days.
    pub ticket_lifetime_secs: u32,
    /// Early data budget advertised in tickets; zero disables 0-RTT.
    pub max_early_data: u32,
    /// QUIC transport parameters; `Some` enables the extension.
    pub transport_params: Option<TransportParams>,
    /// Caller's clock, milliseconds.
    pub now_ms: u64,
}

impl ServerTlsConfig {
    pub fn new(cert_der: &'static [u8], private_key_der: &'static [u8]) -> Self {
        Self {
            cert_der,
            private_key_der,
            alpn_protocols: &[],
            cipher_suites: ALL_SUITES,
            groups: DEFAULT_GROUPS,
            key_log: &NO_KEY_LOG,
            record_size_limit: None,
            ticket_store: None,
            send_tickets: 1,
            ticket_lifetime_secs: 7200,
            max_early_data: 0,
            transport_params: None,
            now_ms: 0,
        }
    }
}

/// ECDHE keypair for the groups this crate runs.
pub(crate) enum KeyExchange {
    X25519(x25519_dalek::StaticSecret),
    P256(p256::SecretKey),
}

impl KeyExchange {
    pub(crate) fn generate(group: NamedGroup, seed: &[u8; 32]) -> Result<Self, Error> {
        match group {
            NamedGroup::X25519 => Ok(Self::X25519(x25519_dalek::StaticSecret::from(*seed))),
            NamedGroup::Secp256r1 => {
                let sk = p256::SecretKey::from_slice(seed).map_err(|_| Error::InvalidState)?;
                Ok(Self::P256(sk))
            }
            _ => Err(Error::Config(crate::error::ConfigError::NoCommonGroup)),
        }
    }

    pub(crate) fn group(&self) -> NamedGroup {
        match self {
            Self::X25519(_) => NamedGroup::X25519,
            Self::P256(_) => NamedGroup::Secp256r1,
        }
    }

    pub(crate) fn public_key(&self) -> heapless::Vec<u8, 72> {
        let mut out = heapless::Vec::new();
        match self {
            Self::X25519(sk) => {
                let pk = x25519_dalek::PublicKey::from(sk);
                let _ = out.extend_from_slice(pk.as_bytes());
            }
            Self::P256(sk) => {
                use p256::elliptic_curve::sec1::ToEncodedPoint;
                let point = sk.public_key().to_encoded_point(false);
                let _ = out.extend_from_slice(point.as_bytes());
            }
        }
        out
    }

    /// Run the key exchange against the peer's public bytes.
    /// Both groups yield a 32-byte shared secret (the P-256 x-coordinate).
    pub(crate) fn shared_secret(&self, peer: &[u8]) -> Result<[u8; 32], Error> {
        match self {
            Self::X25519(sk) => {
                let peer_bytes: [u8; 32] = peer
                    .try_into()
                    .map_err(|_| Error::Protocol(ProtocolViolation::IllegalParameter))?;
                let shared = sk.diffie_hellman(&x25519_dalek::PublicKey::from(peer_bytes));
                Ok(*shared.as_bytes())
            }
            Self::P256(sk) => {
                let peer_pk = p256::PublicKey::from_sec1_bytes(peer)
                    .map_err(|_| Error::Protocol(ProtocolViolation::IllegalParameter))?;
                let shared =
                    p256::ecdh::diffie_hellman(sk.to_nonzero_scalar(), peer_pk.as_affine());
                let mut out = [0u8; 32];
                out.copy_from_slice(shared.raw_secret_bytes());
                Ok(out)
            }
        }
    }
}

const FLIGHT_BUF: usize = 4096;

/// TLS 1.3 handshake engine.
pub struct TlsEngine {
    pub(crate) role: Role,
    pub(crate) state: HandshakeState,

    // Merged configuration.
    pub(crate) server_name: heapless::String<64>,
    pub(crate) alpn_protocols: &'static [&'static [u8]],
    pub(crate) cipher_suites: &'static [CipherSuite],
    pub(crate) groups: &'static [NamedGroup],
    pub(crate) signature_schemes: &'static [SignatureScheme],
    pub(crate) pinned_certs: &'static [&'static [u8]],
    pub(crate) validator: Option<&'static dyn CertValidator>,
    pub(crate) key_log: &'static dyn KeyLog,
    pub(crate) record_size_limit_cfg: Option<u16>,
    pub(crate) transport_params: Option<TransportParams>,
    pub(crate) now_ms: u64,

    // Server-only configuration.
    pub(crate) server_cert_der: &'static [u8],
    pub(crate) server_private_key_der: &'static [u8],
    pub(crate) ticket_store: Option<&'static RefCell<TicketStore>>,
    pub(crate) send_tickets: u8,
    pub(crate) ticket_lifetime_secs: u32,
    pub(crate) max_early_data_cfg: u32,

    // Keypair material.
    pub(crate) key_seed: [u8; 32],
    pub(crate) random: [u8; 32],
    pub(crate) client_random: [u8; 32],
    pub(crate) key_exchange: Option<KeyExchange>,

    // Negotiated parameters and schedule.
    pub(crate) suite: Option<CipherSuite>,
    pub(crate) schedule: Option<KeySchedule>,
    pub(crate) client_hs_secret: Option<Secret>,
    pub(crate) server_hs_secret: Option<Secret>,
    pub(crate) client_app_secret: Option<Secret>,
    pub(crate) server_app_secret: Option<Secret>,
    pub(crate) exporter_secret: Option<Secret>,
    pub(crate) early_exporter_secret: Option<Secret>,
    pub(crate) resumption_master: Option<Secret>,

    pub(crate) transcript: TranscriptHash,
    pub(crate) retry_done: bool,
    pub(crate) session_id: heapless::Vec<u8, 32>,

    // PSK / 0-RTT.
    pub(crate) ticket: Option<Ticket>,
    pub(crate) enable_early_data: bool,
    pub(crate) psk_offered: bool,
    pub(crate) psk_accepted: bool,
    pub(crate) early_data: EarlyDataState,
    pub(crate) accepted_max_early_data: u32,
    pub(crate) client_cert_context: Option<heapless::Vec<u8, 32>>,

    // Outgoing flights, one buffer per epoch.
    pub(crate) pending_plain: heapless::Vec<u8, FLIGHT_BUF>,
    pub(crate) pending_early: heapless::Vec<u8, 8>,
    pub(crate) pending_hs: heapless::Vec<u8, FLIGHT_BUF>,
    pub(crate) pending_app: heapless::Vec<u8, 1024>,

    // Secrets waiting for the record layer.
    pub(crate) pending_secrets: heapless::Deque<DerivedSecrets, 4>,

    // Results.
    pub(crate) negotiated_alpn: Option<heapless::Vec<u8, 16>>,
    pub(crate) peer_transport_params: Option<TransportParams>,
    pub(crate) peer_record_size_limit: Option<u16>,
    pub(crate) server_cert_data: heapless::Vec<u8, 2048>,
    pub(crate) tickets_out: heapless::Deque<Ticket, 2>,
    pub(crate) complete: bool,
}

impl TlsEngine {
    /// Create a client engine.
    ///
    /// `key_seed` feeds the ECDHE keypair, `random` becomes the
    /// ClientHello random; both must come from a CSPRNG.
    pub fn new_client(config: TlsConfig, key_seed: [u8; 32], random: [u8; 32]) -> Self {
        let mut session_id = heapless::Vec::new();
        // A non-empty legacy_session_id keeps middleboxes comfortable.
        let _ = session_id.extend_from_slice(&random);

        Self {
            role: Role::Client,
            state: HandshakeState::Start,
            server_name: config.server_name,
            alpn_protocols: config.alpn_protocols,
            cipher_suites: config.cipher_suites,
            groups: config.groups,
            signature_schemes: config.signature_schemes,
            pinned_certs: config.pinned_certs,
            validator: config.validator,
            key_log: config.key_log,
            record_size_limit_cfg: config.record_size_limit,
            transport_params: config.transport_params,
            now_ms: config.now_ms,
            server_cert_der: &[],
            server_private_key_der: &[],
            ticket_store: None,
            send_tickets: 0,
            ticket_lifetime_secs: 0,
            max_early_data_cfg: 0,
            key_seed,
            random,
            client_random: random,
            key_exchange: None,
            suite: None,
            schedule: None,
            client_hs_secret: None,
            server_hs_secret: None,
            client_app_secret: None,
            server_app_secret: None,
            exporter_secret: None,
            early_exporter_secret: None,
            resumption_master: None,
            transcript: TranscriptHash::new(),
            retry_done: false,
            session_id,
            ticket: config.ticket,
            enable_early_data: config.enable_early_data,
            psk_offered: false,
            psk_accepted: false,
            early_data: EarlyDataState::NotOffered,
            accepted_max_early_data: 0,
            client_cert_context: None,
            pending_plain: heapless::Vec::new(),
            pending_early: heapless::Vec::new(),
            pending_hs: heapless::Vec::new(),
            pending_app: heapless::Vec::new(),
            pending_secrets: heapless::Deque::new(),
            negotiated_alpn: None,
            peer_transport_params: None,
            peer_record_size_limit: None,
            server_cert_data: heapless::Vec::new(),
            tickets_out: heapless::Deque::new(),
            complete: false,
        }
    }

    /// Create a server engine. `random` becomes the ServerHello random.
    pub fn new_server(config: ServerTlsConfig, key_seed: [u8; 32], random: [u8; 32]) -> Self {
        Self {
            role: Role::Server,
            state: HandshakeState::WaitClientHello,
            server_name: heapless::String::new(),
            alpn_protocols: config.alpn_protocols,
            cipher_suites: config.cipher_suites,
            groups: config.groups,
            signature_schemes: DEFAULT_VERIFY_SCHEMES,
            pinned_certs: &[],
            validator: None,
            key_log: config.key_log,
            record_size_limit_cfg: config.record_size_limit,
            transport_params: config.transport_params,
            now_ms: config.now_ms,
            server_cert_der: config.cert_der,
            server_private_key_der: config.private_key_der,
            ticket_store: config.ticket_store,
            send_tickets: config.send_tickets,
            ticket_lifetime_secs: config.ticket_lifetime_secs,
            max_early_data_cfg: config.max_early_data,
            key_seed,
            random,
            client_random: [0u8; 32],
            key_exchange: None,
            suite: None,
            schedule: None,
            client_hs_secret: None,
            server_hs_secret: None,
            client_app_secret: None,
            server_app_secret: None,
            exporter_secret: None,
            early_exporter_secret: None,
            resumption_master: None,
            transcript: TranscriptHash::new(),
            retry_done: false,
            session_id: heapless::Vec::new(),
            ticket: None,
            enable_early_data: false,
            psk_offered: false,
            psk_accepted: false,
            early_data: EarlyDataState::NotOffered,
            accepted_max_early_data: 0,
            client_cert_context: None,
            pending_plain: heapless::Vec::new(),
            pending_early: heapless::Vec::new(),
            pending_hs: heapless::Vec::new(),
            pending_app: heapless::Vec::new(),
            pending_secrets: heapless::Deque::new(),
            negotiated_alpn: None,
            peer_transport_params: None,
            peer_record_size_limit: None,
            server_cert_data: heapless::Vec::new(),
            tickets_out: heapless::Deque::new(),
            complete: false,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// The negotiated cipher suite, once known.
    pub fn cipher_suite(&self) -> Option<CipherSuite> {
        self.suite
    }

    /// Where 0-RTT stands.
    pub fn early_data_state(&self) -> EarlyDataState {
        self.early_data
    }

    /// Early data budget granted by the PSK (server side).
    pub fn accepted_max_early_data(&self) -> u32 {
        self.accepted_max_early_data
    }

    /// Server: still expecting EndOfEarlyData, so incoming protected
    /// records use the early traffic keys.
    pub fn awaiting_end_of_early_data(&self) -> bool {
        self.state == HandshakeState::WaitEndOfEarlyData
    }

    /// Whether the peer accepted our PSK (client) or we accepted the
    /// client's (server).
    pub fn psk_in_use(&self) -> bool {
        self.psk_accepted
    }

    /// Peer's record_size_limit, if it sent one.
    pub fn peer_record_size_limit(&self) -> Option<u16> {
        self.peer_record_size_limit
    }

    /// Peer's QUIC transport parameters, if present.
    pub fn peer_transport_params(&self) -> Option<&TransportParams> {
        self.peer_transport_params.as_ref()
    }

    /// Pull a session ticket received from the server.
    pub fn take_ticket(&mut self) -> Option<Ticket> {
        self.tickets_out.pop_front()
    }

    /// RFC 8446 §7.5 exporter. Only valid once the handshake completed.
    pub fn export_keying_material(
        &self,
        label: &[u8],
        context: &[u8],
        out: &mut [u8],
    ) -> Result<(), Error> {
        let exporter = self.exporter_secret.as_ref().ok_or(Error::InvalidState)?;
        let hkdf = SuiteHkdf::new(self.suite.ok_or(Error::InvalidState)?.hash());
        key_schedule::export_keying_material(hkdf, exporter.as_slice(), label, context, out)
    }

    /// Early exporter (RFC 8446 §7.5), available once 0-RTT keys were
    /// derived. The hash is the one the early secret was extracted
    /// with, recoverable from the secret length.
    pub fn export_early_keying_material(
        &self,
        label: &[u8],
        context: &[u8],
        out: &mut [u8],
    ) -> Result<(), Error> {
        let exporter = self
            .early_exporter_secret
            .as_ref()
            .ok_or(Error::InvalidState)?;
        let alg = if exporter.len() == 48 {
            crate::tls::cipher::HashAlg::Sha384
        } else {
            crate::tls::cipher::HashAlg::Sha256
        };
        key_schedule::export_keying_material(
            SuiteHkdf::new(alg),
            exporter.as_slice(),
            label,
            context,
            out,
        )
    }

    /// Initiate a KeyUpdate: replaces our application send secret and,
    /// when `request_peer` is set, asks the peer to do the same.
    pub fn initiate_key_update(&mut self, request_peer: bool) -> Result<(), Error> {
        if !self.complete {
            return Err(Error::InvalidState);
        }
        let hkdf = self.hkdf()?;

        let mut msg = [0u8; 8];
        let len = KeyUpdate {
            request_update: request_peer,
        }
        .encode(&mut msg)?;
        self.queue_app(&msg[..len])?;

        let current = match self.role {
            Role::Client => self.client_app_secret.as_ref(),
            Role::Server => self.server_app_secret.as_ref(),
        }
        .ok_or(Error::InvalidState)?;
        let updated = key_schedule::update_traffic_secret(hkdf, current.as_slice())?;
        match self.role {
            Role::Client => self.client_app_secret = Some(updated.clone()),
            Role::Server => self.server_app_secret = Some(updated.clone()),
        }
        self.push_secrets(DerivedSecrets {
            epoch: Epoch::Application,
            suite: self.suite.ok_or(Error::InvalidState)?,
            send: Some(updated),
            recv: None,
        })
    }

    // ------------------------------------------------------------------
    // Shared internals
    // ------------------------------------------------------------------

    pub(crate) fn hkdf(&self) -> Result<SuiteHkdf, Error> {
        Ok(SuiteHkdf::new(
            self.suite.ok_or(Error::InvalidState)?.hash(),
        ))
    }

    pub(crate) fn log_secret(&self, label: &str, secret: &Secret) {
        self.key_log
            .log(label, &self.client_random, secret.as_slice());
    }

    pub(crate) fn push_secrets(&mut self, secrets: DerivedSecrets) -> Result<(), Error> {
        self.pending_secrets
            .push_back(secrets)
            .map_err(|_| crate::error::ResourceError::BufferExhausted.into())
    }

    pub(crate) fn queue_plain(&mut self, data: &[u8]) -> Result<(), Error> {
        self.pending_plain
            .extend_from_slice(data)
            .map_err(|_| crate::error::ResourceError::BufferExhausted.into())
    }

    pub(crate) fn queue_early(&mut self, data: &[u8]) -> Result<(), Error> {
        self.pending_early
            .extend_from_slice(data)
            .map_err(|_| crate::error::ResourceError::BufferExhausted.into())
    }

    pub(crate) fn queue_hs(&mut self, data: &[u8]) -> Result<(), Error> {
        self.pending_hs
            .extend_from_slice(data)
            .map_err(|_| crate::error::ResourceError::BufferExhausted.into())
    }

    pub(crate) fn queue_app(&mut self, data: &[u8]) -> Result<(), Error> {
        self.pending_app
            .extend_from_slice(data)
            .map_err(|_| crate::error::ResourceError::BufferExhausted.into())
    }

    /// Process a received KeyUpdate (both roles, post-handshake).
    pub(crate) fn handle_key_update(&mut self, ku: KeyUpdate) -> Result<(), Error> {
        let hkdf = self.hkdf()?;

        // The peer's send direction is our recv direction.
        let peer_secret = match self.role {
            Role::Client => self.server_app_secret.as_ref(),
            Role::Server => self.client_app_secret.as_ref(),
        }
        .ok_or(Error::InvalidState)?;
        let updated_recv = key_schedule::update_traffic_secret(hkdf, peer_secret.as_slice())?;
        match self.role {
            Role::Client => self.server_app_secret = Some(updated_recv.clone()),
            Role::Server => self.client_app_secret = Some(updated_recv.clone()),
        }
        self.push_secrets(DerivedSecrets {
            epoch: Epoch::Application,
            suite: self.suite.ok_or(Error::InvalidState)?,
            send: None,
            recv: Some(updated_recv),
        })?;

        if ku.request_update {
            self.initiate_key_update(false)?;
        }
        Ok(())
    }

    /// Epoch at which the current state expects handshake input.
    fn expected_epoch(&self) -> Result<Epoch, Error> {
        use HandshakeState::*;
        Ok(match (self.role, self.state) {
            (Role::Client, WaitServerHello) => Epoch::Plaintext,
            (
                Role::Client,
                WaitEncryptedExtensions | WaitCertCr | WaitCert | WaitCertificateVerify
                | WaitServerFinished,
            ) => Epoch::Handshake,
            (Role::Server, WaitClientHello) => Epoch::Plaintext,
            (Role::Server, WaitEndOfEarlyData) => Epoch::EarlyData,
            (Role::Server, WaitClientFinished) => Epoch::Handshake,
            (_, Connected) => Epoch::Application,
            _ => return Err(Error::InvalidState),
        })
    }
}

impl TlsSession for TlsEngine {
    fn read_handshake(&mut self, epoch: Epoch, data: &[u8]) -> Result<(), Error> {
        // Multiple complete messages may be concatenated.
        let mut off = 0;
        while off < data.len() {
            if epoch != self.expected_epoch()? {
                return Err(ProtocolViolation::UnexpectedMessage.into());
            }

            let remaining = &data[off..];
            let (msg_type_byte, body_len) = read_handshake_header(remaining)?;
            let msg_len = HEADER_LEN + body_len;
            if remaining.len() < msg_len {
                return Err(crate::error::DecodeError::Truncated.into());
            }

            let full_msg = &remaining[..msg_len];
            let msg_body = &remaining[HEADER_LEN..msg_len];
            let msg_type = HandshakeType::from_u8(msg_type_byte)
                .ok_or(Error::from(ProtocolViolation::UnexpectedMessage))?;

            match self.role {
                Role::Client => self.handle_server_message(msg_type, full_msg, msg_body)?,
                Role::Server => self.handle_client_message(msg_type, full_msg, msg_body)?,
            }

            off += msg_len;
        }
        Ok(())
    }

    fn write_handshake(&mut self, buf: &mut [u8]) -> Result<(usize, Epoch), Error> {
        // The client's first flight is built lazily on the first write.
        if self.role == Role::Client && self.state == HandshakeState::Start {
            self.build_client_hello()?;
        }

        if !self.pending_plain.is_empty() {
            let len = self.pending_plain.len();
            if buf.len() < len {
                return Err(Error::BufferTooSmall { needed: len });
            }
            buf[..len].copy_from_slice(&self.pending_plain);
            self.pending_plain.clear();
            return Ok((len, Epoch::Plaintext));
        }
        if !self.pending_early.is_empty() {
            let len = self.pending_early.len();
            if buf.len() < len {
                return Err(Error::BufferTooSmall { needed: len });
            }
            buf[..len].copy_from_slice(&self.pending_early);
            self.pending_early.clear();
            return Ok((len, Epoch::EarlyData));
        }
        if !self.pending_hs.is_empty() {
            let len = self.pending_hs.len();
            if buf.len() < len {
                return Err(Error::BufferTooSmall { needed: len });
            }
            buf[..len].copy_from_slice(&self.pending_hs);
            self.pending_hs.clear();
            return Ok((len, Epoch::Handshake));
        }
        if !self.pending_app.is_empty() {
            let len = self.pending_app.len();
            if buf.len() < len {
                return Err(Error::BufferTooSmall { needed: len });
            }
            buf[..len].copy_from_slice(&self.pending_app);
            self.pending_app.clear();
            return Ok((len, Epoch::Application));
        }

        Ok((0, Epoch::Plaintext))
    }

    fn derived_secrets(&mut self) -> Option<DerivedSecrets> {
        self.pending_secrets.pop_front()
    }

    fn is_complete(&self) -> bool {
        self.complete
    }

    fn alpn(&self) -> Option<&[u8]> {
        self.negotiated_alpn.as_deref()
    }
}

/// Constant-time equality for MAC and binder comparison.
pub(crate) fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;
    a.len() == b.len() && bool::from(a.ct_eq(b))
}
