//! Client side of the handshake engine.

use super::{ct_eq, EarlyDataState, HandshakeState, KeyExchange, TlsEngine};
use crate::error::{
    ConfigError, CryptoError, DecodeError, Error, ProtocolViolation,
};
use crate::tls::cipher::CipherSuite;
use crate::tls::extensions::{
    find_extension, Extension, KeyShare, KeyShareEntry, PreSharedKey, PskIdentity,
    PskKeyExchangeMode, PskOffer, SupportedVersions, EXT_KEY_SHARE, EXT_PRE_SHARED_KEY,
    EXT_SUPPORTED_VERSIONS, TLS13_VERSION,
};
use crate::tls::key_schedule::{self, KeySchedule};
use crate::tls::keylog;
use crate::tls::messages::{
    detect_downgrade, encode_end_of_early_data, Certificate, CertificateRequest,
    CertificateVerify, ClientHello, EncryptedExtensions, Finished, HandshakeType,
    NewSessionTicket, ServerHello,
};
use crate::tls::ticket::Ticket;
use crate::tls::{DerivedSecrets, Epoch};

impl TlsEngine {
    /// Build the ClientHello (and, with a usable ticket, the PSK binder
    /// and early traffic keys). Called on the first `write_handshake`
    /// and again after a HelloRetryRequest.
    pub(super) fn build_client_hello(&mut self) -> Result<(), Error> {
        if self.key_exchange.is_none() {
            let group = self
                .groups
                .iter()
                .copied()
                .find(|g| g.is_supported())
                .ok_or(Error::Config(ConfigError::NoCommonGroup))?;
            self.key_exchange = Some(KeyExchange::generate(group, &self.key_seed)?);
        }
        let kx = self.key_exchange.as_ref().ok_or(Error::InvalidState)?;

        let mut extensions: heapless::Vec<Extension, 16> = heapless::Vec::new();
        let push =
            |exts: &mut heapless::Vec<Extension, 16>, e: Extension| -> Result<(), Error> {
                exts.push(e)
                    .map_err(|_| crate::error::ResourceError::BufferExhausted.into())
            };

        if !self.server_name.is_empty() {
            push(&mut extensions, Extension::ServerName(self.server_name.clone()))?;
        }

        let mut versions = heapless::Vec::new();
        let _ = versions.push(TLS13_VERSION);
        push(
            &mut extensions,
            Extension::SupportedVersions(SupportedVersions::List(versions)),
        )?;

        let mut groups = heapless::Vec::new();
        for &g in self.groups {
            let _ = groups.push(g);
        }
        push(&mut extensions, Extension::SupportedGroups(groups))?;

        let mut schemes = heapless::Vec::new();
        for &s in self.signature_schemes {
            let _ = schemes.push(s);
        }
        push(&mut extensions, Extension::SignatureAlgorithms(schemes))?;

        let mut shares = heapless::Vec::new();
        let _ = shares.push(KeyShareEntry::new(kx.group(), &kx.public_key())?);
        push(&mut extensions, Extension::KeyShare(KeyShare::ClientShares(shares)))?;

        if !self.alpn_protocols.is_empty() {
            let mut protocols = heapless::Vec::new();
            for &p in self.alpn_protocols {
                let mut v = heapless::Vec::new();
                v.extend_from_slice(p)
                    .map_err(|_| Error::from(crate::error::ResourceError::BufferExhausted))?;
                let _ = protocols.push(v);
            }
            push(&mut extensions, Extension::Alpn(protocols))?;
        }

        if let Some(limit) = self.record_size_limit_cfg {
            push(&mut extensions, Extension::RecordSizeLimit(limit))?;
        }

        if let Some(tp) = &self.transport_params {
            push(&mut extensions, Extension::QuicTransportParams(tp.clone()))?;
        }

        // A usable ticket turns on the PSK machinery; pre_shared_key
        // must be the final extension. After a retry the offer only
        // survives if the pinned suite still matches the ticket's hash.
        let offer_psk = self
            .ticket
            .as_ref()
            .map(|t| {
                t.is_usable(self.now_ms)
                    && (!self.retry_done
                        || self.suite.map(|s| s.hash()) == Some(t.suite.hash()))
            })
            .unwrap_or(false);
        let offer_early = offer_psk
            && self.enable_early_data
            && !self.retry_done
            && self
                .ticket
                .as_ref()
                .map(|t| t.max_early_data > 0)
                .unwrap_or(false);

        let binder_len = if offer_psk {
            let ticket = self.ticket.as_ref().ok_or(Error::InvalidState)?;

            let mut modes = heapless::Vec::new();
            let _ = modes.push(PskKeyExchangeMode::PskDheKe);
            push(&mut extensions, Extension::PskModes(modes))?;

            if offer_early {
                push(&mut extensions, Extension::EarlyData(None))?;
            }

            let mut identity = heapless::Vec::new();
            identity
                .extend_from_slice(&ticket.ticket)
                .map_err(|_| Error::from(crate::error::ResourceError::BufferExhausted))?;
            let mut identities = heapless::Vec::new();
            let _ = identities.push(PskIdentity {
                identity,
                obfuscated_ticket_age: ticket.obfuscated_age(self.now_ms),
            });

            let binder_len = ticket.suite.hash_len();
            let mut binder = heapless::Vec::new();
            binder
                .extend_from_slice(&[0u8; 48][..binder_len])
                .map_err(|_| Error::from(crate::error::ResourceError::BufferExhausted))?;
            let mut binders = heapless::Vec::new();
            let _ = binders.push(binder);

            push(
                &mut extensions,
                Extension::PreSharedKey(PreSharedKey::Offer(PskOffer {
                    identities,
                    binders,
                })),
            )?;
            binder_len
        } else {
            0
        };

        let mut cipher_suites = heapless::Vec::new();
        for &s in self.cipher_suites {
            let _ = cipher_suites.push(s.to_u16());
        }

        let ch = ClientHello {
            random: self.random,
            legacy_session_id: self.session_id.clone(),
            cipher_suites,
            extensions,
        };

        let mut msg_buf = [0u8; 2048];
        let msg_len = ch.encode(&mut msg_buf)?;

        if offer_psk {
            // Patch the binder over the truncated ClientHello: the
            // binders list is the tail of the message.
            let ticket = self.ticket.as_ref().ok_or(Error::InvalidState)?;
            let alg = ticket.suite.hash();
            let schedule = KeySchedule::new(alg, Some(ticket.psk.as_slice()));
            let hkdf = crate::tls::cipher::SuiteHkdf::new(alg);

            let truncated_len = msg_len - (2 + 1 + binder_len);
            let binder_key = schedule.binder_key(false)?;
            let fin_key = key_schedule::finished_key(hkdf, binder_key.as_slice())?;
            let th = self.transcript.hash_with(alg, &msg_buf[..truncated_len]);
            let binder =
                key_schedule::finished_verify_data(hkdf, fin_key.as_slice(), th.as_slice());

            msg_buf[msg_len - binder_len..msg_len].copy_from_slice(binder.as_slice());
            self.schedule = Some(schedule);
        }
        self.psk_offered = offer_psk;

        self.transcript.update(&msg_buf[..msg_len])?;

        if offer_early {
            let ticket = self.ticket.as_ref().ok_or(Error::InvalidState)?;
            let alg = ticket.suite.hash();
            let schedule = self.schedule.as_ref().ok_or(Error::InvalidState)?;
            let th = self.transcript.hash_with(alg, &[]);

            let early = schedule.client_early_traffic_secret(th.as_slice())?;
            self.log_secret(keylog::CLIENT_EARLY_TRAFFIC_SECRET, &early);
            self.early_exporter_secret =
                Some(schedule.early_exporter_master_secret(th.as_slice())?);
            self.push_secrets(DerivedSecrets {
                epoch: Epoch::EarlyData,
                suite: ticket.suite,
                send: Some(early),
                recv: None,
            })?;
            self.early_data = EarlyDataState::Offered;
        }

        self.queue_plain(&msg_buf[..msg_len])?;
        self.state = HandshakeState::WaitServerHello;
        Ok(())
    }

    pub(super) fn handle_server_message(
        &mut self,
        msg_type: HandshakeType,
        full_msg: &[u8],
        msg_body: &[u8],
    ) -> Result<(), Error> {
        match (self.state, msg_type) {
            (HandshakeState::WaitServerHello, HandshakeType::ServerHello) => {
                let sh = ServerHello::decode(msg_body)?;
                if sh.is_hello_retry_request() {
                    self.process_hello_retry_request(&sh, full_msg)
                } else {
                    self.process_server_hello(&sh, full_msg)
                }
            }
            (
                HandshakeState::WaitEncryptedExtensions,
                HandshakeType::EncryptedExtensions,
            ) => {
                self.transcript.update(full_msg)?;
                self.process_encrypted_extensions(&EncryptedExtensions::decode(msg_body)?)
            }
            (HandshakeState::WaitCertCr, HandshakeType::CertificateRequest) => {
                let cr = CertificateRequest::decode(msg_body)?;
                self.transcript.update(full_msg)?;
                self.client_cert_context = Some(cr.context);
                self.state = HandshakeState::WaitCert;
                Ok(())
            }
            (HandshakeState::WaitCertCr | HandshakeState::WaitCert, HandshakeType::Certificate) => {
                self.transcript.update(full_msg)?;
                self.process_certificate(&Certificate::decode(msg_body)?)
            }
            (HandshakeState::WaitCertificateVerify, HandshakeType::CertificateVerify) => {
                // The signature covers the transcript up to (not
                // including) this message.
                let th_before = self.transcript.current_hash()?;
                self.transcript.update(full_msg)?;
                self.process_certificate_verify(
                    &CertificateVerify::decode(msg_body)?,
                    th_before.as_slice(),
                )
            }
            (HandshakeState::WaitServerFinished, HandshakeType::Finished) => {
                let th_before = self.transcript.current_hash()?;
                let hash_len = self.suite.ok_or(Error::InvalidState)?.hash_len();
                let fin = Finished::decode(msg_body, hash_len)?;
                self.transcript.update(full_msg)?;
                self.process_server_finished(&fin, th_before.as_slice())
            }
            (HandshakeState::Connected, HandshakeType::NewSessionTicket) => {
                // Post-handshake messages never enter the transcript.
                self.process_new_session_ticket(&NewSessionTicket::decode(msg_body)?)
            }
            (HandshakeState::Connected, HandshakeType::KeyUpdate) => {
                self.handle_key_update(crate::tls::messages::KeyUpdate::decode(msg_body)?)
            }
            _ => Err(ProtocolViolation::UnexpectedMessage.into()),
        }
    }

    fn process_hello_retry_request(
        &mut self,
        hrr: &ServerHello,
        full_msg: &[u8],
    ) -> Result<(), Error> {
        // At most one retry per connection.
        if self.retry_done {
            return Err(ProtocolViolation::UnexpectedMessage.into());
        }
        self.retry_done = true;

        if hrr.legacy_session_id_echo != self.session_id {
            return Err(ProtocolViolation::IllegalParameter.into());
        }

        let suite = CipherSuite::from_u16(hrr.cipher_suite)
            .filter(|s| self.cipher_suites.contains(s))
            .ok_or(Error::Protocol(ProtocolViolation::IllegalParameter))?;

        match find_extension(&hrr.extensions, EXT_SUPPORTED_VERSIONS) {
            Some(Extension::SupportedVersions(SupportedVersions::Selected(TLS13_VERSION))) => {}
            Some(_) => return Err(ProtocolViolation::IllegalParameter.into()),
            None => return Err(ProtocolViolation::MissingExtension.into()),
        }

        let selected = match find_extension(&hrr.extensions, EXT_KEY_SHARE) {
            Some(Extension::KeyShare(KeyShare::RetrySelectedGroup(g))) => *g,
            Some(_) => return Err(ProtocolViolation::IllegalParameter.into()),
            None => return Err(ProtocolViolation::MissingExtension.into()),
        };
        // The retry group must be one we advertised but did not already
        // send a share for.
        let current_group = self
            .key_exchange
            .as_ref()
            .map(KeyExchange::group)
            .ok_or(Error::InvalidState)?;
        if !self.groups.contains(&selected) || !selected.is_supported() || selected == current_group
        {
            return Err(ProtocolViolation::IllegalParameter.into());
        }

        self.suite = Some(suite);

        // Transcript substitution: ClientHello1 collapses into
        // message_hash, then the HRR goes in as transmitted.
        self.transcript.retry_substitute(suite.hash())?;
        self.transcript.update(full_msg)?;

        // 0-RTT does not survive a retry.
        if self.early_data == EarlyDataState::Offered {
            self.early_data = EarlyDataState::Rejected;
        }

        self.key_exchange = Some(KeyExchange::generate(selected, &self.key_seed)?);
        self.build_client_hello()
    }

    fn process_server_hello(&mut self, sh: &ServerHello, full_msg: &[u8]) -> Result<(), Error> {
        if detect_downgrade(&sh.random) {
            return Err(ProtocolViolation::IllegalParameter.into());
        }
        if sh.legacy_session_id_echo != self.session_id {
            return Err(ProtocolViolation::IllegalParameter.into());
        }

        let suite = CipherSuite::from_u16(sh.cipher_suite)
            .filter(|s| self.cipher_suites.contains(s))
            .ok_or(Error::Protocol(ProtocolViolation::IllegalParameter))?;
        if self.retry_done && self.suite != Some(suite) {
            // The retry pinned the suite; it may not change.
            return Err(ProtocolViolation::IllegalParameter.into());
        }
        self.suite = Some(suite);
        let alg = suite.hash();

        match find_extension(&sh.extensions, EXT_SUPPORTED_VERSIONS) {
            Some(Extension::SupportedVersions(SupportedVersions::Selected(TLS13_VERSION))) => {}
            Some(_) => return Err(ProtocolViolation::IllegalParameter.into()),
            None => return Err(ProtocolViolation::MissingExtension.into()),
        }

        match find_extension(&sh.extensions, EXT_PRE_SHARED_KEY) {
            Some(Extension::PreSharedKey(PreSharedKey::SelectedIdentity(idx))) => {
                // We offer exactly one identity.
                if !self.psk_offered || *idx != 0 {
                    return Err(ProtocolViolation::IllegalParameter.into());
                }
                let ticket_alg = self
                    .ticket
                    .as_ref()
                    .map(|t| t.suite.hash())
                    .ok_or(Error::InvalidState)?;
                if ticket_alg != alg {
                    return Err(ProtocolViolation::IllegalParameter.into());
                }
                self.psk_accepted = true;
            }
            Some(_) => return Err(ProtocolViolation::IllegalParameter.into()),
            None => {}
        }

        let entry = match find_extension(&sh.extensions, EXT_KEY_SHARE) {
            Some(Extension::KeyShare(KeyShare::ServerShare(entry))) => entry,
            Some(_) => return Err(ProtocolViolation::IllegalParameter.into()),
            None => return Err(ProtocolViolation::MissingExtension.into()),
        };
        let kx = self.key_exchange.as_ref().ok_or(Error::InvalidState)?;
        if entry.group != kx.group() {
            return Err(ProtocolViolation::IllegalParameter.into());
        }
        let shared = kx.shared_secret(&entry.key_exchange)?;

        self.transcript.update(full_msg)?;
        self.transcript.select(alg);

        // Without an accepted PSK the ladder restarts from zero.
        if !self.psk_accepted {
            self.schedule = Some(KeySchedule::new(alg, None));
        }
        let schedule = self.schedule.as_mut().ok_or(Error::InvalidState)?;
        schedule.into_handshake(&shared)?;

        let th = self.transcript.current_hash()?;
        let (client_hs, server_hs) = schedule.handshake_traffic_secrets(th.as_slice())?;
        self.log_secret(keylog::CLIENT_HANDSHAKE_TRAFFIC_SECRET, &client_hs);
        self.log_secret(keylog::SERVER_HANDSHAKE_TRAFFIC_SECRET, &server_hs);

        self.push_secrets(DerivedSecrets {
            epoch: Epoch::Handshake,
            suite,
            send: Some(client_hs.clone()),
            recv: Some(server_hs.clone()),
        })?;
        self.client_hs_secret = Some(client_hs);
        self.server_hs_secret = Some(server_hs);

        self.state = HandshakeState::WaitEncryptedExtensions;
        Ok(())
    }

    fn process_encrypted_extensions(&mut self, ee: &EncryptedExtensions) -> Result<(), Error> {
        for ext in &ee.extensions {
            match ext {
                Extension::Alpn(protocols) => {
                    // The server picks exactly one, and it must be one
                    // we offered.
                    let selected = protocols
                        .first()
                        .ok_or(Error::Protocol(ProtocolViolation::IllegalParameter))?;
                    if !self
                        .alpn_protocols
                        .iter()
                        .any(|p| *p == selected.as_slice())
                    {
                        return Err(ProtocolViolation::IllegalParameter.into());
                    }
                    self.negotiated_alpn = Some(selected.clone());
                }
                Extension::RecordSizeLimit(limit) => {
                    self.peer_record_size_limit = Some(*limit);
                }
                Extension::QuicTransportParams(tp) => {
                    self.peer_transport_params = Some(tp.clone());
                }
                Extension::EarlyData(None) => {
                    if self.early_data != EarlyDataState::Offered {
                        return Err(ProtocolViolation::ExtensionInWrongContext.into());
                    }
                    self.early_data = EarlyDataState::Accepted;
                }
                _ => {}
            }
        }

        if self.early_data == EarlyDataState::Offered {
            // No acceptance in EncryptedExtensions: everything sent
            // under early keys is discarded by the server.
            self.early_data = EarlyDataState::Rejected;
        }

        self.state = if self.psk_accepted {
            HandshakeState::WaitServerFinished
        } else {
            HandshakeState::WaitCertCr
        };
        Ok(())
    }

    fn process_certificate(&mut self, cert: &Certificate) -> Result<(), Error> {
        if !cert.context.is_empty() {
            // Server authentication uses an empty context.
            return Err(ProtocolViolation::IllegalParameter.into());
        }
        let first = cert
            .entries
            .first()
            .ok_or(Error::from(DecodeError::InvalidValue))?;

        self.server_cert_data.clear();
        self.server_cert_data
            .extend_from_slice(&first.cert_data)
            .map_err(|_| Error::from(crate::error::ResourceError::BufferExhausted))?;

        self.state = HandshakeState::WaitCertificateVerify;
        Ok(())
    }

    fn process_certificate_verify(
        &mut self,
        cv: &CertificateVerify,
        transcript_before_cv: &[u8],
    ) -> Result<(), Error> {
        // Chain validation happens here, right before the signature
        // check: pinning first, then the caller's validator.
        if !self.pinned_certs.is_empty()
            && !self
                .pinned_certs
                .iter()
                .any(|p| *p == self.server_cert_data.as_slice())
        {
            return Err(CryptoError::SignatureInvalid.into());
        }
        if let Some(validator) = self.validator {
            validator.validate(&self.server_cert_data, &self.server_name)?;
        }

        if !self.signature_schemes.contains(&cv.algorithm) {
            return Err(ProtocolViolation::IllegalParameter.into());
        }

        match cv.algorithm {
            crate::tls::cipher::SignatureScheme::Ed25519 => {
                let pubkey = crate::crypto::ed25519::extract_ed25519_pubkey_from_cert(
                    &self.server_cert_data,
                )?;
                crate::crypto::ed25519::verify_certificate_verify(
                    &pubkey,
                    &cv.signature,
                    true,
                    transcript_before_cv,
                )?;
            }
            crate::tls::cipher::SignatureScheme::EcdsaSecp256r1Sha256 => {
                let pubkey = crate::crypto::ecdsa_p256::extract_p256_pubkey_from_cert(
                    &self.server_cert_data,
                )?;
                crate::crypto::ecdsa_p256::verify_certificate_verify(
                    &pubkey,
                    &cv.signature,
                    true,
                    transcript_before_cv,
                )?;
            }
            _ => return Err(CryptoError::SignatureInvalid.into()),
        }

        self.state = HandshakeState::WaitServerFinished;
        Ok(())
    }

    fn process_server_finished(
        &mut self,
        fin: &Finished,
        transcript_before_fin: &[u8],
    ) -> Result<(), Error> {
        let hkdf = self.hkdf()?;

        let server_hs = self.server_hs_secret.as_ref().ok_or(Error::InvalidState)?;
        let fin_key = key_schedule::finished_key(hkdf, server_hs.as_slice())?;
        let expected =
            key_schedule::finished_verify_data(hkdf, fin_key.as_slice(), transcript_before_fin);
        if !ct_eq(expected.as_slice(), &fin.verify_data) {
            return Err(CryptoError::FinishedMismatch.into());
        }

        // Application secrets bind the transcript through the server
        // Finished (already fed by the caller).
        let schedule = self.schedule.as_mut().ok_or(Error::InvalidState)?;
        schedule.into_master()?;
        let th_server_fin = self.transcript.current_hash()?;
        let (client_app, server_app) = {
            let schedule = self.schedule.as_ref().ok_or(Error::InvalidState)?;
            schedule.app_traffic_secrets(th_server_fin.as_slice())?
        };
        let exporter = {
            let schedule = self.schedule.as_ref().ok_or(Error::InvalidState)?;
            schedule.exporter_master_secret(th_server_fin.as_slice())?
        };

        self.log_secret(keylog::CLIENT_TRAFFIC_SECRET_0, &client_app);
        self.log_secret(keylog::SERVER_TRAFFIC_SECRET_0, &server_app);
        self.log_secret(keylog::EXPORTER_SECRET, &exporter);

        self.push_secrets(DerivedSecrets {
            epoch: Epoch::Application,
            suite: self.suite.ok_or(Error::InvalidState)?,
            send: Some(client_app.clone()),
            recv: Some(server_app.clone()),
        })?;
        self.client_app_secret = Some(client_app);
        self.server_app_secret = Some(server_app);
        self.exporter_secret = Some(exporter);

        // Our closing flight: EndOfEarlyData (early keys), an empty
        // Certificate if one was requested, then Finished (handshake
        // keys). Each goes through the transcript in wire order.
        if self.early_data == EarlyDataState::Accepted {
            let mut eoed = [0u8; 8];
            let len = encode_end_of_early_data(&mut eoed)?;
            self.transcript.update(&eoed[..len])?;
            self.queue_early(&eoed[..len])?;
        }

        if let Some(context) = self.client_cert_context.take() {
            let empty = Certificate {
                context,
                entries: heapless::Vec::new(),
            };
            let mut buf = [0u8; 64];
            let len = empty.encode(&mut buf)?;
            self.transcript.update(&buf[..len])?;
            self.queue_hs(&buf[..len])?;
        }

        let client_hs = self.client_hs_secret.as_ref().ok_or(Error::InvalidState)?;
        let client_fin_key = key_schedule::finished_key(hkdf, client_hs.as_slice())?;
        let th_now = self.transcript.current_hash()?;
        let verify = key_schedule::finished_verify_data(
            hkdf,
            client_fin_key.as_slice(),
            th_now.as_slice(),
        );

        let fin_msg = Finished::new(verify.as_slice())?;
        let mut fin_buf = [0u8; 64];
        let fin_len = fin_msg.encode(&mut fin_buf)?;
        self.transcript.update(&fin_buf[..fin_len])?;
        self.queue_hs(&fin_buf[..fin_len])?;

        // Resumption binds the transcript through our Finished.
        let th_client_fin = self.transcript.current_hash()?;
        let schedule = self.schedule.as_ref().ok_or(Error::InvalidState)?;
        self.resumption_master = Some(schedule.resumption_master_secret(th_client_fin.as_slice())?);

        self.state = HandshakeState::Connected;
        self.complete = true;
        Ok(())
    }

    fn process_new_session_ticket(&mut self, nst: &NewSessionTicket) -> Result<(), Error> {
        // lifetime zero means: do not cache.
        if nst.ticket_lifetime == 0 {
            return Ok(());
        }
        let suite = self.suite.ok_or(Error::InvalidState)?;
        let hkdf = self.hkdf()?;
        let res_master = self.resumption_master.as_ref().ok_or(Error::InvalidState)?;

        let psk = key_schedule::resumption_psk(hkdf, res_master.as_slice(), &nst.ticket_nonce)?;

        let mut blob = heapless::Vec::new();
        blob.extend_from_slice(&nst.ticket)
            .map_err(|_| Error::from(crate::error::ResourceError::BufferExhausted))?;

        let ticket = Ticket {
            ticket: blob,
            age_add: nst.ticket_age_add,
            lifetime_secs: nst.ticket_lifetime,
            psk,
            suite,
            max_early_data: nst.max_early_data().unwrap_or(0),
            received_at_ms: self.now_ms,
        };

        if self.tickets_out.is_full() {
            let _ = self.tickets_out.pop_front();
        }
        let _ = self.tickets_out.push_back(ticket);
        Ok(())
    }
}
