//! Server side of the handshake engine.

use super::{ct_eq, EarlyDataState, HandshakeState, KeyExchange, TlsEngine};
use crate::error::{ConfigError, CryptoError, DecodeError, Error, ProtocolViolation};
use crate::tls::cipher::{CipherSuite, NamedGroup, SignatureScheme};
use crate::tls::extensions::{
    find_extension, Extension, KeyShare, KeyShareEntry, PreSharedKey, PskKeyExchangeMode,
    SupportedVersions, EXT_ALPN, EXT_EARLY_DATA, EXT_KEY_SHARE, EXT_PRE_SHARED_KEY,
    EXT_PSK_KEY_EXCHANGE_MODES, EXT_QUIC_TRANSPORT_PARAMS, EXT_RECORD_SIZE_LIMIT,
    EXT_SIGNATURE_ALGORITHMS, EXT_SUPPORTED_GROUPS, EXT_SUPPORTED_VERSIONS, TLS13_VERSION,
};
use crate::tls::key_schedule::{self, KeySchedule, Secret};
use crate::tls::keylog;
use crate::tls::messages::{
    Certificate, CertificateEntry, CertificateVerify, ClientHello, EncryptedExtensions,
    Finished, HandshakeType, NewSessionTicket, ServerHello, HELLO_RETRY_REQUEST_RANDOM,
};
use crate::tls::ticket::IssuedTicket;
use crate::tls::{DerivedSecrets, Epoch};

/// Outcome of matching the client's PSK offer against the ticket store.
struct AcceptedPsk {
    index: u16,
    identity: heapless::Vec<u8, 256>,
    obfuscated_age: u32,
    max_early_data: u32,
}

impl TlsEngine {
    pub(super) fn handle_client_message(
        &mut self,
        msg_type: HandshakeType,
        full_msg: &[u8],
        msg_body: &[u8],
    ) -> Result<(), Error> {
        match (self.state, msg_type) {
            (HandshakeState::WaitClientHello, HandshakeType::ClientHello) => {
                // Transcript feeding happens inside: binder checks hash
                // a truncated copy of these bytes first.
                self.process_client_hello(full_msg, msg_body)
            }
            (HandshakeState::WaitEndOfEarlyData, HandshakeType::EndOfEarlyData) => {
                if !msg_body.is_empty() {
                    return Err(DecodeError::InvalidValue.into());
                }
                self.transcript.update(full_msg)?;
                self.state = HandshakeState::WaitClientFinished;
                Ok(())
            }
            (HandshakeState::WaitClientFinished, HandshakeType::Finished) => {
                let th_before = self.transcript.current_hash()?;
                let hash_len = self.suite.ok_or(Error::InvalidState)?.hash_len();
                let fin = Finished::decode(msg_body, hash_len)?;
                self.transcript.update(full_msg)?;
                self.process_client_finished(&fin, th_before.as_slice())
            }
            (HandshakeState::Connected, HandshakeType::KeyUpdate) => {
                self.handle_key_update(crate::tls::messages::KeyUpdate::decode(msg_body)?)
            }
            _ => Err(ProtocolViolation::UnexpectedMessage.into()),
        }
    }

    fn process_client_hello(&mut self, full_msg: &[u8], msg_body: &[u8]) -> Result<(), Error> {
        let ch = ClientHello::decode(msg_body)?;

        match find_extension(&ch.extensions, EXT_SUPPORTED_VERSIONS) {
            Some(Extension::SupportedVersions(SupportedVersions::List(versions)))
                if versions.contains(&TLS13_VERSION) => {}
            _ => return Err(ProtocolViolation::UnsupportedVersion.into()),
        }

        self.client_random = ch.random;
        self.session_id = ch.legacy_session_id.clone();
        if let Some(Extension::ServerName(name)) =
            find_extension(&ch.extensions, crate::tls::extensions::EXT_SERVER_NAME)
        {
            self.server_name = name.clone();
        }

        // First mutually supported suite in our preference order.
        let suite = self
            .cipher_suites
            .iter()
            .copied()
            .find(|s| ch.cipher_suites.contains(&s.to_u16()))
            .ok_or(Error::Config(ConfigError::NoCommonCipher))?;
        if self.retry_done && self.suite != Some(suite) {
            return Err(ProtocolViolation::IllegalParameter.into());
        }

        let shares = match find_extension(&ch.extensions, EXT_KEY_SHARE) {
            Some(Extension::KeyShare(KeyShare::ClientShares(entries))) => entries,
            Some(_) => return Err(ProtocolViolation::IllegalParameter.into()),
            None => return Err(ProtocolViolation::MissingExtension.into()),
        };
        let client_groups = match find_extension(&ch.extensions, EXT_SUPPORTED_GROUPS) {
            Some(Extension::SupportedGroups(groups)) => Some(groups),
            _ => None,
        };

        // First group in our preference order the client can use at all.
        let selected_group = self
            .groups
            .iter()
            .copied()
            .filter(|g| g.is_supported())
            .find(|g| match client_groups {
                Some(groups) => groups.contains(g),
                None => shares.iter().any(|e| e.group == *g),
            })
            .ok_or(Error::Config(ConfigError::NoCommonGroup))?;

        let client_share = shares.iter().find(|e| e.group == selected_group);
        let client_share = match client_share {
            Some(entry) => entry.clone(),
            None => {
                // The client can do the group but sent no share for it:
                // request a retry, exactly once.
                return self.send_hello_retry_request(full_msg, suite, selected_group);
            }
        };

        self.suite = Some(suite);
        let alg = suite.hash();

        // PSK resolution happens against the raw ClientHello bytes,
        // before they enter the transcript.
        let accepted_psk = self.resolve_psk_offer(&ch, full_msg, suite)?;

        self.transcript.update(full_msg)?;
        self.transcript.select(alg);

        // 0-RTT gate: PSK identity 0, early_data offered, budget
        // configured, no retry, and a fresh (ticket, age) pair.
        let early_requested = find_extension(&ch.extensions, EXT_EARLY_DATA).is_some();
        if early_requested {
            self.early_data = EarlyDataState::Rejected;
            if let Some(psk) = &accepted_psk {
                if psk.index == 0 && psk.max_early_data > 0 && !self.retry_done {
                    let fresh = match self.ticket_store {
                        Some(store) => store
                            .borrow_mut()
                            .early_data_fresh(&psk.identity, psk.obfuscated_age),
                        None => false,
                    };
                    if fresh {
                        self.early_data = EarlyDataState::Accepted;
                        self.accepted_max_early_data = psk.max_early_data;

                        let schedule = self.schedule.as_ref().ok_or(Error::InvalidState)?;
                        let th_ch = self.transcript.current_hash()?;
                        let early =
                            schedule.client_early_traffic_secret(th_ch.as_slice())?;
                        self.log_secret(keylog::CLIENT_EARLY_TRAFFIC_SECRET, &early);
                        self.early_exporter_secret =
                            Some(schedule.early_exporter_master_secret(th_ch.as_slice())?);
                        self.push_secrets(DerivedSecrets {
                            epoch: Epoch::EarlyData,
                            suite,
                            send: None,
                            recv: Some(early),
                        })?;
                    }
                }
            }
        }

        // Our key share and the ECDHE secret.
        let kx = KeyExchange::generate(selected_group, &self.key_seed)?;
        let our_share = KeyShareEntry::new(selected_group, &kx.public_key())?;
        let shared = kx.shared_secret(&client_share.key_exchange)?;
        self.key_exchange = Some(kx);

        // ---- ServerHello ----
        let mut sh_extensions: heapless::Vec<Extension, 16> = heapless::Vec::new();
        let _ = sh_extensions.push(Extension::SupportedVersions(SupportedVersions::Selected(
            TLS13_VERSION,
        )));
        let _ = sh_extensions.push(Extension::KeyShare(KeyShare::ServerShare(our_share)));
        if let Some(psk) = &accepted_psk {
            let _ = sh_extensions.push(Extension::PreSharedKey(PreSharedKey::SelectedIdentity(
                psk.index,
            )));
        }

        let sh = ServerHello {
            random: self.random,
            legacy_session_id_echo: self.session_id.clone(),
            cipher_suite: suite.to_u16(),
            extensions: sh_extensions,
        };
        let mut sh_buf = [0u8; 512];
        let sh_len = sh.encode(&mut sh_buf)?;
        self.transcript.update(&sh_buf[..sh_len])?;
        self.queue_plain(&sh_buf[..sh_len])?;

        // ---- Key schedule through the handshake stage ----
        if accepted_psk.is_none() {
            self.schedule = Some(KeySchedule::new(alg, None));
        }
        self.psk_accepted = accepted_psk.is_some();

        let hkdf = self.hkdf()?;
        {
            let schedule = self.schedule.as_mut().ok_or(Error::InvalidState)?;
            schedule.into_handshake(&shared)?;
        }
        let th_sh = self.transcript.current_hash()?;
        let (client_hs, server_hs) = {
            let schedule = self.schedule.as_ref().ok_or(Error::InvalidState)?;
            schedule.handshake_traffic_secrets(th_sh.as_slice())?
        };
        self.log_secret(keylog::CLIENT_HANDSHAKE_TRAFFIC_SECRET, &client_hs);
        self.log_secret(keylog::SERVER_HANDSHAKE_TRAFFIC_SECRET, &server_hs);
        self.push_secrets(DerivedSecrets {
            epoch: Epoch::Handshake,
            suite,
            send: Some(server_hs.clone()),
            recv: Some(client_hs.clone()),
        })?;
        self.client_hs_secret = Some(client_hs);
        self.server_hs_secret = Some(server_hs.clone());

        // ---- EncryptedExtensions ----
        if let Some(Extension::RecordSizeLimit(limit)) =
            find_extension(&ch.extensions, EXT_RECORD_SIZE_LIMIT)
        {
            self.peer_record_size_limit = Some(*limit);
        }
        if let Some(Extension::QuicTransportParams(tp)) =
            find_extension(&ch.extensions, EXT_QUIC_TRANSPORT_PARAMS)
        {
            self.peer_transport_params = Some(tp.clone());
        }

        let mut ee_extensions: heapless::Vec<Extension, 16> = heapless::Vec::new();
        if let Some(Extension::Alpn(client_protocols)) =
            find_extension(&ch.extensions, EXT_ALPN)
        {
            // First client protocol we also speak.
            let selected = client_protocols
                .iter()
                .find(|p| self.alpn_protocols.iter().any(|ours| *ours == p.as_slice()));
            if let Some(proto) = selected {
                self.negotiated_alpn = Some(proto.clone());
                let mut list = heapless::Vec::new();
                let _ = list.push(proto.clone());
                let _ = ee_extensions.push(Extension::Alpn(list));
            }
        }
        if let Some(limit) = self.record_size_limit_cfg {
            let _ = ee_extensions.push(Extension::RecordSizeLimit(limit));
        }
        if let Some(tp) = &self.transport_params {
            let _ = ee_extensions.push(Extension::QuicTransportParams(tp.clone()));
        }
        if self.early_data == EarlyDataState::Accepted {
            let _ = ee_extensions.push(Extension::EarlyData(None));
        }

        let ee = EncryptedExtensions {
            extensions: ee_extensions,
        };
        let mut ee_buf = [0u8; 1024];
        let ee_len = ee.encode(&mut ee_buf)?;
        self.transcript.update(&ee_buf[..ee_len])?;
        self.queue_hs(&ee_buf[..ee_len])?;

        // ---- Certificate + CertificateVerify (full handshakes only) ----
        if accepted_psk.is_none() {
            let mut cert_data = heapless::Vec::new();
            cert_data
                .extend_from_slice(self.server_cert_der)
                .map_err(|_| Error::from(crate::error::ResourceError::BufferExhausted))?;
            let mut entries = heapless::Vec::new();
            let _ = entries.push(CertificateEntry {
                cert_data,
                extensions_raw: heapless::Vec::new(),
            });
            let cert = Certificate {
                context: heapless::Vec::new(),
                entries,
            };
            let mut cert_buf = [0u8; 4096];
            let cert_len = cert.encode(&mut cert_buf)?;
            self.transcript.update(&cert_buf[..cert_len])?;
            self.queue_hs(&cert_buf[..cert_len])?;

            let th_cv = self.transcript.current_hash()?;
            let (scheme, signature) = self.sign_certificate_verify(th_cv.as_slice())?;
            if let Some(Extension::SignatureAlgorithms(offered)) =
                find_extension(&ch.extensions, EXT_SIGNATURE_ALGORITHMS)
            {
                if !offered.contains(&scheme) {
                    return Err(ConfigError::NoCommonSignatureScheme.into());
                }
            }
            let cv = CertificateVerify {
                algorithm: scheme,
                signature,
            };
            let mut cv_buf = [0u8; 1024];
            let cv_len = cv.encode(&mut cv_buf)?;
            self.transcript.update(&cv_buf[..cv_len])?;
            self.queue_hs(&cv_buf[..cv_len])?;
        }

        // ---- Server Finished ----
        let fin_key = key_schedule::finished_key(hkdf, server_hs.as_slice())?;
        let th_before_fin = self.transcript.current_hash()?;
        let verify = key_schedule::finished_verify_data(
            hkdf,
            fin_key.as_slice(),
            th_before_fin.as_slice(),
        );
        let fin = Finished::new(verify.as_slice())?;
        let mut fin_buf = [0u8; 64];
        let fin_len = fin.encode(&mut fin_buf)?;
        self.transcript.update(&fin_buf[..fin_len])?;
        self.queue_hs(&fin_buf[..fin_len])?;

        // ---- Application secrets (transcript through our Finished) ----
        {
            let schedule = self.schedule.as_mut().ok_or(Error::InvalidState)?;
            schedule.into_master()?;
        }
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

        // Send keys switch now (0.5-RTT is possible); receive keys wait
        // for the client Finished.
        self.push_secrets(DerivedSecrets {
            epoch: Epoch::Application,
            suite,
            send: Some(server_app.clone()),
            recv: None,
        })?;
        self.client_app_secret = Some(client_app);
        self.server_app_secret = Some(server_app);
        self.exporter_secret = Some(exporter);

        self.state = if self.early_data == EarlyDataState::Accepted {
            HandshakeState::WaitEndOfEarlyData
        } else {
            HandshakeState::WaitClientFinished
        };
        Ok(())
    }

    /// Emit a HelloRetryRequest selecting `group`.
    fn send_hello_retry_request(
        &mut self,
        full_msg: &[u8],
        suite: CipherSuite,
        group: NamedGroup,
    ) -> Result<(), Error> {
        if self.retry_done {
            // The retried ClientHello still lacks a usable share.
            return Err(ProtocolViolation::IllegalParameter.into());
        }
        self.retry_done = true;
        self.suite = Some(suite);

        // CH1 goes into the transcript, then collapses to message_hash.
        self.transcript.update(full_msg)?;
        self.transcript.retry_substitute(suite.hash())?;

        let mut extensions: heapless::Vec<Extension, 16> = heapless::Vec::new();
        let _ = extensions.push(Extension::SupportedVersions(SupportedVersions::Selected(
            TLS13_VERSION,
        )));
        let _ = extensions.push(Extension::KeyShare(KeyShare::RetrySelectedGroup(group)));

        let hrr = ServerHello {
            random: HELLO_RETRY_REQUEST_RANDOM,
            legacy_session_id_echo: self.session_id.clone(),
            cipher_suite: suite.to_u16(),
            extensions,
        };
        let mut buf = [0u8; 256];
        let len = hrr.encode(&mut buf)?;
        self.transcript.update(&buf[..len])?;
        self.queue_plain(&buf[..len])?;

        // State stays WaitClientHello for the second ClientHello.
        Ok(())
    }

    /// Match a pre_shared_key offer against the ticket store, verifying
    /// the binder of the first identity we can resolve.
    fn resolve_psk_offer(
        &mut self,
        ch: &ClientHello,
        full_msg: &[u8],
        suite: CipherSuite,
    ) -> Result<Option<AcceptedPsk>, Error> {
        let offer = match find_extension(&ch.extensions, EXT_PRE_SHARED_KEY) {
            Some(Extension::PreSharedKey(PreSharedKey::Offer(offer))) => offer,
            Some(_) => return Err(ProtocolViolation::IllegalParameter.into()),
            None => return Ok(None),
        };

        // A PSK offer without psk_dhe_ke is unusable for us.
        match find_extension(&ch.extensions, EXT_PSK_KEY_EXCHANGE_MODES) {
            Some(Extension::PskModes(modes))
                if modes.contains(&PskKeyExchangeMode::PskDheKe) => {}
            Some(_) => return Ok(None),
            None => return Err(ProtocolViolation::MissingExtension.into()),
        }

        let store = match self.ticket_store {
            Some(store) => store,
            None => return Ok(None),
        };

        let alg = suite.hash();
        let mut resolved: Option<(AcceptedPsk, Secret)> = None;
        {
            let store = store.borrow();
            for (idx, identity) in offer.identities.iter().enumerate() {
                if let Some(issued) = store.lookup(&identity.identity, self.now_ms) {
                    if issued.suite.hash() != alg {
                        continue;
                    }
                    resolved = Some((
                        AcceptedPsk {
                            index: idx as u16,
                            identity: identity.identity.clone(),
                            obfuscated_age: identity.obfuscated_ticket_age,
                            max_early_data: issued.max_early_data,
                        },
                        issued.psk.clone(),
                    ));
                    break;
                }
            }
        }

        let (accepted, psk) = match resolved {
            Some(r) => r,
            None => return Ok(None),
        };

        // Verify the binder over the truncated ClientHello, in the
        // context of whatever already sits in the transcript
        // (message_hash + HelloRetryRequest after a retry).
        let schedule = KeySchedule::new(alg, Some(psk.as_slice()));
        let hkdf = crate::tls::cipher::SuiteHkdf::new(alg);

        let truncated_len = full_msg.len() - offer.binders_wire_len();
        let binder_key = schedule.binder_key(false)?;
        let fin_key = key_schedule::finished_key(hkdf, binder_key.as_slice())?;
        let th = self
            .transcript
            .hash_with(alg, &full_msg[..truncated_len]);
        let expected =
            key_schedule::finished_verify_data(hkdf, fin_key.as_slice(), th.as_slice());

        let binder = offer
            .binders
            .get(accepted.index as usize)
            .ok_or(Error::Protocol(ProtocolViolation::IllegalParameter))?;
        if !ct_eq(expected.as_slice(), binder) {
            return Err(CryptoError::FinishedMismatch.into());
        }

        self.schedule = Some(schedule);
        Ok(Some(accepted))
    }

    fn sign_certificate_verify(
        &self,
        transcript_hash: &[u8],
    ) -> Result<(SignatureScheme, heapless::Vec<u8, 512>), Error> {
        let mut signature = heapless::Vec::new();
        if crate::crypto::ecdsa_p256::cert_has_p256_key(self.server_cert_der) {
            let sig = crate::crypto::ecdsa_p256::sign_certificate_verify(
                self.server_private_key_der,
                true,
                transcript_hash,
            )?;
            signature
                .extend_from_slice(&sig)
                .map_err(|_| Error::from(crate::error::ResourceError::BufferExhausted))?;
            Ok((SignatureScheme::EcdsaSecp256r1Sha256, signature))
        } else {
            let seed: [u8; 32] = self
                .server_private_key_der
                .try_into()
                .map_err(|_| Error::InvalidState)?;
            let sig =
                crate::crypto::ed25519::sign_certificate_verify(&seed, true, transcript_hash)?;
            signature
                .extend_from_slice(&sig)
                .map_err(|_| Error::from(crate::error::ResourceError::BufferExhausted))?;
            Ok((SignatureScheme::Ed25519, signature))
        }
    }

    fn process_client_finished(
        &mut self,
        fin: &Finished,
        transcript_before_fin: &[u8],
    ) -> Result<(), Error> {
        let hkdf = self.hkdf()?;

        let client_hs = self.client_hs_secret.as_ref().ok_or(Error::InvalidState)?;
        let fin_key = key_schedule::finished_key(hkdf, client_hs.as_slice())?;
        let expected =
            key_schedule::finished_verify_data(hkdf, fin_key.as_slice(), transcript_before_fin);
        if !ct_eq(expected.as_slice(), &fin.verify_data) {
            return Err(CryptoError::FinishedMismatch.into());
        }

        // The client's application send keys become live now.
        let client_app = self
            .client_app_secret
            .as_ref()
            .ok_or(Error::InvalidState)?
            .clone();
        self.push_secrets(DerivedSecrets {
            epoch: Epoch::Application,
            suite: self.suite.ok_or(Error::InvalidState)?,
            send: None,
            recv: Some(client_app),
        })?;

        let th_client_fin = self.transcript.current_hash()?;
        let res_master = {
            let schedule = self.schedule.as_ref().ok_or(Error::InvalidState)?;
            schedule.resumption_master_secret(th_client_fin.as_slice())?
        };
        self.resumption_master = Some(res_master);

        self.state = HandshakeState::Connected;
        self.complete = true;

        self.issue_tickets()
    }

    /// Queue NewSessionTickets after CONNECTED and remember them in the
    /// store. Ticket ids and age_add values are derived from the
    /// resumption master secret, so no extra randomness is consumed.
    fn issue_tickets(&mut self) -> Result<(), Error> {
        let store = match self.ticket_store {
            Some(store) => store,
            None => return Ok(()),
        };
        if self.send_tickets == 0 {
            return Ok(());
        }

        let suite = self.suite.ok_or(Error::InvalidState)?;
        let hkdf = self.hkdf()?;
        let res_master = self
            .resumption_master
            .as_ref()
            .ok_or(Error::InvalidState)?
            .clone();
        let lifetime = self
            .ticket_lifetime_secs
            .min(NewSessionTicket::MAX_LIFETIME_SECS);

        for i in 0..self.send_tickets {
            let nonce = [i];
            let psk = key_schedule::resumption_psk(hkdf, res_master.as_slice(), &nonce)?;

            // 16 bytes of ticket id + 4 bytes of age_add, all bound to
            // the resumption secret and the nonce.
            let mut material = [0u8; 20];
            key_schedule::hkdf_expand_label(
                hkdf,
                res_master.as_slice(),
                b"ticket",
                &nonce,
                &mut material,
            )?;
            let age_add = u32::from_be_bytes([
                material[16],
                material[17],
                material[18],
                material[19],
            ]);

            let mut ticket_nonce = heapless::Vec::new();
            let _ = ticket_nonce.push(i);

            let mut extensions = heapless::Vec::new();
            if self.max_early_data_cfg > 0 {
                let _ = extensions.push(Extension::EarlyData(Some(self.max_early_data_cfg)));
            }

            let nst = NewSessionTicket {
                ticket_lifetime: lifetime,
                ticket_age_add: age_add,
                ticket_nonce,
                ticket: {
                    let mut t = heapless::Vec::new();
                    let _ = t.extend_from_slice(&material[..16]);
                    t
                },
                extensions,
            };
            let mut buf = [0u8; 256];
            let len = nst.encode(&mut buf)?;
            self.queue_app(&buf[..len])?;

            let mut id = heapless::Vec::new();
            let _ = id.extend_from_slice(&material[..16]);
            store.borrow_mut().insert(IssuedTicket {
                id,
                psk,
                suite,
                age_add,
                lifetime_secs: lifetime,
                issued_at_ms: self.now_ms,
                max_early_data: self.max_early_data_cfg,
            });
        }
        Ok(())
    }
}
