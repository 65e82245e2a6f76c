//! TLS 1.3 connection state machine over a byte stream.
//!
//! Drives the handshake engine through the record layer:
//! `feed_data()` accepts raw bytes from the transport, `poll_output()`
//! hands back bytes to write, `poll_event()` reports progress. No
//! sockets, no clocks, no threads — one connection per task, externally
//! synchronized if reads and writes run on different tasks.

use crate::error::{DecodeError, Error, ProtocolViolation, ResourceError};
use crate::tls::alert::{self, AlertDescription};
use crate::tls::cipher::{CipherSuite, SuiteAead, SuiteHkdf, TAG_LEN};
use crate::tls::handshake::{EarlyDataState, Role, ServerTlsConfig, TlsConfig, TlsEngine};
use crate::tls::key_schedule::{self, Secret};
use crate::tls::messages::{read_handshake_header, HEADER_LEN};
use crate::tls::ticket::Ticket;
use crate::tls::{DerivedSecrets, Epoch, TlsSession};

use super::codec::{
    self, ContentType, MAX_CIPHERTEXT_PAYLOAD, MAX_PLAINTEXT, RECORD_HEADER_LEN,
};

/// Events produced by [`TlsConnection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsEvent {
    /// Handshake complete; application data can flow.
    HandshakeComplete,
    /// Application data is available (call `recv_app_data`).
    AppData,
    /// The peer accepted our 0-RTT data.
    EarlyDataAccepted,
    /// The peer rejected 0-RTT; unsent early data was discarded.
    EarlyDataRejected,
    /// A NewSessionTicket arrived (call `take_ticket`).
    TicketReceived,
    /// Peer sent close_notify.
    PeerClosed,
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Handshaking,
    Active,
    Closing,
    Closed,
}

/// Key material for one direction of one epoch.
struct RecordKeys {
    aead: SuiteAead,
    iv: [u8; 12],
    seq: u64,
}

impl RecordKeys {
    fn from_secret(suite: CipherSuite, secret: &Secret) -> Result<Self, Error> {
        let hkdf = SuiteHkdf::new(suite.hash());
        let (key, iv) = key_schedule::traffic_key_iv(hkdf, secret.as_slice(), suite.key_len())?;
        Ok(Self {
            aead: SuiteAead::new(suite, &key[..suite.key_len()])?,
            iv,
            seq: 0,
        })
    }

    /// Nonce for the next record. `advance` is separate so a failed
    /// trial decryption does not consume a sequence number.
    fn next_nonce(&self) -> Result<[u8; 12], Error> {
        if self.seq == u64::MAX {
            return Err(ResourceError::SequenceNumberOverflow.into());
        }
        Ok(codec::build_nonce(&self.iv, self.seq))
    }

    fn advance(&mut self) {
        self.seq += 1;
    }
}

/// Past this point the connection refreshes its application keys on its
/// own rather than risking sequence exhaustion.
const KEY_UPDATE_SEQ_THRESHOLD: u64 = u64::MAX - 16;

/// TLS 1.3 connection.
///
/// `BUF`: internal buffer capacity; must hold at least one maximum-size
/// record plus header (18432 covers it).
pub struct TlsConnection<const BUF: usize = 18432> {
    engine: TlsEngine,
    state: ConnState,

    recv_buf: heapless::Vec<u8, BUF>,
    send_buf: heapless::Vec<u8, BUF>,
    send_offset: usize,

    app_recv_buf: heapless::Vec<u8, BUF>,
    app_send_buf: heapless::Vec<u8, BUF>,
    early_send_buf: heapless::Vec<u8, 4096>,

    // Handshake reassembly across record boundaries.
    hs_partial: heapless::Vec<u8, 4096>,
    hs_partial_epoch: Option<Epoch>,

    early_send: Option<RecordKeys>,
    early_recv: Option<RecordKeys>,
    hs_send: Option<RecordKeys>,
    hs_recv: Option<RecordKeys>,
    app_send: Option<RecordKeys>,
    app_recv: Option<RecordKeys>,

    // A send-direction key update waits until the KeyUpdate message
    // itself has gone out under the old keys.
    pending_send_update: Option<(CipherSuite, Secret)>,

    events: heapless::Deque<TlsEvent, 8>,
    tickets: heapless::Deque<Ticket, 2>,

    ccs_sent: bool,
    alert_sent: bool,
    early_notified: bool,
    early_sent: u32,
    early_recvd: u32,
    early_limit: u32,
    early_skipped: u32,
}

impl<const BUF: usize> TlsConnection<BUF> {
    /// Create a client connection. `key_seed` and `random` must come
    /// from a CSPRNG.
    pub fn new_client(config: TlsConfig, key_seed: [u8; 32], random: [u8; 32]) -> Self {
        let early_limit = config
            .ticket
            .as_ref()
            .map(|t| t.max_early_data)
            .unwrap_or(0);
        Self::new(TlsEngine::new_client(config, key_seed, random), early_limit)
    }

    /// Create a server connection.
    pub fn new_server(config: ServerTlsConfig, key_seed: [u8; 32], random: [u8; 32]) -> Self {
        Self::new(TlsEngine::new_server(config, key_seed, random), 0)
    }

    fn new(engine: TlsEngine, early_limit: u32) -> Self {
        Self {
            engine,
            state: ConnState::Handshaking,
            recv_buf: heapless::Vec::new(),
            send_buf: heapless::Vec::new(),
            send_offset: 0,
            app_recv_buf: heapless::Vec::new(),
            app_send_buf: heapless::Vec::new(),
            early_send_buf: heapless::Vec::new(),
            hs_partial: heapless::Vec::new(),
            hs_partial_epoch: None,
            early_send: None,
            early_recv: None,
            hs_send: None,
            hs_recv: None,
            app_send: None,
            app_recv: None,
            pending_send_update: None,
            events: heapless::Deque::new(),
            tickets: heapless::Deque::new(),
            ccs_sent: false,
            alert_sent: false,
            early_notified: false,
            early_sent: 0,
            early_recvd: 0,
            early_limit,
            early_skipped: 0,
        }
    }

    /// Feed raw bytes received from the transport.
    ///
    /// On a fatal error the matching alert is queued for sending, the
    /// connection closes, and the error is returned.
    pub fn feed_data(&mut self, data: &[u8]) -> Result<(), Error> {
        if self.state == ConnState::Closed {
            return Err(Error::Closed);
        }
        self.recv_buf
            .extend_from_slice(data)
            .map_err(|_| Error::from(ResourceError::BufferExhausted))?;

        match self.process_recv() {
            Ok(()) => Ok(()),
            Err(e) => {
                self.fatal(&e);
                Err(e)
            }
        }
    }

    /// Pull the next chunk of outgoing bytes.
    ///
    /// Send-path failures are as fatal as receive-path ones: the
    /// matching alert (if any) is queued, the connection closes, and
    /// the error is returned. Keep polling afterwards to drain the
    /// alert bytes.
    pub fn poll_output<'a>(&mut self, buf: &'a mut [u8]) -> Result<Option<&'a [u8]>, Error> {
        // A closed connection only drains what is already queued.
        if self.state != ConnState::Closed {
            if let Err(e) = self.flush_pending() {
                self.fatal(&e);
                return Err(e);
            }
        }

        if self.send_offset >= self.send_buf.len() {
            return Ok(None);
        }

        let avail = self.send_buf.len() - self.send_offset;
        let n = avail.min(buf.len());
        buf[..n].copy_from_slice(&self.send_buf[self.send_offset..self.send_offset + n]);
        self.send_offset += n;

        if self.send_offset >= self.send_buf.len() {
            self.send_buf.clear();
            self.send_offset = 0;
        }

        Ok(Some(&buf[..n]))
    }

    fn flush_pending(&mut self) -> Result<(), Error> {
        self.flush_engine_output()?;
        self.flush_early_send()?;
        self.flush_app_send()
    }

    /// Poll for the next event.
    pub fn poll_event(&mut self) -> Option<TlsEvent> {
        self.events.pop_front()
    }

    /// Read decrypted application data.
    pub fn recv_app_data(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        if self.app_recv_buf.is_empty() {
            return Err(Error::WouldBlock);
        }
        let n = self.app_recv_buf.len().min(buf.len());
        buf[..n].copy_from_slice(&self.app_recv_buf[..n]);

        let remaining = self.app_recv_buf.len() - n;
        self.app_recv_buf.copy_within(n.., 0);
        self.app_recv_buf.truncate(remaining);
        Ok(n)
    }

    /// Queue application data for encryption and sending.
    pub fn send_app_data(&mut self, data: &[u8]) -> Result<usize, Error> {
        if self.state != ConnState::Active {
            return Err(Error::InvalidState);
        }
        self.app_send_buf
            .extend_from_slice(data)
            .map_err(|_| Error::from(ResourceError::BufferExhausted))?;
        Ok(data.len())
    }

    /// Queue 0-RTT data. Valid on a client that offered early data,
    /// until the server's response settles acceptance.
    pub fn send_early_data(&mut self, data: &[u8]) -> Result<usize, Error> {
        let usable = match self.engine.early_data_state() {
            // Once the handshake completes, EndOfEarlyData has been
            // sent; from then on data goes through `send_app_data`.
            EarlyDataState::Offered | EarlyDataState::Accepted => !self.engine.is_complete(),
            // The offer only materializes with the first flight; data
            // queued before then rides out right behind the ClientHello.
            EarlyDataState::NotOffered => {
                self.state == ConnState::Handshaking && self.early_limit > 0
            }
            EarlyDataState::Rejected => false,
        };
        if !usable {
            return Err(Error::InvalidState);
        }
        if self.early_sent.saturating_add(data.len() as u32) > self.early_limit {
            return Err(Error::InvalidState);
        }
        self.early_send_buf
            .extend_from_slice(data)
            .map_err(|_| Error::from(ResourceError::BufferExhausted))?;
        self.early_sent += data.len() as u32;
        Ok(data.len())
    }

    /// Negotiated ALPN protocol, if any.
    pub fn alpn(&self) -> Option<&[u8]> {
        self.engine.alpn()
    }

    /// Where 0-RTT stands.
    pub fn early_data_state(&self) -> EarlyDataState {
        self.engine.early_data_state()
    }

    /// Pull a session ticket received from the server.
    pub fn take_ticket(&mut self) -> Option<Ticket> {
        self.tickets.pop_front()
    }

    /// RFC 8446 §7.5 exporter; valid after the handshake completes.
    pub fn export_keying_material(
        &self,
        label: &[u8],
        context: &[u8],
        out: &mut [u8],
    ) -> Result<(), Error> {
        self.engine.export_keying_material(label, context, out)
    }

    /// Initiate a KeyUpdate; `request_peer` asks the peer to refresh
    /// its keys too.
    pub fn request_key_update(&mut self, request_peer: bool) -> Result<(), Error> {
        if self.state != ConnState::Active {
            return Err(Error::InvalidState);
        }
        self.engine.initiate_key_update(request_peer)?;
        self.check_keys()
    }

    /// Whether the handshake completed and the connection is usable.
    pub fn is_active(&self) -> bool {
        self.state == ConnState::Active
    }

    /// Whether the connection is closed or closing.
    pub fn is_closed(&self) -> bool {
        matches!(self.state, ConnState::Closed | ConnState::Closing)
    }

    /// Initiate a graceful close (send close_notify).
    pub fn close(&mut self) -> Result<(), Error> {
        if self.is_closed() {
            return Ok(());
        }
        self.send_alert(alert::LEVEL_WARNING, AlertDescription::CloseNotify)?;
        self.state = ConnState::Closing;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Receive path
    // ------------------------------------------------------------------

    fn process_recv(&mut self) -> Result<(), Error> {
        loop {
            if self.recv_buf.len() < RECORD_HEADER_LEN {
                return Ok(());
            }

            let hdr = codec::decode_record_header(&self.recv_buf[..RECORD_HEADER_LEN])?;
            if hdr.length as usize > MAX_CIPHERTEXT_PAYLOAD {
                return Err(DecodeError::Overlong.into());
            }
            let total = RECORD_HEADER_LEN + hdr.length as usize;
            if self.recv_buf.len() < total {
                return Ok(());
            }

            let mut record_data = [0u8; 18432];
            record_data[..total].copy_from_slice(&self.recv_buf[..total]);

            let remaining = self.recv_buf.len() - total;
            self.recv_buf.copy_within(total.., 0);
            self.recv_buf.truncate(remaining);

            let header_bytes: [u8; RECORD_HEADER_LEN] = [
                record_data[0],
                record_data[1],
                record_data[2],
                record_data[3],
                record_data[4],
            ];
            let payload_len = hdr.length as usize;
            self.handle_record(
                hdr.content_type,
                &header_bytes,
                &mut record_data[RECORD_HEADER_LEN..total],
                payload_len,
            )?;

            if self.state == ConnState::Closed {
                return Ok(());
            }
        }
    }

    fn handle_record(
        &mut self,
        ct: ContentType,
        header_bytes: &[u8; RECORD_HEADER_LEN],
        payload: &mut [u8],
        payload_len: usize,
    ) -> Result<(), Error> {
        match ct {
            ContentType::ChangeCipherSpec => {
                // Middlebox compatibility byte: silently dropped during
                // the handshake, never fed to the transcript.
                if self.engine.is_complete() {
                    return Err(ProtocolViolation::UnexpectedMessage.into());
                }
                if payload_len != 1 || payload[0] != 0x01 {
                    return Err(DecodeError::InvalidValue.into());
                }
                Ok(())
            }
            ContentType::Alert => self.handle_alert(&payload[..payload_len]),
            ContentType::Handshake => {
                if payload_len > MAX_PLAINTEXT {
                    return Err(DecodeError::Overlong.into());
                }
                self.feed_handshake(Epoch::Plaintext, payload, payload_len)
            }
            ContentType::ApplicationData => {
                let (keys, epoch) = self.current_recv_keys()?;
                let nonce = keys.next_nonce()?;
                let opened =
                    codec::open_record(&keys.aead, &nonce, payload, payload_len, header_bytes);
                let (content_len, inner_ct) = match opened {
                    Ok(r) => {
                        keys.advance();
                        r
                    }
                    Err(e) => {
                        // A server that turned 0-RTT down cannot read
                        // the client's early records; skip them (within
                        // a budget) until the handshake flight decrypts.
                        if self.skipping_rejected_early_data(payload_len) {
                            return Ok(());
                        }
                        return Err(e);
                    }
                };

                match inner_ct {
                    ContentType::Handshake => self.feed_handshake(epoch, payload, content_len),
                    ContentType::Alert => self.handle_alert(&payload[..content_len]),
                    ContentType::ApplicationData => {
                        match epoch {
                            Epoch::Application => {}
                            Epoch::EarlyData => {
                                self.early_recvd =
                                    self.early_recvd.saturating_add(content_len as u32);
                                if self.early_recvd > self.engine.accepted_max_early_data() {
                                    return Err(ProtocolViolation::UnexpectedMessage.into());
                                }
                            }
                            _ => return Err(DecodeError::UnexpectedContentType.into()),
                        }
                        self.app_recv_buf
                            .extend_from_slice(&payload[..content_len])
                            .map_err(|_| Error::from(ResourceError::BufferExhausted))?;
                        let _ = self.events.push_back(TlsEvent::AppData);
                        Ok(())
                    }
                    ContentType::ChangeCipherSpec => {
                        Err(DecodeError::UnexpectedContentType.into())
                    }
                }
            }
        }
    }

    /// Pick the decryption keys for an incoming protected record.
    fn current_recv_keys(&mut self) -> Result<(&mut RecordKeys, Epoch), Error> {
        if self.engine.awaiting_end_of_early_data() {
            if let Some(keys) = self.early_recv.as_mut() {
                return Ok((keys, Epoch::EarlyData));
            }
        }
        if let Some(keys) = self.app_recv.as_mut() {
            return Ok((keys, Epoch::Application));
        }
        if let Some(keys) = self.hs_recv.as_mut() {
            return Ok((keys, Epoch::Handshake));
        }
        Err(DecodeError::UnexpectedContentType.into())
    }

    /// Whether an undecryptable record is rejected 0-RTT the server
    /// must skip (RFC 8446 §4.2.10), and account for it.
    fn skipping_rejected_early_data(&mut self, payload_len: usize) -> bool {
        const SKIP_BUDGET: u32 = 65536;
        let rejecting = self.engine.role() == Role::Server
            && self.engine.early_data_state() == EarlyDataState::Rejected
            && !self.engine.is_complete();
        if !rejecting {
            return false;
        }
        self.early_skipped = self.early_skipped.saturating_add(payload_len as u32);
        self.early_skipped <= SKIP_BUDGET
    }

    /// Reassemble handshake messages across records of one epoch and
    /// hand every complete message to the engine.
    fn feed_handshake(
        &mut self,
        epoch: Epoch,
        payload: &mut [u8],
        len: usize,
    ) -> Result<(), Error> {
        if len == 0 {
            return Err(DecodeError::Truncated.into());
        }
        // A message may not straddle a key change.
        if !self.hs_partial.is_empty() && self.hs_partial_epoch != Some(epoch) {
            return Err(ProtocolViolation::UnexpectedMessage.into());
        }
        self.hs_partial_epoch = Some(epoch);
        self.hs_partial
            .extend_from_slice(&payload[..len])
            .map_err(|_| Error::from(ResourceError::BufferExhausted))?;

        let mut complete = 0;
        while self.hs_partial.len() - complete >= HEADER_LEN {
            let (_, body_len) = read_handshake_header(&self.hs_partial[complete..])?;
            let msg_len = HEADER_LEN + body_len;
            if self.hs_partial.len() - complete < msg_len {
                break;
            }
            complete += msg_len;
        }

        if complete > 0 {
            // The engine may be handed several coalesced messages.
            let mut msgs = [0u8; 4096];
            msgs[..complete].copy_from_slice(&self.hs_partial[..complete]);
            let remaining = self.hs_partial.len() - complete;
            self.hs_partial.copy_within(complete.., 0);
            self.hs_partial.truncate(remaining);

            self.engine.read_handshake(epoch, &msgs[..complete])?;
        }
        if self.hs_partial.is_empty() {
            self.hs_partial_epoch = None;
        }

        self.check_keys()
    }

    fn handle_alert(&mut self, data: &[u8]) -> Result<(), Error> {
        let (_level, desc) = alert::decode_alert(data)?;
        match AlertDescription::from_u8(desc) {
            Some(AlertDescription::CloseNotify) => {
                self.state = ConnState::Closing;
                let _ = self.events.push_back(TlsEvent::PeerClosed);
                Ok(())
            }
            Some(AlertDescription::UserCanceled) => Ok(()),
            _ => {
                // Anything else is fatal regardless of level.
                self.state = ConnState::Closed;
                Err(Error::PeerAlert(desc))
            }
        }
    }

    // ------------------------------------------------------------------
    // Key management
    // ------------------------------------------------------------------

    fn check_keys(&mut self) -> Result<(), Error> {
        while let Some(secrets) = self.engine.derived_secrets() {
            self.install_keys(secrets)?;
        }

        if !self.early_notified {
            match self.engine.early_data_state() {
                EarlyDataState::Accepted => {
                    let _ = self.events.push_back(TlsEvent::EarlyDataAccepted);
                    self.early_notified = true;
                }
                EarlyDataState::Rejected => {
                    // Unsent 0-RTT is discarded, never replayed at 1-RTT.
                    self.early_send_buf.clear();
                    self.early_send = None;
                    let _ = self.events.push_back(TlsEvent::EarlyDataRejected);
                    self.early_notified = true;
                }
                _ => {}
            }
        }

        while let Some(ticket) = self.engine.take_ticket() {
            if self.tickets.is_full() {
                let _ = self.tickets.pop_front();
            }
            let _ = self.tickets.push_back(ticket);
            let _ = self.events.push_back(TlsEvent::TicketReceived);
        }

        if self.engine.is_complete() && self.state == ConnState::Handshaking {
            self.state = ConnState::Active;
            let _ = self.events.push_back(TlsEvent::HandshakeComplete);
        }
        Ok(())
    }

    fn install_keys(&mut self, secrets: DerivedSecrets) -> Result<(), Error> {
        let suite = secrets.suite;
        match secrets.epoch {
            Epoch::EarlyData => {
                if let Some(secret) = &secrets.send {
                    self.early_send = Some(RecordKeys::from_secret(suite, secret)?);
                }
                if let Some(secret) = &secrets.recv {
                    self.early_recv = Some(RecordKeys::from_secret(suite, secret)?);
                }
            }
            Epoch::Handshake => {
                if let Some(secret) = &secrets.send {
                    self.hs_send = Some(RecordKeys::from_secret(suite, secret)?);
                }
                if let Some(secret) = &secrets.recv {
                    self.hs_recv = Some(RecordKeys::from_secret(suite, secret)?);
                }
            }
            Epoch::Application => {
                if let Some(secret) = &secrets.send {
                    if self.app_send.is_some() {
                        // KeyUpdate: the announcement must leave under
                        // the old keys first.
                        self.pending_send_update = Some((suite, secret.clone()));
                    } else {
                        self.app_send = Some(RecordKeys::from_secret(suite, secret)?);
                    }
                }
                if let Some(secret) = &secrets.recv {
                    self.app_recv = Some(RecordKeys::from_secret(suite, secret)?);
                }
            }
            Epoch::Plaintext => {}
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Send path
    // ------------------------------------------------------------------

    fn flush_engine_output(&mut self) -> Result<(), Error> {
        loop {
            let mut buf = [0u8; 4096];
            let (n, epoch) = self.engine.write_handshake(&mut buf)?;
            if n == 0 {
                break;
            }

            match epoch {
                Epoch::Plaintext => {
                    self.write_plaintext_records(ContentType::Handshake, &buf[..n])?;
                }
                Epoch::EarlyData => {
                    self.maybe_send_ccs()?;
                    // Remaining 0-RTT data precedes EndOfEarlyData.
                    self.flush_early_send()?;
                    self.encrypt_records(Epoch::EarlyData, ContentType::Handshake, &buf[..n])?;
                }
                Epoch::Handshake => {
                    self.maybe_send_ccs()?;
                    self.encrypt_records(Epoch::Handshake, ContentType::Handshake, &buf[..n])?;
                }
                Epoch::Application => {
                    self.encrypt_records(Epoch::Application, ContentType::Handshake, &buf[..n])?;
                    // A queued send-direction key refresh takes effect
                    // now that the KeyUpdate is on the wire.
                    if let Some((suite, secret)) = self.pending_send_update.take() {
                        self.app_send = Some(RecordKeys::from_secret(suite, &secret)?);
                    }
                }
            }
        }
        self.check_keys()
    }

    fn flush_early_send(&mut self) -> Result<(), Error> {
        if self.early_send_buf.is_empty() || self.early_send.is_none() {
            return Ok(());
        }
        self.maybe_send_ccs()?;

        let mut data = [0u8; 4096];
        let len = self.early_send_buf.len();
        data[..len].copy_from_slice(&self.early_send_buf);
        self.early_send_buf.clear();
        self.encrypt_records(Epoch::EarlyData, ContentType::ApplicationData, &data[..len])
    }

    fn flush_app_send(&mut self) -> Result<(), Error> {
        if self.app_send_buf.is_empty() || self.state != ConnState::Active {
            return Ok(());
        }

        // Refresh keys well before the sequence number runs out.
        if let Some(keys) = &self.app_send {
            if keys.seq >= KEY_UPDATE_SEQ_THRESHOLD && self.pending_send_update.is_none() {
                self.engine.initiate_key_update(false)?;
                self.check_keys()?;
                self.flush_engine_output()?;
            }
        }

        while !self.app_send_buf.is_empty() {
            let chunk_len = self.app_send_buf.len().min(MAX_PLAINTEXT);
            let mut chunk = [0u8; MAX_PLAINTEXT];
            chunk[..chunk_len].copy_from_slice(&self.app_send_buf[..chunk_len]);

            self.encrypt_records(
                Epoch::Application,
                ContentType::ApplicationData,
                &chunk[..chunk_len],
            )?;

            let remaining = self.app_send_buf.len() - chunk_len;
            self.app_send_buf.copy_within(chunk_len.., 0);
            self.app_send_buf.truncate(remaining);
        }
        Ok(())
    }

    /// One ChangeCipherSpec before our first protected record, for
    /// middlebox compatibility.
    fn maybe_send_ccs(&mut self) -> Result<(), Error> {
        if self.ccs_sent {
            return Ok(());
        }
        let ccs = [
            ContentType::ChangeCipherSpec as u8,
            0x03,
            0x03,
            0x00,
            0x01,
            0x01,
        ];
        self.queue_send(&ccs)?;
        self.ccs_sent = true;
        Ok(())
    }

    /// Largest plaintext fragment we may send: the protocol maximum,
    /// shrunk by the peer's record_size_limit (which covers the inner
    /// content type byte).
    fn max_fragment(&self) -> usize {
        match self.engine.peer_record_size_limit() {
            Some(limit) => MAX_PLAINTEXT.min(limit as usize - 1),
            None => MAX_PLAINTEXT,
        }
    }

    fn write_plaintext_records(&mut self, ct: ContentType, data: &[u8]) -> Result<(), Error> {
        for chunk in data.chunks(self.max_fragment()) {
            let mut header = [0u8; RECORD_HEADER_LEN];
            codec::encode_record_header(ct, chunk.len() as u16, &mut header)?;
            self.queue_send(&header)?;
            self.queue_send(chunk)?;
        }
        Ok(())
    }

    fn encrypt_records(
        &mut self,
        epoch: Epoch,
        inner_ct: ContentType,
        data: &[u8],
    ) -> Result<(), Error> {
        let max_fragment = self.max_fragment();
        let keys = match epoch {
            Epoch::EarlyData => self.early_send.as_mut(),
            Epoch::Handshake => self.hs_send.as_mut(),
            Epoch::Application => self.app_send.as_mut(),
            Epoch::Plaintext => None,
        }
        .ok_or(Error::InvalidState)?;

        let mut enc_buf = [0u8; MAX_PLAINTEXT + 1 + TAG_LEN];
        let mut queued: heapless::Vec<u8, BUF> = heapless::Vec::new();

        for chunk in data.chunks(max_fragment) {
            let nonce = keys.next_nonce()?;
            keys.advance();

            enc_buf[..chunk.len()].copy_from_slice(chunk);
            let ct_len =
                codec::seal_record(&keys.aead, &nonce, &mut enc_buf, chunk.len(), inner_ct)?;

            let mut header = [0u8; RECORD_HEADER_LEN];
            codec::encode_record_header(
                ContentType::ApplicationData,
                ct_len as u16,
                &mut header,
            )?;
            queued
                .extend_from_slice(&header)
                .and_then(|_| queued.extend_from_slice(&enc_buf[..ct_len]))
                .map_err(|_| Error::from(ResourceError::BufferExhausted))?;
        }

        self.queue_send(&queued)
    }

    fn queue_send(&mut self, data: &[u8]) -> Result<(), Error> {
        self.send_buf
            .extend_from_slice(data)
            .map_err(|_| Error::from(ResourceError::BufferExhausted))
    }

    // ------------------------------------------------------------------
    // Alerts
    // ------------------------------------------------------------------

    /// Queue the alert matching a fatal error (at most once) and close.
    ///
    /// Negotiation dead ends are role-split per RFC 8446 §4.1.1: the
    /// server answers handshake_failure on the wire, while a client's
    /// Config error is its own misconfiguration and produces no alert.
    fn fatal(&mut self, err: &Error) {
        let local_only =
            matches!(err, Error::Config(_)) && self.engine.role() == Role::Client;
        if !self.alert_sent && !local_only {
            if let Some(desc) = alert::alert_for_error(err) {
                let _ = self.send_alert(alert::LEVEL_FATAL, desc);
                self.alert_sent = true;
            }
        }
        self.state = ConnState::Closed;
    }

    fn send_alert(&mut self, level: u8, desc: AlertDescription) -> Result<(), Error> {
        let payload = alert::encode_alert(level, desc);

        if self.app_send.is_some() && self.engine.is_complete() {
            self.encrypt_records(Epoch::Application, ContentType::Alert, &payload)
        } else if self.hs_send.is_some() {
            self.maybe_send_ccs()?;
            self.encrypt_records(Epoch::Handshake, ContentType::Alert, &payload)
        } else {
            let mut rec = [0u8; RECORD_HEADER_LEN + 2];
            codec::encode_record_header(ContentType::Alert, 2, &mut rec)?;
            rec[RECORD_HEADER_LEN..].copy_from_slice(&payload);
            self.queue_send(&rec)
        }
    }
}

#[cfg(test)]
mod tests {
    extern crate std;
    use std::boxed::Box;
    use std::string::String;
    use std::sync::Mutex;
    use std::vec::Vec;

    use super::*;
    use crate::tls::cipher::NamedGroup;
    use crate::tls::keylog::{self, KeyLog};
    use crate::tls::ticket::TicketStore;
    use core::cell::RefCell;

    const TEST_SEED: [u8; 32] = [0x01u8; 32];

    type TestConn = TlsConnection<32768>;

    fn test_cert_der() -> &'static [u8] {
        let pk = crate::crypto::ed25519::ed25519_public_key_from_seed(&TEST_SEED);
        let mut buf = [0u8; 512];
        let len = crate::crypto::ed25519::build_ed25519_cert_der(&pk, &mut buf).unwrap();
        Box::leak(buf[..len].to_vec().into_boxed_slice())
    }

    fn leak_store() -> &'static RefCell<TicketStore> {
        Box::leak(Box::new(RefCell::new(TicketStore::new())))
    }

    /// Key log sink that remembers every line.
    #[derive(Default)]
    struct CaptureLog(Mutex<Vec<String>>);

    impl KeyLog for CaptureLog {
        fn log(&self, label: &str, client_random: &[u8; 32], secret: &[u8]) {
            let mut buf = [0u8; keylog::MAX_LINE];
            if let Some(line) = keylog::format_line(label, client_random, secret, &mut buf) {
                self.0.lock().unwrap().push(String::from(line));
            }
        }
    }

    impl CaptureLog {
        fn find(&self, label: &str) -> Option<String> {
            self.0
                .lock()
                .unwrap()
                .iter()
                .find(|l| l.starts_with(label))
                .cloned()
        }
    }

    fn make_client(cert: &'static [u8]) -> TestConn {
        let mut config = TlsConfig::new("test.local");
        config.alpn_protocols = &[b"h2"];
        config.pinned_certs = Box::leak(Box::new([cert]));
        TestConn::new_client(config, [0xaa; 32], [0xbb; 32])
    }

    fn make_server(cert: &'static [u8]) -> TestConn {
        let mut config = ServerTlsConfig::new(cert, &TEST_SEED);
        config.alpn_protocols = &[b"h2"];
        TestConn::new_server(config, [0xcc; 32], [0xdd; 32])
    }

    /// Move all pending output from `src` to `dst`.
    fn transfer(src: &mut TestConn, dst: &mut TestConn) -> bool {
        let mut any = false;
        let mut buf = [0u8; 32768];
        while let Some(data) = src.poll_output(&mut buf).unwrap() {
            dst.feed_data(data).unwrap();
            any = true;
        }
        any
    }

    fn handshake(client: &mut TestConn, server: &mut TestConn) {
        for _ in 0..20 {
            let a = transfer(client, server);
            let b = transfer(server, client);
            if !a && !b {
                break;
            }
        }
    }

    fn drain_events(conn: &mut TestConn) -> Vec<TlsEvent> {
        let mut events = Vec::new();
        while let Some(ev) = conn.poll_event() {
            events.push(ev);
        }
        events
    }

    // ------------------------------------------------------------------
    // S1: plain ECDHE handshake, echo, key log agreement
    // ------------------------------------------------------------------

    #[test]
    fn handshake_completes_and_echoes() {
        let cert = test_cert_der();
        let mut client = make_client(cert);
        let mut server = make_server(cert);

        handshake(&mut client, &mut server);

        assert!(drain_events(&mut client).contains(&TlsEvent::HandshakeComplete));
        assert!(drain_events(&mut server).contains(&TlsEvent::HandshakeComplete));
        assert!(client.is_active());
        assert!(server.is_active());

        client.send_app_data(b"hello").unwrap();
        transfer(&mut client, &mut server);
        assert!(drain_events(&mut server).contains(&TlsEvent::AppData));

        let mut buf = [0u8; 64];
        let n = server.recv_app_data(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");

        server.send_app_data(&buf[..n]).unwrap();
        transfer(&mut server, &mut client);
        let n = client.recv_app_data(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[test]
    fn key_log_lines_match_across_sides() {
        let cert = test_cert_der();
        let client_log: &'static CaptureLog = Box::leak(Box::new(CaptureLog::default()));
        let server_log: &'static CaptureLog = Box::leak(Box::new(CaptureLog::default()));

        let mut client_cfg = TlsConfig::new("test.local");
        client_cfg.key_log = client_log;
        let mut server_cfg = ServerTlsConfig::new(cert, &TEST_SEED);
        server_cfg.key_log = server_log;

        let mut client = TestConn::new_client(client_cfg, [0xaa; 32], [0xbb; 32]);
        let mut server = TestConn::new_server(server_cfg, [0xcc; 32], [0xdd; 32]);
        handshake(&mut client, &mut server);
        assert!(client.is_active() && server.is_active());

        for label in [
            keylog::CLIENT_HANDSHAKE_TRAFFIC_SECRET,
            keylog::SERVER_HANDSHAKE_TRAFFIC_SECRET,
            keylog::CLIENT_TRAFFIC_SECRET_0,
            keylog::SERVER_TRAFFIC_SECRET_0,
            keylog::EXPORTER_SECRET,
        ] {
            let c = client_log.find(label).expect(label);
            let s = server_log.find(label).expect(label);
            assert_eq!(c, s, "mismatch for {label}");
        }
    }

    #[test]
    fn alpn_negotiation() {
        let cert = test_cert_der();
        let mut client = make_client(cert);
        let mut server = make_server(cert);
        handshake(&mut client, &mut server);

        assert_eq!(client.alpn(), Some(b"h2".as_slice()));
        assert_eq!(server.alpn(), Some(b"h2".as_slice()));
    }

    #[test]
    fn exporters_agree() {
        let cert = test_cert_der();
        let mut client = make_client(cert);
        let mut server = make_server(cert);
        handshake(&mut client, &mut server);

        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        client
            .export_keying_material(b"EXPORTER-test", b"ctx", &mut a)
            .unwrap();
        server
            .export_keying_material(b"EXPORTER-test", b"ctx", &mut b)
            .unwrap();
        assert_eq!(a, b);
        assert_ne!(a, [0u8; 32]);
    }

    // ------------------------------------------------------------------
    // S2: HelloRetryRequest
    // ------------------------------------------------------------------

    #[test]
    fn hello_retry_request_flow() {
        let cert = test_cert_der();

        // Client shares only P-256 up front, but the server prefers
        // X25519 (and the client does support it).
        let mut client_cfg = TlsConfig::new("test.local");
        client_cfg.groups = &[NamedGroup::Secp256r1, NamedGroup::X25519];
        client_cfg.pinned_certs = Box::leak(Box::new([cert]));
        let mut client = TestConn::new_client(client_cfg, [0xaa; 32], [0xbb; 32]);
        let mut server = make_server(cert);

        handshake(&mut client, &mut server);

        assert!(client.is_active(), "handshake should survive the retry");
        assert!(server.is_active());

        client.send_app_data(b"after retry").unwrap();
        transfer(&mut client, &mut server);
        let mut buf = [0u8; 64];
        let n = server.recv_app_data(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"after retry");
    }

    // ------------------------------------------------------------------
    // S3: resumption and 0-RTT
    // ------------------------------------------------------------------

    #[test]
    fn resumption_with_early_data() {
        let cert = test_cert_der();
        let store = leak_store();

        // First connection: full handshake, pick up a ticket.
        let mut server_cfg = ServerTlsConfig::new(cert, &TEST_SEED);
        server_cfg.ticket_store = Some(store);
        server_cfg.max_early_data = 16384;
        server_cfg.ticket_lifetime_secs = 7200;
        server_cfg.now_ms = 1_000;
        let mut server = TestConn::new_server(server_cfg, [0xcc; 32], [0xdd; 32]);

        let mut client_cfg = TlsConfig::new("test.local");
        client_cfg.pinned_certs = Box::leak(Box::new([cert]));
        client_cfg.now_ms = 1_000;
        let mut client = TestConn::new_client(client_cfg, [0xaa; 32], [0xbb; 32]);

        handshake(&mut client, &mut server);
        assert!(client.is_active());
        assert!(drain_events(&mut client).contains(&TlsEvent::TicketReceived));
        let ticket = client.take_ticket().expect("ticket");
        assert_eq!(ticket.max_early_data, 16384);

        // Second connection: resume, send a request as 0-RTT data.
        let mut server_cfg = ServerTlsConfig::new(cert, &TEST_SEED);
        server_cfg.ticket_store = Some(store);
        server_cfg.max_early_data = 16384;
        server_cfg.now_ms = 2_000;
        let mut server2 = TestConn::new_server(server_cfg, [0x55; 32], [0x66; 32]);

        let mut client_cfg = TlsConfig::new("test.local");
        client_cfg.pinned_certs = Box::leak(Box::new([cert]));
        client_cfg.ticket = Some(ticket);
        client_cfg.enable_early_data = true;
        client_cfg.now_ms = 2_000;
        let mut client2 = TestConn::new_client(client_cfg, [0x77; 32], [0x88; 32]);

        client2.send_early_data(b"GET / HTTP/1.0\r\n\r\n").unwrap();

        handshake(&mut client2, &mut server2);

        assert!(client2.is_active());
        assert!(server2.is_active());
        let client_events = drain_events(&mut client2);
        assert!(
            client_events.contains(&TlsEvent::EarlyDataAccepted),
            "got {client_events:?}"
        );
        assert_eq!(client2.early_data_state(), EarlyDataState::Accepted);

        // The server saw the early request.
        assert!(drain_events(&mut server2).contains(&TlsEvent::AppData));
        let mut buf = [0u8; 64];
        let n = server2.recv_app_data(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"GET / HTTP/1.0\r\n\r\n");

        // And answers at 1-RTT.
        server2.send_app_data(b"HTTP/1.0 200 ok").unwrap();
        transfer(&mut server2, &mut client2);
        let n = client2.recv_app_data(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"HTTP/1.0 200 ok");
    }

    #[test]
    fn replayed_early_data_is_rejected() {
        let cert = test_cert_der();
        let store = leak_store();

        let mut server_cfg = ServerTlsConfig::new(cert, &TEST_SEED);
        server_cfg.ticket_store = Some(store);
        server_cfg.max_early_data = 16384;
        server_cfg.now_ms = 1_000;
        let mut server = TestConn::new_server(server_cfg, [0xcc; 32], [0xdd; 32]);

        let mut client_cfg = TlsConfig::new("test.local");
        client_cfg.pinned_certs = Box::leak(Box::new([cert]));
        client_cfg.now_ms = 1_000;
        let mut client = TestConn::new_client(client_cfg, [0xaa; 32], [0xbb; 32]);
        handshake(&mut client, &mut server);
        let ticket = client.take_ticket().expect("ticket");

        // Two resumption attempts with identical ticket and clock: the
        // second presents the same (ticket, obfuscated age) pair.
        for (attempt, expect_accept) in [(0u8, true), (1u8, false)] {
            let mut server_cfg = ServerTlsConfig::new(cert, &TEST_SEED);
            server_cfg.ticket_store = Some(store);
            server_cfg.max_early_data = 16384;
            server_cfg.now_ms = 2_000;
            let mut srv = TestConn::new_server(server_cfg, [0x40 + attempt; 32], [0x60; 32]);

            let mut client_cfg = TlsConfig::new("test.local");
            client_cfg.pinned_certs = Box::leak(Box::new([cert]));
            client_cfg.ticket = Some(ticket.clone());
            client_cfg.enable_early_data = true;
            client_cfg.now_ms = 2_000;
            let mut cli = TestConn::new_client(client_cfg, [0x70 + attempt; 32], [0x90; 32]);

            cli.send_early_data(b"replay?").unwrap();
            handshake(&mut cli, &mut srv);

            assert!(cli.is_active(), "attempt {attempt}");
            let state = cli.early_data_state();
            if expect_accept {
                assert_eq!(state, EarlyDataState::Accepted);
            } else {
                // Handshake still completes as 1-RTT.
                assert_eq!(state, EarlyDataState::Rejected);
            }
        }
    }

    // ------------------------------------------------------------------
    // S4: downgrade sentinel
    // ------------------------------------------------------------------

    #[test]
    fn downgrade_sentinel_aborts() {
        use crate::tls::extensions::{
            Extension, KeyShare, KeyShareEntry, SupportedVersions, TLS13_VERSION,
        };
        use crate::tls::messages::{ServerHello, DOWNGRADE_SENTINEL_TLS12};

        let cert = test_cert_der();
        let client_random = [0xbb; 32];
        let mut client = make_client(cert);

        // Flush the ClientHello first.
        let mut buf = [0u8; 32768];
        while client.poll_output(&mut buf).unwrap().is_some() {}

        // A TLS 1.2-ish server_random with the downgrade sentinel.
        let mut random = [0x55u8; 32];
        random[24..].copy_from_slice(&DOWNGRADE_SENTINEL_TLS12);

        let mut extensions = heapless::Vec::new();
        let _ = extensions.push(Extension::SupportedVersions(SupportedVersions::Selected(
            TLS13_VERSION,
        )));
        let x = x25519_dalek::StaticSecret::from([9u8; 32]);
        let _ = extensions.push(Extension::KeyShare(KeyShare::ServerShare(
            KeyShareEntry::new(
                NamedGroup::X25519,
                x25519_dalek::PublicKey::from(&x).as_bytes(),
            )
            .unwrap(),
        )));

        let mut echo = heapless::Vec::new();
        echo.extend_from_slice(&client_random).unwrap();
        let sh = ServerHello {
            random,
            legacy_session_id_echo: echo,
            cipher_suite: 0x1301,
            extensions,
        };
        let mut msg = [0u8; 512];
        let msg_len = sh.encode(&mut msg).unwrap();

        let mut record = [0u8; 512];
        let n = codec::encode_record_header(
            ContentType::Handshake,
            msg_len as u16,
            &mut record,
        )
        .unwrap();
        record[n..n + msg_len].copy_from_slice(&msg[..msg_len]);

        let err = client.feed_data(&record[..n + msg_len]).unwrap_err();
        assert_eq!(
            err,
            Error::Protocol(ProtocolViolation::IllegalParameter)
        );
        assert!(client.is_closed());
    }

    // ------------------------------------------------------------------
    // S5: ChangeCipherSpec compatibility byte
    // ------------------------------------------------------------------

    #[test]
    fn injected_ccs_is_ignored() {
        let cert = test_cert_der();
        let mut client = make_client(cert);
        let mut server = make_server(cert);

        // Client flight out; inject a stray CCS in front of the server's
        // reply on the way back.
        transfer(&mut client, &mut server);
        client.feed_data(&[20, 0x03, 0x03, 0x00, 0x01, 0x01]).unwrap();
        handshake(&mut client, &mut server);

        assert!(client.is_active(), "CCS must not disturb the handshake");
        assert!(server.is_active());
    }

    #[test]
    fn malformed_ccs_rejected() {
        let cert = test_cert_der();
        let mut client = make_client(cert);
        let mut buf = [0u8; 32768];
        while client.poll_output(&mut buf).unwrap().is_some() {}

        // CCS body must be exactly 0x01.
        let err = client.feed_data(&[20, 0x03, 0x03, 0x00, 0x01, 0x02]).unwrap_err();
        assert_eq!(err, Error::Decode(DecodeError::InvalidValue));
    }

    // ------------------------------------------------------------------
    // S6: record_size_limit
    // ------------------------------------------------------------------

    #[test]
    fn record_size_limit_honored() {
        let cert = test_cert_der();
        let mut server_cfg = ServerTlsConfig::new(cert, &TEST_SEED);
        server_cfg.record_size_limit = Some(512);
        let mut server = TestConn::new_server(server_cfg, [0xcc; 32], [0xdd; 32]);

        let mut client_cfg = TlsConfig::new("test.local");
        client_cfg.pinned_certs = Box::leak(Box::new([cert]));
        let mut client = TestConn::new_client(client_cfg, [0xaa; 32], [0xbb; 32]);

        handshake(&mut client, &mut server);
        assert!(client.is_active());

        // 2000 bytes must be fragmented to honor the server's limit:
        // protected plaintext (content + inner type) stays <= 512.
        let payload = [0x42u8; 2000];
        client.send_app_data(&payload).unwrap();

        let mut out = Vec::new();
        let mut buf = [0u8; 32768];
        while let Some(data) = client.poll_output(&mut buf).unwrap() {
            out.extend_from_slice(data);
        }
        let mut off = 0;
        while off < out.len() {
            let hdr = codec::decode_record_header(&out[off..off + RECORD_HEADER_LEN]).unwrap();
            assert!(
                hdr.length as usize <= 512 + TAG_LEN,
                "record too large: {}",
                hdr.length
            );
            off += RECORD_HEADER_LEN + hdr.length as usize;
        }

        server.feed_data(&out).unwrap();
        let mut rx = Vec::new();
        let mut chunk = [0u8; 4096];
        while let Ok(n) = server.recv_app_data(&mut chunk) {
            rx.extend_from_slice(&chunk[..n]);
        }
        assert_eq!(rx.len(), 2000);
        assert!(rx.iter().all(|&b| b == 0x42));
    }

    // ------------------------------------------------------------------
    // KeyUpdate
    // ------------------------------------------------------------------

    #[test]
    fn key_update_both_directions() {
        let cert = test_cert_der();
        let mut client = make_client(cert);
        let mut server = make_server(cert);
        handshake(&mut client, &mut server);
        drain_events(&mut client);
        drain_events(&mut server);

        // Client refreshes its keys and asks the server to do the same.
        client.request_key_update(true).unwrap();
        client.send_app_data(b"fresh keys").unwrap();
        transfer(&mut client, &mut server);

        let mut buf = [0u8; 64];
        let n = server.recv_app_data(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"fresh keys");

        // Server's answer rides on its own updated keys.
        server.send_app_data(b"me too").unwrap();
        transfer(&mut server, &mut client);
        let n = client.recv_app_data(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"me too");

        assert!(client.is_active());
        assert!(server.is_active());
    }

    // ------------------------------------------------------------------
    // Transport behaviors
    // ------------------------------------------------------------------

    #[test]
    fn fragmented_feed_data() {
        let cert = test_cert_der();
        let mut client = make_client(cert);
        let mut server = make_server(cert);

        // Byte-by-byte delivery exercises record and message reassembly.
        for _ in 0..20 {
            let mut buf = [0u8; 32768];
            while let Some(data) = client.poll_output(&mut buf).unwrap() {
                let copy = data.to_vec();
                for b in &copy {
                    server.feed_data(core::slice::from_ref(b)).unwrap();
                }
            }
            let mut buf2 = [0u8; 32768];
            while let Some(data) = server.poll_output(&mut buf2).unwrap() {
                let copy = data.to_vec();
                for b in &copy {
                    client.feed_data(core::slice::from_ref(b)).unwrap();
                }
            }
            if client.is_active() && server.is_active() {
                break;
            }
        }
        assert!(client.is_active());
        assert!(server.is_active());

        client.send_app_data(b"fragmented").unwrap();
        let mut buf = [0u8; 32768];
        while let Some(data) = client.poll_output(&mut buf).unwrap() {
            let copy = data.to_vec();
            for b in &copy {
                server.feed_data(core::slice::from_ref(b)).unwrap();
            }
        }
        let mut rx = [0u8; 64];
        let n = server.recv_app_data(&mut rx).unwrap();
        assert_eq!(&rx[..n], b"fragmented");
    }

    #[test]
    fn graceful_close() {
        let cert = test_cert_der();
        let mut client = make_client(cert);
        let mut server = make_server(cert);
        handshake(&mut client, &mut server);
        drain_events(&mut client);
        drain_events(&mut server);

        client.close().unwrap();
        assert!(client.is_closed());
        transfer(&mut client, &mut server);

        assert!(drain_events(&mut server).contains(&TlsEvent::PeerClosed));
        // close() is idempotent.
        client.close().unwrap();
    }

    #[test]
    fn send_before_handshake_fails() {
        let cert = test_cert_der();
        let mut client = make_client(cert);
        assert_eq!(client.send_app_data(b"too early"), Err(Error::InvalidState));
    }

    #[test]
    fn recv_when_empty_would_block() {
        let cert = test_cert_der();
        let mut client = make_client(cert);
        let mut server = make_server(cert);
        handshake(&mut client, &mut server);

        let mut buf = [0u8; 16];
        assert_eq!(server.recv_app_data(&mut buf), Err(Error::WouldBlock));
    }

    #[test]
    fn tampered_record_fails_with_bad_record_mac() {
        let cert = test_cert_der();
        let mut client = make_client(cert);
        let mut server = make_server(cert);
        handshake(&mut client, &mut server);
        drain_events(&mut client);
        drain_events(&mut server);

        client.send_app_data(b"sensitive").unwrap();
        let mut out = Vec::new();
        let mut buf = [0u8; 32768];
        while let Some(data) = client.poll_output(&mut buf).unwrap() {
            out.extend_from_slice(data);
        }
        // Flip one ciphertext bit.
        let last = out.len() - 1;
        out[last] ^= 0x01;

        let err = server.feed_data(&out).unwrap_err();
        assert_eq!(err, Error::Crypto(crate::error::CryptoError::AeadOpenFailure));
        assert!(server.is_closed());
    }

    // ------------------------------------------------------------------
    // Send-path failure semantics
    // ------------------------------------------------------------------

    #[test]
    fn client_with_no_usable_group_errors_without_alert() {
        let cert = test_cert_der();
        let mut config = TlsConfig::new("test.local");
        // Nothing in this list can actually run a key exchange.
        config.groups = &[NamedGroup::X448, NamedGroup::Ffdhe2048];
        config.pinned_certs = Box::leak(Box::new([cert]));
        let mut client = TestConn::new_client(config, [0xaa; 32], [0xbb; 32]);

        let mut buf = [0u8; 32768];
        let err = client.poll_output(&mut buf).unwrap_err();
        assert_eq!(
            err,
            Error::Config(crate::error::ConfigError::NoCommonGroup)
        );
        assert!(client.is_closed());

        // A client's own misconfiguration stays local: no wire alert.
        assert!(client.poll_output(&mut buf).unwrap().is_none());
    }

    #[test]
    fn server_negotiation_failure_emits_handshake_failure() {
        let cert = test_cert_der();
        // Client only speaks ChaCha20-Poly1305; the server insists on AES.
        let mut client_cfg = TlsConfig::new("test.local");
        client_cfg.cipher_suites = &[CipherSuite::ChaCha20Poly1305Sha256];
        client_cfg.pinned_certs = Box::leak(Box::new([cert]));
        let mut client = TestConn::new_client(client_cfg, [0xaa; 32], [0xbb; 32]);

        let mut server_cfg = ServerTlsConfig::new(cert, &TEST_SEED);
        server_cfg.cipher_suites = &[CipherSuite::Aes128GcmSha256];
        let mut server = TestConn::new_server(server_cfg, [0xcc; 32], [0xdd; 32]);

        let mut out = Vec::new();
        let mut buf = [0u8; 32768];
        while let Some(data) = client.poll_output(&mut buf).unwrap() {
            out.extend_from_slice(data);
        }
        let err = server.feed_data(&out).unwrap_err();
        assert_eq!(
            err,
            Error::Config(crate::error::ConfigError::NoCommonCipher)
        );
        assert!(server.is_closed());

        // The server answers with a fatal handshake_failure alert.
        let alert_bytes = server.poll_output(&mut buf).unwrap().expect("alert queued");
        let expected = [
            ContentType::Alert as u8,
            0x03,
            0x03,
            0x00,
            0x02,
            alert::LEVEL_FATAL,
            AlertDescription::HandshakeFailure.to_u8(),
        ];
        assert_eq!(alert_bytes, &expected[..]);
        assert!(server.poll_output(&mut buf).unwrap().is_none());
    }

    #[test]
    fn send_buffer_exhaustion_is_fatal_not_silent() {
        let cert = test_cert_der();
        let mut client = make_client(cert);
        let mut server = make_server(cert);
        handshake(&mut client, &mut server);
        drain_events(&mut client);

        // Strand a full record in send_buf by draining only a sliver,
        // then queue more than the remaining capacity can take.
        client.send_app_data(&[0x42u8; 16000]).unwrap();
        let mut sliver = [0u8; 8];
        assert!(client.poll_output(&mut sliver).unwrap().is_some());
        client.send_app_data(&[0x43u8; 16000]).unwrap();
        client.send_app_data(&[0x44u8; 16000]).unwrap();

        let mut buf = [0u8; 32768];
        let err = client.poll_output(&mut buf).unwrap_err();
        assert_eq!(
            err,
            Error::Resource(crate::error::ResourceError::BufferExhausted)
        );
        assert!(client.is_closed());
    }

    #[test]
    fn wrapper_types_interoperate() {
        use super::super::{TlsClient, TlsServer};

        let cert = test_cert_der();
        let mut client_cfg = TlsConfig::new("test.local");
        client_cfg.pinned_certs = Box::leak(Box::new([cert]));
        let server_cfg = ServerTlsConfig::new(cert, &TEST_SEED);

        let mut client: TlsClient<32768> = TlsClient::new(client_cfg, [0xaa; 32], [0xbb; 32]);
        let mut server: TlsServer<32768> = TlsServer::new(server_cfg, [0xcc; 32], [0xdd; 32]);

        for _ in 0..20 {
            let mut any = false;
            let mut buf = [0u8; 32768];
            while let Some(data) = client.poll_output(&mut buf).unwrap() {
                server.feed_data(data).unwrap();
                any = true;
            }
            let mut buf2 = [0u8; 32768];
            while let Some(data) = server.poll_output(&mut buf2).unwrap() {
                client.feed_data(data).unwrap();
                any = true;
            }
            if !any {
                break;
            }
        }

        assert!(client.is_active());
        assert!(server.is_active());

        client.send_app_data(b"wrapper test").unwrap();
        let mut buf = [0u8; 32768];
        while let Some(data) = client.poll_output(&mut buf).unwrap() {
            server.feed_data(data).unwrap();
        }
        let mut rx = [0u8; 64];
        let n = server.recv_app_data(&mut rx).unwrap();
        assert_eq!(&rx[..n], b"wrapper test");
    }
}
