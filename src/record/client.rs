//! TLS client wrapper.

use crate::error::Error;
use crate::tls::handshake::{EarlyDataState, TlsConfig};
use crate::tls::ticket::Ticket;

use super::connection::{TlsConnection, TlsEvent};

/// TLS 1.3 client.
pub struct TlsClient<const BUF: usize = 18432> {
    inner: TlsConnection<BUF>,
}

impl<const BUF: usize> TlsClient<BUF> {
    /// Create a new client connection. `key_seed` and `random` must
    /// come from a CSPRNG.
    pub fn new(config: TlsConfig, key_seed: [u8; 32], random: [u8; 32]) -> Self {
        Self {
            inner: TlsConnection::new_client(config, key_seed, random),
        }
    }

    /// Feed received transport data.
    pub fn feed_data(&mut self, data: &[u8]) -> Result<(), Error> {
        self.inner.feed_data(data)
    }

    /// Pull outgoing data for the transport. Send-path failures close
    /// the connection and surface here.
    pub fn poll_output<'a>(&mut self, buf: &'a mut [u8]) -> Result<Option<&'a [u8]>, Error> {
        self.inner.poll_output(buf)
    }

    /// Poll for events.
    pub fn poll_event(&mut self) -> Option<TlsEvent> {
        self.inner.poll_event()
    }

    /// Read decrypted application data.
    pub fn recv_app_data(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        self.inner.recv_app_data(buf)
    }

    /// Send application data (will be encrypted).
    pub fn send_app_data(&mut self, data: &[u8]) -> Result<usize, Error> {
        self.inner.send_app_data(data)
    }

    /// Queue 0-RTT data before the server answers.
    pub fn send_early_data(&mut self, data: &[u8]) -> Result<usize, Error> {
        self.inner.send_early_data(data)
    }

    /// Where 0-RTT stands.
    pub fn early_data_state(&self) -> EarlyDataState {
        self.inner.early_data_state()
    }

    /// Get negotiated ALPN protocol.
    pub fn alpn(&self) -> Option<&[u8]> {
        self.inner.alpn()
    }

    /// Pull a session ticket for later resumption.
    pub fn take_ticket(&mut self) -> Option<Ticket> {
        self.inner.take_ticket()
    }

    /// RFC 8446 §7.5 exporter.
    pub fn export_keying_material(
        &self,
        label: &[u8],
        context: &[u8],
        out: &mut [u8],
    ) -> Result<(), Error> {
        self.inner.export_keying_material(label, context, out)
    }

    /// Initiate a KeyUpdate.
    pub fn request_key_update(&mut self, request_peer: bool) -> Result<(), Error> {
        self.inner.request_key_update(request_peer)
    }

    /// Whether handshake is complete and data can flow.
    pub fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    /// Whether the connection is closed.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Initiate graceful close.
    pub fn close(&mut self) -> Result<(), Error> {
        self.inner.close()
    }
}
