//! Session tickets: the client-side resumption cache entry, the
//! server-side ticket store, and the 0-RTT anti-replay strike register.
//!
//! Ticket blobs issued by this crate are opaque random-looking ids
//! resolved in the server's store; the resumption PSK never rides
//! inside the blob.

use crate::codec::{Reader, Writer};
use crate::error::{DecodeError, Error};
use crate::tls::cipher::CipherSuite;
use crate::tls::key_schedule::Secret;

/// Hard cap on ticket lifetime: seven days (RFC 8446 §4.6.1).
pub const MAX_TICKET_LIFETIME_SECS: u32 = 604_800;

/// A ticket received from a server, ready to resume with.
#[derive(Clone)]
pub struct Ticket {
    /// The opaque blob to send back as a PSK identity.
    pub ticket: heapless::Vec<u8, 256>,
    pub age_add: u32,
    /// Clamped to [`MAX_TICKET_LIFETIME_SECS`]; zero means "do not cache".
    pub lifetime_secs: u32,
    /// The resumption PSK derived from the resumption master secret and
    /// the ticket nonce.
    pub psk: Secret,
    /// Suite of the original connection; resumption binds its hash.
    pub suite: CipherSuite,
    /// Maximum early data the server will accept, zero if none.
    pub max_early_data: u32,
    /// Local receipt time (caller's clock, milliseconds).
    pub received_at_ms: u64,
}

impl Ticket {
    /// Whether the ticket may still be offered at `now_ms`.
    pub fn is_usable(&self, now_ms: u64) -> bool {
        if self.lifetime_secs == 0 || self.ticket.is_empty() {
            return false;
        }
        let age_secs = now_ms.saturating_sub(self.received_at_ms) / 1000;
        age_secs < u64::from(self.lifetime_secs.min(MAX_TICKET_LIFETIME_SECS))
    }

    /// obfuscated_ticket_age = (age_ms + age_add) mod 2^32.
    pub fn obfuscated_age(&self, now_ms: u64) -> u32 {
        let age_ms = now_ms.saturating_sub(self.received_at_ms);
        (age_ms as u32).wrapping_add(self.age_add)
    }

    /// Serialize for external caching. The format is private to this
    /// crate but round-trips byte-exactly.
    pub fn to_bytes(&self, out: &mut [u8]) -> Result<usize, Error> {
        let mut w = Writer::new(out);
        w.u8(1)?; // format version
        w.u16(self.suite.to_u16())?;
        w.u32(self.lifetime_secs)?;
        w.u32(self.age_add)?;
        w.u32(self.max_early_data)?;
        w.u64(self.received_at_ms)?;
        w.vec8(self.psk.as_slice())?;
        w.vec16(&self.ticket)?;
        Ok(w.len())
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, Error> {
        let mut r = Reader::new(data);
        if r.u8()? != 1 {
            return Err(DecodeError::InvalidValue.into());
        }
        let suite =
            CipherSuite::from_u16(r.u16()?).ok_or(Error::from(DecodeError::InvalidValue))?;
        let lifetime_secs = r.u32()?;
        let age_add = r.u32()?;
        let max_early_data = r.u32()?;
        let received_at_ms = r.u64()?;

        let psk_bytes = r.vec8()?;
        if psk_bytes.len() != suite.hash_len() {
            return Err(DecodeError::InvalidValue.into());
        }
        let psk = Secret::from_slice(psk_bytes);

        let blob = r.vec16()?;
        if blob.is_empty() {
            return Err(DecodeError::InvalidValue.into());
        }
        let mut ticket = heapless::Vec::new();
        ticket
            .extend_from_slice(blob)
            .map_err(|_| Error::from(DecodeError::Overlong))?;

        if !r.is_empty() {
            return Err(DecodeError::Overlong.into());
        }
        Ok(Self {
            ticket,
            age_add,
            lifetime_secs,
            psk,
            suite,
            max_early_data,
            received_at_ms,
        })
    }
}

/// A ticket the server has issued and can still resolve.
pub struct IssuedTicket {
    pub id: heapless::Vec<u8, 32>,
    pub psk: Secret,
    pub suite: CipherSuite,
    pub age_add: u32,
    pub lifetime_secs: u32,
    pub issued_at_ms: u64,
    pub max_early_data: u32,
}

impl IssuedTicket {
    fn expired(&self, now_ms: u64) -> bool {
        let age_secs = now_ms.saturating_sub(self.issued_at_ms) / 1000;
        age_secs >= u64::from(self.lifetime_secs.min(MAX_TICKET_LIFETIME_SECS))
    }
}

/// Server-side ticket resolution plus the 0-RTT strike register.
pub struct TicketStore {
    entries: heapless::Vec<IssuedTicket, 8>,
    strikes: StrikeRegister,
}

impl Default for TicketStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TicketStore {
    pub fn new() -> Self {
        Self {
            entries: heapless::Vec::new(),
            strikes: StrikeRegister::new(),
        }
    }

    /// Remember an issued ticket, evicting the oldest entry when full.
    pub fn insert(&mut self, ticket: IssuedTicket) {
        if self.entries.is_full() {
            self.entries.remove(0);
        }
        let _ = self.entries.push(ticket);
    }

    /// Resolve a PSK identity to a live ticket.
    pub fn lookup(&self, identity: &[u8], now_ms: u64) -> Option<&IssuedTicket> {
        self.entries
            .iter()
            .find(|t| t.id.as_slice() == identity && !t.expired(now_ms))
    }

    /// Anti-replay gate for 0-RTT: true exactly once per
    /// (ticket, obfuscated_ticket_age) pair.
    pub fn early_data_fresh(&mut self, identity: &[u8], obfuscated_age: u32) -> bool {
        self.strikes.check_and_register(identity, obfuscated_age)
    }
}

/// Strike register keyed by (ticket id, obfuscated_ticket_age).
///
/// Check before acceptance, register on acceptance; a replayed
/// ClientHello presents the identical pair and is refused.
pub struct StrikeRegister {
    seen: heapless::Vec<(u64, u32), 32>,
}

impl StrikeRegister {
    pub fn new() -> Self {
        Self {
            seen: heapless::Vec::new(),
        }
    }

    /// Returns true (and records the pair) when unseen; false on replay.
    pub fn check_and_register(&mut self, ticket: &[u8], obfuscated_age: u32) -> bool {
        let tag = fnv1a(ticket);
        if self.seen.iter().any(|&(t, a)| t == tag && a == obfuscated_age) {
            return false;
        }
        if self.seen.is_full() {
            self.seen.remove(0);
        }
        let _ = self.seen.push((tag, obfuscated_age));
        true
    }
}

impl Default for StrikeRegister {
    fn default() -> Self {
        Self::new()
    }
}

fn fnv1a(data: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in data {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_ticket() -> Ticket {
        let mut blob = heapless::Vec::new();
        blob.extend_from_slice(&[0x5a; 16]).unwrap();
        Ticket {
            ticket: blob,
            age_add: 0x1234_5678,
            lifetime_secs: 7200,
            psk: Secret::from_slice(&[0x42; 32]),
            suite: CipherSuite::Aes128GcmSha256,
            max_early_data: 16384,
            received_at_ms: 1_000_000,
        }
    }

    #[test]
    fn ticket_usability_window() {
        let t = sample_ticket();
        assert!(t.is_usable(1_000_000));
        assert!(t.is_usable(1_000_000 + 7_199_000));
        assert!(!t.is_usable(1_000_000 + 7_200_000));

        let mut zero = sample_ticket();
        zero.lifetime_secs = 0;
        assert!(!zero.is_usable(1_000_000));
    }

    #[test]
    fn obfuscated_age_wraps() {
        let t = sample_ticket();
        // 5 seconds after receipt.
        assert_eq!(t.obfuscated_age(1_005_000), 5000u32.wrapping_add(0x1234_5678));
    }

    #[test]
    fn ticket_serialization_roundtrip() {
        let t = sample_ticket();
        let mut buf = [0u8; 512];
        let len = t.to_bytes(&mut buf).unwrap();

        let back = Ticket::from_bytes(&buf[..len]).unwrap();
        assert_eq!(back.ticket, t.ticket);
        assert_eq!(back.age_add, t.age_add);
        assert_eq!(back.lifetime_secs, t.lifetime_secs);
        assert_eq!(back.psk.as_slice(), t.psk.as_slice());
        assert_eq!(back.suite, t.suite);
        assert_eq!(back.max_early_data, t.max_early_data);
        assert_eq!(back.received_at_ms, t.received_at_ms);

        // Byte-exact round trip.
        let mut buf2 = [0u8; 512];
        let len2 = back.to_bytes(&mut buf2).unwrap();
        assert_eq!(&buf[..len], &buf2[..len2]);
    }

    #[test]
    fn ticket_deserialization_rejects_garbage() {
        assert!(Ticket::from_bytes(&[]).is_err());
        assert!(Ticket::from_bytes(&[2, 0, 0]).is_err()); // bad version
        let t = sample_ticket();
        let mut buf = [0u8; 512];
        let len = t.to_bytes(&mut buf).unwrap();
        // Truncated input.
        assert!(Ticket::from_bytes(&buf[..len - 1]).is_err());
        // Trailing junk.
        buf[len] = 0xff;
        assert!(Ticket::from_bytes(&buf[..len + 1]).is_err());
    }

    fn issued(id_byte: u8, now: u64) -> IssuedTicket {
        let mut id = heapless::Vec::new();
        id.extend_from_slice(&[id_byte; 16]).unwrap();
        IssuedTicket {
            id,
            psk: Secret::from_slice(&[id_byte; 32]),
            suite: CipherSuite::Aes128GcmSha256,
            age_add: 7,
            lifetime_secs: 3600,
            issued_at_ms: now,
            max_early_data: 0,
        }
    }

    #[test]
    fn store_lookup_and_expiry() {
        let mut store = TicketStore::new();
        store.insert(issued(1, 0));

        assert!(store.lookup(&[1; 16], 1_000).is_some());
        assert!(store.lookup(&[2; 16], 1_000).is_none());
        // After 3600 seconds the ticket is gone.
        assert!(store.lookup(&[1; 16], 3_600_000).is_none());
    }

    #[test]
    fn store_evicts_oldest() {
        let mut store = TicketStore::new();
        for i in 0..9 {
            store.insert(issued(i, 0));
        }
        // Entry 0 was evicted, 8 is present.
        assert!(store.lookup(&[0; 16], 1_000).is_none());
        assert!(store.lookup(&[8; 16], 1_000).is_some());
    }

    #[test]
    fn strike_register_rejects_replay() {
        let mut reg = StrikeRegister::new();
        assert!(reg.check_and_register(&[1; 16], 1000));
        // Same pair again: replay.
        assert!(!reg.check_and_register(&[1; 16], 1000));
        // Different age: fresh.
        assert!(reg.check_and_register(&[1; 16], 1001));
        // Different ticket: fresh.
        assert!(reg.check_and_register(&[2; 16], 1000));
    }

    #[test]
    fn store_early_data_gate() {
        let mut store = TicketStore::new();
        store.insert(issued(1, 0));
        assert!(store.early_data_fresh(&[1; 16], 42));
        assert!(!store.early_data_fresh(&[1; 16], 42));
    }
}
