//! NSS key log format (SSLKEYLOGFILE) hooks.
//!
//! When a [`KeyLog`] is configured, the handshake reports each traffic
//! secret as it is derived, keyed by the ClientHello random:
//!
//! `<label> <client_random_hex> <secret_hex>`
//!
//! Wireshark and friends consume these lines directly. The default
//! [`NoKeyLog`] discards everything.

/// Labels emitted during a TLS 1.3 handshake.
pub const CLIENT_EARLY_TRAFFIC_SECRET: &str = "CLIENT_EARLY_TRAFFIC_SECRET";
pub const CLIENT_HANDSHAKE_TRAFFIC_SECRET: &str = "CLIENT_HANDSHAKE_TRAFFIC_SECRET";
pub const SERVER_HANDSHAKE_TRAFFIC_SECRET: &str = "SERVER_HANDSHAKE_TRAFFIC_SECRET";
pub const CLIENT_TRAFFIC_SECRET_0: &str = "CLIENT_TRAFFIC_SECRET_0";
pub const SERVER_TRAFFIC_SECRET_0: &str = "SERVER_TRAFFIC_SECRET_0";
pub const EXPORTER_SECRET: &str = "EXPORTER_SECRET";

/// Sink for derived secrets. Implementations format with
/// [`format_line`] or consume the raw parts directly.
pub trait KeyLog {
    fn log(&self, label: &str, client_random: &[u8; 32], secret: &[u8]);
}

/// Discards all key material (the default).
pub struct NoKeyLog;

impl KeyLog for NoKeyLog {
    fn log(&self, _label: &str, _client_random: &[u8; 32], _secret: &[u8]) {}
}

/// The shared no-op instance configs point at by default.
pub static NO_KEY_LOG: NoKeyLog = NoKeyLog;

/// Maximum formatted line length: label (31) + 2 spaces + 64 hex chars
/// of random + 96 hex chars of a SHA-384 secret.
pub const MAX_LINE: usize = 31 + 1 + 64 + 1 + 96;

/// Format one NSS key log line into `out`; returns the line as `&str`.
pub fn format_line<'a>(
    label: &str,
    client_random: &[u8; 32],
    secret: &[u8],
    out: &'a mut [u8; MAX_LINE],
) -> Option<&'a str> {
    let needed = label.len() + 1 + 64 + 1 + secret.len() * 2;
    if label.len() > 31 || needed > out.len() {
        return None;
    }

    let mut off = 0;
    out[off..off + label.len()].copy_from_slice(label.as_bytes());
    off += label.len();
    out[off] = b' ';
    off += 1;
    off += hex_into(client_random, &mut out[off..]);
    out[off] = b' ';
    off += 1;
    off += hex_into(secret, &mut out[off..]);

    core::str::from_utf8(&out[..off]).ok()
}

fn hex_into(bytes: &[u8], out: &mut [u8]) -> usize {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    for (i, b) in bytes.iter().enumerate() {
        out[2 * i] = HEX[(b >> 4) as usize];
        out[2 * i + 1] = HEX[(b & 0x0f) as usize];
    }
    bytes.len() * 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_key_log_is_silent() {
        // Must not panic, must not do anything observable.
        NO_KEY_LOG.log(CLIENT_TRAFFIC_SECRET_0, &[0u8; 32], &[1, 2, 3]);
    }

    #[test]
    fn line_format_matches_nss() {
        let mut buf = [0u8; MAX_LINE];
        let line = format_line(
            CLIENT_HANDSHAKE_TRAFFIC_SECRET,
            &[0x01u8; 32],
            &[0x02u8; 48],
            &mut buf,
        )
        .unwrap();

        let mut parts = line.split(' ');
        assert_eq!(parts.next(), Some("CLIENT_HANDSHAKE_TRAFFIC_SECRET"));
        let random = parts.next().unwrap();
        assert_eq!(random.len(), 64);
        assert!(random.chars().all(|c| c == '0' || c == '1'));
        let secret = parts.next().unwrap();
        assert_eq!(secret.len(), 96);
        assert_eq!(parts.next(), None);
    }

    #[test]
    fn hex_is_lowercase() {
        let mut buf = [0u8; MAX_LINE];
        let line = format_line(EXPORTER_SECRET, &[0xabu8; 32], &[0xcd, 0xef], &mut buf).unwrap();
        assert!(line.ends_with("cdef"));
        assert!(line.contains("abab"));
    }

    #[test]
    fn oversized_label_refused() {
        let mut buf = [0u8; MAX_LINE];
        let long = "X".repeat(32);
        assert!(format_line(&long, &[0u8; 32], &[], &mut buf).is_none());
    }

    #[cfg(feature = "std")]
    #[test]
    fn capturing_logger() {
        extern crate std;
        use std::string::String;
        use std::sync::Mutex;
        use std::vec::Vec;

        struct Capture(Mutex<Vec<String>>);
        impl KeyLog for Capture {
            fn log(&self, label: &str, client_random: &[u8; 32], secret: &[u8]) {
                let mut buf = [0u8; MAX_LINE];
                if let Some(line) = format_line(label, client_random, secret, &mut buf) {
                    self.0.lock().unwrap().push(String::from(line));
                }
            }
        }

        let cap = Capture(Mutex::new(Vec::new()));
        cap.log(SERVER_TRAFFIC_SECRET_0, &[0x42u8; 32], &[0xaa; 32]);
        let lines = cap.0.lock().unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("SERVER_TRAFFIC_SECRET_0 4242"));
    }
}
