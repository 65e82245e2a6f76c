//! Fuzz the extension list decoder in every handshake context.

#![no_main]

use libfuzzer_sys::fuzz_target;
use milli_tls::tls::extensions::{decode_extensions, ExtensionContext};

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }
    let ctx = match data[0] % 5 {
        0 => ExtensionContext::ClientHello,
        1 => ExtensionContext::ServerHello,
        2 => ExtensionContext::HelloRetryRequest,
        3 => ExtensionContext::EncryptedExtensions,
        _ => ExtensionContext::NewSessionTicket,
    };
    let _ = decode_extensions(&data[1..], ctx);
});
