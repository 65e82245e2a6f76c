//! Fuzz the record header decoder.

#![no_main]

use libfuzzer_sys::fuzz_target;
use milli_tls::record::codec::decode_record_header;

fuzz_target!(|data: &[u8]| {
    let _ = decode_record_header(data);
});
