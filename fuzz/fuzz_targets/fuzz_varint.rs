//! Fuzz QUIC varint decoding; any decoded value must round-trip.

#![no_main]

use libfuzzer_sys::fuzz_target;
use milli_tls::codec::{varint_len, Reader, Writer};

fuzz_target!(|data: &[u8]| {
    let mut r = Reader::new(data);
    if let Ok(value) = r.varint() {
        let mut buf = [0u8; 8];
        let mut w = Writer::new(&mut buf);
        w.varint(value).unwrap();
        assert_eq!(w.len(), varint_len(value));

        let mut r2 = Reader::new(&buf[..w.len()]);
        assert_eq!(r2.varint().unwrap(), value);
    }
});
