#![no_main]

use libfuzzer_sys::fuzz_target;
use monoio_ws_relay::handshake::server::{create_response, parse_request};

fuzz_target!(|data: &[u8]| {
    if let Ok(Some((size, request))) = parse_request(data) {
        assert!(size <= data.len());
        create_response(&request, "User-Agent").ok();
    }
});
