#![no_main]

use libfuzzer_sys::fuzz_target;
use monoio_ws_relay::protocol::frame::FrameHeader;

fuzz_target!(|data: &[u8]| {
    if let Ok(Some(parsed)) = FrameHeader::parse(data) {
        assert!(parsed.header_length <= data.len());
        assert!(parsed.payload_length >> 63 == 0);
    }
});
