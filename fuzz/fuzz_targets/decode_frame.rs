#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use monoio_codec::Decoder;
use monoio_ws_relay::protocol::frame::codec::{self, FrameDecoder};

fuzz_target!(|data: &[u8]| {
    codec::decode(data).ok();

    let mut decoder = FrameDecoder::new(Some(1 << 16), true);
    let mut buf = BytesMut::from(data);
    while let Ok(monoio_codec::Decoded::Some(_)) = decoder.decode(&mut buf) {}
});
