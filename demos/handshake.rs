//! Runs the origin-bit handshake between two in-process endpoints,
//! relaying each side's transmitted bytes to the other by hand (stand-in
//! for a real UART pair).

use sbmp::frame::{ByteSink, ChecksumType, FrameCodec};
use sbmp::session::{Endpoint, HandshakeStatus};

#[derive(Default)]
struct VecSink(Vec<u8>);

impl ByteSink for VecSink {
    fn send_byte(&mut self, byte: u8) {
        self.0.push(byte);
    }
}

fn relay(from: &mut Endpoint<VecSink>, to: &mut Endpoint<VecSink>) {
    let bytes = std::mem::take(&mut from.codec_mut().sink_mut().0);
    for b in bytes {
        to.feed_byte(b);
    }
}

fn main() {
    env_logger::init();

    let mut alice_buf = [0u8; 64];
    let mut bob_buf = [0u8; 64];
    let alice_codec = FrameCodec::with_sink(&mut alice_buf, VecSink::default());
    let bob_codec = FrameCodec::with_sink(&mut bob_buf, VecSink::default());
    let mut alice = Endpoint::new(alice_codec, 4, ChecksumType::Crc32);
    let mut bob = Endpoint::new(bob_codec, 4, ChecksumType::Crc32);

    alice.start_handshake().unwrap();
    relay(&mut alice, &mut bob);
    relay(&mut bob, &mut alice);

    assert_eq!(alice.handshake_status(), HandshakeStatus::Success);
    assert_eq!(bob.handshake_status(), HandshakeStatus::Success);
    println!(
        "alice origin={}, bob origin={}, both SUCCESS={}",
        alice.origin(),
        bob.origin(),
        alice.handshake_status() == HandshakeStatus::Success
            && bob.handshake_status() == HandshakeStatus::Success
    );
}
