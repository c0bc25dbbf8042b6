//! Feeds one endpoint's transmitted bytes straight back into its own
//! receiver, to show the frame/datagram round trip without a real
//! transport.

use sbmp::datagram::Datagram;
use sbmp::frame::{ByteSink, ChecksumType, FrameCodec};
use sbmp::session::{DefaultHandler, Endpoint};

#[derive(Default)]
struct VecSink(Vec<u8>);

impl ByteSink for VecSink {
    fn send_byte(&mut self, byte: u8) {
        self.0.push(byte);
    }
}

struct PrintHandler;

impl<'a> DefaultHandler<'a, VecSink> for PrintHandler {
    fn on_datagram(&mut self, _ep: &mut Endpoint<'a, VecSink>, dg: &Datagram) {
        println!(
            "received on session {:#06x}, type {}: {:?}",
            dg.session,
            dg.dg_type,
            String::from_utf8_lossy(dg.payload)
        );
    }
}

fn main() {
    env_logger::init();

    let mut buf = [0u8; 256];
    let codec = FrameCodec::with_sink(&mut buf, VecSink::default());
    let mut ep = Endpoint::new(codec, 4, ChecksumType::Crc32);
    ep.set_default_handler(Box::new(PrintHandler));

    let session = ep.send_message(100, b"hello, loopback").unwrap();
    println!("sent on session {:#06x}", session);

    let wire = std::mem::take(&mut ep.codec_mut().sink_mut().0);
    for byte in wire {
        ep.feed_byte(byte);
    }
}
