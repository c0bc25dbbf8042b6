use sbmp::frame::{ByteSink, ChecksumType, FrameCodec, RxStatus};

#[derive(Default)]
struct VecSink {
    bytes: Vec<u8>,
}

impl ByteSink for VecSink {
    fn send_byte(&mut self, byte: u8) {
        self.bytes.push(byte);
    }
}

fn feed_all<S: ByteSink>(codec: &mut FrameCodec<S>, bytes: &[u8]) -> Vec<RxStatus> {
    bytes.iter().map(|&b| codec.feed_byte(b)).collect()
}

#[test]
fn frame_round_trip_for_varied_payload_sizes() {
    for cksum in [ChecksumType::None, ChecksumType::Crc32] {
        for len in [1usize, 2, 17, 64] {
            let payload: Vec<u8> = (0..len).map(|i| (i % 256) as u8).collect();

            let mut tx_buf = [0u8; 64];
            let mut tx = FrameCodec::with_sink(&mut tx_buf, VecSink::default());
            tx.open_frame(cksum, len as u16).unwrap();
            tx.send_buffer(&payload).unwrap();
            let wire = std::mem::take(&mut tx.sink_mut().bytes);

            let mut rx_buf = [0u8; 64];
            let mut rx = FrameCodec::<VecSink>::new(&mut rx_buf);
            let statuses = feed_all(&mut rx, &wire);

            assert_eq!(
                statuses.iter().filter(|s| **s == RxStatus::FrameReady).count(),
                1,
                "cksum={:?} len={}",
                cksum,
                len
            );
            assert_eq!(rx.rx_payload(), payload.as_slice());
            rx.release_rx();
        }
    }
}

#[test]
fn single_byte_corruption_never_delivers_altered_payload() {
    let mut tx_buf = [0u8; 32];
    let mut tx = FrameCodec::with_sink(&mut tx_buf, VecSink::default());
    tx.open_frame(ChecksumType::Crc32, 5).unwrap();
    tx.send_buffer(b"ABCDE").unwrap();
    let wire = std::mem::take(&mut tx.sink_mut().bytes);

    for i in 1..wire.len() {
        let mut corrupted = wire.clone();
        corrupted[i] ^= 0xff;

        let mut rx_buf = [0u8; 32];
        let mut rx = FrameCodec::<VecSink>::new(&mut rx_buf);
        let statuses = feed_all(&mut rx, &corrupted);

        let delivered = statuses.iter().any(|s| *s == RxStatus::FrameReady);
        if delivered {
            assert_ne!(rx.rx_payload(), b"ABCDE", "byte {} corruption silently accepted", i);
        }
    }
}

#[test]
fn oversized_frame_is_fully_discarded_and_rx_recovers() {
    let mut buf = [0u8; 4];
    let mut rx = FrameCodec::<VecSink>::new(&mut buf);

    let length: u16 = 100;
    let len_lo = (length & 0xff) as u8;
    let len_hi = (length >> 8) as u8;
    let hdr_xor = 0x01 ^ 0x20 ^ len_lo ^ len_hi;
    let mut stream = vec![0x01, 0x20, len_lo, len_hi, hdr_xor];
    stream.extend(std::iter::repeat(0xAAu8).take(100));
    stream.extend_from_slice(&[0, 0, 0, 0]);

    let statuses = feed_all(&mut rx, &stream);
    assert!(!statuses.iter().any(|s| *s == RxStatus::FrameReady));

    let follow_up = [0x01, 0x00, 0x03, 0x00, 0x02, b'h', b'i', b'!'];
    let statuses2 = feed_all(&mut rx, &follow_up);
    assert_eq!(statuses2.last(), Some(&RxStatus::FrameReady));
    assert_eq!(rx.rx_payload(), b"hi!");
}

#[test]
fn back_pressure_busy_until_release() {
    let mut buf = [0u8; 16];
    let mut rx = FrameCodec::<VecSink>::new(&mut buf);
    let stream = [0x01, 0x00, 0x03, 0x00, 0x02, b'h', b'i', b'!'];
    feed_all(&mut rx, &stream);

    for _ in 0..3 {
        assert_eq!(rx.feed_byte(0x01), RxStatus::Busy);
    }
    rx.release_rx();
    assert_eq!(rx.feed_byte(0x01), RxStatus::Ok);
}
