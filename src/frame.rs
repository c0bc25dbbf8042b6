//! Frame codec: the byte-at-a-time receive state machine and the
//! non-blocking transmit cursor.
//!
//! One [`FrameCodec`] per link direction pair. The rx side owns a borrowed
//! buffer and never allocates; the tx side streams straight through a
//! [`ByteSink`] and never buffers a whole frame.

use log::{debug, trace, warn};

use crate::crc32::Crc32;
use crate::error::FrameError;

const SOF: u8 = 0x01;

/// Checksum algorithm selector carried in the frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumType {
    None,
    Crc32,
}

impl ChecksumType {
    /// Trailer length in bytes for this checksum type.
    pub fn byte_len(self) -> usize {
        match self {
            ChecksumType::None => 0,
            ChecksumType::Crc32 => 4,
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            ChecksumType::None => 0,
            ChecksumType::Crc32 => 32,
        }
    }

    /// `None` for any value not in `{0, 32}` — an unrecognised checksum
    /// type is a framing error, not a panic.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(ChecksumType::None),
            32 => Some(ChecksumType::Crc32),
            _ => None,
        }
    }
}

/// Destination for transmitted bytes. The only required method is
/// `send_byte`; `frame_started`/`frame_finished` are optional hooks a
/// transport can use for framing-level bookkeeping (e.g. RTS toggling).
pub trait ByteSink {
    fn send_byte(&mut self, byte: u8);

    fn frame_started(&mut self) {}

    fn frame_finished(&mut self) {}
}

/// Outcome of feeding one byte to the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxStatus {
    /// Byte accepted, no frame is complete yet.
    Ok,
    /// A frame just completed; call [`FrameCodec::rx_payload`] then
    /// [`FrameCodec::release_rx`].
    FrameReady,
    /// Byte rejected or a framing error was detected; rx state was reset.
    Invalid,
    /// Rx is holding a completed frame for the handler; byte was ignored.
    Busy,
    /// Rx is disabled; byte was ignored.
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RxState {
    Idle,
    CksumType,
    Length,
    HdrXor,
    Payload,
    Discard,
    Cksum,
    WaitHandler,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    Idle,
    Payload,
}

pub struct FrameCodec<'a, S: ByteSink> {
    sink: Option<S>,

    rx_enabled: bool,
    tx_enabled: bool,

    rx_state: RxState,
    rx_hdr_xor: u8,
    rx_cksum_type: ChecksumType,
    rx_length: u16,
    rx_length_bytes_seen: u8,
    rx_cursor: usize,
    rx_crc: Crc32,
    rx_checksum_acc: u32,
    rx_checksum_bytes_seen: u8,
    rx_discard_remaining: usize,
    rx_buf: &'a mut [u8],

    tx_state: TxState,
    tx_cksum_type: ChecksumType,
    tx_remaining: u32,
    tx_crc: Crc32,
}

impl<'a, S: ByteSink> FrameCodec<'a, S> {
    /// Build a codec around a borrowed rx buffer. The buffer's length is
    /// the hard capacity for incoming frames for the life of the codec.
    pub fn new(rx_buf: &'a mut [u8]) -> Self {
        FrameCodec {
            sink: None,
            rx_enabled: true,
            tx_enabled: true,
            rx_state: RxState::Idle,
            rx_hdr_xor: 0,
            rx_cksum_type: ChecksumType::None,
            rx_length: 0,
            rx_length_bytes_seen: 0,
            rx_cursor: 0,
            rx_crc: Crc32::begin(),
            rx_checksum_acc: 0,
            rx_checksum_bytes_seen: 0,
            rx_discard_remaining: 0,
            rx_buf,
            tx_state: TxState::Idle,
            tx_cksum_type: ChecksumType::None,
            tx_remaining: 0,
            tx_crc: Crc32::begin(),
        }
    }

    pub fn with_sink(rx_buf: &'a mut [u8], sink: S) -> Self {
        let mut codec = Self::new(rx_buf);
        codec.sink = Some(sink);
        codec
    }

    pub fn set_sink(&mut self, sink: S) {
        self.sink = Some(sink);
    }

    /// Direct access to the installed sink, e.g. for a transport to
    /// drain bytes it has buffered for the wire.
    pub fn sink_mut(&mut self) -> &mut S {
        self.sink.as_mut().expect("frame codec has no sink installed")
    }

    pub fn rx_buf_capacity(&self) -> usize {
        self.rx_buf.len()
    }

    pub fn enable_rx(&mut self, enabled: bool) {
        self.rx_enabled = enabled;
    }

    pub fn enable_tx(&mut self, enabled: bool) {
        self.tx_enabled = enabled;
    }

    pub fn enable(&mut self, enabled: bool) {
        self.rx_enabled = enabled;
        self.tx_enabled = enabled;
    }

    /// Clears all in-flight rx/tx state and returns both sides to idle.
    pub fn reset(&mut self) {
        self.rx_state = RxState::Idle;
        self.rx_cursor = 0;
        self.tx_state = TxState::Idle;
        self.tx_remaining = 0;
    }

    /// The payload of a just-completed frame. Only meaningful while the
    /// receiver is in `WAIT_HANDLER` (i.e. right after `FrameReady`).
    pub fn rx_payload(&self) -> &[u8] {
        &self.rx_buf[..self.rx_cursor]
    }

    /// Releases the rx buffer held for the handler and returns the
    /// receiver to `IDLE`. A no-op if the receiver wasn't waiting.
    pub fn release_rx(&mut self) {
        if self.rx_state == RxState::WaitHandler {
            self.rx_state = RxState::Idle;
            self.rx_cursor = 0;
        }
    }

    /// Feed one received byte through the state machine.
    pub fn feed_byte(&mut self, byte: u8) -> RxStatus {
        if !self.rx_enabled {
            return RxStatus::Disabled;
        }

        match self.rx_state {
            RxState::WaitHandler => RxStatus::Busy,

            RxState::Idle => {
                if byte == SOF {
                    self.rx_hdr_xor = byte;
                    self.rx_state = RxState::CksumType;
                    RxStatus::Ok
                } else {
                    trace!(target: "sbmp::frame", "rx: discarding non-SOF byte {:#04x} in IDLE", byte);
                    RxStatus::Invalid
                }
            }

            RxState::CksumType => {
                self.rx_hdr_xor ^= byte;
                match ChecksumType::from_byte(byte) {
                    Some(cksum) => {
                        self.rx_cksum_type = cksum;
                        self.rx_length = 0;
                        self.rx_length_bytes_seen = 0;
                        self.rx_state = RxState::Length;
                        RxStatus::Ok
                    }
                    None => {
                        warn!(target: "sbmp::frame", "rx: unknown checksum type {:#04x}", byte);
                        self.rx_state = RxState::Idle;
                        RxStatus::Invalid
                    }
                }
            }

            RxState::Length => {
                self.rx_hdr_xor ^= byte;
                if self.rx_length_bytes_seen == 0 {
                    self.rx_length = u16::from(byte);
                    self.rx_length_bytes_seen = 1;
                    RxStatus::Ok
                } else {
                    self.rx_length |= u16::from(byte) << 8;
                    if self.rx_length == 0 {
                        warn!(target: "sbmp::frame", "rx: zero-length frame rejected");
                        self.rx_state = RxState::Idle;
                        RxStatus::Invalid
                    } else {
                        self.rx_state = RxState::HdrXor;
                        RxStatus::Ok
                    }
                }
            }

            RxState::HdrXor => {
                if byte != self.rx_hdr_xor {
                    warn!(target: "sbmp::frame", "rx: header-xor mismatch, expected {:#04x} got {:#04x}", self.rx_hdr_xor, byte);
                    self.rx_state = RxState::Idle;
                    return RxStatus::Invalid;
                }
                if self.rx_length as usize > self.rx_buf.len() {
                    warn!(target: "sbmp::frame", "rx: frame length {} exceeds buffer capacity {}", self.rx_length, self.rx_buf.len());
                    self.rx_discard_remaining =
                        self.rx_length as usize + self.rx_cksum_type.byte_len();
                    self.rx_state = RxState::Discard;
                    return RxStatus::Invalid;
                }
                self.rx_crc = Crc32::begin();
                self.rx_cursor = 0;
                self.rx_state = RxState::Payload;
                RxStatus::Ok
            }

            RxState::Payload => {
                self.rx_buf[self.rx_cursor] = byte;
                self.rx_cursor += 1;
                self.rx_crc.update(byte);
                if self.rx_cursor == self.rx_length as usize {
                    if self.rx_cksum_type == ChecksumType::None {
                        self.dispatch_rx();
                        RxStatus::FrameReady
                    } else {
                        self.rx_checksum_acc = 0;
                        self.rx_checksum_bytes_seen = 0;
                        self.rx_state = RxState::Cksum;
                        RxStatus::Ok
                    }
                } else {
                    RxStatus::Ok
                }
            }

            RxState::Cksum => {
                self.rx_checksum_acc |=
                    u32::from(byte) << (8 * self.rx_checksum_bytes_seen);
                self.rx_checksum_bytes_seen += 1;
                if self.rx_checksum_bytes_seen < 4 {
                    return RxStatus::Ok;
                }
                let computed = self.rx_crc.finalize();
                if computed == self.rx_checksum_acc {
                    self.dispatch_rx();
                    RxStatus::FrameReady
                } else {
                    warn!(target: "sbmp::frame", "rx: CRC mismatch, expected {:#010x} got {:#010x}", self.rx_checksum_acc, computed);
                    self.rx_state = RxState::Idle;
                    RxStatus::Invalid
                }
            }

            RxState::Discard => {
                self.rx_discard_remaining -= 1;
                if self.rx_discard_remaining == 0 {
                    debug!(target: "sbmp::frame", "rx: finished discarding oversized frame");
                    self.rx_state = RxState::Idle;
                }
                RxStatus::Invalid
            }
        }
    }

    fn dispatch_rx(&mut self) {
        debug!(target: "sbmp::frame", "rx: frame ready, {} byte payload", self.rx_cursor);
        self.rx_state = RxState::WaitHandler;
    }

    /// Opens a new frame for transmission: writes the 4-byte header and
    /// the header-xor byte through the sink and arms the tx cursor for
    /// `length` payload bytes.
    pub fn open_frame(&mut self, cksum_type: ChecksumType, length: u16) -> Result<(), FrameError> {
        if !self.tx_enabled {
            return Err(FrameError::TxDisabled);
        }
        if self.tx_state != TxState::Idle {
            return Err(FrameError::TxBusy);
        }
        if length == 0 {
            return Err(FrameError::InvalidLength(0));
        }
        let sink = self.sink.as_mut().ok_or(FrameError::NoSink)?;

        sink.frame_started();
        let len_lo = (length & 0xff) as u8;
        let len_hi = (length >> 8) as u8;
        let hdr_xor = SOF ^ cksum_type.to_byte() ^ len_lo ^ len_hi;
        sink.send_byte(SOF);
        sink.send_byte(cksum_type.to_byte());
        sink.send_byte(len_lo);
        sink.send_byte(len_hi);
        sink.send_byte(hdr_xor);

        self.tx_cksum_type = cksum_type;
        self.tx_remaining = u32::from(length);
        self.tx_crc = Crc32::begin();
        self.tx_state = TxState::Payload;
        Ok(())
    }

    /// Streams one payload byte. Closes the frame (writing the checksum
    /// trailer, if any) once `remaining` reaches zero.
    pub fn send_byte(&mut self, byte: u8) -> Result<(), FrameError> {
        if self.tx_state != TxState::Payload {
            return Err(FrameError::TxBusy);
        }
        let sink = self.sink.as_mut().ok_or(FrameError::NoSink)?;
        sink.send_byte(byte);
        self.tx_crc.update(byte);
        self.tx_remaining -= 1;

        if self.tx_remaining == 0 {
            if self.tx_cksum_type == ChecksumType::Crc32 {
                let crc = self.tx_crc.finalize();
                sink.send_byte((crc & 0xff) as u8);
                sink.send_byte(((crc >> 8) & 0xff) as u8);
                sink.send_byte(((crc >> 16) & 0xff) as u8);
                sink.send_byte(((crc >> 24) & 0xff) as u8);
            }
            sink.frame_finished();
            self.tx_state = TxState::Idle;
        }
        Ok(())
    }

    /// Streams as much of `buf` as the open frame still needs; returns
    /// the number of bytes actually accepted.
    pub fn send_buffer(&mut self, buf: &[u8]) -> Result<usize, FrameError> {
        let mut sent = 0;
        for &b in buf {
            if self.tx_state != TxState::Payload {
                break;
            }
            self.send_byte(b)?;
            sent += 1;
        }
        Ok(sent)
    }

    pub fn is_tx_idle(&self) -> bool {
        self.tx_state == TxState::Idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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
    fn minimal_crc32_frame_delivers_payload() {
        let mut buf = [0u8; 16];
        let mut codec = FrameCodec::<VecSink>::new(&mut buf);
        let stream = [
            0x01, 0x20, 0x05, 0x00, 0x24, b'A', b'B', b'C', b'D', b'E', 0xD5, 0x1A, 0xD3, 0x72,
        ];
        let statuses = feed_all(&mut codec, &stream);
        assert_eq!(statuses.last(), Some(&RxStatus::FrameReady));
        assert_eq!(codec.rx_payload(), b"ABCDE");
        codec.release_rx();
    }

    #[test]
    fn no_checksum_frame_delivers_payload() {
        let mut buf = [0u8; 16];
        let mut codec = FrameCodec::<VecSink>::new(&mut buf);
        let stream = [0x01, 0x00, 0x03, 0x00, 0x02, b'h', b'i', b'!'];
        let statuses = feed_all(&mut codec, &stream);
        assert_eq!(statuses.last(), Some(&RxStatus::FrameReady));
        assert_eq!(codec.rx_payload(), b"hi!");
    }

    #[test]
    fn crc_mismatch_is_rejected() {
        let mut buf = [0u8; 16];
        let mut codec = FrameCodec::<VecSink>::new(&mut buf);
        let stream = [
            0x01, 0x20, 0x05, 0x00, 0x24, b'A', b'B', b'C', b'D', b'E', 0xD5, 0x1A, 0xD3, 0x73,
        ];
        let statuses = feed_all(&mut codec, &stream);
        assert!(!statuses.iter().any(|s| *s == RxStatus::FrameReady));
        assert_eq!(statuses.last(), Some(&RxStatus::Invalid));
    }

    #[test]
    fn oversized_frame_is_discarded_whole() {
        let mut buf = [0u8; 4];
        let mut codec = FrameCodec::<VecSink>::new(&mut buf);
        let length: u16 = 100;
        let len_lo = (length & 0xff) as u8;
        let len_hi = (length >> 8) as u8;
        let hdr_xor = 0x01 ^ 0x20 ^ len_lo ^ len_hi;
        let mut stream = vec![0x01, 0x20, len_lo, len_hi, hdr_xor];
        stream.extend(std::iter::repeat(0xAAu8).take(100));
        stream.extend_from_slice(&[0, 0, 0, 0]);

        let statuses = feed_all(&mut codec, &stream);
        assert!(!statuses.iter().any(|s| *s == RxStatus::FrameReady));
        assert_eq!(statuses.last(), Some(&RxStatus::Invalid));

        // rx is back at IDLE: a fresh valid frame now parses normally.
        let stream2 = [0x01, 0x00, 0x03, 0x00, 0x02, b'h', b'i', b'!'];
        let statuses2 = feed_all(&mut codec, &stream2);
        assert_eq!(statuses2.last(), Some(&RxStatus::FrameReady));
        assert_eq!(codec.rx_payload(), b"hi!");
    }

    #[test]
    fn busy_while_waiting_for_handler() {
        let mut buf = [0u8; 16];
        let mut codec = FrameCodec::<VecSink>::new(&mut buf);
        let stream = [0x01, 0x00, 0x03, 0x00, 0x02, b'h', b'i', b'!'];
        feed_all(&mut codec, &stream);
        assert_eq!(codec.feed_byte(0x01), RxStatus::Busy);
        codec.release_rx();
        assert_eq!(codec.feed_byte(0x01), RxStatus::Ok);
    }

    #[test]
    fn open_frame_streams_header_and_crc_through_sink() {
        let mut buf = [0u8; 16];
        let mut codec = FrameCodec::with_sink(&mut buf, VecSink::default());
        codec.open_frame(ChecksumType::Crc32, 5).unwrap();
        for b in b"ABCDE" {
            codec.send_byte(*b).unwrap();
        }
        assert!(codec.is_tx_idle());
    }

    #[test]
    fn open_frame_fails_while_already_open() {
        let mut buf = [0u8; 16];
        let mut codec = FrameCodec::with_sink(&mut buf, VecSink::default());
        codec.open_frame(ChecksumType::Crc32, 5).unwrap();
        assert_eq!(
            codec.open_frame(ChecksumType::Crc32, 1),
            Err(FrameError::TxBusy)
        );
    }

    #[test]
    fn open_frame_without_a_sink_is_distinct_from_tx_disabled() {
        let mut buf = [0u8; 16];
        let mut codec = FrameCodec::<VecSink>::new(&mut buf);
        assert_eq!(
            codec.open_frame(ChecksumType::Crc32, 5),
            Err(FrameError::NoSink)
        );

        codec.set_sink(VecSink::default());
        codec.enable_tx(false);
        assert_eq!(
            codec.open_frame(ChecksumType::Crc32, 5),
            Err(FrameError::TxDisabled)
        );
    }
}
