//! # SBMP — Simple Binary Messaging Protocol
//!
//! A three-layer byte-stream protocol for point-to-point links over
//! unreliable or raw serial transports (UART, USB-CDC, a virtual pipe).
//! It layers a **framing** layer (delimited, length-prefixed,
//! CRC-protected packets), a **datagram** layer (typed, session-tagged
//! payloads), and a **session** layer (endpoints that arbitrate a
//! direction bit, negotiate capabilities, and dispatch multi-message
//! dialogs to listeners).
//!
//! The transport itself — the UART ISR, the socket read loop, the byte
//! sink used to transmit — is out of scope; this crate only speaks in
//! terms of [`frame::ByteSink`] and bytes fed one at a time to
//! [`session::Endpoint::feed_byte`].
//!
//! ## Example
//! ```
//! use sbmp::frame::{ByteSink, ChecksumType, FrameCodec};
//! use sbmp::session::Endpoint;
//!
//! #[derive(Default)]
//! struct VecSink(Vec<u8>);
//!
//! impl ByteSink for VecSink {
//!     fn send_byte(&mut self, byte: u8) {
//!         self.0.push(byte);
//!     }
//! }
//!
//! let mut buf = [0u8; 64];
//! let codec = FrameCodec::with_sink(&mut buf, VecSink::default());
//! let mut ep = Endpoint::new(codec, 4, ChecksumType::Crc32);
//!
//! ep.send_message(42, b"hello").unwrap();
//! let bytes = std::mem::take(&mut ep.codec_mut().sink_mut().0);
//! for b in bytes {
//!     ep.feed_byte(b);
//! }
//! ```

pub mod bulk;
pub mod crc32;
pub mod datagram;
pub mod error;
pub mod frame;
pub mod session;

pub use datagram::Datagram;
pub use error::{EndpointError, FrameError};
pub use frame::{ByteSink, ChecksumType, FrameCodec, RxStatus};
pub use session::{DefaultHandler, Endpoint, HandshakeStatus, Listener, ListenerAction};
