//! Error taxonomy for the framing and session layers.
//!
//! All errors here are local and non-propagating: nothing crosses the
//! wire. Callers that need reliability build it on top as an application
//! protocol over datagrams (spec §7).

use thiserror::Error;

/// Errors returned by [`crate::frame::FrameCodec`] transmit operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("tx is not idle, a frame is already open")]
    TxBusy,
    #[error("tx is disabled")]
    TxDisabled,
    #[error("no byte sink installed")]
    NoSink,
    #[error("rx is disabled")]
    RxDisabled,
    #[error("frame length must be in 1..=65535, got {0}")]
    InvalidLength(u32),
}

/// Errors returned by [`crate::session::Endpoint`] operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EndpointError {
    #[error("framing layer rejected the operation: {0}")]
    Frame(#[from] FrameError),
    #[error("payload of {len} bytes exceeds the peer's advertised buffer ({peer_accepts} bytes)")]
    PayloadTooLarge { len: u16, peer_accepts: u16 },
    #[error("listener table is full")]
    ListenerTableFull,
    #[error("a listener is already registered for session {0:#06x}")]
    DuplicateListener(u16),
}
