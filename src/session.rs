//! Session endpoint: origin-bit handshake, session-number allocation,
//! capability exchange, and per-session listener dispatch.

use log::{debug, warn};

use crate::datagram::{pack_header, Datagram};
use crate::error::EndpointError;
use crate::frame::{ByteSink, ChecksumType, FrameCodec, RxStatus};

/// Initiator → receiver: "let's arbitrate, here are my capabilities."
pub const HSK_START: u8 = 1;
/// Receiver → initiator: "accepted, here are mine."
pub const HSK_ACCEPT: u8 = 2;
/// Either side → the other: "we both initiated, back off and retry."
pub const HSK_CONFLICT: u8 = 3;

const HSK_PAYLOAD_LEN: u16 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStatus {
    Idle,
    AwaitReply,
    Success,
    Conflict,
}

/// What a listener wants to happen to its own table slot after handling
/// a datagram. `Remove` is how a listener ends its own dialog; the C
/// original calls `remove_listener` on itself from inside the callback,
/// which isn't expressible safely in Rust since the table is mid-dispatch
/// at that point. Returning an action instead lets the endpoint perform
/// the removal itself, after the callback returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerAction {
    Continue,
    Remove,
}

/// A per-session callback for a multi-message dialog.
pub trait Listener<'a, S: ByteSink> {
    fn on_datagram(&mut self, ep: &mut Endpoint<'a, S>, dg: &Datagram) -> ListenerAction;
}

/// Invoked for datagrams that match no listener session.
pub trait DefaultHandler<'a, S: ByteSink> {
    fn on_datagram(&mut self, ep: &mut Endpoint<'a, S>, dg: &Datagram);
}

struct ListenerSlot<'a, S: ByteSink> {
    session: u16,
    listener: Box<dyn Listener<'a, S> + 'a>,
}

/// A stateful peer abstraction wrapping a frame codec: origin, session
/// counter, peer capabilities, listener table.
pub struct Endpoint<'a, S: ByteSink> {
    codec: FrameCodec<'a, S>,

    origin: u8,
    next_session_counter: u16,

    local_buffer_size: u16,
    local_preferred_cksum: ChecksumType,

    peer_buffer_size: Option<u16>,
    peer_preferred_cksum: Option<ChecksumType>,

    hsk_state: HandshakeStatus,
    hsk_session: Option<u16>,

    listeners: Vec<Option<ListenerSlot<'a, S>>>,
    default_handler: Option<Box<dyn DefaultHandler<'a, S> + 'a>>,

    /// Reusable scratch buffer a completed frame's payload is copied into
    /// before dispatch. The rx buffer's borrow can't outlive a call that
    /// sends a response (handshake accept, listener reply) without
    /// aliasing the frame codec's own `&mut self`, so dispatch works
    /// from an owned copy instead.
    scratch: Vec<u8>,
}

impl<'a, S: ByteSink> Endpoint<'a, S> {
    pub fn new(
        codec: FrameCodec<'a, S>,
        listener_capacity: usize,
        preferred_cksum: ChecksumType,
    ) -> Self {
        let local_buffer_size = codec.rx_buf_capacity().min(u16::MAX as usize) as u16;
        Endpoint {
            codec,
            origin: 0,
            next_session_counter: 0,
            local_buffer_size,
            local_preferred_cksum: preferred_cksum,
            // Matches the original's `ep->peer_buffer_size = 0xFFFF`: an
            // always-on ceiling rather than "unknown", so the capacity
            // check in `check_peer_capacity` stays active before the
            // handshake populates a real value.
            peer_buffer_size: Some(u16::MAX),
            peer_preferred_cksum: None,
            hsk_state: HandshakeStatus::Idle,
            hsk_session: None,
            listeners: (0..listener_capacity).map(|_| None).collect(),
            default_handler: None,
            scratch: Vec::new(),
        }
    }

    pub fn codec(&self) -> &FrameCodec<'a, S> {
        &self.codec
    }

    pub fn codec_mut(&mut self) -> &mut FrameCodec<'a, S> {
        &mut self.codec
    }

    pub fn origin(&self) -> u8 {
        self.origin
    }

    pub fn set_origin(&mut self, origin: u8) {
        self.origin = origin & 1;
    }

    /// Seeds the 15-bit session counter, for deterministic tests.
    pub fn seed_session(&mut self, seed: u16) {
        self.next_session_counter = seed & 0x7fff;
    }

    pub fn set_preferred_cksum(&mut self, cksum: ChecksumType) {
        self.local_preferred_cksum = cksum;
    }

    pub fn handshake_status(&self) -> HandshakeStatus {
        self.hsk_state
    }

    pub fn peer_buffer_size(&self) -> Option<u16> {
        self.peer_buffer_size
    }

    pub fn peer_preferred_cksum(&self) -> Option<ChecksumType> {
        self.peer_preferred_cksum
    }

    /// `counter | (origin << 15)`, then advances the counter modulo
    /// 0x8000.
    pub fn next_session(&mut self) -> u16 {
        let session = self.next_session_counter | (u16::from(self.origin) << 15);
        self.next_session_counter = (self.next_session_counter + 1) & 0x7fff;
        session
    }

    pub fn feed_byte(&mut self, byte: u8) -> RxStatus {
        let status = self.codec.feed_byte(byte);
        if status == RxStatus::FrameReady {
            self.scratch.clear();
            self.scratch.extend_from_slice(self.codec.rx_payload());
            self.codec.release_rx();
            self.dispatch();
        }
        status
    }

    fn dispatch(&mut self) {
        let raw = std::mem::take(&mut self.scratch);
        if let Some(dg) = Datagram::parse(&raw) {
            if !self.try_handle_handshake(&dg) {
                self.dispatch_to_listener_or_default(&dg);
            }
        } else {
            warn!(target: "sbmp::session", "rx: frame payload too short to be a datagram");
        }
        self.scratch = raw;
    }

    fn dispatch_to_listener_or_default(&mut self, dg: &Datagram) {
        let matched = self
            .listeners
            .iter()
            .position(|slot| matches!(slot, Some(s) if s.session == dg.session));

        if let Some(idx) = matched {
            let mut slot = self.listeners[idx].take().expect("position just matched Some");
            let action = slot.listener.on_datagram(self, dg);
            match action {
                ListenerAction::Continue => self.listeners[idx] = Some(slot),
                ListenerAction::Remove => {
                    debug!(target: "sbmp::session", "listener on session {:#06x} removed itself", dg.session);
                }
            }
        } else if let Some(mut handler) = self.default_handler.take() {
            handler.on_datagram(self, dg);
            self.default_handler = Some(handler);
        }
    }

    fn try_handle_handshake(&mut self, dg: &Datagram) -> bool {
        match dg.dg_type {
            HSK_START => {
                self.handle_hsk_start(dg);
                true
            }
            HSK_ACCEPT => {
                if self.hsk_state == HandshakeStatus::AwaitReply && self.hsk_session == Some(dg.session) {
                    self.apply_peer_caps(dg.payload);
                    self.hsk_state = HandshakeStatus::Success;
                    debug!(target: "sbmp::session", "handshake accepted, origin={}", self.origin);
                } else {
                    warn!(target: "sbmp::session", "rx: stray HSK_ACCEPT for session {:#06x} (state={:?})", dg.session, self.hsk_state);
                }
                true
            }
            HSK_CONFLICT => {
                if self.hsk_state == HandshakeStatus::AwaitReply && self.hsk_session == Some(dg.session) {
                    self.codec.reset();
                    self.hsk_state = HandshakeStatus::Conflict;
                    warn!(target: "sbmp::session", "handshake conflict on session {:#06x}", dg.session);
                } else {
                    warn!(target: "sbmp::session", "rx: stray HSK_CONFLICT for session {:#06x} (state={:?})", dg.session, self.hsk_state);
                }
                true
            }
            _ => false,
        }
    }

    fn handle_hsk_start(&mut self, dg: &Datagram) {
        if self.hsk_state == HandshakeStatus::AwaitReply {
            warn!(target: "sbmp::session", "rx: HSK_START while awaiting our own reply, conflict");
            self.hsk_state = HandshakeStatus::Conflict;
            let _ = self.send_handshake_frame(dg.session, HSK_CONFLICT);
            return;
        }
        let peer_origin = dg.origin();
        self.origin = if peer_origin == 0 { 1 } else { 0 };
        self.apply_peer_caps(dg.payload);
        self.hsk_state = HandshakeStatus::Success;
        debug!(target: "sbmp::session", "handshake start accepted, our origin={}", self.origin);
        let _ = self.send_handshake_frame(dg.session, HSK_ACCEPT);
    }

    fn apply_peer_caps(&mut self, payload: &[u8]) {
        if payload.len() < 3 {
            warn!(target: "sbmp::session", "rx: handshake payload too short ({} bytes)", payload.len());
            return;
        }
        let cksum = ChecksumType::from_byte(payload[0]).unwrap_or_else(|| {
            warn!(target: "sbmp::session", "peer advertised unsupported checksum {:#04x}, downgrading to NONE", payload[0]);
            ChecksumType::None
        });
        let buffer_size = u16::from(payload[1]) | (u16::from(payload[2]) << 8);
        self.peer_preferred_cksum = Some(cksum);
        self.peer_buffer_size = Some(buffer_size);
    }

    fn send_handshake_frame(&mut self, session: u16, dg_type: u8) -> Result<(), EndpointError> {
        self.codec
            .open_frame(self.local_preferred_cksum, 3 + HSK_PAYLOAD_LEN)
            .map_err(EndpointError::Frame)?;
        let mut hdr = [0u8; 3];
        pack_header(&mut hdr, session, dg_type);
        self.codec.send_buffer(&hdr).map_err(EndpointError::Frame)?;
        let payload = [
            self.local_preferred_cksum.to_byte(),
            (self.local_buffer_size & 0xff) as u8,
            (self.local_buffer_size >> 8) as u8,
        ];
        self.codec
            .send_buffer(&payload)
            .map_err(EndpointError::Frame)?;
        Ok(())
    }

    /// Begins origin arbitration. Returns the session number the peer
    /// must echo back in its `HSK_ACCEPT`/`HSK_CONFLICT`.
    pub fn start_handshake(&mut self) -> Result<u16, EndpointError> {
        let session = self.next_session();
        self.send_handshake_frame(session, HSK_START)?;
        self.hsk_state = HandshakeStatus::AwaitReply;
        self.hsk_session = Some(session);
        Ok(session)
    }

    pub fn abort_handshake(&mut self) {
        self.hsk_state = HandshakeStatus::Idle;
        self.hsk_session = None;
    }

    fn check_peer_capacity(&self, length: u16) -> Result<(), EndpointError> {
        if let Some(peer_buf) = self.peer_buffer_size {
            let max_payload = peer_buf.saturating_sub(3);
            if length > max_payload {
                return Err(EndpointError::PayloadTooLarge {
                    len: length,
                    peer_accepts: max_payload,
                });
            }
        }
        Ok(())
    }

    /// Opens a frame for an existing session and writes the datagram
    /// header, leaving the frame open for the payload bytes.
    pub fn open_response(
        &mut self,
        dg_type: u8,
        length: u16,
        session: u16,
    ) -> Result<(), EndpointError> {
        self.check_peer_capacity(length)?;
        self.codec
            .open_frame(self.local_preferred_cksum, length + 3)
            .map_err(EndpointError::Frame)?;
        let mut hdr = [0u8; 3];
        pack_header(&mut hdr, session, dg_type);
        self.codec.send_buffer(&hdr).map_err(EndpointError::Frame)?;
        Ok(())
    }

    /// Allocates a new session and opens a frame for it.
    pub fn open_message(&mut self, dg_type: u8, length: u16) -> Result<u16, EndpointError> {
        let session = self.next_session();
        self.open_response(dg_type, length, session)?;
        Ok(session)
    }

    pub fn send_response(
        &mut self,
        dg_type: u8,
        bytes: &[u8],
        session: u16,
    ) -> Result<(), EndpointError> {
        self.open_response(dg_type, bytes.len() as u16, session)?;
        self.codec.send_buffer(bytes).map_err(EndpointError::Frame)?;
        Ok(())
    }

    pub fn send_message(&mut self, dg_type: u8, bytes: &[u8]) -> Result<u16, EndpointError> {
        let session = self.next_session();
        self.open_response(dg_type, bytes.len() as u16, session)?;
        self.codec.send_buffer(bytes).map_err(EndpointError::Frame)?;
        Ok(session)
    }

    pub fn add_listener(
        &mut self,
        session: u16,
        listener: Box<dyn Listener<'a, S> + 'a>,
    ) -> Result<usize, EndpointError> {
        if self
            .listeners
            .iter()
            .any(|slot| matches!(slot, Some(s) if s.session == session))
        {
            return Err(EndpointError::DuplicateListener(session));
        }
        match self.listeners.iter().position(|slot| slot.is_none()) {
            Some(idx) => {
                self.listeners[idx] = Some(ListenerSlot { session, listener });
                Ok(idx)
            }
            None => Err(EndpointError::ListenerTableFull),
        }
    }

    /// Returns whether a listener was present for `session`.
    pub fn remove_listener(&mut self, session: u16) -> bool {
        for slot in self.listeners.iter_mut() {
            if matches!(slot, Some(s) if s.session == session) {
                *slot = None;
                return true;
            }
        }
        false
    }

    pub fn set_default_handler(&mut self, handler: Box<dyn DefaultHandler<'a, S> + 'a>) {
        self.default_handler = Some(handler);
    }

    pub fn enable_rx(&mut self, enabled: bool) {
        self.codec.enable_rx(enabled);
    }

    pub fn enable_tx(&mut self, enabled: bool) {
        self.codec.enable_tx(enabled);
    }

    /// Clears session counters, handshake state, and the codec's
    /// partial tx/rx. Peer capabilities and the listener table survive.
    pub fn reset(&mut self) {
        self.codec.reset();
        self.next_session_counter = 0;
        self.hsk_state = HandshakeStatus::Idle;
        self.hsk_session = None;
    }
}
