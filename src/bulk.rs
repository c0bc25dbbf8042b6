//! Chunked bulk-data transfer convenience, built on top of the session
//! layer. Thin by design: reassembly, retry, and flow control beyond a
//! single frame are the application's job, same as the endpoint's other
//! datagram types.

use log::debug;

use crate::error::EndpointError;
use crate::frame::ByteSink;
use crate::session::Endpoint;

/// Sender announces a bulk transfer's total length and any leading
/// metadata the receiver needs to plan the request sequence.
pub const DG_BULK_OFFER: u8 = 4;
/// Receiver asks for a chunk at a given offset.
pub const DG_BULK_REQUEST: u8 = 5;
/// Sender fulfils a request with a chunk of data.
pub const DG_BULK_DATA: u8 = 6;
/// Either side ends the transfer early.
pub const DG_BULK_ABORT: u8 = 7;

/// Offers a bulk data transfer: total length plus caller-defined extra
/// metadata bytes, e.g. a filename.
pub fn offer<'a, S: ByteSink>(
    ep: &mut Endpoint<'a, S>,
    bulk_length: u32,
    extra: &[u8],
    session: u16,
) -> Result<(), EndpointError> {
    let len = extra.len() as u16 + 4;
    ep.open_response(DG_BULK_OFFER, len, session)?;
    ep.codec_mut()
        .send_buffer(&bulk_length.to_le_bytes())
        .map_err(EndpointError::Frame)?;
    ep.codec_mut().send_buffer(extra).map_err(EndpointError::Frame)?;
    debug!(target: "sbmp::bulk", "offer sent: {} bytes, session {:#06x}", bulk_length, session);
    Ok(())
}

/// Requests a chunk of the bulk data at `offset`, of at most
/// `chunk_size` bytes.
pub fn request<'a, S: ByteSink>(
    ep: &mut Endpoint<'a, S>,
    offset: u32,
    chunk_size: u16,
    session: u16,
) -> Result<(), EndpointError> {
    ep.open_response(DG_BULK_REQUEST, 6, session)?;
    ep.codec_mut()
        .send_buffer(&offset.to_le_bytes())
        .map_err(EndpointError::Frame)?;
    ep.codec_mut()
        .send_buffer(&chunk_size.to_le_bytes())
        .map_err(EndpointError::Frame)?;
    debug!(target: "sbmp::bulk", "request sent: offset {}, chunk {}, session {:#06x}", offset, chunk_size, session);
    Ok(())
}

/// Sends a chunk of data as a requested response. The chunk is the
/// entire datagram payload; no header of its own.
pub fn send_data<'a, S: ByteSink>(
    ep: &mut Endpoint<'a, S>,
    chunk: &[u8],
    session: u16,
) -> Result<(), EndpointError> {
    ep.send_response(DG_BULK_DATA, chunk, session)?;
    debug!(target: "sbmp::bulk", "data sent: {} bytes, session {:#06x}", chunk.len(), session);
    Ok(())
}

/// Aborts the transfer: a zero-byte datagram, header only.
pub fn abort<'a, S: ByteSink>(ep: &mut Endpoint<'a, S>, session: u16) -> Result<(), EndpointError> {
    ep.open_response(DG_BULK_ABORT, 0, session)?;
    debug!(target: "sbmp::bulk", "transfer aborted, session {:#06x}", session);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{ChecksumType, FrameCodec};

    #[derive(Default)]
    struct VecSink {
        bytes: Vec<u8>,
    }

    impl ByteSink for VecSink {
        fn send_byte(&mut self, byte: u8) {
            self.bytes.push(byte);
        }
    }

    fn new_endpoint(buf: &mut [u8]) -> Endpoint<'_, VecSink> {
        let codec = FrameCodec::with_sink(buf, VecSink::default());
        Endpoint::new(codec, 2, ChecksumType::Crc32)
    }

    #[test]
    fn offer_then_request_then_data_round_trip_through_one_endpoint() {
        let mut buf = [0u8; 64];
        let mut ep = new_endpoint(&mut buf);

        offer(&mut ep, 1024, b"file.bin", 1).unwrap();
        request(&mut ep, 0, 16, 1).unwrap();
        send_data(&mut ep, b"0123456789abcdef", 1).unwrap();
        abort(&mut ep, 1).unwrap();
    }
}
