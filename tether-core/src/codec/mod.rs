//! Length-prefixed framing over the TLS byte stream.
//!
//! ```text
//! Frame := LengthPrefix(u32 BE) Payload(LengthPrefix bytes)
//! ```
//!
//! Outbound frames larger than [`MAX_WRITE_SIZE`] are handed to the
//! transport in several writes. That split is invisible to the receiver,
//! which rebuilds frames from the length prefix alone.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::SocketError;

/// Size of the length prefix in front of every payload.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Largest single transport write.
pub const MAX_WRITE_SIZE: usize = 0x7FFF;

/// Largest payload the reassembler will wait for.
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Frame codec. The decoder side is the reassembly state machine: it
/// remembers the announced length of the frame it is waiting for.
#[derive(Debug, Default)]
pub struct FrameCodec {
    expected: Option<usize>,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Payload length of the frame currently being assembled, if any.
    pub fn expected_len(&self) -> Option<usize> {
        self.expected
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = SocketError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let expected = match self.expected {
            Some(len) => len,
            None => {
                if src.len() < LENGTH_PREFIX_SIZE {
                    return Ok(None);
                }
                let len = src.get_u32() as usize;
                if len > MAX_PAYLOAD_SIZE {
                    return Err(SocketError::FrameTooLarge {
                        size: len,
                        max: MAX_PAYLOAD_SIZE,
                    });
                }
                self.expected = Some(len);
                len
            }
        };

        if src.len() < expected {
            src.reserve(expected - src.len());
            return Ok(None);
        }

        self.expected = None;
        Ok(Some(src.split_to(expected).freeze()))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = SocketError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.len() > u32::MAX as usize {
            return Err(SocketError::FrameTooLarge {
                size: item.len(),
                max: u32::MAX as usize,
            });
        }
        dst.reserve(LENGTH_PREFIX_SIZE + item.len());
        dst.put_u32(item.len() as u32);
        dst.extend_from_slice(&item);
        Ok(())
    }
}

/// Frame a payload and cut it into transport-sized writes.
pub fn frame_chunks(payload: Bytes) -> Result<Vec<Bytes>, SocketError> {
    let mut framed = BytesMut::new();
    FrameCodec::new().encode(payload, &mut framed)?;

    let mut framed = framed.freeze();
    let mut chunks = Vec::with_capacity(framed.len() / MAX_WRITE_SIZE + 1);
    while framed.len() > MAX_WRITE_SIZE {
        chunks.push(framed.split_to(MAX_WRITE_SIZE));
    }
    chunks.push(framed);
    Ok(chunks)
}

// ── FrameReassembler ─────────────────────────────────────────────

/// Turns arbitrarily split inbound chunks back into whole frames.
///
/// Owned by the read path alone.
#[derive(Debug, Default)]
pub struct FrameReassembler {
    pending: BytesMut,
    codec: FrameCodec,
}

impl FrameReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and peel off every frame it completes.
    ///
    /// Frames completed ahead of a bad length prefix are still returned
    /// next to the error. After an error the stream is unusable until
    /// [`reset`](Self::reset).
    pub fn feed(&mut self, chunk: &[u8]) -> (Vec<Bytes>, Option<SocketError>) {
        self.pending.extend_from_slice(chunk);

        let mut frames = Vec::new();
        loop {
            match self.codec.decode(&mut self.pending) {
                Ok(Some(frame)) => frames.push(frame),
                Ok(None) => return (frames, None),
                Err(e) => return (frames, Some(e)),
            }
        }
    }

    /// Bytes of the current partial frame held so far.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drop any partial frame; used when the connection it belonged to
    /// goes away.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.codec = FrameCodec::new();
    }

    /// Give back spare capacity once the buffer is idle.
    pub fn shrink(&mut self) {
        if self.pending.is_empty() {
            self.pending = BytesMut::new();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framed(payload: &[u8]) -> Vec<u8> {
        frame_chunks(Bytes::copy_from_slice(payload))
            .unwrap()
            .concat()
    }

    fn feed(reassembler: &mut FrameReassembler, chunk: &[u8]) -> Vec<Bytes> {
        let (frames, error) = reassembler.feed(chunk);
        assert!(error.is_none(), "unexpected error: {error:?}");
        frames
    }

    fn payload(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
    }

    #[test]
    fn single_shot_roundtrip() {
        let mut reassembler = FrameReassembler::new();
        let frames = feed(&mut reassembler, &framed(b"hello"));
        assert_eq!(frames, vec![Bytes::from_static(b"hello")]);
        assert_eq!(reassembler.pending_len(), 0);
    }

    #[test]
    fn empty_payload_roundtrip() {
        let mut reassembler = FrameReassembler::new();
        let frames = feed(&mut reassembler, &framed(b""));
        assert_eq!(frames.len(), 1);
        assert!(frames[0].is_empty());
    }

    #[test]
    fn byte_at_a_time_roundtrip() {
        let data = payload(1000, 7);
        let stream = framed(&data);

        let mut reassembler = FrameReassembler::new();
        let mut frames = Vec::new();
        for byte in &stream {
            frames.extend(feed(&mut reassembler, std::slice::from_ref(byte)));
        }
        assert_eq!(frames, vec![Bytes::from(data)]);
    }

    #[test]
    fn many_frames_in_one_chunk_keep_order() {
        let payloads: Vec<Vec<u8>> = (0..5).map(|i| payload(i * 3, i as u8)).collect();
        let stream: Vec<u8> = payloads.iter().flat_map(|p| framed(p)).collect();

        let mut reassembler = FrameReassembler::new();
        let frames = feed(&mut reassembler, &stream);
        let frames: Vec<Vec<u8>> = frames.into_iter().map(|f| f.to_vec()).collect();
        assert_eq!(frames, payloads);
    }

    #[test]
    fn split_across_frame_boundaries() {
        let a = payload(10, 1);
        let b = payload(20, 2);
        let c = payload(3, 3);
        let stream: Vec<u8> = [framed(&a), framed(&b), framed(&c)].concat();

        // Cut points land inside prefixes, inside payloads, and on boundaries.
        for chunk_size in [1, 2, 3, 5, 7, 13, 14, 33, stream.len()] {
            let mut reassembler = FrameReassembler::new();
            let mut frames = Vec::new();
            for chunk in stream.chunks(chunk_size) {
                frames.extend(feed(&mut reassembler, chunk));
            }
            assert_eq!(frames.len(), 3, "chunk size {chunk_size}");
            assert_eq!(frames[0].as_ref(), &a[..]);
            assert_eq!(frames[1].as_ref(), &b[..]);
            assert_eq!(frames[2].as_ref(), &c[..]);
        }
    }

    #[test]
    fn megabyte_payload_roundtrip() {
        let data = payload(1_000_000, 9);
        let stream = framed(&data);

        let mut reassembler = FrameReassembler::new();
        let mut frames = Vec::new();
        for chunk in stream.chunks(4093) {
            frames.extend(feed(&mut reassembler, chunk));
        }
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref(), &data[..]);
    }

    #[test]
    fn oversized_frames_are_chunked() {
        let data = payload(100_000, 4);
        let chunks = frame_chunks(Bytes::from(data.clone())).unwrap();

        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.len() <= MAX_WRITE_SIZE));
        let total: usize = chunks.iter().map(Bytes::len).sum();
        assert_eq!(total, data.len() + LENGTH_PREFIX_SIZE);

        // The prefix still describes the whole payload.
        assert_eq!(&chunks[0][..4], &(data.len() as u32).to_be_bytes());

        let mut reassembler = FrameReassembler::new();
        let mut frames = Vec::new();
        for chunk in &chunks {
            frames.extend(feed(&mut reassembler, chunk));
        }
        assert_eq!(frames, vec![Bytes::from(data)]);
    }

    #[test]
    fn exact_write_size_is_not_split() {
        let data = payload(MAX_WRITE_SIZE - LENGTH_PREFIX_SIZE, 0);
        assert_eq!(frame_chunks(Bytes::from(data)).unwrap().len(), 1);
    }

    #[test]
    fn partial_state_is_tracked() {
        let stream = framed(&payload(10, 0));
        let mut reassembler = FrameReassembler::new();
        assert!(feed(&mut reassembler, &stream[..6]).is_empty());
        assert_eq!(reassembler.codec.expected_len(), Some(10));
        assert_eq!(reassembler.pending_len(), 2);

        reassembler.reset();
        assert_eq!(reassembler.codec.expected_len(), None);
        assert_eq!(reassembler.pending_len(), 0);
    }

    #[test]
    fn absurd_lengths_are_rejected() {
        let mut reassembler = FrameReassembler::new();
        let (frames, error) = reassembler.feed(&u32::MAX.to_be_bytes());
        assert!(frames.is_empty());
        assert!(matches!(error, Some(SocketError::FrameTooLarge { .. })));
    }

    #[test]
    fn frames_ahead_of_a_bad_prefix_survive() {
        let mut stream = framed(b"valid");
        stream.extend_from_slice(&u32::MAX.to_be_bytes());

        let mut reassembler = FrameReassembler::new();
        let (frames, error) = reassembler.feed(&stream);
        assert_eq!(frames, vec![Bytes::from_static(b"valid")]);
        assert!(matches!(
            error,
            Some(SocketError::FrameTooLarge { size, .. }) if size == u32::MAX as usize
        ));
    }
}
