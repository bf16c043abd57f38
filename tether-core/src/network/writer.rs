//! Outbound side of the link.
//!
//! Frames are queued as transport-sized chunks and written one
//! `write` call at a time from the engine's `select!`, so a peer that
//! stops reading stalls only this queue and never the loop.

use std::collections::VecDeque;
use std::io;

use bytes::{Buf, Bytes};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::codec::frame_chunks;
use crate::error::SocketError;

#[derive(Debug)]
pub struct FrameWriter<W> {
    half: W,
    /// Queued chunks; the flag marks the last chunk of a frame.
    chunks: VecDeque<(Bytes, bool)>,
    frames: usize,
    unflushed: bool,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(half: W) -> Self {
        Self {
            half,
            chunks: VecDeque::new(),
            frames: 0,
            unflushed: false,
        }
    }

    /// Frame `payload` and queue it behind everything already queued.
    pub fn push(&mut self, payload: Bytes) -> Result<(), SocketError> {
        let chunks = frame_chunks(payload)?;
        let last = chunks.len() - 1;
        self.chunks
            .extend(chunks.into_iter().enumerate().map(|(i, c)| (c, i == last)));
        self.frames += 1;
        Ok(())
    }

    /// Frames not yet fully handed to the transport.
    pub fn queued(&self) -> usize {
        self.frames
    }

    pub fn is_idle(&self) -> bool {
        self.chunks.is_empty() && !self.unflushed
    }

    /// One step of progress: a single `write` of the front chunk, or a
    /// flush once the queue is empty.
    ///
    /// Cancel safe: state only changes after the transport answered.
    pub async fn write_some(&mut self) -> io::Result<()> {
        if let Some((front, _)) = self.chunks.front() {
            let n = self.half.write(front).await?;
            if n == 0 {
                return Err(io::ErrorKind::WriteZero.into());
            }
            self.advance(n);
            self.unflushed = true;
        } else if self.unflushed {
            self.half.flush().await?;
            self.unflushed = false;
        }
        Ok(())
    }

    fn advance(&mut self, n: usize) {
        let Some((front, last)) = self.chunks.front_mut() else {
            return;
        };
        front.advance(n);
        if front.is_empty() {
            if *last {
                self.frames -= 1;
            }
            self.chunks.pop_front();
        }
    }

    /// Drop whatever is still queued; returns the number of frames lost.
    pub fn clear(&mut self) -> usize {
        self.chunks.clear();
        std::mem::take(&mut self.frames)
    }

    pub fn shrink(&mut self) {
        if self.chunks.is_empty() {
            self.chunks = VecDeque::new();
        }
    }

    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.half.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{FrameReassembler, MAX_WRITE_SIZE};

    #[tokio::test]
    async fn large_frames_are_written_in_chunks() {
        let payload = Bytes::from(vec![0xAB; 40_000]);
        let chunks = frame_chunks(payload.clone()).unwrap();
        assert_eq!(chunks[0].len(), MAX_WRITE_SIZE);

        let mock = tokio_test::io::Builder::new()
            .write(&chunks[0])
            .write(&chunks[1])
            .build();
        let mut writer = FrameWriter::new(mock);
        writer.push(payload).unwrap();
        assert_eq!(writer.queued(), 1);

        while !writer.is_idle() {
            writer.write_some().await.unwrap();
        }
        assert_eq!(writer.queued(), 0);
    }

    #[tokio::test]
    async fn partial_writes_keep_frame_order() {
        let (client, mut server) = tokio::io::duplex(7);
        let mut writer = FrameWriter::new(client);
        writer.push(Bytes::from_static(b"first")).unwrap();
        writer.push(Bytes::from_static(b"second")).unwrap();
        assert_eq!(writer.queued(), 2);

        let reader = tokio::spawn(async move {
            use tokio::io::AsyncReadExt;
            let mut reassembler = FrameReassembler::new();
            let mut frames = Vec::new();
            let mut buf = [0u8; 3];
            while frames.len() < 2 {
                let n = server.read(&mut buf).await.unwrap();
                let (done, error) = reassembler.feed(&buf[..n]);
                assert!(error.is_none());
                frames.extend(done);
            }
            frames
        });

        while !writer.is_idle() {
            writer.write_some().await.unwrap();
        }
        assert_eq!(writer.queued(), 0);
        assert_eq!(
            reader.await.unwrap(),
            vec![Bytes::from_static(b"first"), Bytes::from_static(b"second")]
        );
    }

    #[tokio::test]
    async fn stalled_peer_leaves_frames_queued() {
        let (client, _server) = tokio::io::duplex(16);
        let mut writer = FrameWriter::new(client);
        writer.push(Bytes::from(vec![1; 100])).unwrap();

        // The pipe fills after 16 bytes; the next write never completes.
        writer.write_some().await.unwrap();
        let stalled =
            tokio::time::timeout(std::time::Duration::from_millis(50), writer.write_some()).await;
        assert!(stalled.is_err());
        assert_eq!(writer.queued(), 1);
        assert_eq!(writer.clear(), 1);
        assert_eq!(writer.queued(), 0);
    }
}
