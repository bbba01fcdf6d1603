//! Length-prefixed frame I/O.
//!
//! Wire format: `[4-byte length as u32 big-endian] + [payload]`. Reads and
//! writes are buffered so a partial frame never blocks the opposite
//! direction of the stream; the writer flushes once per header+body pair so
//! a peer never observes a header without its body.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};

use crate::error::{Result, RpcError};

/// Maximum frame payload size (100 MB).
pub const MAX_FRAME_SIZE: usize = 100 * 1024 * 1024;

/// Reads length-prefixed frames from the read half of a connection.
pub struct FrameReader<R> {
    inner: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
        }
    }

    /// Reads one complete frame payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the peer closed the stream, the length prefix
    /// exceeds [`MAX_FRAME_SIZE`], or the payload read fails.
    pub async fn read_frame(&mut self) -> Result<Vec<u8>> {
        let mut len_buf = [0u8; 4];
        self.inner.read_exact(&mut len_buf).await?;

        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(RpcError::FrameTooLarge(len, MAX_FRAME_SIZE));
        }

        let mut payload = vec![0u8; len];
        self.inner.read_exact(&mut payload).await?;
        Ok(payload)
    }
}

/// Writes length-prefixed frames to the write half of a connection.
///
/// Writes are buffered; callers must use [`FrameWriter::write_message`] or
/// call [`FrameWriter::flush`] explicitly before expecting the peer to see
/// anything.
pub struct FrameWriter<W> {
    inner: BufWriter<W>,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner: BufWriter::new(inner),
        }
    }

    /// Buffers one frame without flushing.
    pub async fn write_frame(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() > MAX_FRAME_SIZE {
            return Err(RpcError::FrameTooLarge(payload.len(), MAX_FRAME_SIZE));
        }
        let len = payload.len() as u32;
        self.inner.write_all(&len.to_be_bytes()).await?;
        self.inner.write_all(payload).await?;
        Ok(())
    }

    /// Writes a header frame immediately followed by a body frame, then
    /// flushes. This is the only way request and response frames go out, so
    /// the two frames are never separated by another writer's frames as long
    /// as callers serialize access to the writer.
    pub async fn write_message(&mut self, header: &[u8], body: &[u8]) -> Result<()> {
        self.write_frame(header).await?;
        self.write_frame(body).await?;
        self.flush().await
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.inner.flush().await?;
        Ok(())
    }

    /// Flushes and shuts down the underlying write half.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}
