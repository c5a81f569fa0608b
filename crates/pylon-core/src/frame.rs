//! Length-prefixed framing over a byte stream.
//!
//! Every packet on a cluster connection is a 16-bit big-endian length
//! followed by exactly that many payload bytes.

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest payload a frame can carry — the length prefix is 16 bits.
pub const MAX_FRAME: usize = u16::MAX as usize;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame payload of {0} bytes exceeds the 16-bit length prefix")]
    TooLong(usize),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Reads one frame at a time off a stream.
pub struct FrameReader<R> {
    inner: R,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Read the next frame. `Ok(None)` on clean EOF at a frame boundary;
    /// EOF inside a frame surfaces as an `UnexpectedEof` error.
    pub async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        let mut len = [0u8; 2];
        match self.inner.read_exact(&mut len).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let mut payload = vec![0u8; u16::from_be_bytes(len) as usize];
        self.inner.read_exact(&mut payload).await?;
        Ok(Some(payload))
    }
}

/// Buffering frame writer.
///
/// `write_frame` and `write_batch` only queue bytes; nothing reaches the
/// stream until [`flush`](FrameWriter::flush). Callers flush once per
/// packed message so a multi-part burst leaves in one write.
pub struct FrameWriter<W> {
    inner: W,
    buf: BytesMut,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            buf: BytesMut::new(),
        }
    }

    /// Queue one frame.
    pub fn write_frame(&mut self, payload: &[u8]) -> Result<(), FrameError> {
        if payload.len() > MAX_FRAME {
            return Err(FrameError::TooLong(payload.len()));
        }
        self.buf.put_u16(payload.len() as u16);
        self.buf.put_slice(payload);
        Ok(())
    }

    /// Queue a batch of frames in order.
    pub fn write_batch(&mut self, frames: &[Vec<u8>]) -> Result<(), FrameError> {
        for frame in frames {
            self.write_frame(frame)?;
        }
        Ok(())
    }

    /// Push everything queued so far onto the stream.
    pub async fn flush(&mut self) -> Result<(), FrameError> {
        if !self.buf.is_empty() {
            self.inner.write_all(&self.buf).await?;
            self.buf.clear();
            self.inner.flush().await?;
        }
        Ok(())
    }
}
