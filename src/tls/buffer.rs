//! Fixed-capacity staging buffer for the head of a client stream.
//!
//! The buffer never grows. Bytes are pulled from the source on demand while
//! the parser walks the ClientHello, and the whole head (everything read, not
//! just the unread tail) is later replayed to the upstream in one write.

use crate::error::{CapacityError, SniProxyError, SniProxyResult};
use crate::utils::BackoffCounter;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// First delay before re-reading a stream that reported end-of-stream
const EOF_BACKOFF_BASE: Duration = Duration::from_millis(10);

/// Narrow capability answering whether the peer is still connected.
pub trait Liveness {
    fn is_alive(&self) -> bool;
}

impl<F: Fn() -> bool> Liveness for F {
    fn is_alive(&self) -> bool {
        self()
    }
}

pub struct HeadBuffer<'a, R, L> {
    buffer: Box<[u8]>,
    /// Bytes physically read from the source
    count: usize,
    /// Bytes consumed by typed reads
    read_index: usize,
    /// `None` once closed
    source: Option<&'a mut R>,
    liveness: L,
    read_timeout: Duration,
    eof_backoff: BackoffCounter,
}

impl<'a, R, L> HeadBuffer<'a, R, L>
where
    R: AsyncRead + Unpin,
    L: Liveness,
{
    pub fn new(source: &'a mut R, liveness: L, capacity: usize, read_timeout: Duration) -> Self {
        Self {
            buffer: vec![0u8; capacity].into_boxed_slice(),
            count: 0,
            read_index: 0,
            source: Some(source),
            liveness,
            read_timeout,
            eof_backoff: BackoffCounter::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn read_index(&self) -> usize {
        self.read_index
    }

    pub fn is_closed(&self) -> bool {
        self.source.is_none()
    }

    /// Everything read from the source so far
    pub fn filled(&self) -> &[u8] {
        &self.buffer[..self.count]
    }

    /// Guarantee at least `need` unread bytes, reading from the source as needed.
    ///
    /// A read timeout or end-of-stream is not fatal by itself: the liveness
    /// capability decides whether to keep waiting or fail with
    /// [`SniProxyError::PeerGone`].
    pub async fn ensure_available(&mut self, need: usize) -> SniProxyResult<()> {
        let capacity = self.buffer.len();
        let Some(source) = self.source.as_mut() else {
            return Err(SniProxyError::BufferClosed);
        };
        let required = self.read_index.saturating_add(need);
        if required > capacity {
            return Err(CapacityError::BufferExhausted { required, capacity }.into());
        }

        while self.count < required {
            let read = source.read(&mut self.buffer[self.count..]);
            match tokio::time::timeout(self.read_timeout, read).await {
                Ok(Ok(0)) => {
                    if !self.liveness.is_alive() {
                        return Err(SniProxyError::PeerGone);
                    }
                    let delay = self.eof_backoff.next_delay(EOF_BACKOFF_BASE, self.read_timeout);
                    trace!(?delay, "end of stream with live peer, polling again");
                    tokio::time::sleep(delay).await;
                }
                Ok(Ok(n)) => {
                    self.count += n;
                    self.eof_backoff.reset();
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {
                    if !self.liveness.is_alive() {
                        return Err(SniProxyError::PeerGone);
                    }
                }
            }
        }
        Ok(())
    }

    pub async fn read_u8(&mut self) -> SniProxyResult<u8> {
        self.ensure_available(1).await?;
        let v = self.buffer[self.read_index];
        self.read_index += 1;
        Ok(v)
    }

    pub async fn read_u16(&mut self) -> SniProxyResult<u16> {
        Ok(self.read_be(2).await? as u16)
    }

    pub async fn read_u24(&mut self) -> SniProxyResult<u32> {
        self.read_be(3).await
    }

    pub async fn read_u32(&mut self) -> SniProxyResult<u32> {
        self.read_be(4).await
    }

    async fn read_be(&mut self, width: usize) -> SniProxyResult<u32> {
        self.ensure_available(width).await?;
        let bytes = &self.buffer[self.read_index..self.read_index + width];
        let v = bytes.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b));
        self.read_index += width;
        Ok(v)
    }

    /// Decode `len` bytes as UTF-8; `Ok(None)` when the bytes are not valid UTF-8.
    pub async fn read_string(&mut self, len: usize) -> SniProxyResult<Option<String>> {
        self.ensure_available(len).await?;
        let bytes = &self.buffer[self.read_index..self.read_index + len];
        let s = std::str::from_utf8(bytes).ok().map(str::to_owned);
        self.read_index += len;
        Ok(s)
    }

    pub async fn skip(&mut self, len: usize) -> SniProxyResult<()> {
        if len > 0 {
            self.ensure_available(len).await?;
            self.read_index += len;
        }
        Ok(())
    }

    /// Write bytes `0..count` to `sink`, then leave the buffer closed.
    ///
    /// Returns the number of bytes replayed.
    pub async fn transfer_remaining_and_close<W>(&mut self, sink: &mut W) -> SniProxyResult<usize>
    where
        W: AsyncWrite + Unpin,
    {
        if self.is_closed() {
            return Err(SniProxyError::BufferClosed);
        }
        self.close();
        sink.write_all(&self.buffer[..self.count]).await?;
        sink.flush().await?;
        Ok(self.count)
    }

    /// Release the source. Idempotent.
    pub fn close(&mut self) {
        self.source = None;
    }
}
