//! Pushback Reader
//!
//! A reader that serves previously unread bytes before touching the inner
//! stream. The connection uses it after a bad data block: anything read past
//! the resync point is handed back so the next command line starts with it.

use bytes::{Buf, BytesMut};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncBufRead, AsyncRead, ReadBuf};

/// Wraps a buffered reader with a pushback buffer.
#[derive(Debug)]
pub struct Rewind<R> {
    /// Bytes handed back, served before `inner`
    pending: BytesMut,
    inner: R,
}

impl<R> Rewind<R> {
    pub fn new(inner: R) -> Self {
        Self {
            pending: BytesMut::new(),
            inner,
        }
    }

    /// Puts `bytes` back in front of everything not yet read.
    pub fn unread(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let mut pending = BytesMut::with_capacity(bytes.len() + self.pending.len());
        pending.extend_from_slice(bytes);
        pending.extend_from_slice(&self.pending);
        self.pending = pending;
    }

    /// Number of pushed-back bytes still waiting.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for Rewind<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.pending.is_empty() {
            let n = this.pending.len().min(buf.remaining());
            buf.put_slice(&this.pending[..n]);
            this.pending.advance(n);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<R: AsyncBufRead + Unpin> AsyncBufRead for Rewind<R> {
    fn poll_fill_buf(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<&[u8]>> {
        let this = self.get_mut();
        if !this.pending.is_empty() {
            return Poll::Ready(Ok(&this.pending[..]));
        }
        Pin::new(&mut this.inner).poll_fill_buf(cx)
    }

    fn consume(self: Pin<&mut Self>, amt: usize) {
        let this = self.get_mut();
        if this.pending.is_empty() {
            Pin::new(&mut this.inner).consume(amt);
        } else {
            this.pending.advance(amt);
        }
    }
}
