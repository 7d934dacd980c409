//! Bounded byte pipes used to glue the adapter chain together.
//!
//! A pipe is a bounded queue of `Bytes` chunks in one direction, built on
//! `tokio::sync::mpsc`. `pipe_pair` builds the two crossed pipes needed for
//! a duplex hop between two adapters; `PipeStream` wraps that pair behind
//! `AsyncRead`/`AsyncWrite` so it can stand in for a socket anywhere tokio
//! (and `tokio_rustls`) expects one.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;
use tokio_util::sync::PollSender;

const DEFAULT_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct PipeWriter {
    tx: PollSender<Bytes>,
}

pub struct PipeReader {
    rx: mpsc::Receiver<Bytes>,
    leftover: BytesMut,
}

/// Creates one directional pipe with the given channel capacity (in chunks,
/// not bytes — chunk size is whatever the writer pushes, typically a read
/// syscall's worth).
pub fn pipe(capacity: usize) -> (PipeWriter, PipeReader) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        PipeWriter { tx: PollSender::new(tx) },
        PipeReader {
            rx,
            leftover: BytesMut::new(),
        },
    )
}

impl PipeWriter {
    pub async fn write_chunk(&mut self, chunk: Bytes) -> io::Result<()> {
        self.tx
            .send(chunk)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader dropped"))
    }
}

impl AsyncRead for PipeReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if !self.leftover.is_empty() {
            let n = std::cmp::min(buf.remaining(), self.leftover.len());
            buf.put_slice(&self.leftover[..n]);
            self.leftover.advance(n);
            return Poll::Ready(Ok(()));
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(mut chunk)) => {
                let n = std::cmp::min(buf.remaining(), chunk.len());
                buf.put_slice(&chunk[..n]);
                chunk.advance(n);
                if !chunk.is_empty() {
                    self.leftover.extend_from_slice(&chunk);
                }
                Poll::Ready(Ok(()))
            }
            Poll::Ready(None) => Poll::Ready(Ok(())), // EOF
            Poll::Pending => Poll::Pending,
        }
    }
}

impl AsyncWrite for PipeWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let chunk = Bytes::copy_from_slice(buf);
        match self.tx.try_send(chunk) {
            Ok(()) => Poll::Ready(Ok(buf.len())),
            Err(mpsc::error::TrySendError::Full(_)) => {
                cx.waker().wake_by_ref();
                Poll::Pending
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "pipe reader dropped",
            ))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// One side of a duplex byte pipe: a reader fed by the peer's writes and a
/// writer the peer reads from. Implements `AsyncRead + AsyncWrite` so it can
/// be handed straight to `tokio_rustls::TlsAcceptor::accept`.
pub struct PipeStream {
    reader: PipeReader,
    writer: PipeWriter,
}

impl PipeStream {
    /// Splits into owned reader/writer halves. Used by the TLS adapter,
    /// which drives each half from its own task: one receiver service, one
    /// transmitter service.
    pub fn into_split(self) -> (PipeReader, PipeWriter) {
        (self.reader, self.writer)
    }
}

/// Builds two `PipeStream`s whose reader/writer halves are crossed, i.e.
/// writes on one side arrive as reads on the other. `capacity` bounds each
/// direction independently.
pub fn pipe_stream_pair(capacity: usize) -> (PipeStream, PipeStream) {
    let (a_tx, b_rx) = pipe(capacity);
    let (b_tx, a_rx) = pipe(capacity);
    (
        PipeStream { reader: a_rx, writer: a_tx },
        PipeStream { reader: b_rx, writer: b_tx },
    )
}

impl Default for PipeStream {
    fn default() -> Self {
        pipe_stream_pair(DEFAULT_CAPACITY).0
    }
}

impl AsyncRead for PipeStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().reader).poll_read(cx, buf)
    }
}

impl AsyncWrite for PipeStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().writer).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().writer).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().writer).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let (mut a, mut b) = pipe_stream_pair(4);
        a.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        b.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[tokio::test]
    async fn reader_sees_eof_when_writer_dropped() {
        let (w, mut r) = pipe(4);
        drop(w);
        let mut buf = [0u8; 8];
        let n = r.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn leftover_bytes_from_a_short_read_are_served_first() {
        let (mut a, mut b) = pipe_stream_pair(4);
        a.write_all(b"abcdef").await.unwrap();
        let mut first = [0u8; 3];
        b.read_exact(&mut first).await.unwrap();
        assert_eq!(&first, b"abc");
        let mut second = [0u8; 3];
        b.read_exact(&mut second).await.unwrap();
        assert_eq!(&second, b"def");
    }
}
