//! The data channel itself: a TLS-or-plain duplex stream plus the
//! representation-dependent (ASCII/Image) byte transform and ABOR
//! cancellation.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::error::DataChanError;
use crate::vfs::{VfsReader, VfsWriter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    Ascii,
    Image,
}

trait DuplexStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> DuplexStream for T {}

/// One transfer's data socket, plain or TLS-wrapped per the session's PROT
/// level at the moment it was opened. Changing PROT mid-transfer does not
/// affect the channel already in flight.
pub struct DataChannel {
    inner: Box<dyn DuplexStream>,
    abort: CancellationToken,
}

impl DataChannel {
    pub fn new_plain(tcp: TcpStream, abort: CancellationToken) -> Self {
        DataChannel { inner: Box::new(tcp), abort }
    }

    pub fn new_tls(tls: tokio_rustls::server::TlsStream<TcpStream>, abort: CancellationToken) -> Self {
        DataChannel { inner: Box::new(tls), abort }
    }

    /// Streams `reader` to the data socket, translating line endings in
    /// `Ascii` mode. Returns the byte count written to the wire, or
    /// `Aborted` if ABOR cancelled the transfer mid-stream.
    pub async fn send_from_vfs(
        &mut self,
        reader: &mut dyn VfsReader,
        transform: Transform,
    ) -> Result<u64, DataChanError> {
        let mut total = 0u64;
        loop {
            tokio::select! {
                biased;
                _ = self.abort.cancelled() => return Err(DataChanError::Aborted),
                chunk = reader.read_chunk(64 * 1024) => {
                    let chunk = chunk?;
                    if chunk.is_empty() {
                        break;
                    }
                    let out = match transform {
                        Transform::Image => chunk,
                        Transform::Ascii => ascii_encode(&chunk),
                    };
                    self.inner.write_all(&out).await?;
                    total += out.len() as u64;
                }
            }
        }
        self.inner.flush().await?;
        Ok(total)
    }

    /// Streams the data socket into `writer`, translating line endings in
    /// `Ascii` mode. Returns the byte count written to storage.
    pub async fn recv_to_vfs(
        &mut self,
        mut writer: Box<dyn VfsWriter>,
        transform: Transform,
    ) -> Result<u64, DataChanError> {
        let mut total = 0u64;
        let mut buf = [0u8; 64 * 1024];
        loop {
            tokio::select! {
                biased;
                _ = self.abort.cancelled() => return Err(DataChanError::Aborted),
                read = self.inner.read(&mut buf) => {
                    let n = read?;
                    if n == 0 {
                        break;
                    }
                    let chunk = match transform {
                        Transform::Image => buf[..n].to_vec(),
                        Transform::Ascii => ascii_decode(&buf[..n]),
                    };
                    writer.write_chunk(&chunk).await.map_err(DataChanError::Storage)?;
                    total += chunk.len() as u64;
                }
            }
        }
        writer.finish().await.map_err(DataChanError::Storage)?;
        Ok(total)
    }

    /// Writes a pre-rendered listing (LIST/NLST/MLSD) to the data socket,
    /// respecting ABOR the same way file transfers do.
    pub async fn send_text(&mut self, text: &str) -> Result<(), DataChanError> {
        tokio::select! {
            biased;
            _ = self.abort.cancelled() => Err(DataChanError::Aborted),
            result = self.inner.write_all(text.as_bytes()) => {
                result?;
                self.inner.flush().await?;
                Ok(())
            }
        }
    }

    pub async fn close(mut self) {
        let _ = self.inner.shutdown().await;
    }
}

fn ascii_encode(chunk: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(chunk.len());
    for &b in chunk {
        if b == b'\n' {
            out.push(b'\r');
        }
        out.push(b);
    }
    out
}

fn ascii_decode(chunk: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(chunk.len());
    let mut i = 0;
    while i < chunk.len() {
        if chunk[i] == b'\r' && i + 1 < chunk.len() && chunk[i + 1] == b'\n' {
            out.push(b'\n');
            i += 2;
        } else {
            out.push(chunk[i]);
            i += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_encode_inserts_cr_before_lf() {
        assert_eq!(ascii_encode(b"a\nb\n"), b"a\r\nb\r\n");
    }

    #[test]
    fn ascii_decode_strips_cr_before_lf() {
        assert_eq!(ascii_decode(b"a\r\nb\r\n"), b"a\nb\n");
    }

    #[test]
    fn ascii_decode_leaves_lone_cr_alone() {
        assert_eq!(ascii_decode(b"a\rb"), b"a\rb");
    }
}
