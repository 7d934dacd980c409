//! Line parser: reads CRLF-terminated requests off the app-side pipe,
//! splits on the first space into verb and argument, uppercases the verb,
//! rejects oversized lines with 500.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::ProtocolError;

/// A parsed command: verb always uppercased, argument the raw bytes after
/// the first space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub verb: String,
    pub argument: String,
}

impl CommandRequest {
    fn parse(line: &str) -> Self {
        let line = line.trim_end_matches(['\r', '\n']);
        match line.split_once(' ') {
            Some((verb, rest)) => CommandRequest { verb: verb.to_ascii_uppercase(), argument: rest.to_string() },
            None => CommandRequest { verb: line.to_ascii_uppercase(), argument: String::new() },
        }
    }
}

/// Reads one CRLF-terminated line at a time from an `AsyncRead`, byte by
/// byte above a small internal buffer — command lines are short and
/// infrequent compared to data-channel traffic, so this favours simplicity
/// over throughput (the data-channel path in `crate::datachan` does the
/// buffered streaming).
pub struct LineParser<R> {
    inner: R,
    max_line_len: usize,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineParser<R> {
    pub fn new(inner: R, max_line_len: usize) -> Self {
        LineParser { inner, max_line_len, buf: Vec::new() }
    }

    /// Reads the next command, or `Ok(None)` on clean EOF (the client closed
    /// the control connection or the pipe was cancelled with no bytes ever
    /// queued after it).
    pub async fn next_command(&mut self) -> Result<Option<CommandRequest>, ProtocolError> {
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                let line_bytes: Vec<u8> = self.buf.drain(..=pos).collect();
                let line = String::from_utf8(line_bytes).map_err(|_| ProtocolError::MalformedLine)?;
                return Ok(Some(CommandRequest::parse(&line)));
            }
            if self.buf.len() > self.max_line_len {
                self.buf.clear();
                return Err(ProtocolError::LineTooLong);
            }
            let mut chunk = [0u8; 512];
            let n = self.inner.read(&mut chunk).await.map_err(|_| ProtocolError::MalformedLine)?;
            if n == 0 {
                return Ok(None);
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Drains any bytes already read off the wire but not yet consumed as a
    /// complete command line. Used by the explicit-TLS hot upgrade so bytes
    /// that arrived in the same read as `AUTH TLS\r\n` are handed to the TLS
    /// handshake instead of silently dropped.
    pub fn take_leftover(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_splits_verb_and_argument() {
        let c = CommandRequest::parse("user anonymous\r\n");
        assert_eq!(c.verb, "USER");
        assert_eq!(c.argument, "anonymous");
    }

    #[test]
    fn parse_handles_bare_verb() {
        let c = CommandRequest::parse("NOOP\r\n");
        assert_eq!(c.verb, "NOOP");
        assert_eq!(c.argument, "");
    }

    #[tokio::test]
    async fn next_command_reads_one_line_at_a_time() {
        use crate::pipe::pipe;
        use bytes::Bytes;

        let (mut w, r) = pipe(4);
        w.write_chunk(Bytes::from_static(b"USER a\r\nPASS b\r\n")).await.unwrap();
        drop(w);
        let mut parser = LineParser::new(r, 4096);
        let c1 = parser.next_command().await.unwrap().unwrap();
        assert_eq!((c1.verb.as_str(), c1.argument.as_str()), ("USER", "a"));
        let c2 = parser.next_command().await.unwrap().unwrap();
        assert_eq!((c2.verb.as_str(), c2.argument.as_str()), ("PASS", "b"));
        assert!(parser.next_command().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_line_yields_line_too_long() {
        use crate::pipe::pipe;
        use bytes::Bytes;

        let (mut w, r) = pipe(4);
        w.write_chunk(Bytes::from(vec![b'a'; 100])).await.unwrap();
        drop(w);
        let mut parser = LineParser::new(r, 16);
        match parser.next_command().await {
            Err(ProtocolError::LineTooLong) => {}
            other => panic!("expected LineTooLong, got {other:?}"),
        }
    }
}
