use std::fmt;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::ControlChanError;

/// The subset of RFC 959 (plus 2228/2428/3659/4217) reply codes this runtime
/// actually emits. The numeric value is what goes on the wire; the variant
/// name documents its RFC meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyCode {
    DataConnectionOpen = 125,
    FileStatusOkay = 150,
    CommandOkay = 200,
    CommandNotImplementedSuperfluous = 202,
    SystemStatus = 211,
    DirectoryStatus = 212,
    FileStatus = 213,
    HelpMessage = 214,
    SystemType = 215,
    ServiceReady = 220,
    ClosingControlConnection = 221,
    ServiceNotAvailable = 421,
    DataConnectionClosed = 226,
    EnteringPassiveMode = 227,
    EnteringExtendedPassiveMode = 229,
    UserLoggedIn = 230,
    AuthProceed = 234,
    FileActionOkay = 250,
    PathCreated = 257,
    NeedPassword = 331,
    NeedAccount = 332,
    FileActionPending = 350,
    CantOpenDataConnection = 425,
    ConnectionClosed = 426,
    FileBusy = 450,
    LocalError = 451,
    InsufficientStorage = 452,
    SyntaxError = 500,
    SyntaxErrorInArguments = 501,
    CommandNotImplemented = 502,
    BadCommandSequence = 503,
    CommandNotImplementedForParameter = 504,
    NotLoggedIn = 530,
    NeedAccountForStorage = 532,
    ProtectionLevelDenied = 536,
    FileActionNotTaken = 550,
    ActionAborted = 551,
    FileNameNotAllowed = 553,
}

impl ReplyCode {
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

impl fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

/// A reply to be written back on the control connection. Supports RFC 959's
/// multi-line continuation format (`NNN-text` ... `NNN text`), used by FEAT.
#[derive(Debug, Clone)]
pub struct Reply {
    code: ReplyCode,
    lines: Vec<String>,
}

impl Reply {
    pub fn new(code: ReplyCode, message: impl Into<String>) -> Self {
        Reply { code, lines: vec![message.into()] }
    }

    /// A multi-line reply: all lines but the last use the `NNN-` continuation
    /// marker, the last uses `NNN `. `header` and `footer` are the first and
    /// last lines; `body` is emitted verbatim in between (FEAT's feature list
    /// uses this with the individual features unindented, RFC 2389 style).
    pub fn multiline(code: ReplyCode, header: impl Into<String>, body: Vec<String>, footer: impl Into<String>) -> Self {
        let mut lines = vec![header.into()];
        lines.extend(body);
        lines.push(footer.into());
        Reply { code, lines }
    }

    pub fn code(&self) -> ReplyCode {
        self.code
    }

    /// Renders the full wire representation, CRLF-terminated.
    pub fn render(&self) -> String {
        let n = self.lines.len();
        let mut out = String::new();
        for (i, line) in self.lines.iter().enumerate() {
            if i + 1 == n {
                out.push_str(&format!("{} {}\r\n", self.code, line));
            } else {
                out.push_str(&format!("{}-{}\r\n", self.code, line));
            }
        }
        out
    }
}

/// Serializes and writes replies to the control connection, one at a time.
/// Callers hold `Connection`'s writer mutex for the duration of a single
/// reply so a 150/226 pair from a transfer task can never interleave with a
/// reply from the command loop.
pub struct ReplyWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> ReplyWriter<W> {
    pub fn new(inner: W) -> Self {
        ReplyWriter { inner }
    }

    pub async fn send(&mut self, reply: &Reply) -> Result<(), ControlChanError> {
        let bytes = reply.render();
        self.inner.write_all(bytes.as_bytes()).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Swaps in a new sink, discarding the old one. Used by the explicit-TLS
    /// hot upgrade once the handshake completes: replies from that point on
    /// go to the TLS adapter's app-side pipe instead of the cleartext one,
    /// with no change visible to callers holding this same
    /// `Arc<Mutex<ReplyWriter<_>>>`.
    pub fn set_inner(&mut self, new: W) {
        self.inner = new;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_line_render() {
        let r = Reply::new(ReplyCode::ServiceReady, "service ready");
        assert_eq!(r.render(), "220 service ready\r\n");
    }

    #[test]
    fn multiline_render_uses_dash_then_space() {
        let r = Reply::multiline(
            ReplyCode::SystemStatus,
            "Extensions supported:",
            vec!["UTF8".to_string(), "PASV".to_string()],
            "End",
        );
        assert_eq!(r.render(), "211-Extensions supported:\r\n211-UTF8\r\n211-PASV\r\n211 End\r\n");
    }

    #[tokio::test]
    async fn writer_writes_exact_bytes() {
        let mut buf = Vec::new();
        {
            let mut writer = ReplyWriter::new(&mut buf);
            writer
                .send(&Reply::new(ReplyCode::CommandOkay, "NOOP ok"))
                .await
                .unwrap();
        }
        assert_eq!(buf, b"200 NOOP ok\r\n");
    }
}
