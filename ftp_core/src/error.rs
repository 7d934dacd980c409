use std::io;

use thiserror::Error;

use crate::controlchan::reply::{Reply, ReplyCode};

/// Errors raised by the virtual filesystem contract (`crate::vfs::Vfs`).
#[derive(Debug, Error)]
pub enum VfsError {
    #[error("no such file or directory")]
    NotFound,

    #[error("permission denied")]
    PermissionDenied,

    #[error("path escapes the chroot root")]
    PathTraversal,

    #[error("already exists")]
    Exists,

    #[error("resource busy")]
    Busy,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Other(String),
}

/// Errors raised while driving the control channel: protocol framing, the
/// underlying I/O, or a storage-layer failure surfaced while handling a
/// command.
#[derive(Debug, Error)]
pub enum ControlChanError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("storage error: {0}")]
    Storage(#[from] VfsError),

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("control connection closed by peer")]
    ConnectionReset,

    #[error("TLS handshake timed out")]
    TlsHandshakeTimeout,
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("command line exceeded the maximum length")]
    LineTooLong,

    #[error("command line was not valid UTF-8 / had no CRLF terminator")]
    MalformedLine,

    #[error("unknown command verb: {0}")]
    UnknownCommand(String),

    #[error("invalid arguments for command: {0}")]
    InvalidArguments(String),
}

/// Errors raised while establishing or running a data connection.
#[derive(Debug, Error)]
pub enum DataChanError {
    #[error("no data connection has been established (use PORT/PASV/EPRT/EPSV first)")]
    NotEstablished,

    #[error("timed out waiting for the active-mode peer to accept")]
    ActiveConnectTimeout,

    #[error("timed out waiting for a passive-mode peer to connect")]
    PassiveAcceptTimeout,

    #[error("data connection peer address did not match the control connection peer")]
    UnexpectedPeer,

    #[error("transfer aborted")]
    Aborted,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("storage error: {0}")]
    Storage(#[from] VfsError),

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),
}

/// Errors raised while building the server's runtime configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid bind address {0}: {1}")]
    InvalidBindAddress(String, io::Error),

    #[error("invalid passive port range: {0}-{1} (start must be <= end)")]
    InvalidPassivePortRange(u16, u16),

    #[error("could not read certificate file {path}: {source}")]
    CertFile { path: String, source: io::Error },

    #[error("could not read private key file {path}: {source}")]
    KeyFile { path: String, source: io::Error },

    #[error("certificate/key file contained no usable entries")]
    NoKeyMaterial,

    #[error("rustls configuration error: {0}")]
    Rustls(#[from] rustls::Error),
}

impl VfsError {
    /// Maps a storage failure onto the reply a client should see.
    pub fn as_reply(&self) -> Reply {
        match self {
            VfsError::NotFound => Reply::new(ReplyCode::FileActionNotTaken, "No such file or directory."),
            VfsError::PermissionDenied => {
                Reply::new(ReplyCode::FileActionNotTaken, "Permission denied.")
            }
            VfsError::PathTraversal => {
                Reply::new(ReplyCode::FileActionNotTaken, "Path escapes the configured root.")
            }
            VfsError::Exists => Reply::new(ReplyCode::FileActionNotTaken, "Already exists."),
            VfsError::Busy => Reply::new(ReplyCode::FileBusy, "Resource busy."),
            VfsError::Io(e) => Reply::new(ReplyCode::LocalError, format!("Local error: {e}")),
            VfsError::Other(msg) => Reply::new(ReplyCode::LocalError, format!("Local error: {msg}")),
        }
    }
}

impl DataChanError {
    pub fn as_reply(&self) -> Reply {
        match self {
            DataChanError::NotEstablished => {
                Reply::new(ReplyCode::BadCommandSequence, "No data connection established.")
            }
            DataChanError::ActiveConnectTimeout | DataChanError::PassiveAcceptTimeout => {
                Reply::new(ReplyCode::CantOpenDataConnection, "Can't open data connection.")
            }
            DataChanError::UnexpectedPeer => {
                Reply::new(ReplyCode::CantOpenDataConnection, "Data connection peer mismatch.")
            }
            DataChanError::Aborted => {
                Reply::new(ReplyCode::ConnectionClosed, "Transfer aborted.")
            }
            DataChanError::Io(e) => Reply::new(ReplyCode::LocalError, format!("Local error: {e}")),
            DataChanError::Storage(e) => e.as_reply(),
            DataChanError::Tls(e) => Reply::new(ReplyCode::LocalError, format!("TLS error: {e}")),
        }
    }
}

impl ProtocolError {
    pub fn as_reply(&self) -> Reply {
        match self {
            ProtocolError::LineTooLong => {
                Reply::new(ReplyCode::SyntaxError, "Command line too long.")
            }
            ProtocolError::MalformedLine => {
                Reply::new(ReplyCode::SyntaxError, "Malformed command line.")
            }
            ProtocolError::UnknownCommand(verb) => {
                Reply::new(ReplyCode::SyntaxError, format!("'{verb}' not understood."))
            }
            ProtocolError::InvalidArguments(verb) => Reply::new(
                ReplyCode::SyntaxErrorInArguments,
                format!("Invalid arguments for {verb}."),
            ),
        }
    }
}

impl ControlChanError {
    /// Maps a per-command failure onto the 451 fallback reply: any handler
    /// error not already carrying its own reply becomes `451 Local error`,
    /// and the connection continues.
    pub fn as_reply(&self) -> Reply {
        match self {
            ControlChanError::Protocol(e) => e.as_reply(),
            ControlChanError::Storage(e) => e.as_reply(),
            ControlChanError::Io(e) => Reply::new(ReplyCode::LocalError, format!("Local error: {e}")),
            ControlChanError::Tls(e) => Reply::new(ReplyCode::LocalError, format!("TLS error: {e}")),
            ControlChanError::ConnectionReset => {
                Reply::new(ReplyCode::LocalError, "Connection reset.")
            }
            ControlChanError::TlsHandshakeTimeout => {
                Reply::new(ReplyCode::ServiceNotAvailable, "TLS handshake timed out.")
            }
        }
    }

    /// Whether this error is fatal for the control connection: I/O errors
    /// tear the connection down without a reply attempt, as opposed to one
    /// that can be reported with a reply and continue.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ControlChanError::Io(_) | ControlChanError::ConnectionReset | ControlChanError::TlsHandshakeTimeout
        )
    }
}
