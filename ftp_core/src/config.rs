//! Process-wide runtime configuration.
//!
//! `ServerConfig` is built once at startup (by the `ftpd` binary's
//! `clap::Parser`-derived `Cli`) and shared read-only via `Arc` across every
//! accepted connection.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Inclusive TCP port range used to allocate PASV/EPSV listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassivePortRange {
    pub start: u16,
    pub end: u16,
}

impl PassivePortRange {
    pub fn new(start: u16, end: u16) -> Result<Self, ConfigError> {
        if start > end {
            return Err(ConfigError::InvalidPassivePortRange(start, end));
        }
        Ok(PassivePortRange { start, end })
    }

    pub fn contains(&self, port: u16) -> bool {
        (self.start..=self.end).contains(&port)
    }

    pub fn len(&self) -> u32 {
        u32::from(self.end) - u32::from(self.start) + 1
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the cleartext (or explicit-FTPS-capable) control listener binds.
    pub control_bind: SocketAddr,
    /// Address an implicit-FTPS control listener binds, if enabled.
    pub implicit_tls_bind: Option<SocketAddr>,
    pub passive_ports: PassivePortRange,
    /// Public IP/hostname advertised in PASV/EPSV replies; `None` means "use
    /// the local address the socket is bound to".
    pub passive_advertise_addr: Option<std::net::IpAddr>,
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
    /// Root directory the VFS chroots every session into.
    pub root_dir: PathBuf,
    /// When false, a PASV/EPSV data connection is rejected unless its peer
    /// address equals the control connection's peer address.
    pub promiscuous: bool,
    pub idle_timeout: Duration,
    pub tls_handshake_timeout: Duration,
    /// Timeout dialing an active-mode (PORT/EPRT) peer.
    pub active_connect_timeout: Duration,
    pub passive_accept_timeout: Duration,
    /// Whether `OPTS UTF8 ON` / FEAT's `UTF8` line are offered. ASCII is the
    /// default representation; UTF-8 is an explicit opt-in.
    pub utf8_opt_in: bool,
    pub greeting: String,
}

impl ServerConfig {
    pub fn requires_tls(&self) -> bool {
        self.cert_path.is_some() && self.key_path.is_some()
    }
}
