//! Session state: the authoritative per-connection mutable state, touched
//! only from the control task — session-state mutations are serialized on
//! that single task.

use std::path::PathBuf;
use std::sync::Arc;

use crate::membership::Principal;
use crate::vfs::Vfs;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Unauth,
    UserGiven(String),
    /// PASS accepted but the provider's `requires_account` is true and ACCT
    /// has not yet arrived.
    NeedsAccount(String),
    Authenticated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Representation {
    Ascii,
    Image,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    Clear,
    Private,
}

/// Per-connection authoritative state. Owned exclusively by the `Connection`
/// and handed to handlers by `&mut` for the duration of one command —
/// exactly one command is ever in flight per connection.
pub struct Session {
    pub auth: AuthState,
    pub principal: Option<Principal>,
    pub cwd: String,
    pub representation: Representation,
    pub protection: Protection,
    pub rest_offset: Option<u64>,
    pub rename_from: Option<String>,
    pub pbsz_seen: bool,
    pub utf8_enabled: bool,
    /// Set once the explicit `AUTH TLS` hot upgrade completes.
    /// Distinct from an implicit-FTPS connection, which never goes through
    /// `AUTH` at all but is just as secured — handlers that need "is this
    /// control channel encrypted" should check both (`Connection` sets this
    /// for implicit connections too, at construction).
    pub tls_active: bool,
    pub vfs: Arc<dyn Vfs>,
    pub root_dir: PathBuf,
}

impl Session {
    pub fn new(vfs: Arc<dyn Vfs>, root_dir: PathBuf) -> Self {
        Session {
            auth: AuthState::Unauth,
            principal: None,
            cwd: "/".to_string(),
            representation: Representation::Ascii,
            protection: Protection::Clear,
            rest_offset: None,
            rename_from: None,
            pbsz_seen: false,
            utf8_enabled: false,
            tls_active: false,
            vfs,
            root_dir,
        }
    }

    /// REIN resets auth/session state but keeps the control channel open.
    pub fn reinitialize(&mut self) {
        self.auth = AuthState::Unauth;
        self.principal = None;
        self.cwd = "/".to_string();
        self.representation = Representation::Ascii;
        self.protection = Protection::Clear;
        self.rest_offset = None;
        self.rename_from = None;
        self.pbsz_seen = false;
    }

    /// Clears RNFR pending path; called after any command other than RNTO.
    pub fn clear_rename_pending(&mut self) {
        self.rename_from = None;
    }

    /// Clears the REST offset; called after the next STOR/RETR/APPE
    /// completes or fails.
    pub fn take_rest_offset(&mut self) -> u64 {
        self.rest_offset.take().unwrap_or(0)
    }
}

/// The minimum auth state a command requires before its handler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MinAuthLevel {
    /// Runs even when `Unauth` (USER, AUTH, QUIT, HELP, NOOP, FEAT...).
    None,
    /// Requires at least `UserGiven`/`NeedsAccount` (PASS, ACCT).
    UserGivenOrAbove,
    /// Requires `Authenticated`.
    Authenticated,
}

impl MinAuthLevel {
    pub fn satisfied_by(self, auth: &AuthState) -> bool {
        match self {
            MinAuthLevel::None => true,
            MinAuthLevel::UserGivenOrAbove => !matches!(auth, AuthState::Unauth),
            MinAuthLevel::Authenticated => matches!(auth, AuthState::Authenticated),
        }
    }
}
