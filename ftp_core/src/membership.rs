//! The membership/account provider contract and an in-memory implementation
//! (anonymous + a static user table) shipped for completeness, mirroring the
//! "one concrete backend" pairing `LocalFs` gets in `crate::vfs`.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Principal {
    pub username: String,
    pub home_dir: PathBuf,
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Success(Principal),
    NeedsAccount,
    Denied,
}

/// Off-the-control-task credential check: calls occur off the control task
/// since a backing store may be slow. Implementations should take roughly
/// constant time whether or not the user exists, so PASS on an unknown user
/// doesn't leak timing information to the extent the backing store permits.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, user: &str, password: &str) -> AuthOutcome;

    /// Whether this principal must also supply ACCT before PASS completes
    /// login. The session asks this, rather than the client declaring it
    /// unprompted.
    async fn requires_account(&self, _principal: &Principal) -> bool {
        false
    }
}

struct UserRecord {
    password: String,
    home_dir: PathBuf,
    read_only: bool,
}

/// A static user table plus an optional anonymous account, the shape most
/// FTP daemons ship as their zero-configuration default backend.
pub struct InMemoryAuthenticator {
    users: HashMap<String, UserRecord>,
    allow_anonymous: bool,
    anonymous_home: PathBuf,
}

impl InMemoryAuthenticator {
    pub fn new(anonymous_home: PathBuf, allow_anonymous: bool) -> Self {
        InMemoryAuthenticator {
            users: HashMap::new(),
            allow_anonymous,
            anonymous_home,
        }
    }

    pub fn add_user(&mut self, username: impl Into<String>, password: impl Into<String>, home_dir: PathBuf, read_only: bool) {
        self.users.insert(
            username.into(),
            UserRecord { password: password.into(), home_dir, read_only },
        );
    }
}

#[async_trait]
impl Authenticator for InMemoryAuthenticator {
    async fn authenticate(&self, user: &str, password: &str) -> AuthOutcome {
        if self.allow_anonymous && user.eq_ignore_ascii_case("anonymous") {
            return AuthOutcome::Success(Principal {
                username: "anonymous".to_string(),
                home_dir: self.anonymous_home.clone(),
                read_only: true,
            });
        }
        match self.users.get(user) {
            Some(record) if record.password == password => AuthOutcome::Success(Principal {
                username: user.to_string(),
                home_dir: record.home_dir.clone(),
                read_only: record.read_only,
            }),
            _ => AuthOutcome::Denied,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn anonymous_login_succeeds_when_enabled() {
        let auth = InMemoryAuthenticator::new(PathBuf::from("/srv/anon"), true);
        match auth.authenticate("anonymous", "x@y.com").await {
            AuthOutcome::Success(p) => assert_eq!(p.username, "anonymous"),
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_user_is_denied() {
        let auth = InMemoryAuthenticator::new(PathBuf::from("/srv/anon"), false);
        assert_eq!(auth.authenticate("nobody", "x").await, AuthOutcome::Denied);
    }

    #[tokio::test]
    async fn wrong_password_is_denied() {
        let mut auth = InMemoryAuthenticator::new(PathBuf::from("/srv/anon"), false);
        auth.add_user("alice", "secret", PathBuf::from("/srv/alice"), false);
        assert_eq!(auth.authenticate("alice", "wrong").await, AuthOutcome::Denied);
    }
}
