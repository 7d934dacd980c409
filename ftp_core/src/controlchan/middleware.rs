//! Command middleware: a fixed, ordered chain each command passes through
//! before its handler runs. Middlewares may short-circuit (the auth
//! gatekeeper), wrap the call, or mutate the context.

use async_trait::async_trait;

use super::reply::{Reply, ReplyCode};
use super::session::Session;
use crate::error::ControlChanError;

/// Per-command context handed down the middleware chain and finally to the
/// handler. Borrows the session mutably, so responses stay serialized in
/// request order — enforced by the control task owning this for the whole
/// chain traversal.
pub struct Context<'a> {
    pub session: &'a mut Session,
    pub argument: String,
    pub min_auth: super::session::MinAuthLevel,
}

/// `None` means the handler at the end of the chain has already taken care
/// of its own reply (a backgrounded transfer) — see
/// `CommandHandler::handle`'s doc comment. Middlewares that short-circuit
/// always produce `Some`.
pub type NextFn<'a> =
    Box<dyn FnOnce(Context<'a>) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Option<Reply>, ControlChanError>> + Send + 'a>> + Send + 'a>;

#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle<'a>(&self, ctx: Context<'a>, next: NextFn<'a>) -> Result<Option<Reply>, ControlChanError>;
}

/// Rejects commands whose declared `min_auth` is not satisfied by the
/// session's current auth state, replying `530` otherwise.
pub struct AuthGate;

#[async_trait]
impl Middleware for AuthGate {
    async fn handle<'a>(&self, ctx: Context<'a>, next: NextFn<'a>) -> Result<Option<Reply>, ControlChanError> {
        if !ctx.min_auth.satisfied_by(&ctx.session.auth) {
            return Ok(Some(Reply::new(ReplyCode::NotLoggedIn, "Please login with USER and PASS.")));
        }
        next(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::LocalFs;
    use std::sync::Arc;

    #[tokio::test]
    async fn auth_gate_rejects_unauthenticated() {
        let mut session = Session::new(Arc::new(LocalFs::new("/tmp".into())), "/tmp".into());
        let ctx = Context {
            session: &mut session,
            argument: String::new(),
            min_auth: super::super::session::MinAuthLevel::Authenticated,
        };
        let next: NextFn = Box::new(|_ctx| Box::pin(async { Ok(Some(Reply::new(ReplyCode::CommandOkay, "ok"))) }));
        let reply = AuthGate.handle(ctx, next).await.unwrap().unwrap();
        assert_eq!(reply.code(), ReplyCode::NotLoggedIn);
    }

    #[tokio::test]
    async fn auth_gate_passes_through_when_satisfied() {
        let mut session = Session::new(Arc::new(LocalFs::new("/tmp".into())), "/tmp".into());
        session.auth = super::super::session::AuthState::Authenticated;
        let ctx = Context {
            session: &mut session,
            argument: String::new(),
            min_auth: super::super::session::MinAuthLevel::Authenticated,
        };
        let next: NextFn = Box::new(|_ctx| Box::pin(async { Ok(Some(Reply::new(ReplyCode::CommandOkay, "ok"))) }));
        let reply = AuthGate.handle(ctx, next).await.unwrap().unwrap();
        assert_eq!(reply.code(), ReplyCode::CommandOkay);
    }
}
