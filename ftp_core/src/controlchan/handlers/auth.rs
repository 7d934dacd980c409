//! USER/PASS/ACCT/REIN/QUIT: drives the auth state machine.

use async_trait::async_trait;

use crate::controlchan::reply::{Reply, ReplyCode};
use crate::controlchan::session::{AuthState, MinAuthLevel};
use crate::membership::AuthOutcome;

use super::{CommandHandler, CommandRegistry, HandlerCtx};

pub fn register(r: &mut CommandRegistry) {
    r.register("USER", std::sync::Arc::new(User));
    r.register("PASS", std::sync::Arc::new(Pass));
    r.register("ACCT", std::sync::Arc::new(Acct));
    r.register("REIN", std::sync::Arc::new(Rein));
    r.register("QUIT", std::sync::Arc::new(Quit));
}

struct User;

#[async_trait]
impl CommandHandler for User {
    fn min_auth(&self) -> MinAuthLevel {
        MinAuthLevel::None
    }

    async fn respond(&self, ctx: &mut HandlerCtx<'_>) -> Result<Reply, super::ControlChanError> {
        if ctx.argument.is_empty() {
            return Ok(Reply::new(ReplyCode::SyntaxErrorInArguments, "USER requires a username."));
        }
        ctx.session.auth = AuthState::UserGiven(ctx.argument.clone());
        Ok(Reply::new(ReplyCode::NeedPassword, "Please specify the password."))
    }
}

struct Pass;

#[async_trait]
impl CommandHandler for Pass {
    fn min_auth(&self) -> MinAuthLevel {
        MinAuthLevel::UserGivenOrAbove
    }

    async fn respond(&self, ctx: &mut HandlerCtx<'_>) -> Result<Reply, super::ControlChanError> {
        let user = match &ctx.session.auth {
            AuthState::UserGiven(u) => u.clone(),
            _ => return Ok(Reply::new(ReplyCode::BadCommandSequence, "Login with USER first.")),
        };

        // The provider call happens off the control task by virtue of being
        // an ordinary `await` on a task-pooled/async backend.
        match ctx.authenticator.authenticate(&user, &ctx.argument).await {
            AuthOutcome::Success(principal) => {
                if ctx.authenticator.requires_account(&principal).await {
                    ctx.session.auth = AuthState::NeedsAccount(user);
                    ctx.session.principal = Some(principal);
                    Ok(Reply::new(ReplyCode::NeedAccount, "Need account for login."))
                } else {
                    ctx.session.root_dir = principal.home_dir.clone();
                    ctx.session.cwd = "/".to_string();
                    ctx.session.principal = Some(principal);
                    ctx.session.auth = AuthState::Authenticated;
                    Ok(Reply::new(ReplyCode::UserLoggedIn, "Login successful."))
                }
            }
            AuthOutcome::NeedsAccount => {
                ctx.session.auth = AuthState::NeedsAccount(user);
                Ok(Reply::new(ReplyCode::NeedAccount, "Need account for login."))
            }
            AuthOutcome::Denied => {
                ctx.session.auth = AuthState::Unauth;
                Ok(Reply::new(ReplyCode::NotLoggedIn, "Login incorrect."))
            }
        }
    }
}

struct Acct;

#[async_trait]
impl CommandHandler for Acct {
    fn min_auth(&self) -> MinAuthLevel {
        MinAuthLevel::UserGivenOrAbove
    }

    async fn respond(&self, ctx: &mut HandlerCtx<'_>) -> Result<Reply, super::ControlChanError> {
        match &ctx.session.auth {
            AuthState::NeedsAccount(_) => {
                let principal = ctx.session.principal.clone().expect("NeedsAccount implies a principal was stored");
                ctx.session.root_dir = principal.home_dir.clone();
                ctx.session.cwd = "/".to_string();
                ctx.session.auth = AuthState::Authenticated;
                Ok(Reply::new(ReplyCode::UserLoggedIn, "Login successful."))
            }
            // ACCT is accepted and ignored once already authenticated and no
            // account was required.
            _ => Ok(Reply::new(ReplyCode::CommandOkay, "ACCT command ignored.")),
        }
    }
}

struct Rein;

#[async_trait]
impl CommandHandler for Rein {
    fn min_auth(&self) -> MinAuthLevel {
        MinAuthLevel::None
    }

    async fn respond(&self, ctx: &mut HandlerCtx<'_>) -> Result<Reply, super::ControlChanError> {
        ctx.session.reinitialize();
        Ok(Reply::new(ReplyCode::ServiceReady, "Ready for new user."))
    }
}

struct Quit;

#[async_trait]
impl CommandHandler for Quit {
    fn min_auth(&self) -> MinAuthLevel {
        MinAuthLevel::None
    }

    async fn respond(&self, _ctx: &mut HandlerCtx<'_>) -> Result<Reply, super::ControlChanError> {
        Ok(Reply::new(ReplyCode::ClosingControlConnection, "Goodbye."))
    }
}
