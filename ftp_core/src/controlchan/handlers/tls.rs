//! AUTH/PBSZ/PROT: RFC 2228/4217 security extensions. AUTH only negotiates
//! the reply here — the actual control-channel TLS handshake is an
//! adapter-chain swap the `Connection` performs after seeing this handler
//! return `234`; the swap itself is kept out of `CommandHandler` so its
//! signature stays a plain `Result<Reply, _>`.

use async_trait::async_trait;

use crate::controlchan::reply::{Reply, ReplyCode};
use crate::controlchan::session::{MinAuthLevel, Protection};

use super::{CommandHandler, CommandRegistry, ControlChanError, HandlerCtx};

pub fn register(r: &mut CommandRegistry) {
    r.register("AUTH", std::sync::Arc::new(Auth));
    r.register("PBSZ", std::sync::Arc::new(Pbsz));
    r.register("PROT", std::sync::Arc::new(Prot));
}

struct Auth;

#[async_trait]
impl CommandHandler for Auth {
    fn min_auth(&self) -> MinAuthLevel {
        MinAuthLevel::None
    }

    async fn respond(&self, ctx: &mut HandlerCtx<'_>) -> Result<Reply, ControlChanError> {
        if ctx.session.tls_active {
            return Ok(Reply::new(ReplyCode::BadCommandSequence, "Control channel is already secured."));
        }
        if !ctx.config.requires_tls() {
            return Ok(Reply::new(ReplyCode::CommandNotImplementedForParameter, "TLS is not configured on this server."));
        }
        match ctx.argument.trim().to_ascii_uppercase().as_str() {
            "TLS" | "TLS-C" | "SSL" => {
                Ok(Reply::new(ReplyCode::AuthProceed, "AUTH TLS successful, proceed with handshake."))
            }
            other => Ok(Reply::new(
                ReplyCode::CommandNotImplementedForParameter,
                format!("AUTH mechanism '{other}' is not supported."),
            )),
        }
    }
}

struct Pbsz;

#[async_trait]
impl CommandHandler for Pbsz {
    fn min_auth(&self) -> MinAuthLevel {
        MinAuthLevel::None
    }

    async fn respond(&self, ctx: &mut HandlerCtx<'_>) -> Result<Reply, ControlChanError> {
        // No protection-buffer negotiation over TLS (RFC 4217 §4); only "0"
        // is a valid size.
        if ctx.argument.trim() != "0" {
            return Ok(Reply::new(ReplyCode::SyntaxErrorInArguments, "PBSZ must be 0."));
        }
        ctx.session.pbsz_seen = true;
        Ok(Reply::new(ReplyCode::CommandOkay, "PBSZ=0"))
    }
}

struct Prot;

#[async_trait]
impl CommandHandler for Prot {
    fn min_auth(&self) -> MinAuthLevel {
        MinAuthLevel::None
    }

    async fn respond(&self, ctx: &mut HandlerCtx<'_>) -> Result<Reply, ControlChanError> {
        match ctx.argument.trim().to_ascii_uppercase().as_str() {
            "C" => {
                ctx.session.protection = Protection::Clear;
                Ok(Reply::new(ReplyCode::CommandOkay, "Protection set to Clear."))
            }
            "P" => {
                ctx.session.protection = Protection::Private;
                Ok(Reply::new(ReplyCode::CommandOkay, "Protection set to Private."))
            }
            _ => Ok(Reply::new(ReplyCode::ProtectionLevelDenied, "Only C and P are supported.")),
        }
    }
}
