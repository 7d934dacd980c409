//! TYPE/STRU/MODE: representation and transfer-parameter negotiation. Only
//! `TYPE A`/`TYPE I` and `STRU F`/`MODE S` are meaningful in this runtime
//! (record/page structures and block/compressed modes are out of scope);
//! anything else is acknowledged as a no-op or rejected per RFC 959 §5.3.2's
//! guidance that unsupported-but-valid parameters get 504.

use async_trait::async_trait;

use crate::controlchan::reply::{Reply, ReplyCode};
use crate::controlchan::session::{MinAuthLevel, Representation};

use super::{CommandHandler, CommandRegistry, ControlChanError, HandlerCtx};

pub fn register(r: &mut CommandRegistry) {
    r.register("TYPE", std::sync::Arc::new(Type));
    r.register("STRU", std::sync::Arc::new(Stru));
    r.register("MODE", std::sync::Arc::new(Mode));
}

struct Type;

#[async_trait]
impl CommandHandler for Type {
    fn min_auth(&self) -> MinAuthLevel {
        MinAuthLevel::Authenticated
    }

    async fn respond(&self, ctx: &mut HandlerCtx<'_>) -> Result<Reply, ControlChanError> {
        let arg = ctx.argument.trim().to_ascii_uppercase();
        let first = arg.split_whitespace().next().unwrap_or("");
        match first {
            "A" => {
                ctx.session.representation = Representation::Ascii;
                Ok(Reply::new(ReplyCode::CommandOkay, "Switching to ASCII mode."))
            }
            "I" | "L" => {
                ctx.session.representation = Representation::Image;
                Ok(Reply::new(ReplyCode::CommandOkay, "Switching to Binary mode."))
            }
            _ => Ok(Reply::new(ReplyCode::CommandNotImplementedForParameter, "Type not supported.")),
        }
    }
}

struct Stru;

#[async_trait]
impl CommandHandler for Stru {
    fn min_auth(&self) -> MinAuthLevel {
        MinAuthLevel::Authenticated
    }

    async fn respond(&self, ctx: &mut HandlerCtx<'_>) -> Result<Reply, ControlChanError> {
        match ctx.argument.trim().to_ascii_uppercase().as_str() {
            "F" => Ok(Reply::new(ReplyCode::CommandOkay, "Structure set to F.")),
            _ => Ok(Reply::new(ReplyCode::CommandNotImplementedForParameter, "Only file structure is supported.")),
        }
    }
}

struct Mode;

#[async_trait]
impl CommandHandler for Mode {
    fn min_auth(&self) -> MinAuthLevel {
        MinAuthLevel::Authenticated
    }

    async fn respond(&self, ctx: &mut HandlerCtx<'_>) -> Result<Reply, ControlChanError> {
        match ctx.argument.trim().to_ascii_uppercase().as_str() {
            "S" => Ok(Reply::new(ReplyCode::CommandOkay, "Mode set to S.")),
            _ => Ok(Reply::new(ReplyCode::CommandNotImplementedForParameter, "Only stream mode is supported.")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_parses_a_and_i_case_insensitively() {
        assert_eq!("a".to_ascii_uppercase(), "A");
        assert_eq!("i".to_ascii_uppercase(), "I");
    }
}
