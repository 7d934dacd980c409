//! FEAT/OPTS/HELP/NOOP/SYST: stateless informational commands.

use async_trait::async_trait;

use crate::controlchan::reply::{Reply, ReplyCode};
use crate::controlchan::session::MinAuthLevel;

use super::{CommandHandler, CommandRegistry, ControlChanError, HandlerCtx};

pub fn register(r: &mut CommandRegistry) {
    r.register("FEAT", std::sync::Arc::new(Feat));
    r.register("OPTS", std::sync::Arc::new(Opts));
    r.register("HELP", std::sync::Arc::new(Help));
    r.register("NOOP", std::sync::Arc::new(Noop));
    r.register("SYST", std::sync::Arc::new(Syst));
}

struct Feat;

#[async_trait]
impl CommandHandler for Feat {
    fn min_auth(&self) -> MinAuthLevel {
        MinAuthLevel::None
    }

    async fn respond(&self, ctx: &mut HandlerCtx<'_>) -> Result<Reply, ControlChanError> {
        let mut features = vec![
            "PASV".to_string(),
            "EPSV".to_string(),
            "REST STREAM".to_string(),
            "MDTM".to_string(),
            "SIZE".to_string(),
            "MLST type*;size*;modify*;perm*;".to_string(),
            "AUTH TLS".to_string(),
            "PBSZ".to_string(),
            "PROT".to_string(),
        ];
        if ctx.config.utf8_opt_in {
            features.push("UTF8".to_string());
        }
        Ok(Reply::multiline(ReplyCode::SystemStatus, "Features:", features, "End"))
    }
}

struct Opts;

#[async_trait]
impl CommandHandler for Opts {
    fn min_auth(&self) -> MinAuthLevel {
        MinAuthLevel::None
    }

    async fn respond(&self, ctx: &mut HandlerCtx<'_>) -> Result<Reply, ControlChanError> {
        let mut parts = ctx.argument.trim().splitn(2, ' ');
        let option = parts.next().unwrap_or("").to_ascii_uppercase();
        let value = parts.next().unwrap_or("").trim().to_ascii_uppercase();
        match option.as_str() {
            "UTF8" if ctx.config.utf8_opt_in => match value.as_str() {
                "ON" | "" => {
                    ctx.session.utf8_enabled = true;
                    Ok(Reply::new(ReplyCode::CommandOkay, "UTF8 enabled."))
                }
                "OFF" => {
                    ctx.session.utf8_enabled = false;
                    Ok(Reply::new(ReplyCode::CommandOkay, "UTF8 disabled."))
                }
                _ => Ok(Reply::new(ReplyCode::SyntaxErrorInArguments, "Usage: OPTS UTF8 ON|OFF.")),
            },
            "UTF8" => Ok(Reply::new(ReplyCode::CommandNotImplementedForParameter, "UTF8 is not enabled on this server.")),
            _ => Ok(Reply::new(ReplyCode::CommandNotImplementedForParameter, "Unrecognized OPTS option.")),
        }
    }
}

struct Help;

#[async_trait]
impl CommandHandler for Help {
    fn min_auth(&self) -> MinAuthLevel {
        MinAuthLevel::None
    }

    async fn respond(&self, _ctx: &mut HandlerCtx<'_>) -> Result<Reply, ControlChanError> {
        Ok(Reply::new(ReplyCode::HelpMessage, "Help not implemented beyond FEAT."))
    }
}

struct Noop;

#[async_trait]
impl CommandHandler for Noop {
    fn min_auth(&self) -> MinAuthLevel {
        MinAuthLevel::None
    }

    async fn respond(&self, _ctx: &mut HandlerCtx<'_>) -> Result<Reply, ControlChanError> {
        Ok(Reply::new(ReplyCode::CommandOkay, "NOOP ok."))
    }
}

struct Syst;

#[async_trait]
impl CommandHandler for Syst {
    fn min_auth(&self) -> MinAuthLevel {
        MinAuthLevel::None
    }

    async fn respond(&self, _ctx: &mut HandlerCtx<'_>) -> Result<Reply, ControlChanError> {
        Ok(Reply::new(ReplyCode::SystemType, "UNIX Type: L8"))
    }
}
