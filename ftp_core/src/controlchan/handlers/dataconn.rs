//! PORT/EPRT/PASV/EPSV: configure the session's data-connection mode.

use async_trait::async_trait;

use crate::controlchan::reply::{Reply, ReplyCode};
use crate::controlchan::session::MinAuthLevel;
use crate::datachan::listener::{format_epsv_reply, format_pasv_reply, parse_eprt, parse_port};

use super::{CommandHandler, CommandRegistry, ControlChanError, HandlerCtx};

pub fn register(r: &mut CommandRegistry) {
    r.register("PORT", std::sync::Arc::new(Port));
    r.register("EPRT", std::sync::Arc::new(Eprt));
    r.register("PASV", std::sync::Arc::new(Pasv));
    r.register("EPSV", std::sync::Arc::new(Epsv));
}

struct Port;

#[async_trait]
impl CommandHandler for Port {
    fn min_auth(&self) -> MinAuthLevel {
        MinAuthLevel::Authenticated
    }

    async fn respond(&self, ctx: &mut HandlerCtx<'_>) -> Result<Reply, ControlChanError> {
        match parse_port(&ctx.argument) {
            Ok(addr) => {
                ctx.datachan.set_active(addr);
                Ok(Reply::new(ReplyCode::CommandOkay, "PORT command successful."))
            }
            Err(_) => Ok(Reply::new(ReplyCode::SyntaxErrorInArguments, "Illegal PORT command.")),
        }
    }
}

struct Eprt;

#[async_trait]
impl CommandHandler for Eprt {
    fn min_auth(&self) -> MinAuthLevel {
        MinAuthLevel::Authenticated
    }

    async fn respond(&self, ctx: &mut HandlerCtx<'_>) -> Result<Reply, ControlChanError> {
        match parse_eprt(&ctx.argument) {
            Ok(addr) => {
                ctx.datachan.set_active(addr);
                Ok(Reply::new(ReplyCode::CommandOkay, "EPRT command successful."))
            }
            Err(_) => Ok(Reply::new(ReplyCode::SyntaxErrorInArguments, "Illegal EPRT command.")),
        }
    }
}

struct Pasv;

#[async_trait]
impl CommandHandler for Pasv {
    fn min_auth(&self) -> MinAuthLevel {
        MinAuthLevel::Authenticated
    }

    async fn respond(&self, ctx: &mut HandlerCtx<'_>) -> Result<Reply, ControlChanError> {
        let bind_ip = ctx.config.control_bind.ip();
        match bind_passive_in_range(ctx).await {
            Ok(local) => {
                let advertise = ctx.config.passive_advertise_addr.unwrap_or(bind_ip);
                let advertise_v4 = match advertise {
                    std::net::IpAddr::V4(v4) => v4,
                    std::net::IpAddr::V6(_) => std::net::Ipv4Addr::UNSPECIFIED,
                };
                Ok(Reply::new(ReplyCode::EnteringPassiveMode, format_pasv_reply(advertise_v4, local.port())))
            }
            Err(_) => Ok(Reply::new(ReplyCode::CantOpenDataConnection, "Can't open passive connection.")),
        }
    }
}

struct Epsv;

#[async_trait]
impl CommandHandler for Epsv {
    fn min_auth(&self) -> MinAuthLevel {
        MinAuthLevel::Authenticated
    }

    async fn respond(&self, ctx: &mut HandlerCtx<'_>) -> Result<Reply, ControlChanError> {
        match bind_passive_in_range(ctx).await {
            Ok(local) => Ok(Reply::new(ReplyCode::EnteringExtendedPassiveMode, format_epsv_reply(local.port()))),
            Err(_) => Ok(Reply::new(ReplyCode::CantOpenDataConnection, "Can't open passive connection.")),
        }
    }
}

/// Tries each port in the configured passive range until one binds.
async fn bind_passive_in_range(ctx: &mut HandlerCtx<'_>) -> Result<std::net::SocketAddr, crate::error::DataChanError> {
    let bind_ip = ctx.config.control_bind.ip();
    let range = ctx.config.passive_ports;
    let mut last_err = None;
    for port in range.start..=range.end {
        match ctx.datachan.bind_passive(bind_ip, port).await {
            Ok(addr) => return Ok(addr),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or(crate::error::DataChanError::ActiveConnectTimeout))
}
