//! CWD/CDUP/PWD/MKD/RMD/DELE/RNFR/RNTO/SIZE/MDTM/STAT: path-touching
//! commands. Every path argument is resolved against the session's chroot
//! root via `crate::vfs::resolve` before reaching the VFS, so escape-above-
//! root always fails before any `Vfs` call is made.

use async_trait::async_trait;

use crate::controlchan::reply::{Reply, ReplyCode};
use crate::controlchan::session::MinAuthLevel;
use crate::vfs::{resolve, EntryKind};

use super::{CommandHandler, CommandRegistry, ControlChanError, HandlerCtx};

pub fn register(r: &mut CommandRegistry) {
    r.register("CWD", std::sync::Arc::new(Cwd));
    r.register("XCWD", std::sync::Arc::new(Cwd));
    r.register("CDUP", std::sync::Arc::new(Cdup));
    r.register("XCUP", std::sync::Arc::new(Cdup));
    r.register("PWD", std::sync::Arc::new(Pwd));
    r.register("XPWD", std::sync::Arc::new(Pwd));
    r.register("MKD", std::sync::Arc::new(Mkd));
    r.register("XMKD", std::sync::Arc::new(Mkd));
    r.register("RMD", std::sync::Arc::new(Rmd));
    r.register("XRMD", std::sync::Arc::new(Rmd));
    r.register("DELE", std::sync::Arc::new(Dele));
    r.register("RNFR", std::sync::Arc::new(Rnfr));
    r.register("RNTO", std::sync::Arc::new(Rnto));
    r.register("SIZE", std::sync::Arc::new(Size));
    r.register("MDTM", std::sync::Arc::new(Mdtm));
    r.register("STAT", std::sync::Arc::new(Stat));
}

fn quote_path(p: &str) -> String {
    format!("\"{}\"", p.replace('"', "\"\""))
}

struct Cwd;

#[async_trait]
impl CommandHandler for Cwd {
    fn min_auth(&self) -> MinAuthLevel {
        MinAuthLevel::Authenticated
    }

    async fn respond(&self, ctx: &mut HandlerCtx<'_>) -> Result<Reply, ControlChanError> {
        let (virt, real) = match resolve(&ctx.session.root_dir, &ctx.session.cwd, &ctx.argument) {
            Ok(v) => v,
            Err(e) => return Ok(e.as_reply()),
        };
        match ctx.session.vfs.stat(&real).await {
            Ok(meta) if meta.kind == EntryKind::Dir => {
                ctx.session.cwd = virt;
                Ok(Reply::new(ReplyCode::FileActionOkay, "Directory successfully changed."))
            }
            Ok(_) => Ok(Reply::new(ReplyCode::FileActionNotTaken, "Not a directory.")),
            Err(e) => Ok(e.as_reply()),
        }
    }
}

struct Cdup;

#[async_trait]
impl CommandHandler for Cdup {
    fn min_auth(&self) -> MinAuthLevel {
        MinAuthLevel::Authenticated
    }

    async fn respond(&self, ctx: &mut HandlerCtx<'_>) -> Result<Reply, ControlChanError> {
        let (virt, real) = match resolve(&ctx.session.root_dir, &ctx.session.cwd, "..") {
            Ok(v) => v,
            Err(e) => return Ok(e.as_reply()),
        };
        match ctx.session.vfs.stat(&real).await {
            Ok(_) => {
                ctx.session.cwd = virt;
                Ok(Reply::new(ReplyCode::FileActionOkay, "Directory successfully changed."))
            }
            Err(e) => Ok(e.as_reply()),
        }
    }
}

struct Pwd;

#[async_trait]
impl CommandHandler for Pwd {
    fn min_auth(&self) -> MinAuthLevel {
        MinAuthLevel::Authenticated
    }

    async fn respond(&self, ctx: &mut HandlerCtx<'_>) -> Result<Reply, ControlChanError> {
        Ok(Reply::new(ReplyCode::PathCreated, format!("{} is the current directory.", quote_path(&ctx.session.cwd))))
    }
}

struct Mkd;

#[async_trait]
impl CommandHandler for Mkd {
    fn min_auth(&self) -> MinAuthLevel {
        MinAuthLevel::Authenticated
    }

    async fn respond(&self, ctx: &mut HandlerCtx<'_>) -> Result<Reply, ControlChanError> {
        if !ctx.write_permitted() {
            return Ok(Reply::new(ReplyCode::FileActionNotTaken, "Permission denied (read-only account)."));
        }
        let (virt, real) = match resolve(&ctx.session.root_dir, &ctx.session.cwd, &ctx.argument) {
            Ok(v) => v,
            Err(e) => return Ok(e.as_reply()),
        };
        match ctx.session.vfs.mkdir(&real).await {
            Ok(()) => Ok(Reply::new(ReplyCode::PathCreated, format!("{} created.", quote_path(&virt)))),
            Err(e) => Ok(e.as_reply()),
        }
    }
}

struct Rmd;

#[async_trait]
impl CommandHandler for Rmd {
    fn min_auth(&self) -> MinAuthLevel {
        MinAuthLevel::Authenticated
    }

    async fn respond(&self, ctx: &mut HandlerCtx<'_>) -> Result<Reply, ControlChanError> {
        if !ctx.write_permitted() {
            return Ok(Reply::new(ReplyCode::FileActionNotTaken, "Permission denied (read-only account)."));
        }
        let (_, real) = match resolve(&ctx.session.root_dir, &ctx.session.cwd, &ctx.argument) {
            Ok(v) => v,
            Err(e) => return Ok(e.as_reply()),
        };
        match ctx.session.vfs.rmdir(&real).await {
            Ok(()) => Ok(Reply::new(ReplyCode::FileActionOkay, "Directory removed.")),
            Err(e) => Ok(e.as_reply()),
        }
    }
}

struct Dele;

#[async_trait]
impl CommandHandler for Dele {
    fn min_auth(&self) -> MinAuthLevel {
        MinAuthLevel::Authenticated
    }

    async fn respond(&self, ctx: &mut HandlerCtx<'_>) -> Result<Reply, ControlChanError> {
        if !ctx.write_permitted() {
            return Ok(Reply::new(ReplyCode::FileActionNotTaken, "Permission denied (read-only account)."));
        }
        let (_, real) = match resolve(&ctx.session.root_dir, &ctx.session.cwd, &ctx.argument) {
            Ok(v) => v,
            Err(e) => return Ok(e.as_reply()),
        };
        match ctx.session.vfs.delete(&real).await {
            Ok(()) => Ok(Reply::new(ReplyCode::FileActionOkay, "File deleted.")),
            Err(e) => Ok(e.as_reply()),
        }
    }
}

struct Rnfr;

#[async_trait]
impl CommandHandler for Rnfr {
    fn min_auth(&self) -> MinAuthLevel {
        MinAuthLevel::Authenticated
    }

    async fn respond(&self, ctx: &mut HandlerCtx<'_>) -> Result<Reply, ControlChanError> {
        let (virt, real) = match resolve(&ctx.session.root_dir, &ctx.session.cwd, &ctx.argument) {
            Ok(v) => v,
            Err(e) => return Ok(e.as_reply()),
        };
        match ctx.session.vfs.stat(&real).await {
            Ok(_) => {
                ctx.session.rename_from = Some(virt);
                Ok(Reply::new(ReplyCode::FileActionPending, "Ready for RNTO."))
            }
            Err(e) => Ok(e.as_reply()),
        }
    }
}

struct Rnto;

#[async_trait]
impl CommandHandler for Rnto {
    fn min_auth(&self) -> MinAuthLevel {
        MinAuthLevel::Authenticated
    }

    async fn respond(&self, ctx: &mut HandlerCtx<'_>) -> Result<Reply, ControlChanError> {
        if !ctx.write_permitted() {
            ctx.session.rename_from = None;
            return Ok(Reply::new(ReplyCode::FileActionNotTaken, "Permission denied (read-only account)."));
        }
        let from_virt = match ctx.session.rename_from.take() {
            Some(p) => p,
            None => return Ok(Reply::new(ReplyCode::BadCommandSequence, "RNFR required first.")),
        };
        let (_, from_real) = match resolve(&ctx.session.root_dir, "/", &from_virt) {
            Ok(v) => v,
            Err(e) => return Ok(e.as_reply()),
        };
        let (_, to_real) = match resolve(&ctx.session.root_dir, &ctx.session.cwd, &ctx.argument) {
            Ok(v) => v,
            Err(e) => return Ok(e.as_reply()),
        };
        match ctx.session.vfs.rename(&from_real, &to_real).await {
            Ok(()) => Ok(Reply::new(ReplyCode::FileActionOkay, "Rename successful.")),
            Err(e) => Ok(e.as_reply()),
        }
    }
}

struct Size;

#[async_trait]
impl CommandHandler for Size {
    fn min_auth(&self) -> MinAuthLevel {
        MinAuthLevel::Authenticated
    }

    async fn respond(&self, ctx: &mut HandlerCtx<'_>) -> Result<Reply, ControlChanError> {
        let (_, real) = match resolve(&ctx.session.root_dir, &ctx.session.cwd, &ctx.argument) {
            Ok(v) => v,
            Err(e) => return Ok(e.as_reply()),
        };
        match ctx.session.vfs.stat(&real).await {
            Ok(meta) if meta.kind == EntryKind::File => Ok(Reply::new(ReplyCode::FileStatus, meta.size.to_string())),
            Ok(_) => Ok(Reply::new(ReplyCode::FileActionNotTaken, "Not a plain file.")),
            Err(e) => Ok(e.as_reply()),
        }
    }
}

struct Mdtm;

#[async_trait]
impl CommandHandler for Mdtm {
    fn min_auth(&self) -> MinAuthLevel {
        MinAuthLevel::Authenticated
    }

    async fn respond(&self, ctx: &mut HandlerCtx<'_>) -> Result<Reply, ControlChanError> {
        let (_, real) = match resolve(&ctx.session.root_dir, &ctx.session.cwd, &ctx.argument) {
            Ok(v) => v,
            Err(e) => return Ok(e.as_reply()),
        };
        match ctx.session.vfs.stat(&real).await {
            Ok(meta) => Ok(Reply::new(ReplyCode::FileStatus, format_mdtm(meta.modified))),
            Err(e) => Ok(e.as_reply()),
        }
    }
}

fn format_mdtm(t: std::time::SystemTime) -> String {
    let duration = t.duration_since(std::time::UNIX_EPOCH).unwrap_or_default();
    let dt = chrono::DateTime::<chrono::Utc>::from(std::time::UNIX_EPOCH + duration);
    dt.format("%Y%m%d%H%M%S").to_string()
}

struct Stat;

#[async_trait]
impl CommandHandler for Stat {
    fn min_auth(&self) -> MinAuthLevel {
        MinAuthLevel::Authenticated
    }

    async fn respond(&self, ctx: &mut HandlerCtx<'_>) -> Result<Reply, ControlChanError> {
        if ctx.argument.is_empty() {
            return Ok(Reply::multiline(
                ReplyCode::SystemStatus,
                "FTP server status:",
                vec![format!("Logged in, cwd={}", ctx.session.cwd)],
                "End of status.",
            ));
        }
        let (_, real) = match resolve(&ctx.session.root_dir, &ctx.session.cwd, &ctx.argument) {
            Ok(v) => v,
            Err(e) => return Ok(e.as_reply()),
        };
        match ctx.session.vfs.stat(&real).await {
            Ok(meta) if meta.kind == EntryKind::Dir => match ctx.session.vfs.list(&real).await {
                Ok(entries) => {
                    let body: Vec<String> = entries.iter().map(|e| e.name.clone()).collect();
                    Ok(Reply::multiline(ReplyCode::DirectoryStatus, "Status follows:", body, "End of status."))
                }
                Err(e) => Ok(e.as_reply()),
            },
            Ok(meta) => Ok(Reply::new(ReplyCode::FileStatus, meta.size.to_string())),
            Err(e) => Ok(e.as_reply()),
        }
    }
}
