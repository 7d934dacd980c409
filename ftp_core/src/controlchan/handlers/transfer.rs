//! RETR/STOR/APPE/LIST/NLST/MLSD/MLST/STOU, REST, ABOR: the data-transfer
//! commands. Every transfer opens its data channel inline (so PASV/PORT
//! mistakes surface as an immediate `425`/`450`), then hands the actual
//! streaming off to a spawned task so the control task can keep reading the
//! next line — in particular, ABOR — while bytes move, one additional task
//! per active data transfer. The spawned task itself writes the final
//! `226`/`426`/`550` reply through the shared control writer; the command
//! loop does not send a second reply for these verbs.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::controlchan::reply::{Reply, ReplyCode, ReplyWriter};
use crate::controlchan::session::MinAuthLevel;
use crate::datachan::DataChanManager;
use crate::error::DataChanError;
use crate::vfs::{EntryKind, Metadata, Vfs, WriteMode};

use super::{BoxedWriter, CommandHandler, CommandRegistry, ControlChanError, HandlerCtx};

pub fn register(r: &mut CommandRegistry) {
    r.register("RETR", std::sync::Arc::new(Retr));
    r.register("STOR", std::sync::Arc::new(Stor));
    r.register("APPE", std::sync::Arc::new(Appe));
    r.register("LIST", std::sync::Arc::new(List));
    r.register("NLST", std::sync::Arc::new(Nlst));
    r.register("MLSD", std::sync::Arc::new(Mlsd));
    r.register("MLST", std::sync::Arc::new(Mlst));
    r.register("STOU", std::sync::Arc::new(Stou));
    r.register("REST", std::sync::Arc::new(Rest));
    r.register("ABOR", std::sync::Arc::new(Abor));
}

/// Sends the final reply for a background transfer task, swallowing the
/// I/O error of an already-dead control connection (the connection's own
/// read loop will observe and tear it down).
async fn send_final(writer: &Arc<Mutex<ReplyWriter<BoxedWriter>>>, reply: Reply) {
    let _ = writer.lock().await.send(&reply).await;
}

fn final_reply_for(result: Result<u64, DataChanError>) -> Reply {
    match result {
        Ok(_) => Reply::new(ReplyCode::DataConnectionClosed, "Transfer complete."),
        Err(e) => e.as_reply(),
    }
}

struct Retr;

#[async_trait]
impl CommandHandler for Retr {
    fn min_auth(&self) -> MinAuthLevel {
        MinAuthLevel::Authenticated
    }

    async fn handle(&self, ctx: &mut HandlerCtx<'_>) -> Result<Option<Reply>, ControlChanError> {
        let (_, real) = match crate::vfs::resolve(&ctx.session.root_dir, &ctx.session.cwd, &ctx.argument) {
            Ok(v) => v,
            Err(e) => return Ok(Some(e.as_reply())),
        };
        let offset = ctx.session.take_rest_offset();
        let mut reader = match ctx.session.vfs.open_read(&real, offset).await {
            Ok(r) => r,
            Err(e) => return Ok(Some(e.as_reply())),
        };
        let mut channel = match ctx.datachan.open(ctx.session.protection).await {
            Ok(c) => c,
            Err(e) => return Ok(Some(e.as_reply())),
        };
        let transform = DataChanManager::representation_transform(ctx.session.representation);
        ctx.send_intermediate(&Reply::new(ReplyCode::FileStatusOkay, "Opening data connection for RETR.")).await?;

        let writer = Arc::clone(&ctx.control_writer);
        let task = tokio::spawn(async move {
            let result = channel.send_from_vfs(reader.as_mut(), transform).await;
            channel.close().await;
            send_final(&writer, final_reply_for(result)).await;
        });
        ctx.datachan.set_active_task(task);
        Ok(None)
    }
}

struct Stor;

#[async_trait]
impl CommandHandler for Stor {
    fn min_auth(&self) -> MinAuthLevel {
        MinAuthLevel::Authenticated
    }

    async fn handle(&self, ctx: &mut HandlerCtx<'_>) -> Result<Option<Reply>, ControlChanError> {
        store_common(ctx, WriteMode::Create).await
    }
}

struct Appe;

#[async_trait]
impl CommandHandler for Appe {
    fn min_auth(&self) -> MinAuthLevel {
        MinAuthLevel::Authenticated
    }

    async fn handle(&self, ctx: &mut HandlerCtx<'_>) -> Result<Option<Reply>, ControlChanError> {
        store_common(ctx, WriteMode::Append).await
    }
}

async fn store_common(ctx: &mut HandlerCtx<'_>, mode: WriteMode) -> Result<Option<Reply>, ControlChanError> {
    if !ctx.write_permitted() {
        return Ok(Some(Reply::new(ReplyCode::FileActionNotTaken, "Permission denied (read-only account).")));
    }
    let (_, real) = match crate::vfs::resolve(&ctx.session.root_dir, &ctx.session.cwd, &ctx.argument) {
        Ok(v) => v,
        Err(e) => return Ok(Some(e.as_reply())),
    };
    let offset = ctx.session.take_rest_offset();
    let writer = match ctx.session.vfs.open_write(&real, offset, mode).await {
        Ok(w) => w,
        Err(e) => return Ok(Some(e.as_reply())),
    };
    let mut channel = match ctx.datachan.open(ctx.session.protection).await {
        Ok(c) => c,
        Err(e) => return Ok(Some(e.as_reply())),
    };
    let transform = DataChanManager::representation_transform(ctx.session.representation);
    ctx.send_intermediate(&Reply::new(ReplyCode::FileStatusOkay, "Opening data connection for storage.")).await?;

    let reply_writer = Arc::clone(&ctx.control_writer);
    let task = tokio::spawn(async move {
        let result = channel.recv_to_vfs(writer, transform).await;
        channel.close().await;
        send_final(&reply_writer, final_reply_for(result)).await;
    });
    ctx.datachan.set_active_task(task);
    Ok(None)
}

struct Stou;

#[async_trait]
impl CommandHandler for Stou {
    fn min_auth(&self) -> MinAuthLevel {
        MinAuthLevel::Authenticated
    }

    async fn handle(&self, ctx: &mut HandlerCtx<'_>) -> Result<Option<Reply>, ControlChanError> {
        if !ctx.write_permitted() {
            return Ok(Some(Reply::new(ReplyCode::FileActionNotTaken, "Permission denied (read-only account).")));
        }
        let name = unique_name();
        let (virt, real) = match crate::vfs::resolve(&ctx.session.root_dir, &ctx.session.cwd, &name) {
            Ok(v) => v,
            Err(e) => return Ok(Some(e.as_reply())),
        };
        let writer = match ctx.session.vfs.open_write(&real, 0, WriteMode::Exclusive).await {
            Ok(w) => w,
            Err(e) => return Ok(Some(e.as_reply())),
        };
        let mut channel = match ctx.datachan.open(ctx.session.protection).await {
            Ok(c) => c,
            Err(e) => return Ok(Some(e.as_reply())),
        };
        let transform = DataChanManager::representation_transform(ctx.session.representation);
        ctx.send_intermediate(&Reply::new(ReplyCode::FileStatusOkay, format!("FILE: {virt}"))).await?;

        let reply_writer = Arc::clone(&ctx.control_writer);
        let task = tokio::spawn(async move {
            let result = channel.recv_to_vfs(writer, transform).await;
            channel.close().await;
            send_final(&reply_writer, final_reply_for(result)).await;
        });
        ctx.datachan.set_active_task(task);
        Ok(None)
    }
}

fn unique_name() -> String {
    use rand::Rng;
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let salt: u32 = rand::rng().random();
    format!("{nanos:x}-{salt:x}")
}

struct List;

#[async_trait]
impl CommandHandler for List {
    fn min_auth(&self) -> MinAuthLevel {
        MinAuthLevel::Authenticated
    }

    async fn handle(&self, ctx: &mut HandlerCtx<'_>) -> Result<Option<Reply>, ControlChanError> {
        listing_common(ctx, render_list_line).await
    }
}

struct Nlst;

#[async_trait]
impl CommandHandler for Nlst {
    fn min_auth(&self) -> MinAuthLevel {
        MinAuthLevel::Authenticated
    }

    async fn handle(&self, ctx: &mut HandlerCtx<'_>) -> Result<Option<Reply>, ControlChanError> {
        listing_common(ctx, |e, _| e.name.clone()).await
    }
}

struct Mlsd;

#[async_trait]
impl CommandHandler for Mlsd {
    fn min_auth(&self) -> MinAuthLevel {
        MinAuthLevel::Authenticated
    }

    async fn handle(&self, ctx: &mut HandlerCtx<'_>) -> Result<Option<Reply>, ControlChanError> {
        listing_common(ctx, render_mlsd_fact).await
    }
}

async fn listing_common(
    ctx: &mut HandlerCtx<'_>,
    render: impl Fn(&crate::vfs::DirEntryInfo, &Metadata) -> String + Send + 'static,
) -> Result<Option<Reply>, ControlChanError> {
    let target = if ctx.argument.is_empty() { ".".to_string() } else { ctx.argument.clone() };
    let (_, real) = match crate::vfs::resolve(&ctx.session.root_dir, &ctx.session.cwd, &target) {
        Ok(v) => v,
        Err(e) => return Ok(Some(e.as_reply())),
    };
    let entries = match ctx.session.vfs.list(&real).await {
        Ok(e) => e,
        Err(e) => return Ok(Some(e.as_reply())),
    };
    let mut channel = match ctx.datachan.open(ctx.session.protection).await {
        Ok(c) => c,
        Err(e) => return Ok(Some(e.as_reply())),
    };
    ctx.send_intermediate(&Reply::new(ReplyCode::FileStatusOkay, "Here comes the directory listing.")).await?;

    let reply_writer = Arc::clone(&ctx.control_writer);
    let task = tokio::spawn(async move {
        let mut body = String::new();
        for entry in &entries {
            let meta = Metadata { kind: entry.kind, size: entry.size, modified: entry.modified, permissions: default_permissions(entry.kind) };
            body.push_str(&render(entry, &meta));
            body.push_str("\r\n");
        }
        let result = channel.send_text(&body).await.map(|_| body.len() as u64);
        channel.close().await;
        send_final(&reply_writer, final_reply_for(result)).await;
    });
    ctx.datachan.set_active_task(task);
    Ok(None)
}

fn default_permissions(kind: EntryKind) -> String {
    match kind {
        EntryKind::Dir => "rwxr-xr-x".to_string(),
        EntryKind::File => "rw-r--r--".to_string(),
    }
}

fn render_list_line(entry: &crate::vfs::DirEntryInfo, meta: &Metadata) -> String {
    let kind_char = if entry.kind == EntryKind::Dir { 'd' } else { '-' };
    let dt = chrono::DateTime::<chrono::Utc>::from(meta.modified);
    format!(
        "{}{}  1 ftp ftp {:>13} {} {}",
        kind_char,
        meta.permissions,
        meta.size,
        dt.format("%b %d %H:%M"),
        entry.name
    )
}

fn render_mlsd_fact(entry: &crate::vfs::DirEntryInfo, meta: &Metadata) -> String {
    let type_fact = if entry.kind == EntryKind::Dir { "dir" } else { "file" };
    let dt = chrono::DateTime::<chrono::Utc>::from(meta.modified);
    format!("type={};size={};modify={}; {}", type_fact, meta.size, dt.format("%Y%m%d%H%M%S"), entry.name)
}

struct Mlst;

#[async_trait]
impl CommandHandler for Mlst {
    fn min_auth(&self) -> MinAuthLevel {
        MinAuthLevel::Authenticated
    }

    async fn respond(&self, ctx: &mut HandlerCtx<'_>) -> Result<Reply, ControlChanError> {
        let target = if ctx.argument.is_empty() { ctx.session.cwd.clone() } else { ctx.argument.clone() };
        let (virt, real) = match crate::vfs::resolve(&ctx.session.root_dir, &ctx.session.cwd, &target) {
            Ok(v) => v,
            Err(e) => return Ok(e.as_reply()),
        };
        let meta = match ctx.session.vfs.stat(&real).await {
            Ok(m) => m,
            Err(e) => return Ok(e.as_reply()),
        };
        let entry = crate::vfs::DirEntryInfo {
            name: virt,
            kind: meta.kind,
            size: meta.size,
            modified: meta.modified,
        };
        let fact = render_mlsd_fact(&entry, &meta);
        Ok(Reply::multiline(ReplyCode::DirectoryStatus, "Listing:", vec![fact], "End"))
    }
}

struct Rest;

#[async_trait]
impl CommandHandler for Rest {
    fn min_auth(&self) -> MinAuthLevel {
        MinAuthLevel::Authenticated
    }

    async fn respond(&self, ctx: &mut HandlerCtx<'_>) -> Result<Reply, ControlChanError> {
        match ctx.argument.trim().parse::<u64>() {
            Ok(offset) => {
                ctx.session.rest_offset = Some(offset);
                Ok(Reply::new(ReplyCode::FileActionPending, format!("Restarting at {offset}.")))
            }
            Err(_) => Ok(Reply::new(ReplyCode::SyntaxErrorInArguments, "REST requires a non-negative integer.")),
        }
    }
}

struct Abor;

#[async_trait]
impl CommandHandler for Abor {
    fn min_auth(&self) -> MinAuthLevel {
        MinAuthLevel::None
    }

    async fn respond(&self, ctx: &mut HandlerCtx<'_>) -> Result<Reply, ControlChanError> {
        if ctx.datachan.abort_active() {
            // The cancelled task sends its own `426` before returning; wait
            // for it so the 426-then-226 ordering holds.
            ctx.datachan.join_active().await;
        }
        Ok(Reply::new(ReplyCode::DataConnectionClosed, "ABOR command successful."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::DirEntryInfo;
    use std::time::SystemTime;

    #[test]
    fn mlsd_fact_has_type_and_size() {
        let entry = DirEntryInfo { name: "a.txt".into(), kind: EntryKind::File, size: 42, modified: SystemTime::UNIX_EPOCH };
        let meta = Metadata { kind: EntryKind::File, size: 42, modified: SystemTime::UNIX_EPOCH, permissions: "rw-r--r--".into() };
        let fact = render_mlsd_fact(&entry, &meta);
        assert!(fact.contains("type=file"));
        assert!(fact.contains("size=42"));
        assert!(fact.ends_with("a.txt"));
    }

    #[test]
    fn list_line_starts_with_kind_char() {
        let entry = DirEntryInfo { name: "d".into(), kind: EntryKind::Dir, size: 0, modified: SystemTime::UNIX_EPOCH };
        let meta = Metadata { kind: EntryKind::Dir, size: 0, modified: SystemTime::UNIX_EPOCH, permissions: "rwxr-xr-x".into() };
        assert!(render_list_line(&entry, &meta).starts_with('d'));
    }
}
