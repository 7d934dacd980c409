//! Command handlers: one per FTP verb, each producing a `Reply` and
//! optionally driving a data transfer or mutating session state.

pub mod auth;
pub mod dataconn;
pub mod fsops;
pub mod info;
pub mod tls;
pub mod transfer;
pub mod typeinfo;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::config::ServerConfig;
use crate::controlchan::reply::{Reply, ReplyWriter};
use crate::controlchan::session::{MinAuthLevel, Session};
use crate::datachan::DataChanManager;
use crate::error::ControlChanError;
use crate::membership::Authenticator;

/// Outbound half of the control connection's current adapter-chain tail.
/// Boxed because the concrete type changes across a TLS hot upgrade — the
/// `Connection` swaps what's behind the box, handlers never need to know.
pub type BoxedWriter = Box<dyn tokio::io::AsyncWrite + Send + Unpin>;

/// Shared so a transfer handler can send an intermediate `150` before
/// streaming and the command loop can still send the handler's returned
/// final reply through the same serialized sink: the writer serializes
/// access with a per-connection mutex held for the duration of one
/// response.
pub type SharedReplyWriter = Arc<Mutex<ReplyWriter<BoxedWriter>>>;

/// Everything a handler needs beyond its own verb and argument: mutable
/// session state, the data-channel manager, shared config, the
/// authenticator, and the control reply sink for handlers that must emit
/// more than one reply (RETR/STOR's `150`, ABOR's `426`).
pub struct HandlerCtx<'a> {
    pub session: &'a mut Session,
    pub argument: String,
    pub config: &'a ServerConfig,
    pub datachan: &'a mut DataChanManager,
    pub control_writer: SharedReplyWriter,
    pub authenticator: &'a dyn Authenticator,
}

impl<'a> HandlerCtx<'a> {
    pub async fn send_intermediate(&self, reply: &Reply) -> Result<(), ControlChanError> {
        self.control_writer.lock().await.send(reply).await
    }

    /// Whether the authenticated principal may perform a write (STOR/APPE/
    /// STOU/DELE/RNTO/MKD/RMD). An anonymous or otherwise read-only account
    /// answers `false`; an unauthenticated session never reaches these
    /// handlers at all since they require `MinAuthLevel::Authenticated`.
    pub fn write_permitted(&self) -> bool {
        self.session.principal.as_ref().is_some_and(|p| !p.read_only)
    }
}

#[async_trait]
pub trait CommandHandler: Send + Sync {
    fn min_auth(&self) -> MinAuthLevel;

    /// Returns the reply to send, or `None` when the handler has already
    /// written its own reply (or spawned a task that will) — used by the
    /// transfer handlers, which send `150` inline and hand final-reply
    /// duties to a background task so the control loop stays free to read
    /// `ABOR` mid-transfer. The default forwards to `respond`, which is what
    /// most handlers implement instead.
    async fn handle(&self, ctx: &mut HandlerCtx<'_>) -> Result<Option<Reply>, ControlChanError> {
        self.respond(ctx).await.map(Some)
    }

    /// Produces exactly one reply for a command that never needs to
    /// background its work. Handlers that override `handle` directly don't
    /// need to implement this.
    async fn respond(&self, _ctx: &mut HandlerCtx<'_>) -> Result<Reply, ControlChanError> {
        unreachable!("handler must override either handle() or respond()")
    }
}

/// verb -> handler lookup, populated at startup from the built-in table
/// (`default_registry`) and optionally merged with a caller-supplied
/// extension map — just a second `HashMap` merged on top, no dynamic
/// plugin loading.
pub struct CommandRegistry {
    handlers: std::collections::HashMap<String, Arc<dyn CommandHandler>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        CommandRegistry { handlers: std::collections::HashMap::new() }
    }

    pub fn register(&mut self, verb: &str, handler: Arc<dyn CommandHandler>) {
        self.handlers.insert(verb.to_ascii_uppercase(), handler);
    }

    /// Merges in caller-supplied handlers, overriding any built-in with the
    /// same verb.
    pub fn merge(&mut self, extra: std::collections::HashMap<String, Arc<dyn CommandHandler>>) {
        for (verb, handler) in extra {
            self.handlers.insert(verb.to_ascii_uppercase(), handler);
        }
    }

    pub fn get(&self, verb: &str) -> Option<Arc<dyn CommandHandler>> {
        self.handlers.get(verb).cloned()
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds the registry of built-in handlers.
pub fn default_registry() -> CommandRegistry {
    let mut r = CommandRegistry::new();

    auth::register(&mut r);
    fsops::register(&mut r);
    typeinfo::register(&mut r);
    dataconn::register(&mut r);
    transfer::register(&mut r);
    tls::register(&mut r);
    info::register(&mut r);

    r
}
