//! Wires the pipe/adapter chain, line parser, reply writer, command
//! registry, middleware chain, session and data-channel manager into the
//! per-connection task. One `Connection` is spawned per accepted socket;
//! `run` drives it until QUIT, a fatal error, or shutdown.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, instrument};

use crate::adapter::{Adapter, ImplicitTlsAdapter, RawAdapter, TlsAdapter};
use crate::config::ServerConfig;
use crate::controlchan::handlers::{BoxedWriter, CommandHandler, CommandRegistry, HandlerCtx, SharedReplyWriter};
use crate::controlchan::middleware::{Context as MiddlewareContext, Middleware, NextFn};
use crate::controlchan::parser::{CommandRequest, LineParser};
use crate::controlchan::reply::{Reply, ReplyCode, ReplyWriter};
use crate::controlchan::session::Session;
use crate::datachan::DataChanManager;
use crate::error::ControlChanError;
use crate::membership::Authenticator;
use crate::pipe::{PipeReader, pipe_stream_pair};
use crate::vfs::Vfs;

/// Chunk of a read-ahead line plus a raw duplex, so bytes that arrived in
/// the same `read()` as `AUTH TLS\r\n` are handed to the TLS handshake
/// instead of silently dropped. The hot upgrade must not buffer past the
/// handshake boundary, which cuts both ways — it must not lose bytes that
/// genuinely arrived before the boundary either.
struct LeftoverPrefixed<R> {
    leftover: Bytes,
    inner: R,
}

impl<R> LeftoverPrefixed<R> {
    fn new(leftover: Vec<u8>, inner: R) -> Self {
        LeftoverPrefixed { leftover: Bytes::from(leftover), inner }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for LeftoverPrefixed<R> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut TaskContext<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.leftover.is_empty() {
            let n = std::cmp::min(buf.remaining(), this.leftover.len());
            let chunk = this.leftover.split_to(n);
            buf.put_slice(&chunk);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<R: AsyncWrite + Unpin> AsyncWrite for LeftoverPrefixed<R> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut TaskContext<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// Longest command line accepted before a `500`.
const MAX_COMMAND_LINE: usize = 8 * 1024;
/// Chunk capacity of every pipe hop; matches the 16 KiB read buffers the
/// raw/TLS adapters already use.
const PIPE_CAPACITY: usize = 64;

/// Whichever adapter currently forwards bytes between the socket and the
/// app-side pipe the parser/writer read from. `Raw` is kept as its concrete
/// type so the explicit-TLS upgrade can reclaim the underlying `TcpStream`
/// (`RawAdapter::into_socket`); once secured there is nothing left to
/// reclaim, so `Secured` only needs the object-safe `Adapter` surface.
enum ActiveAdapter {
    Raw(RawAdapter),
    Secured(Box<dyn Adapter>),
}

impl ActiveAdapter {
    async fn stop(&mut self) {
        match self {
            ActiveAdapter::Raw(r) => r.stop().await,
            ActiveAdapter::Secured(a) => a.stop().await,
        }
    }
}

/// One accepted control connection: owns the session, the data-channel
/// manager, the adapter chain, and the command dispatch loop.
pub struct Connection {
    id: u64,
    peer_addr: SocketAddr,
    config: Arc<ServerConfig>,
    authenticator: Arc<dyn Authenticator>,
    tls_config: Option<Arc<rustls::ServerConfig>>,
    registry: Arc<CommandRegistry>,
    middlewares: Vec<Arc<dyn Middleware>>,
    session: Session,
    datachan: DataChanManager,
    parser: LineParser<PipeReader>,
    control_writer: SharedReplyWriter,
    adapter: Option<ActiveAdapter>,
    /// Set once an explicit-TLS upgrade fails after the `234` reply was
    /// already flushed — there is no meaningful cleartext channel left to
    /// fall back to (see `perform_tls_upgrade`'s doc comment), so the
    /// connection tears down without attempting further replies.
    fatal: bool,
}

impl Connection {
    /// Accepts one socket and brings its adapter chain, pipe plumbing,
    /// parser/writer and session up. `implicit` selects the cold-start
    /// implicit-FTPS path: the whole connection is TLS from the first byte,
    /// no `AUTH` command involved.
    #[allow(clippy::too_many_arguments)]
    pub async fn accept(
        socket: TcpStream,
        id: u64,
        config: Arc<ServerConfig>,
        authenticator: Arc<dyn Authenticator>,
        vfs: Arc<dyn Vfs>,
        registry: Arc<CommandRegistry>,
        tls_config: Option<Arc<rustls::ServerConfig>>,
        implicit: bool,
    ) -> Result<Self, ControlChanError> {
        let peer_addr = socket.peer_addr()?;
        let (near, far) = pipe_stream_pair(PIPE_CAPACITY);

        let mut tls_active_from_start = false;
        let adapter = if implicit {
            let cfg = tls_config.clone().expect("implicit FTPS listener requires a loaded tls_config");
            let mut tls = ImplicitTlsAdapter::new(cfg, socket, near);
            tokio::time::timeout(config.tls_handshake_timeout, tls.start())
                .await
                .map_err(|_| ControlChanError::TlsHandshakeTimeout)??;
            tls_active_from_start = true;
            ActiveAdapter::Secured(Box::new(tls))
        } else {
            let mut raw = RawAdapter::new(socket, near);
            raw.start().await?;
            ActiveAdapter::Raw(raw)
        };

        let (reader, writer) = far.into_split();
        let parser = LineParser::new(reader, MAX_COMMAND_LINE);
        let control_writer: SharedReplyWriter =
            Arc::new(Mutex::new(ReplyWriter::new(Box::new(writer) as BoxedWriter)));

        let root_dir = config.root_dir.clone();
        let mut session = Session::new(vfs, root_dir);
        session.tls_active = tls_active_from_start;

        let datachan = DataChanManager::new(
            peer_addr,
            config.promiscuous,
            config.active_connect_timeout,
            config.passive_accept_timeout,
            tls_config.clone(),
        );

        Ok(Connection {
            id,
            peer_addr,
            config,
            authenticator,
            tls_config,
            registry,
            middlewares: vec![Arc::new(crate::controlchan::middleware::AuthGate)],
            session,
            datachan,
            parser,
            control_writer,
            adapter: Some(adapter),
            fatal: false,
        })
    }

    async fn send_reply(&self, reply: &Reply) -> Result<(), ControlChanError> {
        self.control_writer.lock().await.send(reply).await
    }

    /// Drives the command loop until QUIT, a fatal error, idle timeout, or
    /// `shutdown` fires, then tears the connection down.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let span = tracing::info_span!("connection", id = self.id, peer = %self.peer_addr);
        self.run_inner(shutdown).instrument(span).await;
    }

    #[instrument(skip_all)]
    async fn run_inner(&mut self, shutdown: CancellationToken) {
        let greeting = Reply::new(ReplyCode::ServiceReady, self.config.greeting.clone());
        if self.send_reply(&greeting).await.is_err() {
            return;
        }

        loop {
            if self.fatal {
                break;
            }

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                outcome = tokio::time::timeout(self.config.idle_timeout, self.parser.next_command()) => {
                    match outcome {
                        Err(_elapsed) => {
                            let _ = self.send_reply(&Reply::new(ReplyCode::ServiceNotAvailable, "Idle timeout, closing control connection.")).await;
                            break;
                        }
                        Ok(Err(protocol_err)) => {
                            let _ = self.send_reply(&protocol_err.as_reply()).await;
                        }
                        Ok(Ok(None)) => break,
                        Ok(Ok(Some(request))) => {
                            if !self.dispatch(request).await {
                                break;
                            }
                        }
                    }
                }
            }
        }

        self.teardown().await;
    }

    /// Runs one command through the middleware chain and its handler.
    /// Returns `false` when the connection should be torn down (QUIT, a
    /// fatal error, or an explicit-TLS handshake that failed after the
    /// `234` reply was sent).
    async fn dispatch(&mut self, request: CommandRequest) -> bool {
        let verb = request.verb.clone();
        let handler = match self.registry.get(&verb) {
            Some(h) => h,
            None => {
                let _ = self
                    .send_reply(&Reply::new(ReplyCode::SyntaxError, format!("'{verb}' not understood.")))
                    .await;
                return true;
            }
        };

        let min_auth = handler.min_auth();
        let config: &ServerConfig = self.config.as_ref();
        let authenticator: &dyn Authenticator = self.authenticator.as_ref();
        let control_writer = Arc::clone(&self.control_writer);
        let datachan = &mut self.datachan;

        let chain = build_chain(&self.middlewares, handler, config, datachan, control_writer, authenticator);
        let ctx = MiddlewareContext { session: &mut self.session, argument: request.argument, min_auth };
        let outcome = chain(ctx).await;

        if verb != "RNTO" && verb != "RNFR" {
            self.session.clear_rename_pending();
        }

        match outcome {
            Ok(Some(reply)) => {
                let is_auth_tls = verb == "AUTH" && reply.code() == ReplyCode::AuthProceed;
                let is_quit = verb == "QUIT";
                if self.send_reply(&reply).await.is_err() {
                    return false;
                }
                if is_auth_tls {
                    self.perform_tls_upgrade().await;
                    if self.fatal {
                        return false;
                    }
                }
                !is_quit
            }
            Ok(None) => true,
            Err(e) => {
                if e.is_fatal() {
                    false
                } else {
                    let _ = self.send_reply(&e.as_reply()).await;
                    true
                }
            }
        }
    }

    /// Performs the explicit-TLS hot upgrade: pause and stop the raw
    /// receiver, reclaim the socket, splice a `TlsAdapter` directly onto it
    /// (carrying forward any bytes already buffered past the `AUTH TLS\r\n`
    /// line), and rebind the parser/writer to its cleartext app-side pipe.
    ///
    /// A handshake failure here cannot be downgraded back to "cleartext
    /// control channel, client may retry": by the time `rustls` reports
    /// failure, the client has already started sending TLS-framed bytes
    /// into what was the cleartext channel, and the `234` reply promising
    /// the upgrade has already gone out. There is no byte-accurate way back
    /// to a cleartext conversation at that point, so this is treated as
    /// connection-fatal (`self.fatal`) instead — the same bucket reserved
    /// for I/O-level failures.
    async fn perform_tls_upgrade(&mut self) {
        let Some(tls_config) = self.tls_config.clone() else {
            // Auth::respond already checked config.requires_tls(); this is
            // unreachable in practice, kept as a defensive no-op.
            return;
        };

        let adapter = self.adapter.take().expect("adapter is always present between commands");
        let mut raw = match adapter {
            ActiveAdapter::Raw(r) => r,
            secured @ ActiveAdapter::Secured(_) => {
                // Session::tls_active guards against a second AUTH TLS
                // succeeding once secured; this arm only exists so the match
                // is exhaustive.
                self.adapter = Some(secured);
                return;
            }
        };

        raw.pause_receiver();
        raw.stop().await;
        let tcp = raw.into_socket();

        let leftover = self.parser.take_leftover();
        let raw_stream = LeftoverPrefixed::new(leftover, tcp);

        let (near, far) = pipe_stream_pair(PIPE_CAPACITY);
        let mut tls = TlsAdapter::new(tls_config, raw_stream, near);

        let handshake = tokio::time::timeout(self.config.tls_handshake_timeout, tls.start()).await;
        match handshake {
            Ok(Ok(())) => {
                let (reader, writer) = far.into_split();
                self.parser = LineParser::new(reader, MAX_COMMAND_LINE);
                self.control_writer.lock().await.set_inner(Box::new(writer));
                self.session.tls_active = true;
                self.adapter = Some(ActiveAdapter::Secured(Box::new(tls)));
            }
            Ok(Err(e)) => {
                tracing::warn!(connection_id = self.id, error = %e, "explicit TLS handshake failed after 234; tearing down");
                self.fatal = true;
                self.adapter = None;
            }
            Err(_elapsed) => {
                tracing::warn!(connection_id = self.id, "explicit TLS handshake timed out after 234; tearing down");
                self.fatal = true;
                self.adapter = None;
            }
        }
    }

    async fn teardown(&mut self) {
        self.datachan.abort_active();
        self.datachan.join_active().await;
        if let Some(mut adapter) = self.adapter.take() {
            adapter.stop().await;
        }
    }
}

/// Builds the fixed `(context, next) -> Response` middleware chain ending
/// in `handler`, outermost middleware first.
fn build_chain<'a>(
    middlewares: &'a [Arc<dyn Middleware>],
    handler: Arc<dyn CommandHandler>,
    config: &'a ServerConfig,
    datachan: &'a mut DataChanManager,
    control_writer: SharedReplyWriter,
    authenticator: &'a dyn Authenticator,
) -> NextFn<'a> {
    let mut next: NextFn<'a> = Box::new(move |ctx: MiddlewareContext<'a>| {
        Box::pin(async move {
            let mut hctx = HandlerCtx {
                session: ctx.session,
                argument: ctx.argument,
                config,
                datachan,
                control_writer,
                authenticator,
            };
            handler.handle(&mut hctx).await
        })
    });

    for mw in middlewares.iter().rev() {
        let mw = Arc::clone(mw);
        let inner = next;
        next = Box::new(move |ctx: MiddlewareContext<'a>| Box::pin(async move { mw.handle(ctx, inner).await }));
    }

    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::InMemoryAuthenticator;
    use crate::vfs::LocalFs;
    use std::path::PathBuf;
    use std::time::Duration as StdDuration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn test_config(root: PathBuf) -> Arc<ServerConfig> {
        Arc::new(ServerConfig {
            control_bind: "127.0.0.1:0".parse().unwrap(),
            implicit_tls_bind: None,
            passive_ports: crate::config::PassivePortRange::new(50000, 50100).unwrap(),
            passive_advertise_addr: None,
            cert_path: None,
            key_path: None,
            root_dir: root,
            promiscuous: true,
            idle_timeout: StdDuration::from_secs(30),
            tls_handshake_timeout: StdDuration::from_secs(10),
            active_connect_timeout: StdDuration::from_secs(10),
            passive_accept_timeout: StdDuration::from_secs(10),
            utf8_opt_in: false,
            greeting: "test server ready".to_string(),
        })
    }

    #[tokio::test]
    async fn greeting_is_sent_on_connect_and_quit_closes_the_loop() {
        let dir = tempfile::tempdir().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let config = test_config(dir.path().to_path_buf());
        let authenticator: Arc<dyn Authenticator> = Arc::new(InMemoryAuthenticator::new(dir.path().to_path_buf(), true));
        let vfs: Arc<dyn Vfs> = Arc::new(LocalFs::new(dir.path().to_path_buf()));
        let registry = Arc::new(crate::controlchan::handlers::default_registry());

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let conn = Connection::accept(socket, 1, config, authenticator, vfs, registry, None, false)
                .await
                .unwrap();
            conn.run(CancellationToken::new()).await;
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 256];
        let n = client.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).starts_with("220"));

        client.write_all(b"QUIT\r\n").await.unwrap();
        let n = client.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).starts_with("221"));

        // Control connection should now be closed from the server side.
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);

        server.await.unwrap();
    }

    #[tokio::test]
    async fn unauthenticated_retr_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let config = test_config(dir.path().to_path_buf());
        let authenticator: Arc<dyn Authenticator> = Arc::new(InMemoryAuthenticator::new(dir.path().to_path_buf(), true));
        let vfs: Arc<dyn Vfs> = Arc::new(LocalFs::new(dir.path().to_path_buf()));
        let registry = Arc::new(crate::controlchan::handlers::default_registry());

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let conn = Connection::accept(socket, 2, config, authenticator, vfs, registry, None, false)
                .await
                .unwrap();
            conn.run(CancellationToken::new()).await;
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 256];
        let _ = client.read(&mut buf).await.unwrap(); // greeting

        client.write_all(b"RETR foo\r\n").await.unwrap();
        let n = client.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).starts_with("530"));

        client.write_all(b"QUIT\r\n").await.unwrap();
        let _ = client.read(&mut buf).await.unwrap();
        drop(client);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn rnfr_pending_path_clears_after_an_unrelated_command() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hi").unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let config = test_config(dir.path().to_path_buf());
        let mut auth = InMemoryAuthenticator::new(dir.path().to_path_buf(), false);
        auth.add_user("alice", "secret", dir.path().to_path_buf(), false);
        let authenticator: Arc<dyn Authenticator> = Arc::new(auth);
        let vfs: Arc<dyn Vfs> = Arc::new(LocalFs::new(dir.path().to_path_buf()));
        let registry = Arc::new(crate::controlchan::handlers::default_registry());

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let conn = Connection::accept(socket, 3, config, authenticator, vfs, registry, None, false)
                .await
                .unwrap();
            conn.run(CancellationToken::new()).await;
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 512];
        let _ = client.read(&mut buf).await.unwrap(); // greeting

        client.write_all(b"USER alice\r\n").await.unwrap();
        let _ = client.read(&mut buf).await.unwrap();
        client.write_all(b"PASS secret\r\n").await.unwrap();
        let n = client.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).starts_with("230"));

        client.write_all(b"RNFR a.txt\r\n").await.unwrap();
        let n = client.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).starts_with("350"));

        // An unrelated command in between should clear the pending rename.
        client.write_all(b"PWD\r\n").await.unwrap();
        let _ = client.read(&mut buf).await.unwrap();

        client.write_all(b"RNTO b.txt\r\n").await.unwrap();
        let n = client.read(&mut buf).await.unwrap();
        // 503 Bad command sequence: RNTO with no pending RNFR.
        assert!(String::from_utf8_lossy(&buf[..n]).starts_with("503"));

        client.write_all(b"QUIT\r\n").await.unwrap();
        let _ = client.read(&mut buf).await.unwrap();
        drop(client);
        server.await.unwrap();
    }
}
