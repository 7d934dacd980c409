//! The data-connection manager: builds a data socket per the session's
//! current data-mode, applies the session's TLS protection level, and
//! streams bytes with representation-dependent transformation starting at
//! the REST offset.

pub mod listener;
pub mod stream;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::controlchan::session::{Protection, Representation};
use crate::error::DataChanError;

pub use stream::DataChannel;

enum PendingMode {
    Active(SocketAddr),
    Passive(TcpListener),
}

/// Owns, per connection, whatever is needed to honor the *next* data
/// transfer: either a dial target (PORT/EPRT) or an already-bound listener
/// (PASV/EPSV). Exactly one transfer is ever in flight at a time, so this
/// holds at most one `PendingMode` and at most one active transfer's
/// cancellation token.
pub struct DataChanManager {
    control_peer: SocketAddr,
    promiscuous: bool,
    active_connect_timeout: Duration,
    passive_accept_timeout: Duration,
    tls_config: Option<Arc<rustls::ServerConfig>>,
    pending: Option<PendingMode>,
    active_transfer: Option<CancellationToken>,
    /// The spawned transfer task, if one is in flight; ABOR awaits this after
    /// cancelling the token so the data-channel-close/426/226 ordering holds
    /// without the control task blocking on the transfer itself.
    active_task: Option<tokio::task::JoinHandle<()>>,
}

impl DataChanManager {
    pub fn new(
        control_peer: SocketAddr,
        promiscuous: bool,
        active_connect_timeout: Duration,
        passive_accept_timeout: Duration,
        tls_config: Option<Arc<rustls::ServerConfig>>,
    ) -> Self {
        DataChanManager {
            control_peer,
            promiscuous,
            active_connect_timeout,
            passive_accept_timeout,
            tls_config,
            pending: None,
            active_transfer: None,
            active_task: None,
        }
    }

    /// PORT/EPRT: record the client-advertised endpoint to dial when the
    /// next transfer command opens the channel.
    pub fn set_active(&mut self, addr: SocketAddr) {
        self.pending = Some(PendingMode::Active(addr));
    }

    /// PASV/EPSV: bind a listener now (within the caller-selected port) and
    /// keep it until the next transfer command accepts on it or a new
    /// PASV/EPSV/PORT/EPRT replaces it.
    pub async fn bind_passive(&mut self, bind_ip: std::net::IpAddr, port: u16) -> Result<SocketAddr, DataChanError> {
        let listener = TcpListener::bind((bind_ip, port)).await?;
        let local = listener.local_addr()?;
        self.pending = Some(PendingMode::Passive(listener));
        Ok(local)
    }

    /// Opens the data socket for the upcoming transfer: dial (active, with
    /// connect timeout -> 425) or accept (passive, with accept timeout ->
    /// 425; reject the wrong peer when not promiscuous), then wrap with TLS
    /// if `protection` is `Private`, reusing the control connection's
    /// certificate in server mode (session resumption falls out for free
    /// since every connection shares the same `Arc<rustls::ServerConfig>`).
    pub async fn open(&mut self, protection: Protection) -> Result<DataChannel, DataChanError> {
        // A previous transfer's task may have already finished on its own
        // (no intervening ABOR); drop its bookkeeping so a later ABOR for
        // *this* transfer doesn't mistake it for one still in flight.
        if self.active_task.as_ref().is_some_and(|t| t.is_finished()) {
            self.active_task = None;
            self.active_transfer = None;
        }

        let pending = self.pending.take().ok_or(DataChanError::NotEstablished)?;
        let tcp = match pending {
            PendingMode::Active(addr) => {
                tokio::time::timeout(self.active_connect_timeout, TcpStream::connect(addr))
                    .await
                    .map_err(|_| DataChanError::ActiveConnectTimeout)??
            }
            PendingMode::Passive(listener) => loop {
                let (stream, peer) = tokio::time::timeout(self.passive_accept_timeout, listener.accept())
                    .await
                    .map_err(|_| DataChanError::PassiveAcceptTimeout)??;
                if !self.promiscuous && peer.ip() != self.control_peer.ip() {
                    drop(stream);
                    return Err(DataChanError::UnexpectedPeer);
                }
                break stream;
            },
        };

        let abort = CancellationToken::new();
        self.active_transfer = Some(abort.clone());

        match (protection, &self.tls_config) {
            (Protection::Private, Some(tls_config)) => {
                let acceptor = tokio_rustls::TlsAcceptor::from(Arc::clone(tls_config));
                let tls = acceptor.accept(tcp).await?;
                Ok(DataChannel::new_tls(tls, abort))
            }
            _ => Ok(DataChannel::new_plain(tcp, abort)),
        }
    }

    /// ABOR: cancel the in-flight transfer's scoped token only, leaving the
    /// control connection's own shutdown token untouched. Returns whether a
    /// transfer was actually active. No-op if no transfer is active.
    pub fn abort_active(&mut self) -> bool {
        match self.active_transfer.take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Remembers the task driving the current transfer so ABOR can wait for
    /// it to observe cancellation and send its own `426` before the command
    /// loop sends the final `226`.
    pub fn set_active_task(&mut self, task: tokio::task::JoinHandle<()>) {
        self.active_task = Some(task);
    }

    /// Awaits the current transfer task, if any, so its reply has already
    /// been written before the caller sends its own.
    pub async fn join_active(&mut self) {
        if let Some(task) = self.active_task.take() {
            let _ = task.await;
        }
    }

    pub fn representation_transform(representation: Representation) -> stream::Transform {
        match representation {
            Representation::Ascii => stream::Transform::Ascii,
            Representation::Image => stream::Transform::Image,
        }
    }
}

