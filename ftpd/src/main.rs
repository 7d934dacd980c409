//! The `ftpd` binary: parses CLI configuration, wires up the membership and
//! VFS backends, binds the control listener(s), and drives the accept loop.
//! All FTP protocol logic lives in `ftp_core`; this binary is only the
//! process-entry glue between configuration and the connection runtime.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use ftp_core::adapter::tls::load_server_tls_config;
use ftp_core::config::PassivePortRange;
use ftp_core::controlchan::handlers::{default_registry, CommandRegistry};
use ftp_core::error::ConfigError;
use ftp_core::membership::{Authenticator, InMemoryAuthenticator};
use ftp_core::vfs::{LocalFs, Vfs};
use ftp_core::{Connection, ServerConfig};

/// Command-line configuration for the FTP server. Every flag is also
/// settable via its `FTPD_*` environment variable (and, via `dotenvy`, a
/// `.env` file).
#[derive(Parser, Debug)]
#[clap(author, version, about = "A small FTP server.", long_about = None)]
struct Cli {
    /// Address the cleartext (or explicit-AUTH-TLS-capable) control listener binds.
    #[clap(long, env = "FTPD_BIND", default_value = "0.0.0.0:2121")]
    bind: SocketAddr,

    /// Address an implicit-FTPS control listener binds on, if given.
    #[clap(long, env = "FTPD_IMPLICIT_TLS_BIND")]
    implicit_tls_bind: Option<SocketAddr>,

    /// Inclusive PASV/EPSV port range, "START-END".
    #[clap(long, env = "FTPD_PASSIVE_PORTS", default_value = "50000-50100")]
    passive_ports: String,

    /// TLS certificate chain (PEM). Required for AUTH TLS and implicit FTPS.
    #[clap(long, env = "FTPD_CERT")]
    cert: Option<PathBuf>,

    /// TLS private key (PEM). Required for AUTH TLS and implicit FTPS.
    #[clap(long, env = "FTPD_KEY")]
    key: Option<PathBuf>,

    /// Root directory every session is chrooted into.
    #[clap(long, env = "FTPD_ROOT", default_value = "/srv/ftp")]
    root: PathBuf,

    /// Accept data connections from a peer other than the control connection's.
    #[clap(long, env = "FTPD_PROMISCUOUS")]
    promiscuous: bool,

    /// Seconds of control-channel inactivity before a 421 and disconnect.
    #[clap(long, env = "FTPD_IDLE_TIMEOUT", default_value_t = 300)]
    idle_timeout: u64,

    /// Offer and accept `OPTS UTF8 ON` (default representation stays ASCII).
    #[clap(long, env = "FTPD_UTF8")]
    utf8: bool,

    /// Seconds allowed for a PORT/EPRT peer to accept the data connection.
    #[clap(long, env = "FTPD_ACTIVE_CONNECT_TIMEOUT", default_value_t = 10)]
    active_connect_timeout: u64,

    /// Seconds allowed for a PASV/EPSV peer to connect.
    #[clap(long, env = "FTPD_PASSIVE_ACCEPT_TIMEOUT", default_value_t = 10)]
    passive_accept_timeout: u64,

    /// Seconds allowed for a TLS handshake (implicit or AUTH TLS) to complete.
    #[clap(long, env = "FTPD_TLS_HANDSHAKE_TIMEOUT", default_value_t = 10)]
    tls_handshake_timeout: u64,

    /// Text sent in the 220 greeting. Defaults to a message naming this host.
    #[clap(long, env = "FTPD_GREETING")]
    greeting: Option<String>,

    /// Allow the `anonymous` user, homed at --root.
    #[clap(long, env = "FTPD_ALLOW_ANONYMOUS")]
    allow_anonymous: bool,
}

fn parse_passive_ports(s: &str) -> Result<PassivePortRange, ConfigError> {
    let (start, end) = s
        .split_once('-')
        .ok_or(ConfigError::InvalidPassivePortRange(0, 0))?;
    let start: u16 = start
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidPassivePortRange(0, 0))?;
    let end: u16 = end
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidPassivePortRange(0, 0))?;
    PassivePortRange::new(start, end)
}

fn build_config(cli: &Cli, default_greeting: String) -> Result<ServerConfig, ConfigError> {
    let passive_ports = parse_passive_ports(&cli.passive_ports)?;

    match (&cli.cert, &cli.key) {
        (Some(_), None) | (None, Some(_)) => return Err(ConfigError::NoKeyMaterial),
        _ => {}
    }

    Ok(ServerConfig {
        control_bind: cli.bind,
        implicit_tls_bind: cli.implicit_tls_bind,
        passive_ports,
        passive_advertise_addr: None,
        cert_path: cli.cert.clone(),
        key_path: cli.key.clone(),
        root_dir: cli.root.clone(),
        promiscuous: cli.promiscuous,
        idle_timeout: Duration::from_secs(cli.idle_timeout),
        tls_handshake_timeout: Duration::from_secs(cli.tls_handshake_timeout),
        active_connect_timeout: Duration::from_secs(cli.active_connect_timeout),
        passive_accept_timeout: Duration::from_secs(cli.passive_accept_timeout),
        utf8_opt_in: cli.utf8,
        greeting: cli.greeting.clone().unwrap_or(default_greeting),
    })
}

fn setup_logging() {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("failed to install the global tracing subscriber");
}

#[allow(clippy::too_many_arguments)]
async fn accept_loop(
    listener: TcpListener,
    implicit: bool,
    config: Arc<ServerConfig>,
    authenticator: Arc<dyn Authenticator>,
    vfs: Arc<dyn Vfs>,
    registry: Arc<CommandRegistry>,
    tls_config: Option<Arc<rustls::ServerConfig>>,
    next_id: Arc<AtomicU64>,
    connections: Arc<Mutex<JoinSet<()>>>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((socket, peer)) => {
                        let id = next_id.fetch_add(1, Ordering::Relaxed);
                        let config = Arc::clone(&config);
                        let authenticator = Arc::clone(&authenticator);
                        let vfs = Arc::clone(&vfs);
                        let registry = Arc::clone(&registry);
                        let tls_config = tls_config.clone();
                        let conn_shutdown = shutdown.clone();
                        connections.lock().await.spawn(async move {
                            info!(connection_id = id, peer = %peer, implicit_tls = implicit, "accepted connection");
                            match Connection::accept(socket, id, config, authenticator, vfs, registry, tls_config, implicit).await {
                                Ok(conn) => conn.run(conn_shutdown).await,
                                Err(e) => error!(connection_id = id, error = %e, "failed to bring up connection"),
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "accept() failed"),
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    setup_logging();

    let cli = Cli::parse();

    let process_info = lib_common::get_process_info().ok();
    let default_greeting = match &process_info {
        Some(info) => format!("{} FTP server ready.", info.process_host),
        None => "ftpd ready.".to_string(),
    };
    if let Some(info) = &process_info {
        info!(%info, "starting");
    }

    let config = Arc::new(build_config(&cli, default_greeting).context("configuration error")?);

    let tls_config = if config.requires_tls() {
        Some(
            load_server_tls_config(config.cert_path.as_ref().unwrap(), config.key_path.as_ref().unwrap())
                .context("failed to load TLS certificate/key")?,
        )
    } else {
        if cli.implicit_tls_bind.is_some() {
            bail!("--implicit-tls-bind requires both --cert and --key");
        }
        None
    };

    let vfs: Arc<dyn Vfs> = Arc::new(LocalFs::new(config.root_dir.clone()));
    let authenticator: Arc<dyn Authenticator> = Arc::new(InMemoryAuthenticator::new(
        config.root_dir.clone(),
        cli.allow_anonymous,
    ));
    let registry = Arc::new(default_registry());

    let control_listener = TcpListener::bind(config.control_bind)
        .await
        .with_context(|| format!("failed to bind control listener on {}", config.control_bind))?;
    info!(addr = %control_listener.local_addr().unwrap(), "control channel listening");

    let implicit_listener = match config.implicit_tls_bind {
        Some(addr) => {
            let l = TcpListener::bind(addr)
                .await
                .with_context(|| format!("failed to bind implicit-TLS listener on {addr}"))?;
            info!(addr = %l.local_addr().unwrap(), "implicit FTPS listening");
            Some(l)
        }
        None => None,
    };

    let shutdown = CancellationToken::new();
    let next_id = Arc::new(AtomicU64::new(1));
    let connections: Arc<Mutex<JoinSet<()>>> = Arc::new(Mutex::new(JoinSet::new()));

    let mut listener_tasks = JoinSet::new();
    listener_tasks.spawn(accept_loop(
        control_listener,
        false,
        Arc::clone(&config),
        Arc::clone(&authenticator),
        Arc::clone(&vfs),
        Arc::clone(&registry),
        tls_config.clone(),
        Arc::clone(&next_id),
        Arc::clone(&connections),
        shutdown.clone(),
    ));
    if let Some(listener) = implicit_listener {
        listener_tasks.spawn(accept_loop(
            listener,
            true,
            Arc::clone(&config),
            Arc::clone(&authenticator),
            Arc::clone(&vfs),
            Arc::clone(&registry),
            tls_config.clone(),
            Arc::clone(&next_id),
            Arc::clone(&connections),
            shutdown.clone(),
        ));
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Ctrl-C received, shutting down"),
        Err(e) => warn!(error = %e, "failed to listen for Ctrl-C, shutting down anyway"),
    }
    shutdown.cancel();

    while listener_tasks.join_next().await.is_some() {}

    let mut connections = connections.lock().await;
    while connections.join_next().await.is_some() {}

    info!("all connections drained, exiting");
    Ok(())
}
