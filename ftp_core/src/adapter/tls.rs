//! The TLS adapter: wraps a raw duplex pipe with a `rustls` server-side TLS
//! session and exposes a cleartext duplex pipe to whatever sits above it in
//! the adapter chain.
//!
//! Implementation follows `tokio_rustls`'s standard `TlsAcceptor::accept`
//! acceptor pattern, spliced onto an in-process pipe instead of a bare
//! `TcpStream`. There is no synchronous fallback write: the handshake, the
//! receiver and the transmitter are all fully async.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

use crate::error::{ConfigError, ControlChanError};
use crate::pipe::PipeStream;

/// Loads a PEM-encoded certificate chain and private key and builds a
/// `rustls::ServerConfig` shared read-only by every connection.
pub fn load_server_tls_config(cert_path: &Path, key_path: &Path) -> Result<Arc<rustls::ServerConfig>, ConfigError> {
    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;

    Ok(Arc::new(config))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ConfigError> {
    let file = File::open(path).map_err(|e| ConfigError::CertFile { path: path.display().to_string(), source: e })?;
    let mut reader = BufReader::new(file);
    let certs: Vec<_> = rustls_pemfile::certs(&mut reader)
        .collect::<Result<_, _>>()
        .map_err(|e| ConfigError::CertFile { path: path.display().to_string(), source: e })?;
    if certs.is_empty() {
        return Err(ConfigError::NoKeyMaterial);
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, ConfigError> {
    let file = File::open(path).map_err(|e| ConfigError::KeyFile { path: path.display().to_string(), source: e })?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| ConfigError::KeyFile { path: path.display().to_string(), source: e })?
        .ok_or(ConfigError::NoKeyMaterial)
}

/// One direction's worker task handle plus a token to stop it.
struct HalfService {
    handle: JoinHandle<()>,
    stop: CancellationToken,
}

impl HalfService {
    async fn stop(self) {
        self.stop.cancel();
        let _ = self.handle.await;
    }
}

/// Splices a TLS session between a raw duplex stream (the socket side, or a
/// `PipeStream` standing in for it during a hot upgrade) and a cleartext
/// `PipeStream` the rest of the adapter chain reads/writes.
///
/// `R` is generic so the same adapter drives both cold-start implicit FTPS
/// (raw = `TcpStream`) and hot-upgrade explicit FTPS (raw = `PipeStream`
/// fed by the paused socket reader).
pub struct TlsAdapter<R> {
    acceptor: TlsAcceptor,
    raw: Option<R>,
    app_side: Option<PipeStream>,
    receiver: Option<HalfService>,
    transmitter: Option<HalfService>,
}

impl<R> TlsAdapter<R>
where
    R: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(tls_config: Arc<rustls::ServerConfig>, raw: R, app_side: PipeStream) -> Self {
        TlsAdapter {
            acceptor: TlsAcceptor::from(tls_config),
            raw: Some(raw),
            app_side: Some(app_side),
            receiver: None,
            transmitter: None,
        }
    }

    /// Performs the handshake and starts the receiver/transmitter tasks.
    /// Handshake failure is fatal for the adapter: the caller decides
    /// whether that means closing without a reply (implicit) or a 431/534
    /// (explicit upgrade).
    pub async fn start(&mut self) -> Result<(), ControlChanError> {
        let raw = self.raw.take().expect("TlsAdapter::start called twice");
        let tls_stream = self.acceptor.accept(raw).await?;
        let (mut tls_read, mut tls_write) = tokio::io::split(tls_stream);

        let app_side = self.app_side.take().expect("TlsAdapter::start called twice");
        let (mut app_reader, mut app_writer_for_recv) = app_side.into_split();

        let recv_stop = CancellationToken::new();
        let recv_stop_child = recv_stop.clone();
        let recv_handle = tokio::spawn(async move {
            let mut buf = [0u8; 16 * 1024];
            loop {
                tokio::select! {
                    biased;
                    _ = recv_stop_child.cancelled() => break,
                    read = tls_read.read(&mut buf) => {
                        match read {
                            Ok(0) | Err(_) => break,
                            Ok(n) => {
                                if app_writer_for_recv.write_all(&buf[..n]).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                }
            }
        });

        let xmit_stop = CancellationToken::new();
        let xmit_stop_child = xmit_stop.clone();
        let xmit_handle = tokio::spawn(async move {
            let mut buf = [0u8; 16 * 1024];
            loop {
                tokio::select! {
                    biased;
                    _ = xmit_stop_child.cancelled() => break,
                    read = app_reader.read(&mut buf) => {
                        match read {
                            Ok(0) | Err(_) => break,
                            Ok(n) => {
                                if tls_write.write_all(&buf[..n]).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                }
            }
            let _ = tls_write.shutdown().await;
        });

        self.receiver = Some(HalfService { handle: recv_handle, stop: recv_stop });
        self.transmitter = Some(HalfService { handle: xmit_handle, stop: xmit_stop });
        Ok(())
    }

    /// Stops both half-services concurrently, then flushes `close_notify`
    /// (done implicitly by the transmitter's shutdown above), then detaches
    /// without touching the raw stream (non-closing semantics).
    pub async fn stop(&mut self) {
        let recv = self.receiver.take();
        let xmit = self.transmitter.take();
        let (a, b) = tokio::join!(
            async { if let Some(r) = recv { r.stop().await } },
            async { if let Some(x) = xmit { x.stop().await } },
        );
        let _ = (a, b);
    }
}

/// Cold-start implicit FTPS: the adapter wraps a raw `TcpStream` directly,
/// no pipe-splicing pause/resume dance needed since the connection has not
/// produced any cleartext bytes yet.
pub type ImplicitTlsAdapter = TlsAdapter<tokio::net::TcpStream>;

#[async_trait::async_trait]
impl<R> super::Adapter for TlsAdapter<R>
where
    R: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn start(&mut self) -> Result<(), ControlChanError> {
        TlsAdapter::start(self).await
    }

    async fn stop(&mut self) {
        TlsAdapter::stop(self).await
    }
}
