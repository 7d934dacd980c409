//! The raw (non-TLS) adapter: a trivial passthrough that forwards bytes
//! unencrypted between the socket and the app-side pipe the parser reads
//! from. Exists so the adapter chain always starts life as a length-1 chain
//! of *something* implementing `Adapter`, and so an explicit `AUTH TLS`
//! upgrade has a well-defined "stop the current tail" step instead of
//! special-casing "no adapter yet".

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::ControlChanError;
use crate::pipe::PipeStream;

use super::Adapter;

/// Splits a `TcpStream` and forwards bytes both ways between it and an
/// app-side `PipeStream`. `stop` cancels the receiver (socket -> pipe)
/// first so no more bytes are pulled off the socket — the exact drain point
/// the TLS hot-upgrade protocol needs — then drains and stops the
/// transmitter.
pub struct RawAdapter {
    socket_read: Option<OwnedReadHalf>,
    socket_write: Option<OwnedWriteHalf>,
    app_side: Option<PipeStream>,
    receiver: Option<(JoinHandle<OwnedReadHalf>, CancellationToken)>,
    transmitter: Option<(JoinHandle<OwnedWriteHalf>, CancellationToken)>,
}

impl RawAdapter {
    pub fn new(socket: TcpStream, app_side: PipeStream) -> Self {
        let (read, write) = socket.into_split();
        RawAdapter {
            socket_read: Some(read),
            socket_write: Some(write),
            app_side: Some(app_side),
            receiver: None,
            transmitter: None,
        }
    }

    /// Cancels only the receiver half (socket -> pipe), leaving the
    /// transmitter running so queued outbound bytes (e.g. a `234` reply
    /// still draining) are not lost. This is the pause step of the hot
    /// upgrade protocol, distinct from `stop` which tears down both halves.
    pub fn pause_receiver(&self) {
        if let Some((_, stop)) = &self.receiver {
            stop.cancel();
        }
    }

    /// Reclaims the raw socket after both services have stopped, so the TLS
    /// adapter can take ownership of the same underlying `TcpStream`.
    /// Panics if called before `stop`.
    pub fn into_socket(mut self) -> TcpStream {
        let read = self.socket_read.take().expect("RawAdapter::stop must run before into_socket");
        let write = self.socket_write.take().expect("RawAdapter::stop must run before into_socket");
        read.reunite(write).expect("halves came from the same TcpStream")
    }
}

#[async_trait::async_trait]
impl Adapter for RawAdapter {
    async fn start(&mut self) -> Result<(), ControlChanError> {
        let mut socket_read = self.socket_read.take().expect("RawAdapter::start called twice");
        let mut socket_write = self.socket_write.take().expect("RawAdapter::start called twice");
        let app_side = self.app_side.take().expect("RawAdapter::start called twice");
        let (mut app_reader, mut app_writer) = app_side.into_split();

        let recv_stop = CancellationToken::new();
        let recv_stop_child = recv_stop.clone();
        let recv_handle = tokio::spawn(async move {
            let mut buf = [0u8; 16 * 1024];
            loop {
                tokio::select! {
                    biased;
                    _ = recv_stop_child.cancelled() => break,
                    read = socket_read.read(&mut buf) => {
                        match read {
                            Ok(0) | Err(_) => break,
                            Ok(n) => {
                                if app_writer.write_all(&buf[..n]).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                }
            }
            socket_read
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
                                if socket_write.write_all(&buf[..n]).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                }
            }
            socket_write
        });

        self.receiver = Some((recv_handle, recv_stop));
        self.transmitter = Some((xmit_handle, xmit_stop));
        Ok(())
    }

    async fn stop(&mut self) {
        self.pause_receiver();
        if let Some((handle, stop)) = self.transmitter.take() {
            stop.cancel();
            if let Ok(write) = handle.await {
                self.socket_write = Some(write);
            }
        }
        if let Some((handle, _)) = self.receiver.take() {
            if let Ok(read) = handle.await {
                self.socket_read = Some(read);
            }
        }
    }
}
