//! The connection-adapter chain: an ordered stack of duplex transformers
//! between the raw socket and the command parser, today either length 1
//! (raw passthrough) or 2 (raw + TLS after an upgrade).

pub mod raw;
pub mod tls;

use async_trait::async_trait;

use crate::error::ControlChanError;

/// A duplex transformer spliced into the control-channel pipeline.
///
/// `start`/`stop` bracket the adapter's lifetime; `stop` must drain any
/// in-flight writes before returning. Non-closing semantics: an adapter
/// never closes the stream underneath it, only the owning `Connection` does
/// that.
#[async_trait]
pub trait Adapter: Send + Sync {
    async fn start(&mut self) -> Result<(), ControlChanError>;
    async fn stop(&mut self);
}

pub use raw::RawAdapter;
pub use tls::{ImplicitTlsAdapter, TlsAdapter};
