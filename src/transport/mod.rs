//! Transport boundary
//!
//! The connection controller only needs to open a full-duplex text channel to a URL.
//! Everything socket-specific lives behind the [`Transport`] trait so tests can swap in
//! an in-memory implementation.

use std::pin::Pin;

use futures_util::future::BoxFuture;
use futures_util::{Sink, Stream};
use thiserror::Error;
use url::Url;

#[cfg(test)]
pub mod mock;
mod tungstenite;

pub use self::tungstenite::TungsteniteTransport;

/// Errors raised by a transport implementation
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Transport closed")]
    Closed,
}

/// Outbound half of an open transport, accepting text frames
pub type BoxedSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;

/// Inbound half of an open transport, yielding text frames until the peer closes
pub type BoxedStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// Something that can open a bidirectional text channel to an endpoint
pub trait Transport: Send + Sync + 'static {
    /// Open a connection to `url`
    ///
    /// Resolves once the handshake completes. The returned stream ending is the
    /// transport's close event.
    fn open(&self, url: Url) -> BoxFuture<'static, Result<(BoxedSink, BoxedStream), TransportError>>;
}
