//! tokio-tungstenite transport
//!
//! Opens client WebSocket connections and exposes them as text sinks/streams.

use futures_util::future::{self, BoxFuture};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};
use url::Url;

use super::{BoxedSink, BoxedStream, Transport, TransportError};

/// Production transport backed by `tokio-tungstenite`
#[derive(Debug, Clone, Default)]
pub struct TungsteniteTransport;

impl TungsteniteTransport {
    /// Create a new transport
    pub fn new() -> Self {
        Self
    }
}

impl Transport for TungsteniteTransport {
    fn open(&self, url: Url) -> BoxFuture<'static, Result<(BoxedSink, BoxedStream), TransportError>> {
        Box::pin(async move {
            let (ws_stream, response) = connect_async(url.as_str()).await?;
            debug!("WebSocket handshake completed with status {}", response.status());

            let (ws_sender, ws_receiver) = ws_stream.split();

            let sink = ws_sender
                .sink_map_err(TransportError::from)
                .with(|text: String| future::ready(Ok::<_, TransportError>(Message::Text(text))));

            let stream = ws_receiver
                .take_while(|frame| future::ready(!matches!(frame, Ok(Message::Close(_)))))
                .filter_map(|frame| {
                    future::ready(match frame {
                        Ok(Message::Text(text)) => Some(Ok(text)),
                        Ok(Message::Binary(data)) => {
                            warn!("Received binary frame ({} bytes), ignoring", data.len());
                            None
                        }
                        // Ping replies are queued by tungstenite itself
                        Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => None,
                        Ok(Message::Close(_)) => None,
                        Err(e) => Some(Err(TransportError::from(e))),
                    })
                });

            let sink: BoxedSink = Box::pin(sink);
            let stream: BoxedStream = Box::pin(stream);
            Ok((sink, stream))
        })
    }
}
