//! In-memory transport for driving the controller deterministically in tests.

use futures_util::future::BoxFuture;
use futures_util::{sink, stream};
use tokio::sync::{mpsc, oneshot};
use url::Url;

use super::{BoxedSink, BoxedStream, Transport, TransportError};

/// Transport whose connections are handed to a [`MockServer`]
#[derive(Clone)]
pub struct MockTransport {
    pending_tx: mpsc::UnboundedSender<MockConnection>,
}

/// Test-side view of every connection attempt made through a [`MockTransport`]
pub struct MockServer {
    pending_rx: mpsc::UnboundedReceiver<MockConnection>,
}

/// One connection attempt, waiting to be accepted or rejected
pub struct MockConnection {
    pub url: Url,
    handshake: Option<oneshot::Sender<bool>>,
    sent_rx: mpsc::UnboundedReceiver<String>,
    inbound_tx: Option<mpsc::UnboundedSender<Result<String, TransportError>>>,
}

impl MockTransport {
    pub fn channel_pair() -> (Self, MockServer) {
        let (pending_tx, pending_rx) = mpsc::unbounded_channel();
        (Self { pending_tx }, MockServer { pending_rx })
    }
}

impl Transport for MockTransport {
    fn open(&self, url: Url) -> BoxFuture<'static, Result<(BoxedSink, BoxedStream), TransportError>> {
        let pending_tx = self.pending_tx.clone();
        Box::pin(async move {
            let (handshake_tx, handshake_rx) = oneshot::channel();
            let (sent_tx, sent_rx) = mpsc::unbounded_channel::<String>();
            let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

            pending_tx
                .send(MockConnection {
                    url,
                    handshake: Some(handshake_tx),
                    sent_rx,
                    inbound_tx: Some(inbound_tx),
                })
                .map_err(|_| TransportError::Handshake("mock server dropped".to_string()))?;

            if !handshake_rx.await.unwrap_or(false) {
                return Err(TransportError::Handshake("rejected by mock server".to_string()));
            }

            let sink = sink::unfold(sent_tx, |sent_tx, text: String| async move {
                sent_tx.send(text).map_err(|_| TransportError::Closed)?;
                Ok::<_, TransportError>(sent_tx)
            });
            let stream = stream::unfold(inbound_rx, |mut inbound_rx| async move {
                inbound_rx.recv().await.map(|frame| (frame, inbound_rx))
            });

            let sink: BoxedSink = Box::pin(sink);
            let stream: BoxedStream = Box::pin(stream);
            Ok((sink, stream))
        })
    }
}

impl MockServer {
    /// Wait for the next connection attempt
    pub async fn next_connection(&mut self) -> MockConnection {
        self.pending_rx
            .recv()
            .await
            .expect("mock transport dropped")
    }

    /// Returns a connection attempt if one is already waiting
    pub fn try_next_connection(&mut self) -> Option<MockConnection> {
        self.pending_rx.try_recv().ok()
    }

    /// Wait for the next attempt and complete its handshake
    pub async fn accept(&mut self) -> MockConnection {
        let mut conn = self.next_connection().await;
        conn.accept();
        conn
    }
}

impl MockConnection {
    pub fn accept(&mut self) {
        if let Some(handshake) = self.handshake.take() {
            let _ = handshake.send(true);
        }
    }

    pub fn reject(mut self) {
        if let Some(handshake) = self.handshake.take() {
            let _ = handshake.send(false);
        }
    }

    /// Deliver a text frame to the client
    pub fn push(&self, text: impl Into<String>) {
        if let Some(inbound_tx) = &self.inbound_tx {
            let _ = inbound_tx.send(Ok(text.into()));
        }
    }

    /// Deliver a transport error; the socket closes right after
    pub fn fail(&mut self, reason: impl Into<String>) {
        if let Some(inbound_tx) = self.inbound_tx.take() {
            let _ = inbound_tx.send(Err(TransportError::Handshake(reason.into())));
        }
    }

    /// Drop the socket from the server side
    pub fn close(&mut self) {
        self.inbound_tx = None;
    }

    /// Wait for the next frame the client sent, `None` once the client closed its side
    pub async fn next_sent(&mut self) -> Option<String> {
        self.sent_rx.recv().await
    }

    /// Frames the client already sent, without waiting
    pub fn drain_sent(&mut self) -> Vec<String> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.sent_rx.try_recv() {
            frames.push(frame);
        }
        frames
    }
}
