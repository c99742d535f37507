//! Outbound queue
//!
//! Holds payloads submitted while no transport is open and replays them in FIFO order
//! once a connection is established.

use std::collections::VecDeque;

use futures_util::{Sink, SinkExt};
use tracing::{debug, warn};

use crate::transport::TransportError;

/// Unbounded FIFO of serialized payloads
#[derive(Debug, Default)]
pub struct OutboundQueue {
    items: VecDeque<String>,
}

impl OutboundQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a payload behind everything already queued
    pub fn enqueue(&mut self, payload: String) {
        self.items.push_back(payload);
        debug!("Queued outbound message ({} pending)", self.items.len());
    }

    /// Number of payloads waiting to be sent
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Send every queued payload in order
    ///
    /// Stops at the first failed send. The failed payload and everything after it stay
    /// queued for the next connection. Returns the number of payloads sent.
    pub async fn flush<S>(&mut self, sink: &mut S) -> Result<usize, TransportError>
    where
        S: Sink<String, Error = TransportError> + Unpin + ?Sized,
    {
        let mut sent = 0;
        while let Some(payload) = self.items.pop_front() {
            if let Err(e) = sink.send(payload.clone()).await {
                self.items.push_front(payload);
                warn!(
                    "Flush interrupted after {} messages, {} still queued: {}",
                    sent,
                    self.items.len(),
                    e
                );
                return Err(e);
            }
            sent += 1;
        }
        Ok(sent)
    }
}
