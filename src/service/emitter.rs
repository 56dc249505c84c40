//! Ordered push-stream of progress events
//!
//! Events are framed as soon as they are emitted and handed to an unbounded
//! channel whose receiver feeds the streaming HTTP body, so frames leave in
//! emission order with no batching.

use bytes::Bytes;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::model::StreamEvent;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum EmitterError {
    #[error("Event stream receiver has gone away")]
    Closed,

    #[error("Failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Sending half of a session's event stream
#[derive(Debug, Clone)]
pub struct StreamEmitter {
    tx: UnboundedSender<Bytes>,
}

impl StreamEmitter {
    /// Create an emitter and the receiver that drains it
    pub fn channel() -> (Self, UnboundedReceiver<Bytes>) {
        let (tx, rx) = unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: &StreamEvent) -> Result<(), EmitterError> {
        let frame = event.to_frame()?;
        self.tx
            .send(Bytes::from(frame))
            .map_err(|_| EmitterError::Closed)?;

        if event.is_terminal() {
            tracing::debug!("Terminal event emitted");
        }
        Ok(())
    }

    /// Resolves once the receiving side is dropped, i.e. the caller disconnected
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}
