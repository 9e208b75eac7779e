//! Seams to the transport that feeds the registry
//!
//! A [`ServerGateway`] owns the listening transport. Its [`run`](ServerGateway::run)
//! future accepts connections until the transport fails, pushing one
//! [`SpanSource`] per accepted connection onto its [`ConnectionQueue`].
//! Decoding raw bytes into spans is the source's job.

use std::future::Future;

use tokio::sync::{mpsc, Mutex};

use crate::error::{GatewayError, Result};

/// Decoded span stream for a single connection
pub trait SpanSource: Send + 'static {
    type Span: Send + Sync + 'static;

    /// Next span from the connection. `Ok(None)` means the peer closed it.
    fn next_span(&mut self) -> impl Future<Output = Result<Option<Self::Span>>> + Send;
}

/// Listening transport that yields one [`SpanSource`] per accepted connection
pub trait ServerGateway: Send + Sync + 'static {
    type Span: Send + Sync + 'static;
    type Source: SpanSource<Span = Self::Span>;

    /// Accept connections until the transport fails.
    fn run(&self) -> impl Future<Output = Result<()>> + Send;

    /// Queue of accepted connections, shared across restarts of [`run`](Self::run).
    fn clients(&self) -> &ConnectionQueue<Self::Source>;
}

/// Unbounded hand-off queue between the accept loop and the registry
pub struct ConnectionQueue<S> {
    tx: mpsc::UnboundedSender<S>,
    rx: Mutex<mpsc::UnboundedReceiver<S>>,
}

impl<S> ConnectionQueue<S> {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// Enqueue an accepted connection
    pub fn offer(&self, source: S) -> Result<()> {
        self.tx.send(source).map_err(|_| GatewayError::Closed)
    }

    /// Wait for the next accepted connection.
    ///
    /// Only one taker makes progress at a time; cancelling a pending take loses nothing.
    pub async fn take(&self) -> Option<S> {
        self.rx.lock().await.recv().await
    }
}

impl<S> Default for ConnectionQueue<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queue_is_fifo() {
        let queue = ConnectionQueue::new();
        queue.offer("first").unwrap();
        queue.offer("second").unwrap();

        assert_eq!(queue.take().await, Some("first"));
        assert_eq!(queue.take().await, Some("second"));
    }

    #[tokio::test]
    async fn test_cancelled_take_keeps_item() {
        let queue = ConnectionQueue::new();

        let pending = tokio::time::timeout(std::time::Duration::from_millis(20), queue.take()).await;
        assert!(pending.is_err());

        queue.offer(7u32).unwrap();
        assert_eq!(queue.take().await, Some(7));
    }
}
