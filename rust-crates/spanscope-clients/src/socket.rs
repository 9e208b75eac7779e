//! TCP gateway speaking newline-delimited JSON spans

use std::net::SocketAddr;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::io::AsyncRead;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};

use crate::error::{GatewayError, Result};
use crate::gateway::{ConnectionQueue, ServerGateway, SpanSource};
use crate::span::Span;

/// Default devtools listening address
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:34437";

/// Longest accepted span line in bytes, newline excluded
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Span source reading one JSON [`Span`] per line
pub struct JsonLinesSource<R = TcpStream> {
    lines: FramedRead<R, LinesCodec>,
    peer: Option<SocketAddr>,
}

impl<R: AsyncRead + Unpin> JsonLinesSource<R> {
    pub fn new(reader: R) -> Self {
        Self::with_max_line_length(reader, MAX_LINE_LENGTH)
    }

    pub fn with_max_line_length(reader: R, max_length: usize) -> Self {
        Self {
            lines: FramedRead::new(reader, LinesCodec::new_with_max_length(max_length)),
            peer: None,
        }
    }

    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }
}

impl<R> SpanSource for JsonLinesSource<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    type Span = Span;

    async fn next_span(&mut self) -> Result<Option<Span>> {
        while let Some(line) = self.lines.next().await {
            let line = line.map_err(|e| match e {
                LinesCodecError::MaxLineLengthExceeded => GatewayError::LineTooLong,
                LinesCodecError::Io(e) => GatewayError::Transport(e),
            })?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            return Ok(Some(serde_json::from_str(line)?));
        }
        Ok(None)
    }
}

/// TCP listener feeding accepted connections into a [`ConnectionQueue`]
pub struct SocketGateway {
    listen_addr: String,
    queue: ConnectionQueue<JsonLinesSource>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl SocketGateway {
    pub fn new(listen_addr: impl Into<String>) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            queue: ConnectionQueue::new(),
            local_addr: Mutex::new(None),
        }
    }

    /// Configured listen address
    pub fn listen_addr(&self) -> &str {
        &self.listen_addr
    }

    /// Bound address while the accept loop is running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }
}

impl Default for SocketGateway {
    fn default() -> Self {
        Self::new(DEFAULT_LISTEN_ADDR)
    }
}

/// Publishes the bound address for as long as the accept loop lives
struct BoundAddr<'a>(&'a Mutex<Option<SocketAddr>>);

impl<'a> BoundAddr<'a> {
    fn set(slot: &'a Mutex<Option<SocketAddr>>, addr: SocketAddr) -> Self {
        *slot.lock() = Some(addr);
        Self(slot)
    }
}

impl Drop for BoundAddr<'_> {
    fn drop(&mut self) {
        *self.0.lock() = None;
    }
}

impl ServerGateway for SocketGateway {
    type Span = Span;
    type Source = JsonLinesSource;

    async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.listen_addr).await?;
        let local_addr = listener.local_addr()?;
        let _bound = BoundAddr::set(&self.local_addr, local_addr);

        tracing::info!("Span server listening on {}", local_addr);

        loop {
            let (stream, peer) = listener.accept().await?;
            if let Err(e) = stream.set_nodelay(true) {
                tracing::debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
            }

            tracing::debug!("Accepted span connection from {}", peer);
            self.queue
                .offer(JsonLinesSource::new(stream).with_peer(peer))?;
        }
    }

    fn clients(&self) -> &ConnectionQueue<JsonLinesSource> {
        &self.queue
    }
}
