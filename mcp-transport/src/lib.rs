//! Pluggable byte-oriented transports for MCP peers.
//!
//! A [`Transport`] is a duplex channel moving one JSON-RPC frame at a time:
//! `send` writes a complete frame, `receive` yields the next complete frame.
//! Framing is the transport's problem — the stream transports here split on
//! `\n` (no JSON value can contain an unescaped newline), the SSE transport
//! uses one event per frame.

mod memory;
mod sse;
mod stdio;
mod tcp;

use async_trait::async_trait;

pub use memory::InMemoryTransport;
pub use sse::SseTransport;
pub use sse::SseTransportBuilder;
pub use stdio::StdioTransport;
pub use tcp::TcpTransport;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The read would block right now; callers should back off briefly and
    /// retry rather than tearing the connection down.
    #[error("resource temporarily unavailable")]
    WouldBlock,
    /// Orderly end of stream; no more frames will arrive.
    #[error("transport closed")]
    Closed,
    #[error("transport is not connected")]
    NotConnected,
    /// The server rejected our session id; the session state has been
    /// cleared and the request cannot be retried as-is.
    #[error("session expired")]
    SessionExpired,
    #[error("transport setup failed: {0}")]
    Setup(String),
    #[error("http error: {0}")]
    Http(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Whether this is the "temporarily unavailable" class that the peer's
    /// receive loop answers with a 10 ms back-off.
    pub fn is_would_block(&self) -> bool {
        match self {
            TransportError::WouldBlock => true,
            TransportError::Io(err) => err.kind() == std::io::ErrorKind::WouldBlock,
            _ => false,
        }
    }
}

/// Abstract duplex frame channel with a connection lifecycle.
///
/// Implementations use interior mutability so a connected transport can be
/// shared behind an `Arc`: the peer's receive task holds it for reads while
/// public send paths write through it.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Establish the underlying connection. Must be called before `send`
    /// or `receive`.
    async fn connect(&self) -> Result<(), TransportError>;

    /// Tear down the connection. Subsequent `receive` calls return
    /// [`TransportError::Closed`]; in-flight reads are woken.
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Write one frame. The frame must be a complete JSON value without
    /// embedded newlines.
    async fn send(&self, frame: String) -> Result<(), TransportError>;

    /// Read the next frame. Returns [`TransportError::Closed`] at end of
    /// stream and [`TransportError::WouldBlock`] for transient
    /// unavailability.
    async fn receive(&self) -> Result<String, TransportError>;
}
