//! Transport seam between the connection and the wire.

mod websocket;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ClientConfig;
use crate::error::SignalrResult;

pub use websocket::WebSocketTransport;

/// A duplex, message-framed channel.
///
/// `send` and `receive` may proceed in parallel; implementations serialize
/// sends internally. Only the connection's receive loop calls `receive`.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the channel. Fails on a handshake error or timeout.
    async fn connect(&self, url: &str) -> SignalrResult<()>;

    /// Enqueue a text message; completion indicates the local write finished.
    async fn send(&self, message: &str) -> SignalrResult<()>;

    /// Resolve with the next inbound message. After `close`, pending and
    /// subsequent calls resolve with a terminal failure.
    async fn receive(&self) -> SignalrResult<String>;

    /// Initiate shutdown.
    async fn close(&self) -> SignalrResult<()>;
}

/// Creates the transport for each start attempt.
pub trait TransportFactory: Send + Sync {
    /// Build a transport configured with `config`. The configuration already
    /// carries any redirect access token for this attempt.
    fn create(&self, config: &ClientConfig) -> Arc<dyn Transport>;
}

/// Default factory producing [`WebSocketTransport`] instances.
#[derive(Debug, Default)]
pub struct WebSocketTransportFactory;

impl TransportFactory for WebSocketTransportFactory {
    fn create(&self, config: &ClientConfig) -> Arc<dyn Transport> {
        Arc::new(WebSocketTransport::new(config.clone()))
    }
}
