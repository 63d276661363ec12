//! The connection: lifecycle state machine, receive loop and public façade.

mod inner;
mod receive;

use std::fmt;
use std::sync::Arc;

use inner::ConnectionCore;

use crate::config::ClientConfig;
use crate::error::SignalrResult;
use crate::http::{HttpClient, ReqwestHttpClient};
use crate::trace::{LogWriter, Logger, NullLogWriter, TraceLevel};
use crate::transport::{TransportFactory, WebSocketTransportFactory};

/// Lifecycle states of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnecting => "disconnecting",
        };
        f.write_str(name)
    }
}

/// A client connection to a SignalR endpoint.
///
/// Built through [`Connection::builder`]. `start` negotiates with the server,
/// connects the transport and completes the handshake; `send` forwards text
/// messages; `stop` tears everything down and invokes the disconnected
/// callback. Callbacks and configuration can only be changed while the
/// connection is disconnected.
///
/// Dropping the connection forces shutdown: the receive loop only holds a
/// weak reference and is aborted together with the transport.
pub struct Connection {
    core: Arc<ConnectionCore>,
}

impl Connection {
    /// Start building a connection to `url`.
    pub fn builder(url: impl Into<String>) -> ConnectionBuilder {
        ConnectionBuilder {
            url: url.into(),
            trace_level: TraceLevel::default(),
            log_writer: None,
            http_client: None,
            transport_factory: None,
            config: ClientConfig::default(),
        }
    }

    /// Connect to the server.
    ///
    /// Fails with an invalid-state error unless the connection is
    /// disconnected. A concurrent [`stop`](Connection::stop) cancels the
    /// attempt, in which case this resolves with
    /// [`SignalrError::Canceled`](crate::SignalrError::Canceled).
    pub async fn start(&self) -> SignalrResult<()> {
        self.core.start().await
    }

    /// Disconnect from the server.
    ///
    /// A no-op on a disconnected connection. If another stop is already in
    /// progress this resolves as canceled; the first caller owns the
    /// teardown.
    pub async fn stop(&self) -> SignalrResult<()> {
        self.core.stop().await
    }

    /// Send a text message over the transport.
    pub async fn send(&self, message: &str) -> SignalrResult<()> {
        self.core.send(message).await
    }

    /// Set the callback invoked for every inbound message.
    pub fn set_on_message(
        &self,
        callback: impl Fn(String) + Send + Sync + 'static,
    ) -> SignalrResult<()> {
        self.core.set_on_message(Arc::new(callback))
    }

    /// Set the callback invoked after the connection has fully disconnected.
    pub fn set_on_disconnected(
        &self,
        callback: impl Fn() + Send + Sync + 'static,
    ) -> SignalrResult<()> {
        self.core.set_on_disconnected(Arc::new(callback))
    }

    /// Replace the client configuration.
    pub fn set_client_config(&self, config: ClientConfig) -> SignalrResult<()> {
        self.core.set_client_config(config)
    }

    /// The current lifecycle state. Never suspends.
    pub fn state(&self) -> ConnectionState {
        self.core.state()
    }

    /// The connection id assigned by the last negotiate that produced one.
    /// Empty before the first negotiate; preserved after stop. Never
    /// suspends.
    pub fn connection_id(&self) -> String {
        self.core.connection_id()
    }
}

/// Builder for [`Connection`].
pub struct ConnectionBuilder {
    url: String,
    trace_level: TraceLevel,
    log_writer: Option<Arc<dyn LogWriter>>,
    http_client: Option<Arc<dyn HttpClient>>,
    transport_factory: Option<Arc<dyn TransportFactory>>,
    config: ClientConfig,
}

impl ConnectionBuilder {
    /// Which categories of trace entries to emit.
    pub fn trace_level(mut self, level: TraceLevel) -> Self {
        self.trace_level = level;
        self
    }

    /// Where trace entries go. Defaults to a writer that discards them.
    pub fn log_writer(mut self, writer: Arc<dyn LogWriter>) -> Self {
        self.log_writer = Some(writer);
        self
    }

    /// Override the HTTP client used for negotiate requests.
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Override the transport factory.
    pub fn transport_factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.transport_factory = Some(factory);
        self
    }

    /// Initial client configuration.
    pub fn client_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the connection. Fails only when the default HTTP client cannot
    /// be constructed.
    pub fn build(self) -> SignalrResult<Connection> {
        let http_client = match self.http_client {
            Some(client) => client,
            None => Arc::new(ReqwestHttpClient::new()?),
        };
        let transport_factory = self
            .transport_factory
            .unwrap_or_else(|| Arc::new(WebSocketTransportFactory));
        let writer = self.log_writer.unwrap_or_else(|| Arc::new(NullLogWriter));
        let logger = Logger::new(writer, self.trace_level);

        Ok(Connection {
            core: Arc::new(ConnectionCore::new(
                self.url,
                logger,
                http_client,
                transport_factory,
                self.config,
            )),
        })
    }
}
