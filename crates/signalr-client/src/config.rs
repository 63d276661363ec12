//! Client configuration carried into negotiate requests and the transport.

use std::time::Duration;

use http::header::{HeaderMap, HeaderName, HeaderValue};

/// Default bound on the transport connect and handshake exchange.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);

/// Settings applied to every request a connection makes.
///
/// The configuration can only be replaced while the connection is
/// disconnected; a start attempt snapshots it, so later changes never affect
/// an in-flight start.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Headers applied verbatim to negotiate requests and to the websocket
    /// upgrade request.
    pub http_headers: HeaderMap,
    /// How long a start attempt may spend connecting the transport and
    /// waiting for the handshake frame.
    pub handshake_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            http_headers: HeaderMap::new(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

impl ClientConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an HTTP header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.http_headers.insert(name, value);
        self
    }

    /// Set the handshake timeout.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}
