//! Client for the ASP.NET Core SignalR connection protocol.
//!
//! The crate turns a base URL into a live, bidirectional, message-framed
//! pipe: it drives the HTTP negotiate sub-protocol (following
//! application-level redirects and forwarding bearer tokens), connects a
//! WebSocket transport, completes the record-separator handshake, and feeds
//! inbound frames to a user callback from a dedicated receive loop. Start,
//! stop and send are safe to race; an in-flight start is canceled by stop.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use signalr_client::Connection;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let connection = Connection::builder("https://example.com/hub").build()?;
//!     connection.set_on_message(|message| println!("{message}"))?;
//!     connection.start().await?;
//!     connection.send("hello").await?;
//!     connection.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! The HTTP client and the transport are pluggable through
//! [`ConnectionBuilder::http_client`] and
//! [`ConnectionBuilder::transport_factory`]; the defaults use `reqwest` and
//! `tokio-tungstenite`.

pub mod config;
pub mod connection;
pub mod error;
pub mod http;
pub mod negotiate;
pub mod trace;
pub mod transport;
mod url_builder;

pub use crate::config::ClientConfig;
pub use crate::connection::{Connection, ConnectionBuilder, ConnectionState};
pub use crate::error::{SignalrError, SignalrResult};
pub use crate::http::{HttpClient, ReqwestHttpClient};
pub use crate::trace::{LogWriter, NullLogWriter, StderrLogWriter, TraceLevel};
pub use crate::transport::{
    Transport, TransportFactory, WebSocketTransport, WebSocketTransportFactory,
};
