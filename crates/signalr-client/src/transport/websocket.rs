//! WebSocket transport backed by `tokio-tungstenite`.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use super::Transport;
use crate::config::ClientConfig;
use crate::error::{SignalrError, SignalrResult};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A [`Transport`] over a WebSocket connection.
///
/// The configured HTTP headers are carried into the upgrade request. The
/// stream is split after connecting so that sends and receives proceed
/// independently. `close` raises a local shutdown signal in addition to
/// sending the close frame, so a `receive` blocked on a silent peer still
/// resolves with a terminal failure.
pub struct WebSocketTransport {
    config: ClientConfig,
    write: Mutex<Option<SplitSink<WsStream, Message>>>,
    read: Mutex<Option<SplitStream<WsStream>>>,
    closed: watch::Sender<bool>,
}

impl WebSocketTransport {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            write: Mutex::new(None),
            read: Mutex::new(None),
            closed: watch::channel(false).0,
        }
    }

    fn map_error(error: tokio_tungstenite::tungstenite::Error) -> SignalrError {
        SignalrError::transport(error.to_string())
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, url: &str) -> SignalrResult<()> {
        let mut request = url.into_client_request().map_err(Self::map_error)?;
        for (name, value) in &self.config.http_headers {
            request.headers_mut().insert(name, value.clone());
        }

        let (stream, _response) = connect_async_with_config(request, None, false)
            .await
            .map_err(Self::map_error)?;
        debug!(%url, "websocket connected");

        let (write, read) = stream.split();
        *self.write.lock().await = Some(write);
        *self.read.lock().await = Some(read);
        self.closed.send_replace(false);
        Ok(())
    }

    async fn send(&self, message: &str) -> SignalrResult<()> {
        let mut guard = self.write.lock().await;
        match guard.as_mut() {
            Some(write) => write
                .send(Message::Text(message.to_string()))
                .await
                .map_err(Self::map_error),
            None => Err(SignalrError::transport("websocket is not connected")),
        }
    }

    async fn receive(&self) -> SignalrResult<String> {
        let mut guard = self.read.lock().await;
        let Some(mut read) = guard.take() else {
            return Err(SignalrError::transport("websocket is not connected"));
        };
        let mut closed = self.closed.subscribe();

        // the read half goes back into the slot only after a successful
        // read; every terminal failure leaves it dropped, hanging up the
        // connection
        loop {
            let message = tokio::select! {
                biased;
                message = read.next() => message,
                _ = closed.wait_for(|closed| *closed) => {
                    return Err(SignalrError::transport("websocket closed"));
                }
            };
            match message {
                None => return Err(SignalrError::transport("websocket stream ended")),
                Some(Err(error)) => return Err(Self::map_error(error)),
                Some(Ok(Message::Text(text))) => {
                    *guard = Some(read);
                    return Ok(text);
                }
                Some(Ok(Message::Binary(data))) => {
                    let text = String::from_utf8(data).map_err(|e| {
                        SignalrError::transport(format!("received non-utf8 binary message: {e}"))
                    })?;
                    *guard = Some(read);
                    return Ok(text);
                }
                Some(Ok(Message::Close(_))) => {
                    return Err(SignalrError::transport("websocket closed by server"));
                }
                // pings and pongs are handled by tungstenite itself
                Some(Ok(_)) => continue,
            }
        }
    }

    async fn close(&self) -> SignalrResult<()> {
        let mut guard = self.write.lock().await;
        let result = match guard.as_mut() {
            Some(write) => write.close().await.map_err(Self::map_error),
            None => Ok(()),
        };
        *guard = None;
        drop(guard);
        self.closed.send_replace(true);
        result
    }
}
