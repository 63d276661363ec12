//! HTTP POST seam used by the negotiation engine.

use async_trait::async_trait;
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::{SignalrError, SignalrResult};

/// Issues the negotiate POST requests.
///
/// A custom implementation can be supplied through
/// [`ConnectionBuilder::http_client`](crate::ConnectionBuilder::http_client),
/// e.g. to stub out the server in tests or to reuse an existing client pool.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// POST to `url` with `config.http_headers` applied verbatim and an empty
    /// body. Returns the response body on a 2xx status and
    /// [`SignalrError::WebError`] otherwise.
    ///
    /// HTTP-level redirects must not be followed; negotiate redirects travel
    /// in the response payload and are handled by the caller.
    async fn post(&self, url: &str, config: &ClientConfig) -> SignalrResult<String>;
}

/// Default [`HttpClient`] backed by `reqwest`.
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    /// Build the client. Fails when the TLS backend cannot be initialized.
    pub fn new() -> SignalrResult<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| SignalrError::transport(format!("failed to build http client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn post(&self, url: &str, config: &ClientConfig) -> SignalrResult<String> {
        debug!(%url, "sending negotiate request");
        let response = self
            .client
            .post(url)
            .headers(config.http_headers.clone())
            .send()
            .await
            .map_err(|e| SignalrError::transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SignalrError::web(
                status.as_u16(),
                status.canonical_reason().unwrap_or(""),
            ));
        }

        response
            .text()
            .await
            .map_err(|e| SignalrError::transport(e.to_string()))
    }
}
