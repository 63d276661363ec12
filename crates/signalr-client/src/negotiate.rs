//! The negotiate sub-protocol.
//!
//! A connection starts with `POST <base>/negotiate`. The server either
//! assigns a connection id and advertises its transports, reports a fatal
//! error, or redirects the client to another server (optionally with a
//! bearer token for it). Redirects are application-level: the redirect
//! target travels in the response payload, never in an HTTP `Location`
//! header.

use http::header::{AUTHORIZATION, HeaderValue};
use serde::Deserialize;

use crate::config::ClientConfig;
use crate::error::{SignalrError, SignalrResult};
use crate::http::HttpClient;
use crate::url_builder;

/// Bound on the number of negotiate redirects followed per start attempt.
const MAX_REDIRECTS: u32 = 100;

/// The transport name this client requires the server to offer.
pub const WEBSOCKETS_TRANSPORT: &str = "WebSockets";

const LEGACY_SERVER: &str = "Detected a connection attempt to an ASP.NET SignalR Server. This \
                             client only supports connecting to an ASP.NET Core SignalR Server. \
                             See https://aka.ms/signalr-core-differences for details.";

const NO_WEBSOCKETS: &str = "The server does not support WebSockets which is currently the only \
                             transport supported by this client.";

const REDIRECT_LIMIT: &str = "Negotiate redirection limit exceeded.";

/// One transport entry from a negotiate response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableTransport {
    pub transport: String,
    #[serde(default)]
    pub transfer_formats: Vec<String>,
}

/// The negotiate response payload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NegotiateResponse {
    pub connection_id: Option<String>,
    pub available_transports: Option<Vec<AvailableTransport>>,
    pub url: Option<String>,
    pub access_token: Option<String>,
    pub error: Option<String>,
    /// Present only on legacy ASP.NET SignalR servers; any value makes the
    /// client refuse the connection.
    #[serde(rename = "ProtocolVersion")]
    pub protocol_version: Option<serde_json::Value>,
}

/// Outcome of a completed negotiate chain.
#[derive(Debug)]
pub(crate) struct NegotiationResult {
    /// The URL the transport should connect to (post-redirect).
    pub(crate) url: String,
    pub(crate) connection_id: String,
    pub(crate) available_transports: Vec<AvailableTransport>,
    /// The effective configuration for the rest of the start attempt. A
    /// redirect access token is injected here, never into the caller's
    /// config.
    pub(crate) config: ClientConfig,
}

/// Drive the negotiate chain against `base_url`.
///
/// The caller's `config` is cloned up front; a redirect `accessToken`
/// becomes an `Authorization: Bearer` header on the clone and applies to
/// every later request of this attempt, including the transport connect.
pub(crate) async fn negotiate(
    http_client: &dyn HttpClient,
    base_url: &str,
    config: &ClientConfig,
) -> SignalrResult<NegotiationResult> {
    let mut config = config.clone();
    let mut current_url = base_url.to_string();
    let mut remaining_redirects = MAX_REDIRECTS;

    loop {
        let negotiate_url = url_builder::build_negotiate(&current_url)?;
        let body = http_client.post(&negotiate_url, &config).await?;

        let response: NegotiateResponse = serde_json::from_str(&body)
            .map_err(|e| SignalrError::protocol(format!("malformed negotiate response: {e}")))?;

        if response.protocol_version.is_some() {
            return Err(SignalrError::protocol(LEGACY_SERVER));
        }

        if let Some(error) = response.error {
            return Err(SignalrError::protocol(error));
        }

        if let Some(redirect) = response.url {
            if remaining_redirects == 0 {
                return Err(SignalrError::protocol(REDIRECT_LIMIT));
            }
            remaining_redirects -= 1;

            if let Some(token) = response.access_token {
                let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|e| {
                    SignalrError::protocol(format!("access token is not a valid header value: {e}"))
                })?;
                config.http_headers.insert(AUTHORIZATION, value);
            }

            current_url = url_builder::build_with_redirect(&current_url, &redirect)?;
            continue;
        }

        let available_transports = response.available_transports.unwrap_or_default();
        if !available_transports
            .iter()
            .any(|t| t.transport == WEBSOCKETS_TRANSPORT)
        {
            return Err(SignalrError::protocol(NO_WEBSOCKETS));
        }

        let connection_id = response.connection_id.ok_or_else(|| {
            SignalrError::protocol("negotiate response is missing the connection id")
        })?;

        return Ok(NegotiationResult {
            url: current_url,
            connection_id,
            available_transports,
            config,
        });
    }
}
