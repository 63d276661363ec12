//! Negotiate and connect URL composition.

use url::Url;

use crate::error::{SignalrError, SignalrResult};

fn parse(input: &str) -> SignalrResult<Url> {
    Url::parse(input).map_err(|e| SignalrError::protocol(format!("invalid url \"{input}\": {e}")))
}

/// Append the `/negotiate` segment to the base URL, preserving its query
/// string.
pub(crate) fn build_negotiate(base: &str) -> SignalrResult<String> {
    let mut url = parse(base)?;
    let path = format!("{}/negotiate", url.path().trim_end_matches('/'));
    url.set_path(&path);
    Ok(url.into())
}

/// Resolve a negotiate redirect target. The redirect carries its own query
/// string; nothing from the previous URL's query survives.
pub(crate) fn build_with_redirect(base: &str, redirect: &str) -> SignalrResult<String> {
    match Url::parse(redirect) {
        Ok(url) => Ok(url.into()),
        Err(url::ParseError::RelativeUrlWithoutBase) => parse(base)?
            .join(redirect)
            .map(Into::into)
            .map_err(|e| SignalrError::protocol(format!("invalid redirect url \"{redirect}\": {e}"))),
        Err(e) => Err(SignalrError::protocol(format!(
            "invalid redirect url \"{redirect}\": {e}"
        ))),
    }
}

/// Build the transport connect URL: the scheme is swapped to the websocket
/// scheme and the negotiated connection id is appended to the query.
pub(crate) fn build_connect(base: &str, connection_id: &str) -> SignalrResult<String> {
    let mut url = parse(base)?;
    let ws_scheme = match url.scheme() {
        "http" => Some("ws"),
        "https" => Some("wss"),
        "ws" | "wss" => None,
        other => {
            return Err(SignalrError::protocol(format!(
                "unsupported url scheme \"{other}\""
            )))
        }
    };
    if let Some(scheme) = ws_scheme {
        if url.set_scheme(scheme).is_err() {
            return Err(SignalrError::protocol(format!(
                "cannot map url scheme to {scheme}"
            )));
        }
    }
    url.query_pairs_mut().append_pair("id", connection_id);
    Ok(url.into())
}
