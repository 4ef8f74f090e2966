//! Upgrade handshake helpers
//!
//! Header inspection for inbound requests, the header set forwarded to
//! the backend, and the `101 Switching Protocols` answer for the client.

use axum::body::Body;
use axum::http::header::{
    HeaderMap, HeaderName, HeaderValue, CONNECTION, HOST, SEC_WEBSOCKET_ACCEPT,
    SEC_WEBSOCKET_EXTENSIONS, SEC_WEBSOCKET_KEY, SEC_WEBSOCKET_PROTOCOL, SEC_WEBSOCKET_VERSION,
    UPGRADE,
};
use axum::http::{Method, Request, Response, StatusCode};
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;

use crate::error::BridgeError;

/// Headers that belong to a single hop and are regenerated by the dialer.
const HOP_HEADERS: [HeaderName; 7] = [
    SEC_WEBSOCKET_VERSION,
    SEC_WEBSOCKET_KEY,
    SEC_WEBSOCKET_EXTENSIONS,
    SEC_WEBSOCKET_PROTOCOL,
    CONNECTION,
    UPGRADE,
    HOST,
];

fn header_has_token(headers: &HeaderMap, name: &HeaderName, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|t| t.trim().eq_ignore_ascii_case(token))
}

/// `Connection: upgrade` together with `Upgrade: websocket`.
pub fn is_upgrade_request(headers: &HeaderMap) -> bool {
    header_has_token(headers, &CONNECTION, "upgrade")
        && header_has_token(headers, &UPGRADE, "websocket")
}

/// Subprotocols offered by the client, in order, trimmed, empties dropped.
pub fn offered_subprotocols(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// Copy of the inbound headers without the per-hop upgrade headers.
pub fn forward_headers(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = headers.clone();
    for name in &HOP_HEADERS {
        forwarded.remove(name);
    }
    forwarded
}

/// Protocol to answer the client with: the backend's choice, if the client
/// offered it, otherwise none.
pub fn select_subprotocol(offered: &[String], backend: Option<&str>) -> Option<String> {
    let chosen = backend?;
    offered.iter().find(|p| p.as_str() == chosen).cloned()
}

/// Validate the client's handshake and compute `Sec-WebSocket-Accept`.
pub fn accept_key<B>(req: &Request<B>) -> Result<String, BridgeError> {
    if req.method() != Method::GET {
        return Err(BridgeError::Handshake(format!(
            "request method is not GET: {}",
            req.method()
        )));
    }

    let headers = req.headers();
    let version_ok = headers
        .get(SEC_WEBSOCKET_VERSION)
        .map(|v| v.as_bytes() == b"13")
        .unwrap_or(false);
    if !version_ok {
        return Err(BridgeError::Handshake(
            "unsupported Sec-WebSocket-Version".to_string(),
        ));
    }

    match headers.get(SEC_WEBSOCKET_KEY) {
        Some(key) if !key.is_empty() => Ok(derive_accept_key(key.as_bytes())),
        _ => Err(BridgeError::Handshake(
            "missing Sec-WebSocket-Key".to_string(),
        )),
    }
}

/// The `101 Switching Protocols` response for the client.
pub fn switching_protocols(
    accept: &str,
    subprotocol: Option<&str>,
) -> Result<Response<Body>, BridgeError> {
    let mut builder = Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(CONNECTION, "Upgrade")
        .header(UPGRADE, "websocket")
        .header(SEC_WEBSOCKET_ACCEPT, accept);
    if let Some(protocol) = subprotocol {
        let value = HeaderValue::from_str(protocol)
            .map_err(|e| BridgeError::Handshake(format!("invalid subprotocol: {}", e)))?;
        builder = builder.header(SEC_WEBSOCKET_PROTOCOL, value);
    }
    Ok(builder.body(Body::empty())?)
}
