//! Backend dialer
//!
//! Performs the client side of the upgrade handshake over hyper's HTTP/1
//! client. The backend's subprotocol answer is read back as-is: selecting
//! none of the offered protocols is a valid answer.

use axum::body::Body;
use axum::http::header::{
    HeaderMap, HeaderValue, CONNECTION, HOST, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY,
    SEC_WEBSOCKET_PROTOCOL, SEC_WEBSOCKET_VERSION, UPGRADE,
};
use axum::http::{Method, Request, StatusCode, Uri};
use hyper::upgrade::Upgraded;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::handshake::client::generate_key;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, trace};

use crate::error::{BoxError, BridgeError};

/// Backend connection as produced by [`dial`]
pub type BackendStream = WebSocketStream<TokioIo<Upgraded>>;

/// Dial `target` (`ws://host[:port]/path?query`) as a websocket client.
///
/// `headers` are sent along with the handshake; `offered` becomes the
/// `Sec-WebSocket-Protocol` list. Returns the connection and the protocol
/// the backend selected, if any.
pub async fn dial(
    target: &str,
    headers: HeaderMap,
    offered: &[String],
) -> Result<(BackendStream, Option<String>), BridgeError> {
    let fail = |source: BoxError| BridgeError::Dial {
        target: target.to_string(),
        source,
    };

    let uri: Uri = target.parse().map_err(|e| fail(Box::new(e)))?;
    let authority = uri
        .authority()
        .ok_or_else(|| fail("backend URL has no host".into()))?
        .clone();
    let port = authority.port_u16().unwrap_or(80);
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let key = generate_key();
    let mut request = Request::builder()
        .method(Method::GET)
        .uri(path_and_query)
        .body(Body::empty())?;
    let request_headers = request.headers_mut();
    for (name, value) in &headers {
        request_headers.append(name, value.clone());
    }
    let host = HeaderValue::from_str(authority.as_str()).map_err(|e| fail(Box::new(e)))?;
    request_headers.insert(HOST, host);
    request_headers.insert(CONNECTION, HeaderValue::from_static("Upgrade"));
    request_headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
    request_headers.insert(SEC_WEBSOCKET_VERSION, HeaderValue::from_static("13"));
    let key_value = HeaderValue::from_str(&key).map_err(|e| fail(Box::new(e)))?;
    request_headers.insert(SEC_WEBSOCKET_KEY, key_value);
    if !offered.is_empty() {
        let protocols =
            HeaderValue::from_str(&offered.join(", ")).map_err(|e| fail(Box::new(e)))?;
        request_headers.insert(SEC_WEBSOCKET_PROTOCOL, protocols);
    }

    debug!(target = %target, offered = ?offered, "dialing backend");
    // IPv6 literals arrive bracketed in the authority
    let host = authority.host().trim_start_matches('[').trim_end_matches(']');
    let stream = TcpStream::connect((host, port))
        .await
        .map_err(|e| fail(Box::new(e)))?;
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .map_err(|e| fail(Box::new(e)))?;
    tokio::spawn(async move {
        if let Err(e) = conn.with_upgrades().await {
            trace!(error = %e, "backend connection driver stopped");
        }
    });

    let response = sender
        .send_request(request)
        .await
        .map_err(|e| fail(Box::new(e)))?;

    if response.status() != StatusCode::SWITCHING_PROTOCOLS {
        return Err(fail(
            format!("backend answered {} instead of 101", response.status()).into(),
        ));
    }
    let accept_ok = response
        .headers()
        .get(SEC_WEBSOCKET_ACCEPT)
        .map(|v| v.as_bytes() == derive_accept_key(key.as_bytes()).as_bytes())
        .unwrap_or(false);
    if !accept_ok {
        return Err(fail("backend sent a bad Sec-WebSocket-Accept".into()));
    }

    let selected = response
        .headers()
        .get(SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string);

    let upgraded = hyper::upgrade::on(response)
        .await
        .map_err(|e| fail(Box::new(e)))?;
    let ws = WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Client, None).await;

    Ok((ws, selected))
}
