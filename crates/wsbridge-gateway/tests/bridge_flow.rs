//! End-to-end bridge tests over loopback sockets
//!
//! A real backend (tokio-tungstenite server), the bridge mounted on an
//! axum router, and a tokio-tungstenite client.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::header::{HeaderMap, HeaderValue, SEC_WEBSOCKET_PROTOCOL};
use axum::http::{Request, StatusCode};
use axum::{middleware, Router};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request as HsRequest, Response as HsResponse};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, connect_async, MaybeTlsStream, WebSocketStream};
use tower::ServiceExt;
use wsbridge_gateway::{bridge_middleware, offered_subprotocols, Bridge, BridgeConfig};

type ClientWs = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// What the backend saw in the upgrade request
#[derive(Debug)]
struct BackendHit {
    uri: String,
    headers: HeaderMap,
}

/// Echo backend that selects `select` if the client offered it.
async fn spawn_backend(select: Option<&'static str>) -> (SocketAddr, mpsc::UnboundedReceiver<BackendHit>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let callback = |req: &HsRequest, mut resp: HsResponse| {
                    let offered = offered_subprotocols(req.headers());
                    if let Some(p) = select.filter(|p| offered.iter().any(|o| o == p)) {
                        resp.headers_mut()
                            .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(p));
                    }
                    let _ = tx.send(BackendHit {
                        uri: req.uri().to_string(),
                        headers: req.headers().clone(),
                    });
                    Ok::<_, ErrorResponse>(resp)
                };
                let Ok(mut ws) = accept_hdr_async(stream, callback).await else {
                    return;
                };
                while let Some(Ok(msg)) = ws.next().await {
                    if (msg.is_text() || msg.is_binary()) && ws.send(msg).await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    (addr, rx)
}

fn app(bridge: Arc<Bridge>) -> Router {
    Router::new()
        .fallback(|| async { (StatusCode::IM_A_TEAPOT, [("x-next-handler", "1")], "next") })
        .layer(middleware::from_fn_with_state(bridge, bridge_middleware))
}

fn bridge_for(backend: SocketAddr, interval: Duration) -> Arc<Bridge> {
    let config = BridgeConfig::new(interval, backend.to_string(), vec!["/ws".to_string()]).unwrap();
    Arc::new(Bridge::new(config))
}

async fn serve(bridge: Arc<Bridge>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = app(bridge);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn connect(addr: SocketAddr, path: &str, protocols: Option<&str>) -> (ClientWs, Option<String>) {
    let mut request = format!("ws://{}{}", addr, path).into_client_request().unwrap();
    request
        .headers_mut()
        .insert("x-trace-id", HeaderValue::from_static("trace-42"));
    if let Some(p) = protocols {
        request
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_str(p).unwrap());
    }
    let (ws, response) = connect_async(request).await.unwrap();
    let protocol = response
        .headers()
        .get(SEC_WEBSOCKET_PROTOCOL)
        .map(|v| v.to_str().unwrap().to_string());
    (ws, protocol)
}

/// Next data message, skipping control frames.
async fn next_data(ws: &mut ClientWs) -> Message {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("message within deadline")
            .expect("stream open")
            .expect("no protocol error");
        if msg.is_text() || msg.is_binary() {
            return msg;
        }
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition reached in time");
}

fn upgrade_request(path: &str) -> Request<Body> {
    Request::builder()
        .uri(path)
        .header("connection", "Upgrade")
        .header("upgrade", "websocket")
        .header("sec-websocket-version", "13")
        .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn bridges_both_directions_with_backend_subprotocol() {
    let (backend_addr, mut hits) = spawn_backend(Some("chat.v2")).await;
    let bridge = bridge_for(backend_addr, Duration::from_secs(15));
    let addr = serve(Arc::clone(&bridge)).await;

    let (mut ws, protocol) = connect(addr, "/ws?room=7", Some("chat.v1,chat.v2")).await;
    assert_eq!(protocol.as_deref(), Some("chat.v2"));

    let hit = hits.recv().await.unwrap();
    assert_eq!(hit.uri, "/ws?room=7");
    assert_eq!(hit.headers.get("x-trace-id").unwrap(), "trace-42");
    assert_eq!(hit.headers.get(SEC_WEBSOCKET_PROTOCOL).unwrap(), "chat.v1, chat.v2");
    assert_eq!(
        hit.headers.get("host").unwrap().to_str().unwrap(),
        backend_addr.to_string()
    );

    let sent = vec![
        Message::Text("one".into()),
        Message::Binary(vec![7, 8, 9]),
        Message::Text("three".into()),
    ];
    for m in &sent {
        ws.send(m.clone()).await.unwrap();
    }
    for m in &sent {
        assert_eq!(&next_data(&mut ws).await, m);
    }

    wait_until(|| bridge.registry().len() == 1).await;

    ws.close(None).await.unwrap();
    wait_until(|| bridge.registry().is_empty()).await;
}

#[tokio::test]
async fn backend_without_subprotocol_bridges_without_one() {
    let (backend_addr, _hits) = spawn_backend(None).await;
    let bridge = bridge_for(backend_addr, Duration::from_secs(15));
    let addr = serve(Arc::clone(&bridge)).await;

    let (mut ws, protocol) = connect(addr, "/ws", None).await;
    assert_eq!(protocol, None);

    ws.send(Message::Text("ping?".into())).await.unwrap();
    assert_eq!(next_data(&mut ws).await, Message::Text("ping?".into()));

    drop(ws);
    wait_until(|| bridge.registry().is_empty()).await;
}

#[tokio::test]
async fn client_receives_pings() {
    let (backend_addr, _hits) = spawn_backend(None).await;
    let bridge = bridge_for(backend_addr, Duration::from_millis(50));
    let addr = serve(bridge).await;

    let (mut ws, _) = connect(addr, "/ws", None).await;
    let mut pings = 0;
    while pings < 2 {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("ping within deadline")
            .unwrap()
            .unwrap();
        if msg.is_ping() {
            pings += 1;
        }
    }

    // the session still relays after answering pings
    ws.send(Message::Text("still here".into())).await.unwrap();
    assert_eq!(next_data(&mut ws).await, Message::Text("still here".into()));
}

#[tokio::test]
async fn ineligible_requests_pass_through_without_dialing() {
    let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let bridge = bridge_for(backend.local_addr().unwrap(), Duration::from_secs(15));

    // not an upgrade
    let plain = Request::builder().uri("/ws").body(Body::empty()).unwrap();
    let response = app(Arc::clone(&bridge)).oneshot(plain).await.unwrap();
    assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
    assert_eq!(response.headers().get("x-next-handler").unwrap(), "1");

    // upgrade to a path outside the allow-list
    let response = app(Arc::clone(&bridge))
        .oneshot(upgrade_request("/chat"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
    let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
    assert_eq!(&body[..], b"next");

    assert!(
        tokio::time::timeout(Duration::from_millis(200), backend.accept())
            .await
            .is_err(),
        "backend must not be dialed"
    );
    assert!(bridge.registry().is_empty());
}

#[tokio::test]
async fn dial_failure_is_reported_and_nothing_registered() {
    let unused = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend_addr = unused.local_addr().unwrap();
    drop(unused);

    let bridge = bridge_for(backend_addr, Duration::from_secs(15));
    let response = app(Arc::clone(&bridge))
        .oneshot(upgrade_request("/ws"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert!(bridge.registry().is_empty());
}

#[tokio::test]
async fn bad_client_handshake_is_rejected_after_dial() {
    let (backend_addr, mut hits) = spawn_backend(None).await;
    let bridge = bridge_for(backend_addr, Duration::from_secs(15));

    let mut request = upgrade_request("/ws");
    request.headers_mut().remove("sec-websocket-key");
    let response = app(Arc::clone(&bridge)).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(hits.recv().await.is_some(), "backend was dialed first");
    assert!(bridge.registry().is_empty());
}
