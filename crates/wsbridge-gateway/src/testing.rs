//! In-memory websocket pairs for unit tests

use tokio::io::DuplexStream;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::WebSocketStream;

pub(crate) type MemoryWs = WebSocketStream<DuplexStream>;

async fn pair(local_role: Role, peer_role: Role) -> (MemoryWs, MemoryWs) {
    let (a, b) = tokio::io::duplex(64 * 1024);
    let local = WebSocketStream::from_raw_socket(a, local_role, None).await;
    let peer = WebSocketStream::from_raw_socket(b, peer_role, None).await;
    (local, peer)
}

/// A client-facing connection as the bridge sees it, plus the remote client.
pub(crate) async fn ws_pair() -> (MemoryWs, MemoryWs) {
    pair(Role::Server, Role::Client).await
}

/// A backend connection as the bridge sees it, plus the remote backend.
pub(crate) async fn backend_pair() -> (MemoryWs, MemoryWs) {
    pair(Role::Client, Role::Server).await
}
