//! Demo backend: logs each upgrade and echoes every data message back.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, info_span, warn, Instrument};
use tracing_subscriber::EnvFilter;
use wsbridge_gateway::offered_subprotocols;

#[derive(Parser, Debug)]
#[command(name = "echo-backend")]
#[command(about = "WebSocket echo backend for trying out the bridge")]
struct Cli {
    /// Listen address
    #[arg(long, env = "ECHO_LISTEN", default_value = "127.0.0.1:9000")]
    listen: SocketAddr,

    /// Subprotocol to accept when offered, in preference order (repeatable)
    #[arg(long = "protocol")]
    protocols: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let listener = TcpListener::bind(cli.listen)
        .await
        .with_context(|| format!("failed to bind {}", cli.listen))?;
    info!(addr = %cli.listen, protocols = ?cli.protocols, "echo backend listening");

    let protocols = Arc::new(cli.protocols);
    loop {
        let (stream, peer) = listener.accept().await?;
        let protocols = Arc::clone(&protocols);
        tokio::spawn(serve(stream, protocols).instrument(info_span!("conn", %peer)));
    }
}

async fn serve(stream: TcpStream, protocols: Arc<Vec<String>>) {
    let callback = |req: &Request, mut resp: Response| {
        info!(path = %req.uri(), "upgrade request");
        for (name, value) in req.headers() {
            debug!(header = %name, value = ?value, "request header");
        }

        let offered = offered_subprotocols(req.headers());
        let chosen = protocols.iter().find(|p| offered.contains(p));
        if let Some(protocol) = chosen {
            if let Ok(value) = HeaderValue::from_str(protocol) {
                resp.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
            }
        }
        info!(offered = ?offered, selected = ?chosen, "subprotocol negotiated");
        Ok::<_, ErrorResponse>(resp)
    };

    let mut ws = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(error = %e, "handshake failed");
            return;
        }
    };

    while let Some(msg) = ws.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, "read failed");
                break;
            }
        };
        match msg {
            Message::Text(_) | Message::Binary(_) => {
                info!(message = ?msg, "received");
                if let Err(e) = ws.send(msg).await {
                    warn!(error = %e, "write failed");
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    info!("connection closed");
}
