//! wsbridge gateway - WebSocket bridge core
//!
//! Upgrades allow-listed client requests, dials a single backend with the
//! client's subprotocols, relays messages both ways and keeps the client
//! side alive with periodic pings.
//!
//! Mounting the bridge in front of an axum router:
//!
//! ```no_run
//! use std::sync::Arc;
//! use axum::{middleware, Router};
//! use wsbridge_gateway::{bridge_middleware, Bridge, BridgeConfig, DEFAULT_PING_INTERVAL};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BridgeConfig::new(
//!         DEFAULT_PING_INTERVAL,
//!         "127.0.0.1:9000",
//!         vec!["/ws".to_string()],
//!     )?;
//!     let bridge = Arc::new(Bridge::new(config));
//!
//!     let app = Router::new()
//!         .fallback(|| async { "not bridged" })
//!         .layer(middleware::from_fn_with_state(bridge, bridge_middleware));
//!
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

mod bridge;
mod config;
mod dialer;
mod error;
mod handshake;
mod heartbeat;
mod registry;
mod relay;

#[cfg(test)]
mod testing;

pub use bridge::{bridge_middleware, Bridge, Session};
pub use config::{BridgeConfig, BACKEND_SCHEME, DEFAULT_PING_INTERVAL};
pub use dialer::{dial, BackendStream};
pub use error::{BoxError, BridgeError};
pub use handshake::{
    forward_headers, is_upgrade_request, offered_subprotocols, select_subprotocol,
};
pub use heartbeat::{Heartbeat, PING_DEADLINE};
pub use registry::{ConnectionId, ConnectionRegistry};
pub use relay::{relay, Direction, SharedSink};
