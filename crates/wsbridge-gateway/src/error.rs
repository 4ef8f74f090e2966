//! Bridge errors
//!
//! Everything that can end a session, plus the handful of failures that
//! happen before the client connection is upgraded and therefore still
//! have an HTTP response to map onto.

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tokio_tungstenite::tungstenite;

use crate::relay::Direction;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Bridge-related errors
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("dial backend {target}: {source}")]
    Dial {
        target: String,
        #[source]
        source: BoxError,
    },
    #[error("websocket handshake rejected: {0}")]
    Handshake(String),
    #[error("HTTP error: {0}")]
    Http(#[from] axum::http::Error),
    #[error("connection upgrade failed: {0}")]
    Upgrade(#[from] hyper::Error),
    #[error("subprotocol mismatch: backend={backend:?}, client={client:?}")]
    SubprotocolMismatch { backend: String, client: String },
    #[error("relay {direction}: {source}")]
    Relay {
        direction: Direction,
        #[source]
        source: tungstenite::Error,
    },
    #[error("relay {direction}: peer closed the connection")]
    PeerClosed { direction: Direction },
    #[error("ping not sent within {0:?}")]
    PingTimeout(Duration),
    #[error("ping failed: {0}")]
    Ping(#[source] tungstenite::Error),
    #[error("relay tasks ended without reporting")]
    RelayAborted,
}

impl BridgeError {
    /// Whether this error is the ordinary end of a session rather than a fault.
    pub fn is_closure(&self) -> bool {
        match self {
            BridgeError::PeerClosed { .. } => true,
            BridgeError::Relay { source, .. } => matches!(
                source,
                tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed
            ),
            _ => false,
        }
    }

    /// Status to answer with when the error happens before the 101 response.
    pub fn status_code(&self) -> StatusCode {
        match self {
            BridgeError::Dial { .. } => StatusCode::BAD_GATEWAY,
            BridgeError::Handshake(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = status
            .canonical_reason()
            .unwrap_or("Bridge Error")
            .to_string();
        (status, body).into_response()
    }
}
