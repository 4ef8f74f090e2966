//! One-directional message relay
//!
//! Copies data messages from a source stream to a destination sink until
//! either side fails. Message boundaries and order are preserved.

use std::fmt;
use std::sync::Arc;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, trace};

use crate::error::BridgeError;

/// Write half shared between the session owner and the tasks that send on it.
pub type SharedSink<W> = Arc<Mutex<W>>;

/// Which way a relay copies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToBackend,
    BackendToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ClientToBackend => f.write_str("client->backend"),
            Direction::BackendToClient => f.write_str("backend->client"),
        }
    }
}

/// Relay messages from `source` to `destination` until one side fails.
///
/// Control frames are not forwarded: pings are answered by the protocol
/// layer of the connection that received them, and pongs are reported to
/// `acks` (when given) for the heartbeat to observe. The returned error is
/// the reason the relay stopped.
pub async fn relay<R, W>(
    direction: Direction,
    mut source: R,
    destination: SharedSink<W>,
    acks: Option<watch::Sender<Option<Instant>>>,
) -> BridgeError
where
    R: Stream<Item = Result<Message, WsError>> + Unpin,
    W: Sink<Message, Error = WsError> + Unpin,
{
    loop {
        let message = match source.next().await {
            Some(Ok(message)) => message,
            Some(Err(source)) => return BridgeError::Relay { direction, source },
            None => return BridgeError::PeerClosed { direction },
        };

        match message {
            Message::Text(_) | Message::Binary(_) => {
                trace!(%direction, len = message.len(), "relaying message");
                let mut sink = destination.lock().await;
                if let Err(source) = sink.send(message).await {
                    return BridgeError::Relay { direction, source };
                }
            }
            Message::Pong(_) => {
                if let Some(acks) = &acks {
                    acks.send_replace(Some(Instant::now()));
                }
            }
            Message::Close(frame) => {
                debug!(%direction, ?frame, "close frame received");
                return BridgeError::PeerClosed { direction };
            }
            Message::Ping(_) | Message::Frame(_) => {}
        }
    }
}
