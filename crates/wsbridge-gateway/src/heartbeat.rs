//! Client heartbeat
//!
//! Sends a ping on a fixed interval and watches for pongs. A pong that
//! never arrives is only logged; the loop ends when a ping can't be sent.

use std::time::Duration;

use futures_util::{Sink, SinkExt};
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, warn};

use crate::error::BridgeError;
use crate::relay::SharedSink;

/// Deadline for a single ping to be written.
pub const PING_DEADLINE: Duration = Duration::from_secs(5);

/// Periodic ping loop for one client connection
#[derive(Debug, Clone, Copy)]
pub struct Heartbeat {
    interval: Duration,
    deadline: Duration,
}

impl Heartbeat {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            deadline: PING_DEADLINE,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Run until a ping fails, returning the failure.
    ///
    /// `acks` carries the time of the most recent pong seen on the
    /// connection. The loop does not close the connection itself.
    pub async fn run<W>(
        self,
        sink: SharedSink<W>,
        mut acks: watch::Receiver<Option<Instant>>,
    ) -> BridgeError
    where
        W: Sink<Message, Error = WsError> + Unpin,
    {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut acks_open = true;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.ping(&sink).await {
                        warn!(error = %e, "Failed to send ping, stopping heartbeat");
                        return e;
                    }
                    debug!("Sent ping to client");
                }
                changed = acks.changed(), if acks_open => {
                    match changed {
                        Ok(()) => debug!("Received pong from client"),
                        Err(_) => acks_open = false,
                    }
                }
            }
        }
    }

    async fn ping<W>(&self, sink: &SharedSink<W>) -> Result<(), BridgeError>
    where
        W: Sink<Message, Error = WsError> + Unpin,
    {
        let send = async {
            let mut sink = sink.lock().await;
            sink.send(Message::Ping(Vec::new())).await
        };
        match tokio::time::timeout(self.deadline, send).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(BridgeError::Ping(e)),
            Err(_) => Err(BridgeError::PingTimeout(self.deadline)),
        }
    }
}
