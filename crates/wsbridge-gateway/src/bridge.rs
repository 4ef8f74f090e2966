//! Session negotiation
//!
//! [`Bridge`] decides whether an inbound request is bridged at all, dials
//! the backend, answers the client's upgrade with the backend's subprotocol
//! and then owns the session until one relay direction fails.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::header::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

use crate::config::BridgeConfig;
use crate::dialer::{self, BackendStream};
use crate::error::BridgeError;
use crate::handshake;
use crate::heartbeat::Heartbeat;
use crate::registry::{ConnectionId, ConnectionRegistry};
use crate::relay::{relay, Direction, SharedSink};

/// How long a close frame may take to go out before the transport is dropped.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// One bridged connection pair
pub struct Session<C, B> {
    pub id: ConnectionId,
    pub client: WebSocketStream<C>,
    pub backend: WebSocketStream<B>,
    /// Subprotocol the client side ended up with
    pub client_protocol: Option<String>,
    /// Subprotocol the backend selected
    pub backend_protocol: Option<String>,
    /// Path of the originating request
    pub path: String,
    /// Backend URL that was dialed
    pub target: String,
}

/// The websocket bridge handler
#[derive(Debug)]
pub struct Bridge {
    config: BridgeConfig,
    registry: ConnectionRegistry,
}

impl Bridge {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            registry: ConnectionRegistry::new(),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// A websocket upgrade for an allow-listed path.
    pub fn is_eligible<B>(&self, req: &axum::http::Request<B>) -> bool {
        handshake::is_upgrade_request(req.headers()) && self.config.allows(req.uri().path())
    }

    /// Serve one request, passing anything not bridged to `next` untouched.
    pub async fn handle(self: Arc<Self>, req: Request, next: Next) -> Response {
        if !self.is_eligible(&req) {
            trace!(path = %req.uri().path(), "not a bridged upgrade, passing through");
            return next.run(req).await;
        }

        match self.open(req).await {
            Ok(response) => response,
            Err(e) => {
                error!(error = %e, "websocket bridge failed");
                e.into_response()
            }
        }
    }

    /// Dial the backend, answer the client and start the session task.
    async fn open(self: Arc<Self>, mut req: Request) -> Result<Response, BridgeError> {
        let offered = handshake::offered_subprotocols(req.headers());
        let target = self.config.backend_url(req.uri());
        let forwarded = handshake::forward_headers(req.headers());

        let (mut backend, backend_protocol) =
            self.dial_backend(&target, forwarded, &offered).await?;

        let client_protocol = handshake::select_subprotocol(&offered, backend_protocol.as_deref());
        let response = match handshake::accept_key(&req).and_then(|accept| {
            handshake::switching_protocols(&accept, client_protocol.as_deref())
        }) {
            Ok(response) => response,
            Err(e) => {
                close_stream(&mut backend).await;
                return Err(e);
            }
        };

        let on_upgrade = hyper::upgrade::on(&mut req);
        let id = ConnectionId::new();
        let path = req.uri().path().to_string();
        let span = info_span!("session", session_id = %id, path = %path);

        tokio::spawn(
            async move {
                let upgraded = match on_upgrade.await {
                    Ok(upgraded) => upgraded,
                    Err(e) => {
                        let err = BridgeError::Upgrade(e);
                        warn!(error = %err, "client upgrade failed");
                        close_stream(&mut backend).await;
                        return;
                    }
                };
                let client =
                    WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None)
                        .await;

                let session = Session {
                    id,
                    client,
                    backend,
                    client_protocol,
                    backend_protocol,
                    path,
                    target,
                };
                let reason = self.run_session(session).await;
                if reason.is_closure() {
                    info!(reason = %reason, "session ended");
                } else {
                    warn!(error = %reason, "session ended with error");
                }
            }
            .instrument(span),
        );

        Ok(response)
    }

    /// Open the backend connection, offering the client's subprotocols.
    ///
    /// Returns the stream and the subprotocol the backend selected, if any.
    pub async fn dial_backend(
        &self,
        target: &str,
        headers: HeaderMap,
        offered: &[String],
    ) -> Result<(BackendStream, Option<String>), BridgeError> {
        dialer::dial(target, headers, offered).await
    }

    /// Run an upgraded session to completion.
    ///
    /// Returns the error that ended it: the subprotocol mismatch if the two
    /// sides disagree, otherwise whichever relay direction stopped first.
    /// Both connections are closed before this returns.
    pub async fn run_session<C, B>(&self, session: Session<C, B>) -> BridgeError
    where
        C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
        B: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let Session {
            id,
            mut client,
            mut backend,
            client_protocol,
            backend_protocol,
            path,
            target,
        } = session;

        if client_protocol != backend_protocol {
            close_stream(&mut client).await;
            close_stream(&mut backend).await;
            return BridgeError::SubprotocolMismatch {
                backend: backend_protocol.unwrap_or_default(),
                client: client_protocol.unwrap_or_default(),
            };
        }

        if !self.registry.register(id) {
            warn!(session_id = %id, "connection was already registered");
        }
        info!(
            session_id = %id,
            path = %path,
            target = %target,
            subprotocol = backend_protocol.as_deref().unwrap_or(""),
            "session started"
        );

        let (client_sink, client_stream) = client.split();
        let (backend_sink, backend_stream) = backend.split();
        let client_sink = Arc::new(Mutex::new(client_sink));
        let backend_sink = Arc::new(Mutex::new(backend_sink));

        let (ack_tx, ack_rx) = watch::channel::<Option<Instant>>(None);
        let heartbeat = {
            let sink = Arc::clone(&client_sink);
            let heartbeat = Heartbeat::new(self.config.interval());
            tokio::spawn(
                async move {
                    let _ = heartbeat.run(sink, ack_rx).await;
                }
                .in_current_span(),
            )
        };

        let (err_tx, mut err_rx) = mpsc::channel::<BridgeError>(2);
        let upstream = spawn_relay(
            Direction::ClientToBackend,
            client_stream,
            Arc::clone(&backend_sink),
            Some(ack_tx),
            err_tx.clone(),
        );
        let downstream = spawn_relay(
            Direction::BackendToClient,
            backend_stream,
            Arc::clone(&client_sink),
            None,
            err_tx,
        );

        let reason = err_rx.recv().await.unwrap_or(BridgeError::RelayAborted);

        for task in [upstream, downstream, heartbeat] {
            task.abort();
            let _ = task.await;
        }
        close_sink(&client_sink).await;
        close_sink(&backend_sink).await;

        self.registry.unregister(&id);
        debug!(session_id = %id, active = self.registry.len(), "session torn down");

        reason
    }
}

fn spawn_relay<R, W>(
    direction: Direction,
    source: R,
    destination: SharedSink<W>,
    acks: Option<watch::Sender<Option<Instant>>>,
    errors: mpsc::Sender<BridgeError>,
) -> JoinHandle<()>
where
    R: Stream<Item = Result<Message, WsError>> + Unpin + Send + 'static,
    W: Sink<Message, Error = WsError> + Unpin + Send + 'static,
{
    tokio::spawn(
        async move {
            let reason = relay(direction, source, destination, acks).await;
            let _ = errors.send(reason).await;
        }
        .in_current_span(),
    )
}

async fn close_stream<S>(ws: &mut WebSocketStream<S>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match tokio::time::timeout(CLOSE_TIMEOUT, ws.close(None)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => trace!(error = %e, "close failed"),
        Err(_) => trace!("close timed out"),
    }
}

async fn close_sink<W>(sink: &SharedSink<W>)
where
    W: Sink<Message, Error = WsError> + Unpin,
{
    let mut sink = sink.lock().await;
    match tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => trace!(error = %e, "close failed"),
        Err(_) => trace!("close timed out"),
    }
}

/// axum middleware entry point, for `middleware::from_fn_with_state`.
pub async fn bridge_middleware(
    State(bridge): State<Arc<Bridge>>,
    req: Request,
    next: Next,
) -> Response {
    bridge.handle(req, next).await
}
