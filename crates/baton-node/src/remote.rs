use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Duration,
};

use baton_protocol::{ClientMessage, ServerMessage, WireError, SUBPROTOCOL};
use baton_token::{
    ClientId, EventSender, OwnershipEvent, RequestOutcome, RevokeAck, Substrate, TokenError,
    TokenName, TokenSnapshot,
};
use futures_util::{SinkExt, StreamExt};
use tokio::{
    net::TcpStream,
    sync::{mpsc, oneshot, Mutex as AsyncMutex},
};
use tokio_tungstenite::{
    tungstenite::{client::IntoClientRequest, http::HeaderValue, protocol::Message},
    MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;
/// Event sender per token, tagged with the epoch of the connection it was registered on.
type Registrations = Arc<Mutex<HashMap<TokenName, (u64, EventSender)>>>;
type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<ReplyBody>>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// WebSocket endpoint of the coordination server, e.g. `ws://127.0.0.1:7400/baton`.
    pub url: String,
    pub connect_timeout: Duration,
    /// Upper bound on one operation round trip. Must exceed the server's hand-off timeout, since
    /// `relinquish` replies only after the hand-off completes.
    pub request_timeout: Duration,
}

impl RemoteConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

#[derive(Debug)]
struct ReplyBody {
    outcome: Option<RequestOutcome>,
    snapshot: Option<TokenSnapshot>,
    error: Option<WireError>,
}

impl ReplyBody {
    fn into_result(self) -> Result<Self, TokenError> {
        match self.error {
            Some(err) => Err(err.into_token_error()),
            None => Ok(self),
        }
    }
}

#[derive(Clone)]
struct Connection {
    epoch: u64,
    out: mpsc::UnboundedSender<ClientMessage>,
    pending: Pending,
    closed: CancellationToken,
}

/// [`Substrate`] served by a remote `baton-server`, bound to a single client id.
///
/// The connection is opened lazily by the first operation and re-opened by the next operation
/// after it drops. Losing the connection costs every registration its place: the server hands
/// the client's tokens off, so each registration is sent `Revoked` locally and must request again.
pub struct RemoteSubstrate {
    config: RemoteConfig,
    client: ClientId,
    next_request_id: AtomicU64,
    next_epoch: AtomicU64,
    conn: AsyncMutex<Option<Connection>>,
    registrations: Registrations,
}

impl RemoteSubstrate {
    pub fn new(config: RemoteConfig, client: ClientId) -> Self {
        Self {
            config,
            client,
            next_request_id: AtomicU64::new(1),
            next_epoch: AtomicU64::new(1),
            conn: AsyncMutex::new(None),
            registrations: Arc::default(),
        }
    }

    pub fn client(&self) -> &ClientId {
        &self.client
    }

    /// Whether a live connection is currently open.
    pub async fn is_connected(&self) -> bool {
        self.conn
            .lock()
            .await
            .as_ref()
            .is_some_and(|conn| !conn.closed.is_cancelled())
    }

    fn check_client(&self, client: &ClientId) -> Result<(), TokenError> {
        if client == &self.client {
            Ok(())
        } else {
            Err(TokenError::InvalidClientId {
                id: client.to_string(),
            })
        }
    }

    async fn connection(&self) -> Result<Connection, TokenError> {
        let mut conn = self.conn.lock().await;
        if let Some(existing) = conn.as_ref() {
            if !existing.closed.is_cancelled() {
                return Ok(existing.clone());
            }
        }

        let ws = tokio::time::timeout(self.config.connect_timeout, self.handshake())
            .await
            .map_err(|_| TokenError::unavailable("timed out connecting to coordination server"))??;
        let fresh = self.spawn_io(ws);
        *conn = Some(fresh.clone());
        Ok(fresh)
    }

    async fn handshake(&self) -> Result<Ws, TokenError> {
        let mut req = self
            .config
            .url
            .as_str()
            .into_client_request()
            .map_err(|err| TokenError::unavailable(format!("invalid server url: {err}")))?;
        req.headers_mut().insert(
            "sec-websocket-protocol",
            HeaderValue::from_static(SUBPROTOCOL),
        );

        let (mut ws, _) = tokio_tungstenite::connect_async(req)
            .await
            .map_err(|err| TokenError::unavailable(format!("connect failed: {err}")))?;

        let hello = ClientMessage::Hello {
            client_id: self.client.clone(),
        };
        send_frame(&mut ws, &hello).await?;

        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => match ServerMessage::decode(text.as_str()) {
                    Ok(ServerMessage::Welcome { .. }) => break,
                    Ok(other) => {
                        return Err(TokenError::unavailable(format!(
                            "unexpected handshake reply: {other:?}"
                        )))
                    }
                    Err(err) => return Err(TokenError::unavailable(err.to_string())),
                },
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                    return Err(TokenError::unavailable(format!(
                        "server refused session: {reason}"
                    )));
                }
                Some(Ok(_)) => continue,
                Some(Err(err)) => return Err(TokenError::unavailable(err.to_string())),
                None => return Err(TokenError::unavailable("connection closed during handshake")),
            }
        }

        tracing::info!(url = %self.config.url, client = %self.client, "connected to coordination server");
        Ok(ws)
    }

    fn spawn_io(&self, ws: Ws) -> Connection {
        let (mut sink, mut stream) = ws.split();
        let (out, mut out_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let conn = Connection {
            epoch: self.next_epoch.fetch_add(1, Ordering::Relaxed),
            out,
            pending: Pending::default(),
            closed: CancellationToken::new(),
        };

        let closed = conn.closed.clone();
        tokio::spawn(async move {
            loop {
                let msg = tokio::select! {
                    _ = closed.cancelled() => break,
                    msg = out_rx.recv() => match msg {
                        Some(msg) => msg,
                        None => break,
                    },
                };
                let text = match msg.encode() {
                    Ok(text) => text,
                    Err(err) => {
                        tracing::warn!("dropping unencodable frame: {err}");
                        continue;
                    }
                };
                if sink.send(Message::text(text)).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader = Reader {
            conn: conn.clone(),
            registrations: Arc::clone(&self.registrations),
            ack_timeout: self.config.request_timeout,
        };
        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    _ = reader.conn.closed.cancelled() => break,
                    frame = stream.next() => frame,
                };
                match frame {
                    Some(Ok(Message::Text(text))) => match ServerMessage::decode(text.as_str()) {
                        Ok(msg) => reader.dispatch(msg),
                        Err(err) => tracing::warn!("ignoring malformed server frame: {err}"),
                    },
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                }
            }
            reader.connection_lost();
        });

        conn
    }

    async fn call(
        &self,
        build: impl FnOnce(u64) -> ClientMessage,
    ) -> Result<ReplyBody, TokenError> {
        let conn = self.connection().await?;
        self.call_on(&conn, build).await
    }

    async fn call_on(
        &self,
        conn: &Connection,
        build: impl FnOnce(u64) -> ClientMessage,
    ) -> Result<ReplyBody, TokenError> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        lock(&conn.pending).insert(request_id, tx);

        if conn.out.send(build(request_id)).is_err() {
            lock(&conn.pending).remove(&request_id);
            return Err(TokenError::unavailable("connection closed"));
        }

        match tokio::time::timeout(self.config.request_timeout, rx).await {
            Ok(Ok(reply)) => reply.into_result(),
            Ok(Err(_)) => Err(TokenError::unavailable("connection lost before reply")),
            Err(_) => {
                lock(&conn.pending).remove(&request_id);
                Err(TokenError::unavailable("timed out waiting for reply"))
            }
        }
    }
}

impl Drop for RemoteSubstrate {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.get_mut().take() {
            conn.closed.cancel();
        }
    }
}

async fn send_frame(ws: &mut Ws, msg: &ClientMessage) -> Result<(), TokenError> {
    let text = msg
        .encode()
        .map_err(|err| TokenError::unavailable(err.to_string()))?;
    ws.send(Message::text(text))
        .await
        .map_err(|err| TokenError::unavailable(format!("send failed: {err}")))
}

struct Reader {
    conn: Connection,
    registrations: Registrations,
    ack_timeout: Duration,
}

impl Reader {
    fn dispatch(&self, msg: ServerMessage) {
        match msg {
            ServerMessage::Reply {
                request_id,
                outcome,
                snapshot,
                error,
            } => {
                let Some(tx) = lock(&self.conn.pending).remove(&request_id) else {
                    tracing::debug!(request_id, "reply for unknown request");
                    return;
                };
                let _ = tx.send(ReplyBody {
                    outcome,
                    snapshot,
                    error,
                });
            }
            ServerMessage::Granted { token } => {
                let events = self.registered(&token);
                match events {
                    Some(events) => {
                        let _ = events.send(OwnershipEvent::Granted { token });
                    }
                    None => tracing::warn!(token = %token, "granted a token with no registration"),
                }
            }
            ServerMessage::Revoked { token } => {
                let (ack, waiter) = RevokeAck::new();
                let events = self.registered(&token);
                if let Some(events) = events {
                    let _ = events.send(OwnershipEvent::Revoked {
                        token: token.clone(),
                        ack,
                    });
                }
                // Forward the local ack (or its drop) to the server once the owner has stopped.
                let out = self.conn.out.clone();
                let timeout = self.ack_timeout;
                tokio::spawn(async move {
                    let outcome = waiter.wait(timeout).await;
                    tracing::debug!(token = %token, ?outcome, "revocation handled");
                    let _ = out.send(ClientMessage::RevokeAck { token });
                });
            }
            ServerMessage::Welcome { .. } => {}
        }
    }

    fn registered(&self, token: &TokenName) -> Option<EventSender> {
        lock(&self.registrations)
            .get(token)
            .filter(|(epoch, _)| *epoch == self.conn.epoch)
            .map(|(_, events)| events.clone())
    }

    fn connection_lost(self) {
        self.conn.closed.cancel();
        lock(&self.conn.pending).clear();

        let lost: Vec<(TokenName, EventSender)> = {
            let mut registrations = lock(&self.registrations);
            let tokens: Vec<TokenName> = registrations
                .iter()
                .filter(|(_, (epoch, _))| *epoch == self.conn.epoch)
                .map(|(token, _)| token.clone())
                .collect();
            tokens
                .into_iter()
                .filter_map(|token| {
                    let (_, events) = registrations.remove(&token)?;
                    Some((token, events))
                })
                .collect()
        };
        if !lost.is_empty() {
            tracing::warn!(tokens = lost.len(), "connection to coordination server lost");
        }
        for (token, events) in lost {
            // Nobody is waiting on the server side any more; the ack only orders local teardown.
            let (ack, _waiter) = RevokeAck::new();
            let _ = events.send(OwnershipEvent::Revoked { token, ack });
        }
    }
}

#[async_trait::async_trait]
impl Substrate for RemoteSubstrate {
    async fn request(
        &self,
        token: &TokenName,
        client: &ClientId,
        events: EventSender,
    ) -> Result<RequestOutcome, TokenError> {
        self.check_client(client)?;
        let conn = self.connection().await?;
        {
            let mut registrations = lock(&self.registrations);
            registrations.retain(|_, (_, events)| !events.is_closed());
            // Registered before the request goes out so an immediate `granted` finds it.
            registrations.insert(token.clone(), (conn.epoch, events));
        }

        let reply = self
            .call_on(&conn, |request_id| ClientMessage::Request {
                request_id,
                token: token.clone(),
            })
            .await;
        match reply {
            Ok(ReplyBody {
                outcome: Some(outcome),
                ..
            }) => Ok(outcome),
            Ok(_) => Err(TokenError::unavailable("request reply carried no outcome")),
            Err(err) => {
                lock(&self.registrations).remove(token);
                Err(err)
            }
        }
    }

    async fn relinquish(&self, token: &TokenName, client: &ClientId) -> Result<(), TokenError> {
        self.check_client(client)?;
        self.call(|request_id| ClientMessage::Relinquish {
            request_id,
            token: token.clone(),
        })
        .await?;
        Ok(())
    }

    async fn withdraw(&self, token: &TokenName, client: &ClientId) -> Result<(), TokenError> {
        self.check_client(client)?;
        self.call(|request_id| ClientMessage::Withdraw {
            request_id,
            token: token.clone(),
        })
        .await?;
        Ok(())
    }

    async fn disconnect(&self, client: &ClientId) -> Result<(), TokenError> {
        self.check_client(client)?;
        // Voluntary: registrations are dropped silently rather than revoked.
        lock(&self.registrations).clear();
        if let Some(conn) = self.conn.lock().await.take() {
            conn.closed.cancel();
            tracing::info!(client = %self.client, "disconnected from coordination server");
        }
        Ok(())
    }

    async fn snapshot(&self, token: &TokenName) -> Result<Option<TokenSnapshot>, TokenError> {
        let reply = self
            .call(|request_id| ClientMessage::Snapshot {
                request_id,
                token: token.clone(),
            })
            .await?;
        Ok(reply.snapshot)
    }
}
