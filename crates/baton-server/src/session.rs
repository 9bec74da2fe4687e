use std::{
    borrow::Cow,
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
};

use anyhow::anyhow;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use baton_protocol::{ClientMessage, ServerMessage};
use baton_token::{
    event_channel, ClientId, EventReceiver, OwnershipEvent, RevokeAck, Substrate, TokenName,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::server::AppState;

/// Acks of revocations forwarded to the client, completed when its `revokeAck` arrives.
type PendingAcks = Arc<Mutex<HashMap<TokenName, RevokeAck>>>;

enum Outbound {
    Frame(ServerMessage),
    Close(u16, &'static str),
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Reservation of a client id for the lifetime of one session.
struct ClaimedClient {
    id: ClientId,
    clients: Arc<Mutex<HashSet<ClientId>>>,
}

impl ClaimedClient {
    fn claim(clients: &Arc<Mutex<HashSet<ClientId>>>, id: ClientId) -> Option<Self> {
        if !lock(clients).insert(id.clone()) {
            return None;
        }
        Some(Self {
            id,
            clients: Arc::clone(clients),
        })
    }
}

impl Drop for ClaimedClient {
    fn drop(&mut self) {
        lock(&self.clients).remove(&self.id);
    }
}

pub(crate) async fn run_session(
    mut socket: WebSocket,
    state: AppState,
    session_id: u64,
) -> anyhow::Result<()> {
    let client = match handshake(&mut socket, &state).await {
        Ok(client) => client,
        Err(reason) => {
            state.metrics.session_rejected();
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: close_code::POLICY,
                    reason: Cow::Owned(reason.clone()),
                })))
                .await;
            return Err(anyhow!("handshake rejected: {reason}"));
        }
    };

    state.metrics.session_opened();
    tracing::info!(session_id, client = %client.id, "client connected");

    let result = serve(socket, &state, &client.id).await;

    state.metrics.session_closed();
    // Hands off everything the client still owns and drops its queue entries.
    if let Err(err) = state.substrate.disconnect(&client.id).await {
        tracing::warn!(client = %client.id, "disconnect cleanup failed: {err}");
    }
    tracing::info!(session_id, client = %client.id, "client disconnected");
    result
}

async fn handshake(socket: &mut WebSocket, state: &AppState) -> Result<ClaimedClient, String> {
    let text = tokio::time::timeout(state.cfg.hello_timeout, next_text(socket))
        .await
        .map_err(|_| "timed out waiting for hello".to_string())??;

    let client_id = match ClientMessage::decode(&text) {
        Ok(ClientMessage::Hello { client_id }) => client_id,
        Ok(_) => return Err("first frame must be hello".to_string()),
        Err(err) => {
            state.metrics.protocol_error();
            return Err(err.to_string());
        }
    };

    let client = ClaimedClient::claim(&state.clients, client_id)
        .ok_or_else(|| "client id already connected".to_string())?;

    let welcome = ServerMessage::Welcome {
        client_id: client.id.clone(),
    }
    .encode()
    .map_err(|err| err.to_string())?;
    socket
        .send(Message::Text(welcome))
        .await
        .map_err(|err| err.to_string())?;
    Ok(client)
}

async fn next_text(socket: &mut WebSocket) -> Result<String, String> {
    while let Some(msg) = socket.recv().await {
        match msg.map_err(|err| err.to_string())? {
            Message::Text(text) => return Ok(text),
            Message::Binary(_) => return Err("binary frames are not supported".to_string()),
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => continue,
        }
    }
    Err("connection closed before hello".to_string())
}

/// Reader loop. Operations run on a separate ordered worker so a `relinquish` waiting on this
/// client's own `revokeAck` never blocks the reader that delivers it.
async fn serve(socket: WebSocket, state: &AppState, client: &ClientId) -> anyhow::Result<()> {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();
    let cancel = state.sessions.child_token();
    let acks = PendingAcks::default();

    tokio::spawn(async move {
        while let Some(out) = out_rx.recv().await {
            let msg = match out {
                Outbound::Frame(frame) => match frame.encode() {
                    Ok(text) => Message::Text(text),
                    Err(err) => {
                        tracing::warn!("dropping unencodable frame: {err}");
                        continue;
                    }
                },
                Outbound::Close(code, reason) => {
                    let _ = ws_tx
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: Cow::Borrowed(reason),
                        })))
                        .await;
                    break;
                }
            };
            if ws_tx.send(msg).await.is_err() {
                break;
            }
        }
    });

    let (ops_tx, ops_rx) = mpsc::unbounded_channel::<ClientMessage>();
    let worker = tokio::spawn(run_operations(
        state.clone(),
        client.clone(),
        ops_rx,
        out_tx.clone(),
        Arc::clone(&acks),
        cancel.clone(),
    ));

    let result = loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = out_tx.send(Outbound::Close(close_code::AWAY, "shutting down"));
                break Ok(());
            }
            frame = ws_rx.next() => frame,
        };

        let text = match frame {
            None | Some(Ok(Message::Close(_))) => break Ok(()),
            Some(Err(err)) => break Err(anyhow!("websocket error: {err}")),
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Binary(_))) => {
                state.metrics.protocol_error();
                let _ = out_tx.send(Outbound::Close(
                    close_code::POLICY,
                    "binary frames are not supported",
                ));
                break Err(anyhow!("binary frame"));
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
        };

        match ClientMessage::decode(&text) {
            Ok(ClientMessage::RevokeAck { token }) => acknowledge(&acks, &token, client),
            Ok(ClientMessage::Hello { .. }) => {
                state.metrics.protocol_error();
                let _ = out_tx.send(Outbound::Close(close_code::POLICY, "duplicate hello"));
                break Err(anyhow!("duplicate hello"));
            }
            Ok(op) => {
                let _ = ops_tx.send(op);
            }
            Err(err) => {
                state.metrics.protocol_error();
                let _ = out_tx.send(Outbound::Close(close_code::POLICY, "malformed frame"));
                break Err(err.into());
            }
        }
    };

    cancel.cancel();
    drop(ops_tx);
    // Dropped acks count as acknowledged; a pending hand-off can proceed.
    lock(&acks).clear();
    let _ = worker.await;
    result
}

fn acknowledge(acks: &PendingAcks, token: &TokenName, client: &ClientId) {
    match lock(acks).remove(token) {
        Some(ack) => {
            tracing::debug!(token = %token, client = %client, "revoke acknowledged");
            ack.complete();
        }
        None => tracing::debug!(token = %token, client = %client, "unexpected revokeAck"),
    }
}

async fn run_operations(
    state: AppState,
    client: ClientId,
    mut ops: mpsc::UnboundedReceiver<ClientMessage>,
    out: mpsc::UnboundedSender<Outbound>,
    acks: PendingAcks,
    cancel: CancellationToken,
) {
    while let Some(op) = ops.recv().await {
        if cancel.is_cancelled() {
            break;
        }
        state.metrics.operation();

        let reply = match op {
            ClientMessage::Request { request_id, token } => {
                let (events_tx, events_rx) = event_channel();
                tokio::spawn(forward_events(
                    events_rx,
                    out.clone(),
                    Arc::clone(&acks),
                    cancel.clone(),
                ));
                let result = state.substrate.request(&token, &client, events_tx).await;
                ServerMessage::outcome_reply(request_id, &result)
            }
            ClientMessage::Relinquish { request_id, token } => {
                let result = state.substrate.relinquish(&token, &client).await;
                ServerMessage::done_reply(request_id, &result)
            }
            ClientMessage::Withdraw { request_id, token } => {
                let result = state.substrate.withdraw(&token, &client).await;
                ServerMessage::done_reply(request_id, &result)
            }
            ClientMessage::Snapshot { request_id, token } => {
                let result = state.substrate.snapshot(&token).await;
                ServerMessage::snapshot_reply(request_id, &result)
            }
            ClientMessage::Hello { .. } | ClientMessage::RevokeAck { .. } => continue,
        };

        if out.send(Outbound::Frame(reply)).is_err() {
            break;
        }
    }
}

/// Relays one registration's ownership events to the client.
async fn forward_events(
    mut events: EventReceiver,
    out: mpsc::UnboundedSender<Outbound>,
    acks: PendingAcks,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let frame = match event {
            OwnershipEvent::Granted { token } => ServerMessage::Granted { token },
            OwnershipEvent::Revoked { token, ack } => {
                let mut pending = lock(&acks);
                // Checked under the lock so session teardown cannot miss this ack.
                if cancel.is_cancelled() {
                    break;
                }
                pending.insert(token.clone(), ack);
                ServerMessage::Revoked { token }
            }
        };
        if out.send(Outbound::Frame(frame)).is_err() {
            break;
        }
    }
}
