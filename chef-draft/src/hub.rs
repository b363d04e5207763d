// WebSocket hub: the shared store both clients sync through.

use std::sync::Arc;

use anyhow::Context;
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info, warn};

use crate::db::Database;
use crate::game::chef::PlayerId;
use crate::protocol::{ChangeEvent, ClientMessage, ServerMessage, SINGLETON_ROW_ID};
use crate::sync::store::{MemoryStore, RemoteStore, StoreError};

/// Request handling shared by every connection: an in-memory store with
/// optional write-through to SQLite.
pub struct Hub {
    store: Arc<MemoryStore>,
    db: Option<Database>,
    /// Held across persist + upsert so SQLite and memory agree on the
    /// last writer.
    writes: Mutex<()>,
}

impl Hub {
    /// A hub that keeps rows in memory only.
    pub fn in_memory() -> Self {
        Hub {
            store: Arc::new(MemoryStore::new()),
            db: None,
            writes: Mutex::new(()),
        }
    }

    /// A hub backed by `db`, starting from the rows already stored there.
    pub fn with_database(db: Database) -> anyhow::Result<Self> {
        let game_state = db
            .load_game_state_row()
            .context("failed to load game-state row")?;
        let predictions = db
            .load_prediction_rows()
            .context("failed to load prediction rows")?;
        info!(
            "Hub loaded {} game-state row and {} predictions",
            usize::from(game_state.is_some()),
            predictions.len()
        );
        Ok(Hub {
            store: Arc::new(MemoryStore::with_rows(game_state, predictions)),
            db: Some(db),
            writes: Mutex::new(()),
        })
    }

    pub fn store(&self) -> Arc<MemoryStore> {
        self.store.clone()
    }

    /// Answer one request. `tracked` holds the players this connection has
    /// joined as, so they can be untracked when it drops.
    pub async fn handle_client_message(
        &self,
        msg: ClientMessage,
        tracked: &mut Vec<PlayerId>,
    ) -> ServerMessage {
        let request_id = msg.request_id();
        let result = match msg {
            ClientMessage::UpsertGameState { row, .. } => {
                if row.id != SINGLETON_ROW_ID {
                    Err(StoreError::Rejected(format!("unknown game-state row `{}`", row.id)))
                } else {
                    let _guard = self.writes.lock().await;
                    if let Some(db) = &self.db {
                        if let Err(e) = db.save_game_state_row(&row) {
                            warn!("Failed to persist game-state row: {e:#}");
                        }
                    }
                    self.store
                        .upsert_game_state(row)
                        .await
                        .map(|_| ServerMessage::Ack { request_id })
                }
            }
            ClientMessage::UpsertPrediction { row, .. } => {
                let _guard = self.writes.lock().await;
                if let Some(db) = &self.db {
                    if let Err(e) = db.save_prediction_row(&row) {
                        warn!("Failed to persist prediction row: {e:#}");
                    }
                }
                self.store
                    .upsert_prediction(row)
                    .await
                    .map(|_| ServerMessage::Ack { request_id })
            }
            ClientMessage::FetchState { .. } => self.fetch(request_id).await,
            ClientMessage::Track { player, .. } => {
                let result = self.store.track(player).await;
                if result.is_ok() {
                    tracked.push(player);
                }
                result.map(|_| ServerMessage::Ack { request_id })
            }
            ClientMessage::Untrack { player, .. } => {
                match tracked.iter().position(|p| *p == player) {
                    Some(pos) => {
                        tracked.remove(pos);
                        self.store
                            .untrack(player)
                            .await
                            .map(|_| ServerMessage::Ack { request_id })
                    }
                    None => Ok(ServerMessage::Ack { request_id }),
                }
            }
        };

        result.unwrap_or_else(|e| ServerMessage::Error {
            request_id: Some(request_id),
            message: e.to_string(),
        })
    }

    async fn fetch(&self, request_id: u64) -> Result<ServerMessage, StoreError> {
        Ok(ServerMessage::StateSnapshot {
            request_id,
            game_state: self.store.fetch_game_state().await?,
            predictions: self.store.fetch_predictions().await?,
        })
    }

    /// Change events carrying every current row, replayed to a connection
    /// that fell behind the change feed.
    pub async fn resync_events(&self) -> Result<Vec<ChangeEvent>, StoreError> {
        let mut events = Vec::new();
        if let Some(row) = self.store.fetch_game_state().await? {
            events.push(ChangeEvent::game_state(&row)?);
        }
        for row in self.store.fetch_predictions().await? {
            events.push(ChangeEvent::prediction(&row)?);
        }
        Ok(events)
    }

    /// Release presence held by a dropped connection.
    pub async fn disconnect(&self, tracked: Vec<PlayerId>) {
        for player in tracked {
            if let Err(e) = self.store.untrack(player).await {
                warn!("Failed to untrack {player}: {e}");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// Bind the hub's TCP listener. Use port 0 for an ephemeral port.
pub async fn bind(addr: &str) -> anyhow::Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind hub on {addr}"))
}

/// Accept connections forever, serving each on its own task.
pub async fn run(listener: TcpListener, hub: Arc<Hub>) -> anyhow::Result<()> {
    let local_addr = listener.local_addr()?;
    info!("Hub listening on {local_addr}");

    loop {
        let (stream, addr) = listener.accept().await?;
        let hub = hub.clone();
        tokio::spawn(async move {
            serve_connection(stream, addr.to_string(), hub).await;
        });
    }
}

async fn send<S>(sink: &mut S, msg: &ServerMessage) -> Result<(), tungstenite::Error>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let text = serde_json::to_string(msg)
        .map_err(|e| tungstenite::Error::Io(std::io::Error::other(e)))?;
    sink.send(Message::Text(text.into())).await
}

/// Serve one client: answer its requests and push every store change and
/// presence update until either side closes.
async fn serve_connection(stream: TcpStream, addr: String, hub: Arc<Hub>) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake failed for {addr}: {e}");
            return;
        }
    };
    info!("Client connected from {addr}");

    let (mut sink, mut read) = ws.split();
    let store = hub.store();
    let mut changes = store.subscribe();
    let mut presence = store.presence();
    let mut tracked = Vec::new();

    let initial = ServerMessage::Presence {
        players: presence.borrow_and_update().clone(),
    };
    if send(&mut sink, &initial).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        let reply = match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(msg) => hub.handle_client_message(msg, &mut tracked).await,
                            Err(e) => ServerMessage::Error {
                                request_id: None,
                                message: format!("malformed request: {e}"),
                            },
                        };
                        if send(&mut sink, &reply).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Client {addr} disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error from {addr}: {e}");
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }

            event = changes.recv() => {
                match event {
                    Ok(event) => {
                        if send(&mut sink, &ServerMessage::Change { event }).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Client {addr} missed {missed} change events, replaying rows");
                        let events = match hub.resync_events().await {
                            Ok(events) => events,
                            Err(e) => {
                                warn!("Failed to read rows for {addr}: {e}");
                                break;
                            }
                        };
                        let mut sent = true;
                        for event in events {
                            if send(&mut sink, &ServerMessage::Change { event }).await.is_err() {
                                sent = false;
                                break;
                            }
                        }
                        if !sent {
                            break;
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            changed = presence.changed() => {
                if changed.is_err() {
                    break;
                }
                let players = presence.borrow_and_update().clone();
                debug!("Presence for {addr}: {players:?}");
                if send(&mut sink, &ServerMessage::Presence { players }).await.is_err() {
                    break;
                }
            }
        }
    }

    hub.disconnect(tracked).await;
}
