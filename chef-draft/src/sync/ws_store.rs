// WebSocket client for the hub, exposed as a RemoteStore.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures_util::stream::Stream;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info, warn};

use crate::game::chef::PlayerId;
use crate::protocol::{ChangeEvent, ClientMessage, GameStateRow, PredictionRow, ServerMessage};
use crate::sync::store::{RemoteStore, StoreError, CHANGE_FEED_CAPACITY};

type PendingReplies = Arc<Mutex<HashMap<u64, oneshot::Sender<ServerMessage>>>>;

fn transport_error(e: tungstenite::Error) -> StoreError {
    StoreError::Io(std::io::Error::other(e.to_string()))
}

/// Where the reader task delivers what the hub sends.
#[derive(Clone)]
pub struct ServerRouter {
    pending: PendingReplies,
    changes: broadcast::Sender<ChangeEvent>,
    presence: Arc<watch::Sender<BTreeSet<PlayerId>>>,
    closed: Arc<AtomicBool>,
}

impl ServerRouter {
    fn pending(&self) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<ServerMessage>>> {
        self.pending.lock().expect("pending replies mutex poisoned")
    }

    /// Deliver one decoded hub message.
    pub fn route(&self, msg: ServerMessage) {
        let request_id = match &msg {
            ServerMessage::Change { event } => {
                let _ = self.changes.send(event.clone());
                return;
            }
            ServerMessage::Presence { players } => {
                self.presence.send_replace(players.clone());
                return;
            }
            ServerMessage::Ack { request_id } | ServerMessage::StateSnapshot { request_id, .. } => {
                *request_id
            }
            ServerMessage::Error {
                request_id: Some(request_id),
                ..
            } => *request_id,
            ServerMessage::Error {
                request_id: None,
                message,
            } => {
                warn!("Hub reported an error: {message}");
                return;
            }
        };
        match self.pending().remove(&request_id) {
            Some(reply) => {
                let _ = reply.send(msg);
            }
            None => debug!("Reply for unknown request {request_id}"),
        }
    }

    /// Mark the connection dead and fail every outstanding request.
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.pending().clear();
    }
}

/// Read frames from the hub until the stream ends, routing each message.
///
/// Generic over the stream so it can be driven from memory in tests.
pub async fn process_server_stream<St>(mut stream: St, router: &ServerRouter)
where
    St: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                Ok(msg) => router.route(msg),
                Err(e) => warn!("Ignoring malformed hub message: {e}"),
            },
            Ok(Message::Close(_)) => {
                info!("Hub closed the connection");
                break;
            }
            Err(e) => {
                warn!("Hub connection error: {e}");
                break;
            }
            _ => {}
        }
    }
    router.close();
}

/// A [`RemoteStore`] backed by a hub connection. Requests are correlated by
/// id; once the socket drops every call fails with
/// [`StoreError::Disconnected`].
pub struct WsStore {
    outgoing: mpsc::UnboundedSender<ClientMessage>,
    router: ServerRouter,
    next_id: AtomicU64,
    tasks: Vec<JoinHandle<()>>,
}

impl WsStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let (ws, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(transport_error)?;
        info!("Connected to hub at {url}");
        let (mut sink, stream) = ws.split();

        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        let (presence, _) = watch::channel(BTreeSet::new());
        let router = ServerRouter {
            pending: Arc::new(Mutex::new(HashMap::new())),
            changes,
            presence: Arc::new(presence),
            closed: Arc::new(AtomicBool::new(false)),
        };

        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let writer = tokio::spawn(async move {
            while let Some(msg) = outgoing_rx.recv().await {
                let text = match serde_json::to_string(&msg) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Failed to encode request {}: {e}", msg.request_id());
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    warn!("Failed to send to hub: {e}");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader_router = router.clone();
        let reader = tokio::spawn(async move {
            process_server_stream(stream, &reader_router).await;
        });

        Ok(WsStore {
            outgoing,
            router,
            next_id: AtomicU64::new(1),
            tasks: vec![writer, reader],
        })
    }

    pub fn is_connected(&self) -> bool {
        !self.router.closed.load(Ordering::SeqCst)
    }

    async fn request<F>(&self, build: F) -> Result<ServerMessage, StoreError>
    where
        F: FnOnce(u64) -> ClientMessage,
    {
        let request_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (reply_tx, reply_rx) = oneshot::channel();
        self.router.pending().insert(request_id, reply_tx);

        if !self.is_connected() || self.outgoing.send(build(request_id)).is_err() {
            self.router.pending().remove(&request_id);
            return Err(StoreError::Disconnected);
        }

        match reply_rx.await.map_err(|_| StoreError::Disconnected)? {
            ServerMessage::Error { message, .. } => Err(StoreError::Rejected(message)),
            reply => Ok(reply),
        }
    }

    async fn expect_ack<F>(&self, build: F) -> Result<(), StoreError>
    where
        F: FnOnce(u64) -> ClientMessage,
    {
        match self.request(build).await? {
            ServerMessage::Ack { .. } => Ok(()),
            other => Err(StoreError::Rejected(format!("unexpected reply: {other:?}"))),
        }
    }

    async fn fetch(&self) -> Result<(Option<GameStateRow>, Vec<PredictionRow>), StoreError> {
        match self
            .request(|request_id| ClientMessage::FetchState { request_id })
            .await?
        {
            ServerMessage::StateSnapshot {
                game_state,
                predictions,
                ..
            } => Ok((game_state, predictions)),
            other => Err(StoreError::Rejected(format!("unexpected reply: {other:?}"))),
        }
    }
}

impl Drop for WsStore {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[async_trait]
impl RemoteStore for WsStore {
    async fn upsert_game_state(&self, row: GameStateRow) -> Result<(), StoreError> {
        self.expect_ack(|request_id| ClientMessage::UpsertGameState { request_id, row })
            .await
    }

    async fn upsert_prediction(&self, row: PredictionRow) -> Result<(), StoreError> {
        self.expect_ack(|request_id| ClientMessage::UpsertPrediction { request_id, row })
            .await
    }

    async fn fetch_game_state(&self) -> Result<Option<GameStateRow>, StoreError> {
        Ok(self.fetch().await?.0)
    }

    async fn fetch_predictions(&self) -> Result<Vec<PredictionRow>, StoreError> {
        Ok(self.fetch().await?.1)
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.router.changes.subscribe()
    }

    fn presence(&self) -> watch::Receiver<BTreeSet<PlayerId>> {
        self.router.presence.subscribe()
    }

    async fn track(&self, player: PlayerId) -> Result<(), StoreError> {
        self.expect_ack(|request_id| ClientMessage::Track { request_id, player })
            .await
    }

    async fn untrack(&self, player: PlayerId) -> Result<(), StoreError> {
        self.expect_ack(|request_id| ClientMessage::Untrack { request_id, player })
            .await
    }
}
