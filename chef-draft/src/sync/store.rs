// Remote store interface and the in-process implementation.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tracing::debug;

use crate::game::chef::PlayerId;
use crate::protocol::{ChangeEvent, GameStateRow, PredictionRow};

/// Buffered change events per subscriber before it starts lagging.
pub const CHANGE_FEED_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("remote store is disconnected")]
    Disconnected,

    #[error("remote store rejected the request: {0}")]
    Rejected(String),

    #[error("failed to encode or decode a row: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}

/// The shared store both clients sync through: one game-state row, a
/// prediction table, a change feed and a presence channel.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn upsert_game_state(&self, row: GameStateRow) -> Result<(), StoreError>;

    /// Upsert on `(episode_number, player)`.
    async fn upsert_prediction(&self, row: PredictionRow) -> Result<(), StoreError>;

    async fn fetch_game_state(&self) -> Result<Option<GameStateRow>, StoreError>;

    async fn fetch_predictions(&self) -> Result<Vec<PredictionRow>, StoreError>;

    /// Row images for every successful write, from any client.
    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent>;

    /// The set of players currently joined.
    fn presence(&self) -> watch::Receiver<BTreeSet<PlayerId>>;

    async fn track(&self, player: PlayerId) -> Result<(), StoreError>;

    async fn untrack(&self, player: PlayerId) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Tables {
    game_state: Option<GameStateRow>,
    predictions: BTreeMap<(u32, PlayerId), PredictionRow>,
    /// Join count per player; a player can hold several connections.
    members: HashMap<PlayerId, usize>,
}

impl Tables {
    fn online(&self) -> BTreeSet<PlayerId> {
        self.members
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(player, _)| *player)
            .collect()
    }
}

/// In-process store. Backs the hub and stands in for it in tests.
pub struct MemoryStore {
    tables: Mutex<Tables>,
    changes: broadcast::Sender<ChangeEvent>,
    presence: watch::Sender<BTreeSet<PlayerId>>,
    offline: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_rows(None, Vec::new())
    }

    /// Start with existing rows, e.g. loaded from disk.
    pub fn with_rows(game_state: Option<GameStateRow>, predictions: Vec<PredictionRow>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        let (presence, _) = watch::channel(BTreeSet::new());
        let tables = Tables {
            game_state,
            predictions: predictions.into_iter().map(|r| (r.key(), r)).collect(),
            members: HashMap::new(),
        };
        MemoryStore {
            tables: Mutex::new(tables),
            changes,
            presence,
            offline: AtomicBool::new(false),
        }
    }

    /// While offline every request fails with [`StoreError::Disconnected`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().expect("memory store mutex poisoned")
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StoreError::Disconnected)
        } else {
            Ok(())
        }
    }

    fn publish(&self, event: ChangeEvent) {
        // No subscribers is fine.
        if self.changes.send(event).is_err() {
            debug!("Change event dropped: no subscribers");
        }
    }

    fn publish_presence(&self, online: BTreeSet<PlayerId>) {
        self.presence.send_replace(online);
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn upsert_game_state(&self, row: GameStateRow) -> Result<(), StoreError> {
        self.check_online()?;
        let event = ChangeEvent::game_state(&row)?;
        self.tables().game_state = Some(row);
        self.publish(event);
        Ok(())
    }

    async fn upsert_prediction(&self, row: PredictionRow) -> Result<(), StoreError> {
        self.check_online()?;
        let event = ChangeEvent::prediction(&row)?;
        self.tables().predictions.insert(row.key(), row);
        self.publish(event);
        Ok(())
    }

    async fn fetch_game_state(&self) -> Result<Option<GameStateRow>, StoreError> {
        self.check_online()?;
        Ok(self.tables().game_state.clone())
    }

    async fn fetch_predictions(&self) -> Result<Vec<PredictionRow>, StoreError> {
        self.check_online()?;
        Ok(self.tables().predictions.values().cloned().collect())
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }

    fn presence(&self) -> watch::Receiver<BTreeSet<PlayerId>> {
        self.presence.subscribe()
    }

    async fn track(&self, player: PlayerId) -> Result<(), StoreError> {
        self.check_online()?;
        let online = {
            let mut tables = self.tables();
            *tables.members.entry(player).or_insert(0) += 1;
            tables.online()
        };
        self.publish_presence(online);
        Ok(())
    }

    async fn untrack(&self, player: PlayerId) -> Result<(), StoreError> {
        self.check_online()?;
        let online = {
            let mut tables = self.tables();
            if let Some(count) = tables.members.get_mut(&player) {
                *count = count.saturating_sub(1);
            }
            tables.online()
        };
        self.publish_presence(online);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::{GameSnapshot, Prediction};

    fn prediction_row(episode: u32, player: PlayerId, chef: &str) -> PredictionRow {
        PredictionRow::from_prediction(
            &Prediction {
                episode_number: episode,
                player,
                chef_id: Some(chef.into()),
                locked: true,
                locked_at: None,
                correct: None,
            },
            None,
        )
    }

    #[tokio::test]
    async fn upsert_publishes_change_and_fetch_returns_row() {
        let store = MemoryStore::new();
        let mut feed = store.subscribe();

        let row = GameStateRow::from_snapshot(&GameSnapshot::seed(), PlayerId::Josh, None);
        store.upsert_game_state(row.clone()).await.unwrap();

        assert_eq!(store.fetch_game_state().await.unwrap(), Some(row.clone()));
        match feed.recv().await.unwrap() {
            ChangeEvent::GameState(value) => {
                let parsed: GameStateRow = serde_json::from_value(value).unwrap();
                assert_eq!(parsed, row);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn predictions_upsert_on_compound_key() {
        let store = MemoryStore::new();
        store
            .upsert_prediction(prediction_row(4, PlayerId::Josh, "machete"))
            .await
            .unwrap();
        store
            .upsert_prediction(prediction_row(4, PlayerId::Josh, "darian"))
            .await
            .unwrap();
        store
            .upsert_prediction(prediction_row(4, PlayerId::Partner, "darian"))
            .await
            .unwrap();

        let rows = store.fetch_predictions().await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].chef_id.as_deref(), Some("darian"));
    }

    #[tokio::test]
    async fn presence_counts_connections() {
        let store = MemoryStore::new();
        let presence = store.presence();

        store.track(PlayerId::Josh).await.unwrap();
        store.track(PlayerId::Josh).await.unwrap();
        store.track(PlayerId::Partner).await.unwrap();
        assert_eq!(presence.borrow().len(), 2);

        store.untrack(PlayerId::Josh).await.unwrap();
        assert!(presence.borrow().contains(&PlayerId::Josh));
        store.untrack(PlayerId::Josh).await.unwrap();
        assert!(!presence.borrow().contains(&PlayerId::Josh));
        assert!(presence.borrow().contains(&PlayerId::Partner));
    }

    #[tokio::test]
    async fn offline_store_rejects_requests() {
        let store = MemoryStore::new();
        store.set_offline(true);
        assert!(matches!(
            store.fetch_game_state().await,
            Err(StoreError::Disconnected)
        ));
        store.set_offline(false);
        assert!(store.fetch_game_state().await.unwrap().is_none());
    }
}
