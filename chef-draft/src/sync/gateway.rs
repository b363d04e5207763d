// Outbound sync: decides what to write to the remote store and when.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::debug;

use crate::game::chef::PlayerId;
use crate::game::state::{GameSnapshot, Prediction};
use crate::protocol::{GameStateRow, PredictionRow};

/// Default quiet period before the game-state row is written.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);

/// How many unacknowledged write ids are remembered for echo detection.
pub const OWN_WRITES_LIMIT: usize = 64;

// ---------------------------------------------------------------------------
// OwnWrites
// ---------------------------------------------------------------------------

/// Bounded set of write ids this client has sent. The oldest id is evicted
/// once the limit is reached.
#[derive(Debug, Clone)]
pub struct OwnWrites {
    ids: VecDeque<String>,
    limit: usize,
}

impl Default for OwnWrites {
    fn default() -> Self {
        Self::with_limit(OWN_WRITES_LIMIT)
    }
}

impl OwnWrites {
    pub fn with_limit(limit: usize) -> Self {
        OwnWrites {
            ids: VecDeque::with_capacity(limit),
            limit,
        }
    }

    pub fn insert(&mut self, id: String) {
        if self.ids.len() == self.limit {
            self.ids.pop_front();
        }
        self.ids.push_back(id);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.iter().any(|i| i == id)
    }

    /// Forget an id. Returns whether it was present.
    pub fn remove(&mut self, id: &str) -> bool {
        match self.ids.iter().position(|i| i == id) {
            Some(pos) => {
                self.ids.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

// ---------------------------------------------------------------------------
// SyncGateway
// ---------------------------------------------------------------------------

/// A write handed to the writer task.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundWrite {
    GameState(GameStateRow),
    Prediction(PredictionRow),
}

impl OutboundWrite {
    pub fn write_id(&self) -> Option<&str> {
        match self {
            OutboundWrite::GameState(row) => row.write_id.as_deref(),
            OutboundWrite::Prediction(row) => row.write_id.as_deref(),
        }
    }
}

#[derive(Debug, Clone)]
struct PendingWrite {
    row: GameStateRow,
    due: Instant,
}

/// Turns local snapshots into remote writes.
///
/// The game-state row is debounced and skipped when it matches the last row
/// sent or merged. Prediction rows are diffed per key and written at once.
#[derive(Debug)]
pub struct SyncGateway {
    player: PlayerId,
    debounce: Duration,
    pending: Option<PendingWrite>,
    last_state: Option<GameStateRow>,
    last_predictions: HashMap<(u32, PlayerId), Prediction>,
    own_writes: OwnWrites,
    seq: u64,
}

impl SyncGateway {
    pub fn new(player: PlayerId, debounce: Duration) -> Self {
        SyncGateway {
            player,
            debounce,
            pending: None,
            last_state: None,
            last_predictions: HashMap::new(),
            own_writes: OwnWrites::default(),
            seq: 0,
        }
    }

    pub fn own_writes(&self) -> &OwnWrites {
        &self.own_writes
    }

    pub fn own_writes_mut(&mut self) -> &mut OwnWrites {
        &mut self.own_writes
    }

    /// When the pending game-state write becomes due.
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|p| p.due)
    }

    fn next_write_id(&mut self) -> String {
        self.seq += 1;
        format!(
            "{}-{}-{}",
            self.player,
            Utc::now().format("%Y%m%d%H%M%S%3f"),
            self.seq
        )
    }

    /// Feed a local snapshot. Restarts the debounce window if the shared
    /// state differs from the baseline and returns the prediction rows that
    /// must be written now.
    pub fn observe(&mut self, snapshot: &GameSnapshot, now: Instant) -> Vec<PredictionRow> {
        let candidate = GameStateRow::from_snapshot(snapshot, self.player, None);
        let unchanged = self
            .last_state
            .as_ref()
            .is_some_and(|last| last.same_state(&candidate));
        self.pending = if unchanged {
            None
        } else {
            Some(PendingWrite {
                row: candidate,
                due: now + self.debounce,
            })
        };

        let changed: Vec<Prediction> = snapshot
            .predictions
            .iter()
            .filter(|p| !p.is_hidden())
            .filter(|p| self.last_predictions.get(&p.key()) != Some(*p))
            .cloned()
            .collect();

        changed
            .into_iter()
            .map(|prediction| {
                let write_id = self.next_write_id();
                self.own_writes.insert(write_id.clone());
                let row = PredictionRow::from_prediction(&prediction, Some(write_id));
                self.last_predictions.insert(prediction.key(), prediction);
                row
            })
            .collect()
    }

    /// Take the pending game-state write if its window has elapsed.
    pub fn take_due(&mut self, now: Instant) -> Option<GameStateRow> {
        if self.pending.as_ref().is_some_and(|p| p.due <= now) {
            self.take_pending()
        } else {
            None
        }
    }

    /// Take the pending game-state write regardless of its deadline.
    pub fn take_pending(&mut self) -> Option<GameStateRow> {
        let PendingWrite { mut row, .. } = self.pending.take()?;
        let write_id = self.next_write_id();
        self.own_writes.insert(write_id.clone());
        row.write_id = Some(write_id);
        row.updated_at = Utc::now();
        self.last_state = Some(row.clone());
        Some(row)
    }

    /// A remote game-state row was merged (or recognised as our own). It
    /// becomes the baseline, and any pending write is superseded.
    pub fn acknowledge_remote_state(&mut self, row: &GameStateRow) {
        if self.pending.take().is_some() {
            debug!("Pending game-state write superseded by remote row");
        }
        self.last_state = Some(row.clone());
    }

    /// Remote predictions were merged; they are not written back.
    pub fn acknowledge_remote_predictions<'a, I>(&mut self, predictions: I)
    where
        I: IntoIterator<Item = &'a Prediction>,
    {
        for prediction in predictions {
            self.last_predictions
                .insert(prediction.key(), prediction.clone());
        }
    }

    /// Drop the baseline for a failed write so the next change re-sends it.
    pub fn write_failed(&mut self, write: &OutboundWrite) {
        if let Some(id) = write.write_id() {
            self.own_writes.remove(id);
        }
        match write {
            OutboundWrite::GameState(row) => {
                if self
                    .last_state
                    .as_ref()
                    .is_some_and(|last| last.write_id == row.write_id)
                {
                    self.last_state = None;
                }
            }
            OutboundWrite::Prediction(row) => {
                self.last_predictions.remove(&row.key());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::tests::game_in_season;
    use crate::game::state::{GameState, HIDDEN_CHEF_ID};

    fn gateway() -> SyncGateway {
        SyncGateway::new(PlayerId::Josh, DEFAULT_DEBOUNCE)
    }

    #[test]
    fn own_writes_evicts_oldest() {
        let mut own = OwnWrites::with_limit(2);
        own.insert("a".into());
        own.insert("b".into());
        own.insert("c".into());
        assert!(!own.contains("a"));
        assert!(own.contains("c"));
        assert!(own.remove("b"));
        assert!(!own.remove("b"));
        assert_eq!(own.len(), 1);
    }

    #[test]
    fn write_is_due_after_debounce_window() {
        let mut gw = gateway();
        let now = Instant::now();
        let game = GameState::new();

        gw.observe(game.snapshot(), now);
        assert_eq!(gw.deadline(), Some(now + DEFAULT_DEBOUNCE));
        assert!(gw.take_due(now + Duration::from_millis(99)).is_none());

        let row = gw.take_due(now + DEFAULT_DEBOUNCE).unwrap();
        assert_eq!(row.updated_by, Some(PlayerId::Josh));
        let id = row.write_id.unwrap();
        assert!(id.starts_with("josh-"));
        assert!(gw.own_writes().contains(&id));
        assert!(gw.deadline().is_none());
    }

    #[test]
    fn new_change_restarts_window_with_latest_snapshot() {
        let mut gw = gateway();
        let t0 = Instant::now();
        let mut game = GameState::new();

        gw.observe(game.snapshot(), t0);
        game.eliminate_chef("kevin", 1).unwrap();
        let t1 = t0 + Duration::from_millis(60);
        gw.observe(game.snapshot(), t1);

        assert!(gw.take_due(t0 + DEFAULT_DEBOUNCE).is_none());
        let row = gw.take_due(t1 + DEFAULT_DEBOUNCE).unwrap();
        assert!(!row.chefs.iter().find(|c| c.id == "kevin").unwrap().is_active());
    }

    #[test]
    fn unchanged_state_is_not_resent() {
        let mut gw = gateway();
        let now = Instant::now();
        let game = GameState::new();

        gw.observe(game.snapshot(), now);
        gw.take_pending().unwrap();
        gw.observe(game.snapshot(), now);
        assert!(gw.deadline().is_none());
    }

    #[test]
    fn merged_remote_state_is_not_written_back() {
        let mut gw = gateway();
        let mut remote = GameState::new();
        remote.eliminate_chef("kevin", 1).unwrap();
        let row =
            GameStateRow::from_snapshot(remote.snapshot(), PlayerId::Partner, Some("p-1".into()));

        let mut local = GameState::new();
        local.merge_remote_state(&row);
        gw.acknowledge_remote_state(&row);

        gw.observe(local.snapshot(), Instant::now());
        assert!(gw.deadline().is_none());
    }

    #[test]
    fn remote_merge_supersedes_pending_write() {
        let mut gw = gateway();
        let game = GameState::new();
        gw.observe(game.snapshot(), Instant::now());
        assert!(gw.deadline().is_some());

        let row = GameStateRow::from_snapshot(game.snapshot(), PlayerId::Partner, None);
        gw.acknowledge_remote_state(&row);
        assert!(gw.deadline().is_none());
    }

    #[test]
    fn predictions_written_immediately_and_once() {
        let mut gw = gateway();
        let mut game = game_in_season();
        game.lock_prediction(4, PlayerId::Josh, Some("machete")).unwrap();

        let rows = gw.observe(game.snapshot(), Instant::now());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].chef_id.as_deref(), Some("machete"));
        assert!(gw.own_writes().contains(rows[0].write_id.as_deref().unwrap()));

        assert!(gw.observe(game.snapshot(), Instant::now()).is_empty());
    }

    #[test]
    fn hidden_predictions_never_written() {
        let mut gw = gateway();
        let mut game = game_in_season();
        game.merge_remote_predictions([Prediction {
            episode_number: 4,
            player: PlayerId::Partner,
            chef_id: Some(HIDDEN_CHEF_ID.into()),
            locked: true,
            locked_at: None,
            correct: None,
        }]);
        assert!(gw.observe(game.snapshot(), Instant::now()).is_empty());
    }

    #[test]
    fn failed_write_clears_baseline() {
        let mut gw = gateway();
        let now = Instant::now();
        let game = GameState::new();

        gw.observe(game.snapshot(), now);
        let row = gw.take_pending().unwrap();
        let id = row.write_id.clone().unwrap();
        gw.write_failed(&OutboundWrite::GameState(row));
        assert!(!gw.own_writes().contains(&id));

        gw.observe(game.snapshot(), now);
        assert!(gw.deadline().is_some());
    }

    #[test]
    fn failed_prediction_write_is_retried_on_next_change() {
        let mut gw = gateway();
        let mut game = game_in_season();
        game.lock_prediction(4, PlayerId::Josh, None).unwrap();

        let rows = gw.observe(game.snapshot(), Instant::now());
        gw.write_failed(&OutboundWrite::Prediction(rows[0].clone()));
        assert_eq!(gw.observe(game.snapshot(), Instant::now()).len(), 1);
    }
}
