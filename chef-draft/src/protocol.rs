// Message and row types shared by the session, the sync layer and the hub.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::game::chef::{Chef, PlayerId};
use crate::game::scoring::{EpisodeResult, SeasonStandings};
use crate::game::state::{EpisodeData, GameSnapshot, Phase, Prediction};
use crate::sync::listener::Notice;

/// Primary key of the one shared game-state row.
pub const SINGLETON_ROW_ID: &str = "singleton";

// ---------------------------------------------------------------------------
// Remote rows
// ---------------------------------------------------------------------------

/// The shared game-state row: the snapshot minus predictions, plus write
/// metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameStateRow {
    pub id: String,
    pub chefs: Vec<Chef>,
    pub current_episode: u32,
    pub phase: Phase,
    pub draft_order: Vec<PlayerId>,
    pub current_pick: usize,
    pub draft_history: Vec<String>,
    pub episodes: Vec<EpisodeData>,
    pub season_episode: u32,
    pub updated_at: DateTime<Utc>,
    pub updated_by: Option<PlayerId>,
    /// Client-generated tag used to recognise a client's own writes.
    #[serde(default)]
    pub write_id: Option<String>,
}

impl GameStateRow {
    pub fn from_snapshot(
        snapshot: &GameSnapshot,
        updated_by: PlayerId,
        write_id: Option<String>,
    ) -> Self {
        GameStateRow {
            id: SINGLETON_ROW_ID.to_string(),
            chefs: snapshot.chefs.clone(),
            current_episode: snapshot.current_episode,
            phase: snapshot.phase,
            draft_order: snapshot.draft_order.clone(),
            current_pick: snapshot.current_pick,
            draft_history: snapshot.draft_history.clone(),
            episodes: snapshot.episodes.clone(),
            season_episode: snapshot.season_episode,
            updated_at: Utc::now(),
            updated_by: Some(updated_by),
            write_id,
        }
    }

    /// Compare the shared game fields, ignoring id and write metadata.
    pub fn same_state(&self, other: &GameStateRow) -> bool {
        self.chefs == other.chefs
            && self.current_episode == other.current_episode
            && self.phase == other.phase
            && self.draft_order == other.draft_order
            && self.current_pick == other.current_pick
            && self.draft_history == other.draft_history
            && self.episodes == other.episodes
            && self.season_episode == other.season_episode
    }
}

/// One row of the predictions table, keyed by `(episode_number, player)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionRow {
    pub episode_number: u32,
    pub player: PlayerId,
    pub chef_id: Option<String>,
    pub locked: bool,
    pub locked_at: Option<DateTime<Utc>>,
    pub correct: Option<bool>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub write_id: Option<String>,
}

impl PredictionRow {
    pub fn from_prediction(prediction: &Prediction, write_id: Option<String>) -> Self {
        PredictionRow {
            episode_number: prediction.episode_number,
            player: prediction.player,
            chef_id: prediction.chef_id.clone(),
            locked: prediction.locked,
            locked_at: prediction.locked_at,
            correct: prediction.correct,
            updated_at: Utc::now(),
            write_id,
        }
    }

    pub fn key(&self) -> (u32, PlayerId) {
        (self.episode_number, self.player)
    }

    pub fn to_prediction(&self) -> Prediction {
        Prediction {
            episode_number: self.episode_number,
            player: self.player,
            chef_id: self.chef_id.clone(),
            locked: self.locked,
            locked_at: self.locked_at,
            correct: self.correct,
        }
    }
}

/// A row image pushed by the store after every successful write. Rows stay
/// as raw JSON until the listener parses them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "table", content = "record", rename_all = "snake_case")]
pub enum ChangeEvent {
    GameState(serde_json::Value),
    Predictions(serde_json::Value),
}

impl ChangeEvent {
    pub fn game_state(row: &GameStateRow) -> Result<Self, serde_json::Error> {
        Ok(ChangeEvent::GameState(serde_json::to_value(row)?))
    }

    pub fn prediction(row: &PredictionRow) -> Result<Self, serde_json::Error> {
        Ok(ChangeEvent::Predictions(serde_json::to_value(row)?))
    }
}

// ---------------------------------------------------------------------------
// Hub wire protocol
// ---------------------------------------------------------------------------

/// Client → hub requests. Each carries a `request_id` echoed in the reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    UpsertGameState { request_id: u64, row: GameStateRow },
    UpsertPrediction { request_id: u64, row: PredictionRow },
    FetchState { request_id: u64 },
    Track { request_id: u64, player: PlayerId },
    Untrack { request_id: u64, player: PlayerId },
}

impl ClientMessage {
    pub fn request_id(&self) -> u64 {
        match self {
            ClientMessage::UpsertGameState { request_id, .. }
            | ClientMessage::UpsertPrediction { request_id, .. }
            | ClientMessage::FetchState { request_id }
            | ClientMessage::Track { request_id, .. }
            | ClientMessage::Untrack { request_id, .. } => *request_id,
        }
    }
}

/// Hub → client messages: correlated replies plus unsolicited pushes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    Ack {
        request_id: u64,
    },
    StateSnapshot {
        request_id: u64,
        game_state: Option<GameStateRow>,
        predictions: Vec<PredictionRow>,
    },
    Error {
        request_id: Option<u64>,
        message: String,
    },
    Change {
        event: ChangeEvent,
    },
    Presence {
        players: BTreeSet<PlayerId>,
    },
}

// ---------------------------------------------------------------------------
// Session <-> presentation layer
// ---------------------------------------------------------------------------

/// Commands from the presentation layer to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum UserCommand {
    EliminateChef { chef_id: String, episode: u32 },
    RestoreChef { chef_id: String },
    AdvanceEpisode,
    StartDraft,
    DraftChef { chef_id: String },
    UndoLastPick,
    FinalizeDraft,
    ScoreEpisode {
        episode_number: u32,
        results: Vec<EpisodeResult>,
    },
    ToggleChefStatus { chef_id: String },
    /// `chef_id: None` locks a skip.
    LockPrediction {
        episode_number: u32,
        chef_id: Option<String>,
    },
    Undo,
    Redo,
    ResetGame,
    /// The client window was hidden or shown again.
    VisibilityChanged { visible: bool },
    Quit,
}

/// Everything the presentation layer needs to render one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct GameView {
    pub snapshot: GameSnapshot,
    pub standings: SeasonStandings,
    pub can_undo: bool,
    pub can_redo: bool,
}

/// Updates pushed from the session to the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum UiUpdate {
    Snapshot(Box<GameView>),
    /// Something the opponent did.
    Notice(Notice),
    CommandRejected(String),
    OpponentOnline(bool),
    /// A remote write failed; the local state is kept.
    SyncFailed(String),
}
