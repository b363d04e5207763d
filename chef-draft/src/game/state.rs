// Game state: the authoritative local reducer for eliminations, the snake
// draft, episode scoring and survivor predictions.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::chef::{seed_roster, Chef, ChefStatus, Owner, PlayerId, DRAFT_PICKS, SNAKE_ORDER};
use super::history::History;
use super::scoring::{self, EpisodeResult, SeasonStandings};
use crate::protocol::GameStateRow;

/// Number of pre-draft episodes.
pub const PRE_DRAFT_EPISODES: u32 = 3;
/// Eliminations that must be logged before the pre-draft counter may advance.
pub const ELIMINATIONS_PER_EPISODE: usize = 3;
/// Total pre-draft eliminations required to start the draft.
pub const PRE_DRAFT_ELIMINATIONS: usize = 9;
/// First episode scored after the draft.
pub const FIRST_SEASON_EPISODE: u32 = 4;
/// Chef id stored in place of an opponent's pick that is not yet visible.
pub const HIDDEN_CHEF_ID: &str = "hidden";

// ---------------------------------------------------------------------------
// Snapshot types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    PreDraft,
    Draft,
    Season,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::PreDraft => "pre-draft",
            Phase::Draft => "draft",
            Phase::Season => "season",
        };
        write!(f, "{s}")
    }
}

/// One scored episode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeData {
    pub episode_number: u32,
    pub results: Vec<EpisodeResult>,
    pub scored: bool,
}

/// A survivor guess, keyed by `(episode_number, player)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prediction {
    pub episode_number: u32,
    pub player: PlayerId,
    /// Predicted survivor. `None` means the player skipped the episode.
    pub chef_id: Option<String>,
    pub locked: bool,
    pub locked_at: Option<DateTime<Utc>>,
    /// `None` until resolved (and forever for skipped picks).
    pub correct: Option<bool>,
}

impl Prediction {
    pub fn key(&self) -> (u32, PlayerId) {
        (self.episode_number, self.player)
    }

    /// Whether the pick has been redacted for this client.
    pub fn is_hidden(&self) -> bool {
        self.chef_id.as_deref() == Some(HIDDEN_CHEF_ID)
    }
}

/// The complete serializable game state. Undo/redo stacks live outside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSnapshot {
    pub chefs: Vec<Chef>,
    /// Pre-draft episode counter (1..=3).
    pub current_episode: u32,
    pub phase: Phase,
    pub draft_order: Vec<PlayerId>,
    /// Index of the next draft slot.
    pub current_pick: usize,
    /// Drafted chef ids in pick order.
    pub draft_history: Vec<String>,
    pub episodes: Vec<EpisodeData>,
    /// Next season episode to score.
    pub season_episode: u32,
    pub predictions: Vec<Prediction>,
}

impl GameSnapshot {
    /// First-run state: full cast, pre-draft episode 1.
    pub fn seed() -> Self {
        GameSnapshot {
            chefs: seed_roster(),
            current_episode: 1,
            phase: Phase::PreDraft,
            draft_order: SNAKE_ORDER.to_vec(),
            current_pick: 0,
            draft_history: Vec::new(),
            episodes: Vec::new(),
            season_episode: FIRST_SEASON_EPISODE,
            predictions: Vec::new(),
        }
    }

    pub fn chef(&self, chef_id: &str) -> Option<&Chef> {
        self.chefs.iter().find(|c| c.id == chef_id)
    }

    pub fn episode(&self, episode_number: u32) -> Option<&EpisodeData> {
        self.episodes
            .iter()
            .find(|e| e.episode_number == episode_number)
    }

    pub fn is_episode_scored(&self, episode_number: u32) -> bool {
        self.episode(episode_number).is_some_and(|e| e.scored)
    }

    pub fn prediction(&self, episode_number: u32, player: PlayerId) -> Option<&Prediction> {
        self.predictions
            .iter()
            .find(|p| p.episode_number == episode_number && p.player == player)
    }

    /// Chefs eliminated before the draft.
    pub fn pre_draft_eliminations(&self) -> usize {
        self.chefs.iter().filter(|c| c.eliminated_pre_draft).count()
    }

    /// Pre-draft eliminations logged against one episode.
    pub fn eliminations_in_episode(&self, episode: u32) -> usize {
        self.chefs
            .iter()
            .filter(|c| c.eliminated_pre_draft && c.eliminated_episode == Some(episode))
            .count()
    }

    /// Chefs still available to draft.
    pub fn available_chefs(&self) -> impl Iterator<Item = &Chef> {
        self.chefs.iter().filter(|c| c.is_available())
    }

    /// All 14 slots have been filled.
    pub fn is_draft_complete(&self) -> bool {
        self.current_pick >= DRAFT_PICKS
    }

    /// Chefs owned by a player.
    pub fn team(&self, player: PlayerId) -> impl Iterator<Item = &Chef> {
        let owner = Owner::from(player);
        self.chefs.iter().filter(move |c| c.owner == owner)
    }

    pub fn standings(&self) -> SeasonStandings {
        SeasonStandings::compute(&self.chefs, &self.episodes, &self.predictions)
    }

    fn chef_index(&self, chef_id: &str) -> Result<usize, GameError> {
        self.chefs
            .iter()
            .position(|c| c.id == chef_id)
            .ok_or_else(|| GameError::UnknownChef(chef_id.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A rejected transition. State and history are left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GameError {
    #[error("this action needs the {expected} phase, but the game is in {actual}")]
    WrongPhase { expected: Phase, actual: Phase },

    #[error("unknown chef `{0}`")]
    UnknownChef(String),

    #[error("chef `{0}` has been eliminated")]
    ChefEliminated(String),

    #[error("chef `{0}` is already drafted")]
    ChefAlreadyDrafted(String),

    #[error("episode {episode} has {logged} eliminations logged, {required} required")]
    NotEnoughEliminations {
        episode: u32,
        logged: usize,
        required: usize,
    },

    #[error("the pre-draft episode counter is already at {0}")]
    PreDraftComplete(u32),

    #[error(
        "the draft needs {required} pre-draft eliminations by episode {final_episode} \
         (have {eliminated}, at episode {episode})"
    )]
    DraftNotReady {
        eliminated: usize,
        required: usize,
        episode: u32,
        final_episode: u32,
    },

    #[error("invalid episode results: {}", .0.join("; "))]
    InvalidResults(Vec<String>),
}

// ---------------------------------------------------------------------------
// GameState
// ---------------------------------------------------------------------------

/// The local game reducer. Every state-changing action records the prior
/// snapshot for undo and clears redo. Actions that leave the snapshot
/// unchanged record nothing.
#[derive(Debug, Clone)]
pub struct GameState {
    snapshot: GameSnapshot,
    history: History<GameSnapshot>,
}

impl Default for GameState {
    fn default() -> Self {
        Self::new()
    }
}

impl GameState {
    /// Fresh game from the seed cast.
    pub fn new() -> Self {
        Self::from_snapshot(GameSnapshot::seed())
    }

    /// Resume from a persisted snapshot. History starts empty.
    pub fn from_snapshot(snapshot: GameSnapshot) -> Self {
        GameState {
            snapshot,
            history: History::default(),
        }
    }

    pub fn snapshot(&self) -> &GameSnapshot {
        &self.snapshot
    }

    pub fn phase(&self) -> Phase {
        self.snapshot.phase
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn undo_depth(&self) -> usize {
        self.history.undo_depth()
    }

    fn require_phase(&self, expected: Phase) -> Result<(), GameError> {
        if self.snapshot.phase == expected {
            Ok(())
        } else {
            Err(GameError::WrongPhase {
                expected,
                actual: self.snapshot.phase,
            })
        }
    }

    /// Replace the current snapshot, recording the old one for undo.
    fn commit(&mut self, next: GameSnapshot) {
        if next == self.snapshot {
            return;
        }
        let previous = std::mem::replace(&mut self.snapshot, next);
        self.history.record(previous);
    }

    // --- Pre-draft ---

    pub fn eliminate_chef(&mut self, chef_id: &str, episode: u32) -> Result<(), GameError> {
        self.require_phase(Phase::PreDraft)?;
        let idx = self.snapshot.chef_index(chef_id)?;
        if !self.snapshot.chefs[idx].is_active() {
            return Err(GameError::ChefEliminated(chef_id.to_string()));
        }

        let mut next = self.snapshot.clone();
        let chef = &mut next.chefs[idx];
        chef.status = ChefStatus::Eliminated;
        chef.eliminated_episode = Some(episode);
        chef.eliminated_pre_draft = true;
        self.commit(next);
        Ok(())
    }

    /// Undo a pre-draft elimination. Restoring an active chef is a no-op.
    pub fn restore_chef(&mut self, chef_id: &str) -> Result<(), GameError> {
        self.require_phase(Phase::PreDraft)?;
        let idx = self.snapshot.chef_index(chef_id)?;

        let mut next = self.snapshot.clone();
        let chef = &mut next.chefs[idx];
        chef.status = ChefStatus::Active;
        chef.eliminated_episode = None;
        chef.eliminated_pre_draft = false;
        self.commit(next);
        Ok(())
    }

    /// Move the pre-draft counter forward once the current episode has its
    /// eliminations logged.
    pub fn advance_episode(&mut self) -> Result<(), GameError> {
        self.require_phase(Phase::PreDraft)?;
        let episode = self.snapshot.current_episode;
        if episode >= PRE_DRAFT_EPISODES {
            return Err(GameError::PreDraftComplete(episode));
        }
        let logged = self.snapshot.eliminations_in_episode(episode);
        if logged < ELIMINATIONS_PER_EPISODE {
            return Err(GameError::NotEnoughEliminations {
                episode,
                logged,
                required: ELIMINATIONS_PER_EPISODE,
            });
        }

        let mut next = self.snapshot.clone();
        next.current_episode = episode + 1;
        self.commit(next);
        Ok(())
    }

    pub fn start_draft(&mut self) -> Result<(), GameError> {
        self.require_phase(Phase::PreDraft)?;
        let eliminated = self.snapshot.pre_draft_eliminations();
        let episode = self.snapshot.current_episode;
        if eliminated != PRE_DRAFT_ELIMINATIONS || episode < PRE_DRAFT_EPISODES {
            return Err(GameError::DraftNotReady {
                eliminated,
                required: PRE_DRAFT_ELIMINATIONS,
                episode,
                final_episode: PRE_DRAFT_EPISODES,
            });
        }

        let mut next = self.snapshot.clone();
        next.phase = Phase::Draft;
        self.commit(next);
        Ok(())
    }

    // --- Draft ---

    /// Assign a chef to whoever owns the current snake slot. No-op once all
    /// slots are filled.
    pub fn draft_chef(&mut self, chef_id: &str) -> Result<(), GameError> {
        self.require_phase(Phase::Draft)?;
        let pick = self.snapshot.current_pick;
        let slot_owner = self.snapshot.draft_order.get(pick).copied();
        let Some(player) = slot_owner.filter(|_| pick < DRAFT_PICKS) else {
            debug!("Ignoring draft of {chef_id}: all {pick} slots filled");
            return Ok(());
        };

        let idx = self.snapshot.chef_index(chef_id)?;
        let chef = &self.snapshot.chefs[idx];
        if !chef.is_active() {
            return Err(GameError::ChefEliminated(chef_id.to_string()));
        }
        if chef.owner != Owner::Undrafted {
            return Err(GameError::ChefAlreadyDrafted(chef_id.to_string()));
        }

        let mut next = self.snapshot.clone();
        next.chefs[idx].owner = Owner::from(player);
        next.current_pick = pick + 1;
        next.draft_history.push(chef_id.to_string());
        self.commit(next);
        Ok(())
    }

    /// Put the most recent pick back into the pool.
    pub fn undo_last_pick(&mut self) -> Result<(), GameError> {
        self.require_phase(Phase::Draft)?;
        if self.snapshot.current_pick == 0 {
            return Ok(());
        }
        let Some(last) = self.snapshot.draft_history.last().cloned() else {
            return Ok(());
        };

        let mut next = self.snapshot.clone();
        if let Some(chef) = next.chefs.iter_mut().find(|c| c.id == last) {
            chef.owner = Owner::Undrafted;
        }
        next.current_pick -= 1;
        next.draft_history.pop();
        self.commit(next);
        Ok(())
    }

    /// Close the draft. A single leftover active chef becomes the wildcard.
    pub fn finalize_draft(&mut self) -> Result<(), GameError> {
        self.require_phase(Phase::Draft)?;

        let mut next = self.snapshot.clone();
        let remaining: Vec<usize> = next
            .chefs
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_available())
            .map(|(i, _)| i)
            .collect();
        if let [only] = remaining.as_slice() {
            next.chefs[*only].owner = Owner::Wildcard;
        }
        next.phase = Phase::Season;
        self.commit(next);
        Ok(())
    }

    // --- Season ---

    /// Flip a chef between active and eliminated during the season.
    pub fn toggle_chef_status(&mut self, chef_id: &str) -> Result<(), GameError> {
        self.require_phase(Phase::Season)?;
        let idx = self.snapshot.chef_index(chef_id)?;

        let mut next = self.snapshot.clone();
        let season_episode = next.season_episode;
        let chef = &mut next.chefs[idx];
        match chef.status {
            ChefStatus::Active => {
                chef.status = ChefStatus::Eliminated;
                chef.eliminated_episode = Some(season_episode);
            }
            ChefStatus::Eliminated => {
                chef.status = ChefStatus::Active;
                chef.eliminated_episode = None;
            }
        }
        self.commit(next);
        Ok(())
    }

    /// Store an episode's results, replacing any earlier scoring of it.
    pub fn save_episode(
        &mut self,
        episode_number: u32,
        results: Vec<EpisodeResult>,
    ) -> Result<(), GameError> {
        self.require_phase(Phase::Season)?;
        let errors = scoring::validate_all(&results);
        if !errors.is_empty() {
            return Err(GameError::InvalidResults(errors));
        }
        for result in &results {
            self.snapshot.chef_index(&result.chef_id)?;
        }

        let mut next = self.snapshot.clone();
        for result in results.iter().filter(|r| r.eliminated) {
            if let Some(chef) = next.chefs.iter_mut().find(|c| c.id == result.chef_id) {
                chef.status = ChefStatus::Eliminated;
                chef.eliminated_episode = Some(episode_number);
            }
        }

        let data = EpisodeData {
            episode_number,
            results,
            scored: true,
        };
        match next
            .episodes
            .iter_mut()
            .find(|e| e.episode_number == episode_number)
        {
            Some(existing) => *existing = data,
            None => next.episodes.push(data),
        }
        self.commit(next);
        Ok(())
    }

    /// Move the season counter on. Callers only do this on first-time
    /// scoring; see [`GameState::score_episode`].
    pub fn advance_season_episode(&mut self) -> Result<(), GameError> {
        self.require_phase(Phase::Season)?;
        let mut next = self.snapshot.clone();
        next.season_episode += 1;
        self.commit(next);
        Ok(())
    }

    /// Score an episode end to end: save the results, resolve predictions
    /// against the survivors, and advance the season counter unless the
    /// episode had already been scored.
    ///
    /// Returns `true` when this was the first scoring of the episode.
    pub fn score_episode(
        &mut self,
        episode_number: u32,
        results: Vec<EpisodeResult>,
    ) -> Result<bool, GameError> {
        self.require_phase(Phase::Season)?;
        let errors = scoring::validate_all(&results);
        if !errors.is_empty() {
            return Err(GameError::InvalidResults(errors));
        }

        let first_time = !self.snapshot.is_episode_scored(episode_number);
        self.save_episode(episode_number, results)?;
        self.resolve_scored_episode(episode_number)?;
        if first_time {
            self.advance_season_episode()?;
        }
        Ok(first_time)
    }

    /// Resolve an episode's predictions from its saved results. A no-op
    /// for an episode that has not been scored.
    pub fn resolve_scored_episode(&mut self, episode_number: u32) -> Result<(), GameError> {
        let survivors: Vec<String> = match self.snapshot.episode(episode_number) {
            Some(episode) if episode.scored => episode
                .results
                .iter()
                .filter(|r| r.counts_as_survivor())
                .map(|r| r.chef_id.clone())
                .collect(),
            _ => return Ok(()),
        };
        self.resolve_predictions(episode_number, &survivors)
    }

    // --- Predictions ---

    /// Lock a survivor guess. The first lock for a key wins; later calls are
    /// no-ops.
    pub fn lock_prediction(
        &mut self,
        episode_number: u32,
        player: PlayerId,
        chef_id: Option<&str>,
    ) -> Result<(), GameError> {
        self.require_phase(Phase::Season)?;
        if let Some(id) = chef_id {
            self.snapshot.chef_index(id)?;
        }
        if self
            .snapshot
            .prediction(episode_number, player)
            .is_some_and(|p| p.locked)
        {
            debug!("Prediction for episode {episode_number} ({player}) already locked");
            return Ok(());
        }

        let prediction = Prediction {
            episode_number,
            player,
            chef_id: chef_id.map(str::to_string),
            locked: true,
            locked_at: Some(Utc::now()),
            correct: None,
        };

        let mut next = self.snapshot.clone();
        match next
            .predictions
            .iter_mut()
            .find(|p| p.key() == prediction.key())
        {
            Some(existing) => *existing = prediction,
            None => next.predictions.push(prediction),
        }
        self.commit(next);
        Ok(())
    }

    /// Mark every prediction for the episode right or wrong. Skipped picks
    /// and picks still hidden from this client stay unresolved.
    pub fn resolve_predictions(
        &mut self,
        episode_number: u32,
        survived_chef_ids: &[String],
    ) -> Result<(), GameError> {
        self.require_phase(Phase::Season)?;
        let mut next = self.snapshot.clone();
        for prediction in next
            .predictions
            .iter_mut()
            .filter(|p| p.episode_number == episode_number)
        {
            prediction.correct = match prediction.chef_id.as_deref() {
                None | Some(HIDDEN_CHEF_ID) => None,
                Some(id) => Some(survived_chef_ids.iter().any(|s| s == id)),
            };
        }
        self.commit(next);
        Ok(())
    }

    // --- History ---

    /// Returns `false` when there is nothing to undo.
    pub fn undo(&mut self) -> bool {
        match self.history.undo(self.snapshot.clone()) {
            Some(previous) => {
                self.snapshot = previous;
                true
            }
            None => false,
        }
    }

    /// Returns `false` when there is nothing to redo.
    pub fn redo(&mut self) -> bool {
        match self.history.redo(self.snapshot.clone()) {
            Some(next) => {
                self.snapshot = next;
                true
            }
            None => false,
        }
    }

    /// Back to the seed state, history discarded.
    pub fn reset_game(&mut self) {
        self.snapshot = GameSnapshot::seed();
        self.history.clear();
    }

    // --- Remote merges ---

    /// Overwrite every shared field with the remote row (last write wins).
    /// Predictions are untouched; they travel separately. Merges are not
    /// undoable actions and leave history alone.
    ///
    /// Returns `true` if anything changed.
    pub fn merge_remote_state(&mut self, row: &GameStateRow) -> bool {
        let mut next = self.snapshot.clone();
        next.chefs = row.chefs.clone();
        next.current_episode = row.current_episode;
        next.phase = row.phase;
        next.draft_order = row.draft_order.clone();
        next.current_pick = row.current_pick;
        next.draft_history = row.draft_history.clone();
        next.episodes = row.episodes.clone();
        next.season_episode = row.season_episode;

        if next == self.snapshot {
            return false;
        }
        self.snapshot = next;
        true
    }

    /// Upsert predictions by `(episode_number, player)`.
    ///
    /// Returns `true` if anything changed.
    pub fn merge_remote_predictions<I>(&mut self, predictions: I) -> bool
    where
        I: IntoIterator<Item = Prediction>,
    {
        let mut changed = false;
        for incoming in predictions {
            match self
                .snapshot
                .predictions
                .iter_mut()
                .find(|p| p.key() == incoming.key())
            {
                Some(existing) if *existing == incoming => {}
                Some(existing) => {
                    *existing = incoming;
                    changed = true;
                }
                None => {
                    self.snapshot.predictions.push(incoming);
                    changed = true;
                }
            }
        }
        changed
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Ids of the nine chefs eliminated before the draft, three per episode.
    pub(crate) const PRE_DRAFT_CUTS: [&str; 9] = [
        "kevin", "hunter", "gabrielle", "tim", "miriam", "matt", "michael", "jared", "emerson",
    ];

    /// Run the pre-draft phase to completion and start the draft.
    pub(crate) fn game_in_draft() -> GameState {
        let mut game = GameState::new();
        for (i, chunk) in PRE_DRAFT_CUTS.chunks(3).enumerate() {
            let episode = i as u32 + 1;
            for id in chunk {
                game.eliminate_chef(id, episode).unwrap();
            }
            if episode < PRE_DRAFT_EPISODES {
                game.advance_episode().unwrap();
            }
        }
        game.start_draft().unwrap();
        game
    }

    /// Draft 14 chefs and finalize, leaving one wildcard.
    pub(crate) fn game_in_season() -> GameState {
        let mut game = game_in_draft();
        let picks: Vec<String> = game
            .snapshot()
            .available_chefs()
            .take(DRAFT_PICKS)
            .map(|c| c.id.clone())
            .collect();
        for id in &picks {
            game.draft_chef(id).unwrap();
        }
        game.finalize_draft().unwrap();
        game
    }

    fn survived(chef_id: &str) -> EpisodeResult {
        EpisodeResult {
            survived: true,
            ..EpisodeResult::for_chef(chef_id)
        }
    }

    #[test]
    fn new_game_starts_pre_draft() {
        let game = GameState::new();
        let s = game.snapshot();
        assert_eq!(s.phase, Phase::PreDraft);
        assert_eq!(s.current_episode, 1);
        assert_eq!(s.season_episode, FIRST_SEASON_EPISODE);
        assert_eq!(s.draft_order, SNAKE_ORDER.to_vec());
        assert!(!game.can_undo());
    }

    #[test]
    fn eliminate_and_restore_chef() {
        let mut game = GameState::new();
        game.eliminate_chef("kevin", 1).unwrap();
        let kevin = game.snapshot().chef("kevin").unwrap();
        assert_eq!(kevin.status, ChefStatus::Eliminated);
        assert_eq!(kevin.eliminated_episode, Some(1));
        assert!(kevin.eliminated_pre_draft);

        game.restore_chef("kevin").unwrap();
        let kevin = game.snapshot().chef("kevin").unwrap();
        assert!(kevin.is_active());
        assert_eq!(kevin.eliminated_episode, None);
        assert!(!kevin.eliminated_pre_draft);
        assert_eq!(game.undo_depth(), 2);
    }

    #[test]
    fn eliminate_rejects_unknown_and_repeat() {
        let mut game = GameState::new();
        assert_eq!(
            game.eliminate_chef("nobody", 1),
            Err(GameError::UnknownChef("nobody".into()))
        );
        game.eliminate_chef("kevin", 1).unwrap();
        assert_eq!(
            game.eliminate_chef("kevin", 1),
            Err(GameError::ChefEliminated("kevin".into()))
        );
        assert_eq!(game.undo_depth(), 1);
    }

    #[test]
    fn restoring_active_chef_records_nothing() {
        let mut game = GameState::new();
        game.restore_chef("kevin").unwrap();
        assert!(!game.can_undo());
    }

    #[test]
    fn advance_episode_requires_three_eliminations() {
        let mut game = GameState::new();
        game.eliminate_chef("kevin", 1).unwrap();
        game.eliminate_chef("hunter", 1).unwrap();
        assert_eq!(
            game.advance_episode(),
            Err(GameError::NotEnoughEliminations {
                episode: 1,
                logged: 2,
                required: 3
            })
        );

        game.eliminate_chef("tim", 1).unwrap();
        game.advance_episode().unwrap();
        assert_eq!(game.snapshot().current_episode, 2);
    }

    #[test]
    fn advance_episode_stops_at_three() {
        let mut game = game_in_draft();
        game.undo(); // back to pre-draft at episode 3
        assert_eq!(game.phase(), Phase::PreDraft);
        assert_eq!(
            game.advance_episode(),
            Err(GameError::PreDraftComplete(3))
        );
    }

    #[test]
    fn start_draft_requires_nine_eliminations_at_episode_three() {
        let mut game = GameState::new();
        assert!(matches!(
            game.start_draft(),
            Err(GameError::DraftNotReady { eliminated: 0, .. })
        ));

        let game = game_in_draft();
        assert_eq!(game.phase(), Phase::Draft);
        assert_eq!(game.snapshot().pre_draft_eliminations(), 9);
    }

    #[test]
    fn pre_draft_actions_rejected_after_draft_starts() {
        let mut game = game_in_draft();
        assert_eq!(
            game.eliminate_chef("machete", 3),
            Err(GameError::WrongPhase {
                expected: Phase::PreDraft,
                actual: Phase::Draft
            })
        );
    }

    #[test]
    fn snake_draft_assigns_owners_in_order() {
        let mut game = game_in_draft();
        let ids: Vec<String> = game
            .snapshot()
            .available_chefs()
            .map(|c| c.id.clone())
            .collect();
        assert_eq!(ids.len(), 15);

        for id in ids.iter().take(DRAFT_PICKS) {
            game.draft_chef(id).unwrap();
        }

        let owners: Vec<Owner> = game
            .snapshot()
            .draft_history
            .iter()
            .map(|id| game.snapshot().chef(id).unwrap().owner)
            .collect();
        let expected: Vec<Owner> = SNAKE_ORDER.iter().map(|p| Owner::from(*p)).collect();
        assert_eq!(owners, expected);
        assert_eq!(game.snapshot().current_pick, DRAFT_PICKS);
        assert!(game.snapshot().is_draft_complete());
    }

    #[test]
    fn draft_past_last_slot_is_noop() {
        let mut game = game_in_draft();
        let ids: Vec<String> = game
            .snapshot()
            .available_chefs()
            .map(|c| c.id.clone())
            .collect();
        for id in ids.iter().take(DRAFT_PICKS) {
            game.draft_chef(id).unwrap();
        }
        let before = game.snapshot().clone();
        let depth = game.undo_depth();

        game.draft_chef(&ids[14]).unwrap();
        assert_eq!(game.snapshot(), &before);
        assert_eq!(game.undo_depth(), depth);
    }

    #[test]
    fn draft_rejects_eliminated_and_owned_chefs() {
        let mut game = game_in_draft();
        assert_eq!(
            game.draft_chef("kevin"),
            Err(GameError::ChefEliminated("kevin".into()))
        );
        game.draft_chef("machete").unwrap();
        assert_eq!(
            game.draft_chef("machete"),
            Err(GameError::ChefAlreadyDrafted("machete".into()))
        );
    }

    #[test]
    fn undo_last_pick_returns_chef_to_pool() {
        let mut game = game_in_draft();
        game.draft_chef("machete").unwrap();
        game.draft_chef("darian").unwrap();

        game.undo_last_pick().unwrap();
        let s = game.snapshot();
        assert_eq!(s.current_pick, 1);
        assert_eq!(s.draft_history, vec!["machete".to_string()]);
        assert_eq!(s.chef("darian").unwrap().owner, Owner::Undrafted);
        assert_eq!(s.chef("machete").unwrap().owner, Owner::Josh);
    }

    #[test]
    fn undo_last_pick_with_no_picks_is_noop() {
        let mut game = game_in_draft();
        let depth = game.undo_depth();
        game.undo_last_pick().unwrap();
        assert_eq!(game.undo_depth(), depth);
    }

    #[test]
    fn finalize_assigns_single_leftover_as_wildcard() {
        let game = game_in_season();
        let s = game.snapshot();
        assert_eq!(s.phase, Phase::Season);
        let wildcards: Vec<&Chef> = s.chefs.iter().filter(|c| c.owner == Owner::Wildcard).collect();
        assert_eq!(wildcards.len(), 1);
        assert_eq!(s.available_chefs().count(), 0);
    }

    #[test]
    fn finalize_with_several_left_skips_wildcard() {
        let mut game = game_in_draft();
        game.draft_chef("machete").unwrap();
        game.finalize_draft().unwrap();
        let s = game.snapshot();
        assert_eq!(s.phase, Phase::Season);
        assert!(s.chefs.iter().all(|c| c.owner != Owner::Wildcard));
    }

    #[test]
    fn finalize_with_none_left_skips_wildcard() {
        let mut game = game_in_draft();
        let ids: Vec<String> = game
            .snapshot()
            .available_chefs()
            .map(|c| c.id.clone())
            .collect();
        for id in ids.iter().take(DRAFT_PICKS) {
            game.draft_chef(id).unwrap();
        }
        // Take the last free chef out of the pool through a remote merge.
        let mut row = GameStateRow::from_snapshot(game.snapshot(), PlayerId::Partner, None);
        if let Some(chef) = row.chefs.iter_mut().find(|c| c.id == ids[14]) {
            chef.status = ChefStatus::Eliminated;
        }
        game.merge_remote_state(&row);

        game.finalize_draft().unwrap();
        let s = game.snapshot();
        assert_eq!(s.phase, Phase::Season);
        assert!(s.chefs.iter().all(|c| c.owner != Owner::Wildcard));
    }

    #[test]
    fn save_episode_marks_eliminations_and_upserts() {
        let mut game = game_in_season();
        let first = game.snapshot().team(PlayerId::Josh).next().unwrap().id.clone();

        let results = vec![EpisodeResult {
            eliminated: true,
            ..EpisodeResult::for_chef(&first)
        }];
        game.save_episode(4, results).unwrap();
        let chef = game.snapshot().chef(&first).unwrap();
        assert_eq!(chef.status, ChefStatus::Eliminated);
        assert_eq!(chef.eliminated_episode, Some(4));
        assert!(!chef.eliminated_pre_draft);

        game.save_episode(4, vec![survived("machete")]).unwrap();
        assert_eq!(game.snapshot().episodes.len(), 1);
        assert_eq!(game.snapshot().episodes[0].results[0].chef_id, "machete");
        assert!(game.snapshot().episodes[0].scored);
    }

    #[test]
    fn save_episode_rejects_invalid_results() {
        let mut game = game_in_season();
        let bad = EpisodeResult {
            survived: true,
            eliminated: true,
            ..EpisodeResult::for_chef("machete")
        };
        let depth = game.undo_depth();
        assert!(matches!(
            game.save_episode(4, vec![bad]),
            Err(GameError::InvalidResults(errors)) if errors.len() == 1
        ));
        assert!(game.snapshot().episodes.is_empty());
        assert_eq!(game.undo_depth(), depth);
    }

    #[test]
    fn rescoring_does_not_advance_season_counter() {
        let mut game = game_in_season();
        assert!(game.score_episode(4, vec![survived("machete")]).unwrap());
        assert_eq!(game.snapshot().season_episode, 5);

        assert!(!game.score_episode(4, vec![survived("darian")]).unwrap());
        assert_eq!(game.snapshot().season_episode, 5);
        assert_eq!(game.snapshot().episodes[0].results[0].chef_id, "darian");
    }

    #[test]
    fn lock_prediction_first_write_wins() {
        let mut game = game_in_season();
        game.lock_prediction(4, PlayerId::Josh, Some("machete")).unwrap();
        let depth = game.undo_depth();

        game.lock_prediction(4, PlayerId::Josh, Some("darian")).unwrap();
        let p = game.snapshot().prediction(4, PlayerId::Josh).unwrap();
        assert_eq!(p.chef_id.as_deref(), Some("machete"));
        assert!(p.locked);
        assert!(p.locked_at.is_some());
        assert_eq!(game.undo_depth(), depth);
    }

    #[test]
    fn lock_prediction_rejects_unknown_chef() {
        let mut game = game_in_season();
        assert_eq!(
            game.lock_prediction(4, PlayerId::Josh, Some(HIDDEN_CHEF_ID)),
            Err(GameError::UnknownChef(HIDDEN_CHEF_ID.into()))
        );
    }

    #[test]
    fn resolve_predictions_handles_skips_and_hidden() {
        let mut game = game_in_season();
        game.lock_prediction(4, PlayerId::Josh, Some("machete")).unwrap();
        game.lock_prediction(4, PlayerId::Partner, None).unwrap();
        game.lock_prediction(5, PlayerId::Josh, Some("darian")).unwrap();

        game.resolve_predictions(4, &["machete".to_string()]).unwrap();
        let s = game.snapshot();
        assert_eq!(s.prediction(4, PlayerId::Josh).unwrap().correct, Some(true));
        assert_eq!(s.prediction(4, PlayerId::Partner).unwrap().correct, None);
        assert_eq!(s.prediction(5, PlayerId::Josh).unwrap().correct, None);

        game.merge_remote_predictions([Prediction {
            episode_number: 6,
            player: PlayerId::Partner,
            chef_id: Some(HIDDEN_CHEF_ID.into()),
            locked: true,
            locked_at: None,
            correct: None,
        }]);
        game.resolve_predictions(6, &[]).unwrap();
        assert_eq!(game.snapshot().prediction(6, PlayerId::Partner).unwrap().correct, None);
    }

    #[test]
    fn resolve_scored_episode_picks_up_revealed_pick() {
        let mut game = game_in_season();
        let hidden = Prediction {
            episode_number: 4,
            player: PlayerId::Partner,
            chef_id: Some(HIDDEN_CHEF_ID.into()),
            locked: true,
            locked_at: None,
            correct: None,
        };
        game.merge_remote_predictions([hidden.clone()]);
        game.score_episode(
            4,
            vec![EpisodeResult {
                eliminated: true,
                ..EpisodeResult::for_chef("darian")
            }],
        )
        .unwrap();
        assert_eq!(game.snapshot().prediction(4, PlayerId::Partner).unwrap().correct, None);

        game.merge_remote_predictions([Prediction {
            chef_id: Some("darian".into()),
            ..hidden
        }]);
        game.resolve_scored_episode(4).unwrap();
        assert_eq!(
            game.snapshot().prediction(4, PlayerId::Partner).unwrap().correct,
            Some(false)
        );
    }

    #[test]
    fn resolve_scored_episode_ignores_unscored_episode() {
        let mut game = game_in_season();
        game.lock_prediction(5, PlayerId::Josh, Some("machete")).unwrap();
        let before = game.snapshot().clone();
        game.resolve_scored_episode(5).unwrap();
        assert_eq!(game.snapshot(), &before);
    }

    #[test]
    fn wrong_prediction_resolves_false() {
        let mut game = game_in_season();
        game.lock_prediction(4, PlayerId::Josh, Some("machete")).unwrap();
        game.resolve_predictions(4, &["darian".to_string()]).unwrap();
        assert_eq!(
            game.snapshot().prediction(4, PlayerId::Josh).unwrap().correct,
            Some(false)
        );
    }

    #[test]
    fn toggle_chef_status_uses_season_episode() {
        let mut game = game_in_season();
        game.toggle_chef_status("machete").unwrap();
        let chef = game.snapshot().chef("machete").unwrap();
        assert_eq!(chef.status, ChefStatus::Eliminated);
        assert_eq!(chef.eliminated_episode, Some(FIRST_SEASON_EPISODE));

        game.toggle_chef_status("machete").unwrap();
        assert!(game.snapshot().chef("machete").unwrap().is_active());
    }

    #[test]
    fn undo_n_times_restores_starting_snapshot() {
        let mut game = game_in_season();
        let start = game.snapshot().clone();

        game.lock_prediction(4, PlayerId::Josh, Some("machete")).unwrap();
        game.toggle_chef_status("darian").unwrap();
        game.score_episode(4, vec![survived("machete")]).unwrap();
        game.lock_prediction(5, PlayerId::Partner, None).unwrap();

        let mutations = 6; // score_episode records three entries
        for _ in 0..mutations {
            assert!(game.undo());
        }
        assert_eq!(game.snapshot(), &start);
    }

    #[test]
    fn redo_replays_and_new_action_clears_redo() {
        let mut game = game_in_season();
        game.toggle_chef_status("machete").unwrap();
        let after = game.snapshot().clone();

        assert!(game.undo());
        assert!(game.redo());
        assert_eq!(game.snapshot(), &after);

        assert!(game.undo());
        game.toggle_chef_status("darian").unwrap();
        assert!(!game.redo());
    }

    #[test]
    fn undo_is_bounded_to_fifty() {
        let mut game = GameState::new();
        for _ in 0..30 {
            game.eliminate_chef("kevin", 1).unwrap();
            game.restore_chef("kevin").unwrap();
        }
        assert_eq!(game.undo_depth(), 50);
    }

    #[test]
    fn reset_game_restores_seed_and_clears_history() {
        let mut game = game_in_season();
        game.reset_game();
        assert_eq!(game.snapshot(), &GameSnapshot::seed());
        assert!(!game.can_undo());
    }

    #[test]
    fn merge_remote_state_is_idempotent_and_keeps_history() {
        let mut remote = game_in_draft();
        remote.draft_chef("machete").unwrap();
        let row = GameStateRow::from_snapshot(remote.snapshot(), PlayerId::Partner, None);

        let mut local = GameState::new();
        local.eliminate_chef("kevin", 1).unwrap();
        let depth = local.undo_depth();

        assert!(local.merge_remote_state(&row));
        let once = local.snapshot().clone();
        assert!(!local.merge_remote_state(&row));
        assert_eq!(local.snapshot(), &once);
        assert_eq!(local.undo_depth(), depth);
        assert_eq!(once.phase, Phase::Draft);
        assert_eq!(once.draft_history, vec!["machete".to_string()]);
    }

    #[test]
    fn merge_remote_predictions_upserts_by_key() {
        let mut game = game_in_season();
        let p = Prediction {
            episode_number: 4,
            player: PlayerId::Partner,
            chef_id: Some("darian".into()),
            locked: true,
            locked_at: None,
            correct: None,
        };
        assert!(game.merge_remote_predictions([p.clone()]));
        assert!(!game.merge_remote_predictions([p.clone()]));

        let resolved = Prediction {
            correct: Some(true),
            ..p
        };
        assert!(game.merge_remote_predictions([resolved]));
        assert_eq!(game.snapshot().predictions.len(), 1);
        assert_eq!(
            game.snapshot().prediction(4, PlayerId::Partner).unwrap().correct,
            Some(true)
        );
    }

    #[test]
    fn phase_serializes_kebab_case() {
        assert_eq!(serde_json::to_string(&Phase::PreDraft).unwrap(), "\"pre-draft\"");
        assert_eq!(Phase::Season.to_string(), "season");
    }
}
