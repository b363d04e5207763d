// Inbound sync: turns change-feed events into merges and opponent notices.

use std::collections::BTreeMap;
use std::fmt;

use tracing::{debug, warn};

use crate::game::chef::{ChefStatus, PlayerId};
use crate::game::state::{GameSnapshot, Phase, Prediction};
use crate::protocol::{ChangeEvent, GameStateRow, PredictionRow};
use crate::sync::gateway::OwnWrites;
use crate::sync::visibility::{Visibility, VisibilityFilter};

// ---------------------------------------------------------------------------
// Notices
// ---------------------------------------------------------------------------

/// A human-readable description of something the opponent did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    DraftStarted,
    SeasonStarted,
    GameReset { by: PlayerId },
    ChefDrafted { by: PlayerId, chef: String },
    ChefEliminated { by: PlayerId, chef: String },
    ChefRestored { by: PlayerId, chef: String },
    EpisodeScored { by: PlayerId, episode: u32 },
    SeasonEpisodeAdvanced { episode: u32 },
    PreDraftEpisodeAdvanced { episode: u32 },
    PredictionLocked { by: PlayerId, episode: u32 },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::DraftStarted => write!(f, "Draft started"),
            Notice::SeasonStarted => write!(f, "Season started"),
            Notice::GameReset { by } => write!(f, "{} reset the game", by.display_name()),
            Notice::ChefDrafted { by, chef } => write!(f, "{} drafted {chef}", by.display_name()),
            Notice::ChefEliminated { by, chef } => {
                write!(f, "{} eliminated {chef}", by.display_name())
            }
            Notice::ChefRestored { by, chef } => {
                write!(f, "{} restored {chef}", by.display_name())
            }
            Notice::EpisodeScored { by, episode } => {
                write!(f, "{} scored Episode {episode}", by.display_name())
            }
            Notice::SeasonEpisodeAdvanced { episode }
            | Notice::PreDraftEpisodeAdvanced { episode } => {
                write!(f, "Advanced to Episode {episode}")
            }
            Notice::PredictionLocked { by, episode } => write!(
                f,
                "{} locked their prediction for Episode {episode}",
                by.display_name()
            ),
        }
    }
}

fn chef_name(row: &GameStateRow, chef_id: &str) -> String {
    row.chefs
        .iter()
        .find(|c| c.id == chef_id)
        .map(|c| c.full_name())
        .unwrap_or_else(|| chef_id.to_string())
}

/// Describe the most significant difference between two remote rows.
///
/// Checked in order: phase, a new draft pick, a chef status flip, a newly
/// scored episode, the season counter, the pre-draft counter. Nothing is
/// reported for the first row seen.
pub fn diff_and_notify(
    prev: Option<&GameStateRow>,
    next: &GameStateRow,
    by: PlayerId,
) -> Option<Notice> {
    let prev = prev?;

    if prev.phase != next.phase {
        return Some(match next.phase {
            Phase::Draft => Notice::DraftStarted,
            Phase::Season => Notice::SeasonStarted,
            Phase::PreDraft => Notice::GameReset { by },
        });
    }

    if next.draft_history.len() > prev.draft_history.len() {
        let chef = next
            .draft_history
            .last()
            .map(|id| chef_name(next, id))
            .unwrap_or_default();
        return Some(Notice::ChefDrafted { by, chef });
    }

    for chef in &next.chefs {
        let Some(before) = prev.chefs.iter().find(|c| c.id == chef.id) else {
            continue;
        };
        match (before.status, chef.status) {
            (ChefStatus::Active, ChefStatus::Eliminated) => {
                return Some(Notice::ChefEliminated {
                    by,
                    chef: chef.full_name(),
                })
            }
            (ChefStatus::Eliminated, ChefStatus::Active) => {
                return Some(Notice::ChefRestored {
                    by,
                    chef: chef.full_name(),
                })
            }
            _ => {}
        }
    }

    if next.episodes.len() > prev.episodes.len() {
        if let Some(episode) = next.episodes.last() {
            return Some(Notice::EpisodeScored {
                by,
                episode: episode.episode_number,
            });
        }
    }
    for episode in &next.episodes {
        let newly_scored = prev
            .episodes
            .iter()
            .find(|e| e.episode_number == episode.episode_number)
            .is_some_and(|e| !e.scored && episode.scored);
        if newly_scored {
            return Some(Notice::EpisodeScored {
                by,
                episode: episode.episode_number,
            });
        }
    }

    if next.season_episode != prev.season_episode {
        return Some(Notice::SeasonEpisodeAdvanced {
            episode: next.season_episode,
        });
    }

    if next.current_episode != prev.current_episode {
        return Some(Notice::PreDraftEpisodeAdvanced {
            episode: next.current_episode,
        });
    }

    None
}

// ---------------------------------------------------------------------------
// ChangeFeedListener
// ---------------------------------------------------------------------------

/// A change the session should merge.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    GameState {
        row: GameStateRow,
        notice: Option<Notice>,
    },
    Predictions {
        predictions: Vec<Prediction>,
        notice: Option<Notice>,
    },
}

/// Filters the change feed for one client: drops its own echoes, produces
/// notices, and hides the opponent's locked picks.
#[derive(Debug)]
pub struct ChangeFeedListener {
    player: PlayerId,
    filter: VisibilityFilter,
    /// Last remote game-state row seen, echoes included.
    last_remote: Option<GameStateRow>,
    /// Unfiltered opponent predictions, kept for later reveal.
    opponent_raw: BTreeMap<(u32, PlayerId), Prediction>,
}

impl ChangeFeedListener {
    pub fn new(player: PlayerId) -> Self {
        ChangeFeedListener {
            player,
            filter: VisibilityFilter::new(player),
            last_remote: None,
            opponent_raw: BTreeMap::new(),
        }
    }

    /// Set the diff baseline, e.g. after hydration.
    pub fn prime(&mut self, row: &GameStateRow) {
        self.last_remote = Some(row.clone());
    }

    fn is_echo(
        &self,
        write_id: Option<&str>,
        author: Option<PlayerId>,
        own: &mut OwnWrites,
    ) -> bool {
        match write_id {
            Some(id) if own.remove(id) => true,
            Some(_) => author == Some(self.player),
            None => author == Some(self.player),
        }
    }

    /// Process one change event against the current local snapshot.
    pub fn handle(
        &mut self,
        event: ChangeEvent,
        own_writes: &mut OwnWrites,
        snapshot: &GameSnapshot,
    ) -> Option<Inbound> {
        match event {
            ChangeEvent::GameState(value) => {
                let row: GameStateRow = match serde_json::from_value(value) {
                    Ok(row) => row,
                    Err(e) => {
                        warn!("Dropping malformed game-state row: {e}");
                        return None;
                    }
                };
                if self.is_echo(row.write_id.as_deref(), row.updated_by, own_writes) {
                    debug!("Ignoring echo of own game-state write {:?}", row.write_id);
                    self.last_remote = Some(row);
                    return None;
                }

                let by = row.updated_by.unwrap_or_else(|| self.player.opponent());
                let notice = diff_and_notify(self.last_remote.as_ref(), &row, by);
                self.last_remote = Some(row.clone());
                Some(Inbound::GameState { row, notice })
            }
            ChangeEvent::Predictions(value) => {
                let row: PredictionRow = match serde_json::from_value(value) {
                    Ok(row) => row,
                    Err(e) => {
                        warn!("Dropping malformed prediction row: {e}");
                        return None;
                    }
                };
                // Rows carry no author; a row written without a write id is
                // attributed to the player it belongs to.
                let author = row.write_id.is_none().then_some(row.player);
                if self.is_echo(row.write_id.as_deref(), author, own_writes) {
                    debug!(
                        "Ignoring echo of own prediction write for episode {}",
                        row.episode_number
                    );
                    return None;
                }

                let prediction = row.to_prediction();
                let mut notice = None;
                if prediction.player != self.player {
                    let was_locked = self
                        .opponent_raw
                        .get(&prediction.key())
                        .is_some_and(|p| p.locked);
                    if prediction.locked && !was_locked {
                        notice = Some(Notice::PredictionLocked {
                            by: prediction.player,
                            episode: prediction.episode_number,
                        });
                    }
                    self.opponent_raw
                        .insert(prediction.key(), prediction.clone());
                }
                let visible = self.filter.apply(prediction, snapshot);
                Some(Inbound::Predictions {
                    predictions: vec![visible],
                    notice,
                })
            }
        }
    }

    /// Filter a full prediction fetch, caching opponent rows for reveal.
    pub fn ingest_fetched(
        &mut self,
        rows: Vec<PredictionRow>,
        snapshot: &GameSnapshot,
    ) -> Vec<Prediction> {
        rows.into_iter()
            .map(|row| {
                let prediction = row.to_prediction();
                if prediction.player != self.player {
                    self.opponent_raw
                        .insert(prediction.key(), prediction.clone());
                }
                self.filter.apply(prediction, snapshot)
            })
            .collect()
    }

    /// Opponent picks that are now visible but still redacted locally. A
    /// result already resolved locally is kept.
    pub fn reveal(&self, snapshot: &GameSnapshot) -> Vec<Prediction> {
        self.opponent_raw
            .values()
            .filter(|raw| self.filter.decide(raw, snapshot) != Visibility::Hidden)
            .filter_map(|raw| {
                let local = snapshot
                    .prediction(raw.episode_number, raw.player)
                    .filter(|p| p.is_hidden())?;
                Some(Prediction {
                    correct: raw.correct.or(local.correct),
                    ..raw.clone()
                })
            })
            .collect()
    }
}
