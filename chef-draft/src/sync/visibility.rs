// Information hiding for the opponent's survivor predictions.

use crate::game::chef::PlayerId;
use crate::game::state::{GameSnapshot, Prediction};

pub use crate::game::state::HIDDEN_CHEF_ID;

/// What the filter decided for one incoming prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// Own prediction or not yet locked.
    PassThrough,
    /// Locked opponent pick that may now be shown.
    Revealed,
    /// Locked opponent pick that must stay secret.
    Hidden,
}

/// Redacts a locked opponent pick until the local player has locked their own
/// pick for the episode, or the episode has been scored.
#[derive(Debug, Clone, Copy)]
pub struct VisibilityFilter {
    player: PlayerId,
}

impl VisibilityFilter {
    pub fn new(player: PlayerId) -> Self {
        VisibilityFilter { player }
    }

    pub fn decide(&self, prediction: &Prediction, snapshot: &GameSnapshot) -> Visibility {
        if prediction.player == self.player || !prediction.locked {
            return Visibility::PassThrough;
        }
        let episode = prediction.episode_number;
        let own_locked = snapshot
            .prediction(episode, self.player)
            .is_some_and(|p| p.locked);
        if own_locked || snapshot.is_episode_scored(episode) {
            Visibility::Revealed
        } else {
            Visibility::Hidden
        }
    }

    /// Return the prediction as this client may see it.
    pub fn apply(&self, mut prediction: Prediction, snapshot: &GameSnapshot) -> Prediction {
        if self.decide(&prediction, snapshot) == Visibility::Hidden {
            prediction.chef_id = Some(HIDDEN_CHEF_ID.to_string());
        }
        prediction
    }
}
