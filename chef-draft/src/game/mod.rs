// Game domain: roster, scoring, undo history and the phase state machine.

pub mod chef;
pub mod history;
pub mod scoring;
pub mod state;

pub use chef::{Chef, ChefCategory, ChefStatus, Owner, PlayerId};
pub use scoring::{EpisodeResult, SeasonStandings};
pub use state::{EpisodeData, GameError, GameSnapshot, GameState, Phase, Prediction};
