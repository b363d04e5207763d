// Weekly scoring: per-chef points, result validation, and season standings.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::chef::{Chef, Owner, PlayerId};
use super::state::{EpisodeData, Prediction};

/// Points awarded for a correct survivor prediction.
pub const PREDICTION_CORRECT_BONUS: i32 = 3;
/// Points deducted for an incorrect survivor prediction.
pub const PREDICTION_WRONG_PENALTY: i32 = -2;

/// What happened to one chef in one episode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeResult {
    pub chef_id: String,
    pub survived: bool,
    pub won_challenge: bool,
    pub top_kitchen: bool,
    pub bottom3: bool,
    pub eliminated: bool,
}

impl EpisodeResult {
    /// A result with every fact unset.
    pub fn for_chef(chef_id: &str) -> Self {
        EpisodeResult {
            chef_id: chef_id.to_string(),
            ..Default::default()
        }
    }

    /// Survivors for prediction resolution: survived and not sent home.
    pub fn counts_as_survivor(&self) -> bool {
        self.survived && !self.eliminated
    }
}

/// Points a single result is worth.
///
/// Elimination overrides every other fact. Otherwise: +2 survived, +4 won the
/// challenge, +1 top kitchen, and -1 for landing in the bottom three while
/// still surviving.
pub fn points(result: &EpisodeResult) -> i32 {
    if result.eliminated {
        return -3;
    }

    let mut total = 0;
    if result.survived {
        total += 2;
    }
    if result.won_challenge {
        total += 4;
    }
    if result.top_kitchen {
        total += 1;
    }
    if result.bottom3 && result.survived {
        total -= 1;
    }
    total
}

/// Human-readable violations of the result invariants. Empty means valid.
pub fn validate(result: &EpisodeResult) -> Vec<String> {
    let mut errors = Vec::new();
    if result.eliminated && result.survived {
        errors.push(format!(
            "{}: cannot be both eliminated and survived",
            result.chef_id
        ));
    }
    if result.won_challenge && result.bottom3 {
        errors.push(format!(
            "{}: cannot win the challenge and be in the bottom 3",
            result.chef_id
        ));
    }
    errors
}

/// Validate a whole episode's results, collecting every violation.
pub fn validate_all(results: &[EpisodeResult]) -> Vec<String> {
    results.iter().flat_map(validate).collect()
}

/// Give the wildcard's points to the team with the lower (or equal) score.
///
/// Ties go to the first-listed team, `a`.
pub fn assign_wildcard(a: i32, b: i32, wildcard: i32) -> (i32, i32) {
    if a <= b {
        (a + wildcard, b)
    } else {
        (a, b + wildcard)
    }
}

fn prediction_points(prediction: Option<&Prediction>) -> i32 {
    match prediction.and_then(|p| p.correct) {
        Some(true) => PREDICTION_CORRECT_BONUS,
        Some(false) => PREDICTION_WRONG_PENALTY,
        None => 0,
    }
}

// ---------------------------------------------------------------------------
// Season standings
// ---------------------------------------------------------------------------

/// Who took an episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EpisodeOutcome {
    Won(PlayerId),
    Tie,
}

/// Team totals for a single scored episode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeScore {
    pub episode_number: u32,
    pub josh: i32,
    pub partner: i32,
    pub josh_cumulative: i32,
    pub partner_cumulative: i32,
    pub outcome: EpisodeOutcome,
}

/// Consecutive episode wins by one player, counted back from the latest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Streak {
    pub player: Option<PlayerId>,
    pub count: u32,
}

/// Season point total for a drafted chef.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChefTotal {
    pub chef_id: String,
    pub owner: Owner,
    pub points: i32,
}

/// Derived season summary. Recomputed from the snapshot, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeasonStandings {
    pub josh_total: i32,
    pub partner_total: i32,
    pub josh_wins: u32,
    pub partner_wins: u32,
    pub ties: u32,
    /// `None` when the totals are level.
    pub leader: Option<PlayerId>,
    pub lead_margin: i32,
    pub streak: Streak,
    pub episodes: Vec<EpisodeScore>,
    pub chef_totals: Vec<ChefTotal>,
}

impl SeasonStandings {
    pub fn compute(chefs: &[Chef], episodes: &[EpisodeData], predictions: &[Prediction]) -> Self {
        let owners: HashMap<&str, Owner> =
            chefs.iter().map(|c| (c.id.as_str(), c.owner)).collect();
        let mut chef_points: HashMap<&str, i32> = chefs
            .iter()
            .filter(|c| c.owner != Owner::Undrafted)
            .map(|c| (c.id.as_str(), 0))
            .collect();

        let mut ordered: Vec<&EpisodeData> = episodes.iter().collect();
        ordered.sort_by_key(|e| e.episode_number);

        let mut standings = SeasonStandings {
            josh_total: 0,
            partner_total: 0,
            josh_wins: 0,
            partner_wins: 0,
            ties: 0,
            leader: None,
            lead_margin: 0,
            streak: Streak::default(),
            episodes: Vec::with_capacity(ordered.len()),
            chef_totals: Vec::new(),
        };

        for episode in ordered {
            let (mut josh, mut partner, mut wildcard) = (0, 0, 0);

            for result in &episode.results {
                let Some(owner) = owners.get(result.chef_id.as_str()) else {
                    continue;
                };
                let pts = points(result);
                if let Some(total) = chef_points.get_mut(result.chef_id.as_str()) {
                    *total += pts;
                }
                match owner {
                    Owner::Josh => josh += pts,
                    Owner::Partner => partner += pts,
                    Owner::Wildcard => wildcard += pts,
                    Owner::Undrafted => {}
                }
            }

            let find = |player: PlayerId| {
                predictions
                    .iter()
                    .find(|p| p.episode_number == episode.episode_number && p.player == player)
            };
            josh += prediction_points(find(PlayerId::Josh));
            partner += prediction_points(find(PlayerId::Partner));

            let (josh, partner) = assign_wildcard(josh, partner, wildcard);

            standings.josh_total += josh;
            standings.partner_total += partner;

            let outcome = if josh > partner {
                standings.josh_wins += 1;
                EpisodeOutcome::Won(PlayerId::Josh)
            } else if partner > josh {
                standings.partner_wins += 1;
                EpisodeOutcome::Won(PlayerId::Partner)
            } else {
                standings.ties += 1;
                EpisodeOutcome::Tie
            };

            standings.episodes.push(EpisodeScore {
                episode_number: episode.episode_number,
                josh,
                partner,
                josh_cumulative: standings.josh_total,
                partner_cumulative: standings.partner_total,
                outcome,
            });
        }

        standings.leader = match standings.josh_total.cmp(&standings.partner_total) {
            std::cmp::Ordering::Greater => Some(PlayerId::Josh),
            std::cmp::Ordering::Less => Some(PlayerId::Partner),
            std::cmp::Ordering::Equal => None,
        };
        standings.lead_margin = (standings.josh_total - standings.partner_total).abs();
        standings.streak = current_streak(&standings.episodes);

        standings.chef_totals = chefs
            .iter()
            .filter(|c| c.owner != Owner::Undrafted)
            .map(|c| ChefTotal {
                chef_id: c.id.clone(),
                owner: c.owner,
                points: chef_points.get(c.id.as_str()).copied().unwrap_or(0),
            })
            .collect();
        standings
            .chef_totals
            .sort_by(|a, b| b.points.cmp(&a.points));

        standings
    }
}

fn current_streak(episodes: &[EpisodeScore]) -> Streak {
    let mut streak = Streak::default();
    for score in episodes.iter().rev() {
        let EpisodeOutcome::Won(winner) = score.outcome else {
            break;
        };
        match streak.player {
            None => {
                streak.player = Some(winner);
                streak.count = 1;
            }
            Some(p) if p == winner => streak.count += 1,
            Some(_) => break,
        }
    }
    streak
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::chef::{Chef, ChefCategory};

    fn result(chef: &str) -> EpisodeResult {
        EpisodeResult::for_chef(chef)
    }

    #[test]
    fn eliminated_overrides_everything() {
        let r = EpisodeResult {
            won_challenge: true,
            top_kitchen: true,
            eliminated: true,
            ..result("a")
        };
        assert_eq!(points(&r), -3);
    }

    #[test]
    fn survived_and_won_challenge() {
        let r = EpisodeResult {
            survived: true,
            won_challenge: true,
            top_kitchen: true,
            ..result("a")
        };
        assert_eq!(points(&r), 7);
    }

    #[test]
    fn bottom_three_penalty_only_when_survived() {
        let survived = EpisodeResult {
            survived: true,
            bottom3: true,
            ..result("a")
        };
        assert_eq!(points(&survived), 1);

        let not_survived = EpisodeResult {
            bottom3: true,
            ..result("a")
        };
        assert_eq!(points(&not_survived), 0);
    }

    #[test]
    fn validate_flags_both_invariants() {
        let r = EpisodeResult {
            survived: true,
            eliminated: true,
            won_challenge: true,
            bottom3: true,
            ..result("kevin")
        };
        let errors = validate(&r);
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("eliminated and survived"));
        assert!(errors[1].contains("bottom 3"));
    }

    #[test]
    fn validate_accepts_clean_result() {
        let r = EpisodeResult {
            survived: true,
            top_kitchen: true,
            ..result("kevin")
        };
        assert!(validate(&r).is_empty());
        assert!(validate_all(&[r.clone(), result("tim")]).is_empty());
    }

    #[test]
    fn wildcard_goes_to_lower_team() {
        assert_eq!(assign_wildcard(3, 8, 4), (7, 8));
        assert_eq!(assign_wildcard(8, 3, 4), (8, 7));
    }

    #[test]
    fn wildcard_tie_goes_to_first_team() {
        assert_eq!(assign_wildcard(5, 5, 2), (7, 5));
    }

    fn owned(id: &str, owner: Owner) -> Chef {
        let mut chef = Chef::new(id, id, "X", ChefCategory::Pro);
        chef.owner = owner;
        chef
    }

    fn scored(number: u32, results: Vec<EpisodeResult>) -> EpisodeData {
        EpisodeData {
            episode_number: number,
            results,
            scored: true,
        }
    }

    fn survived(chef: &str) -> EpisodeResult {
        EpisodeResult {
            survived: true,
            ..result(chef)
        }
    }

    #[test]
    fn standings_apply_wildcard_and_predictions() {
        let chefs = vec![
            owned("j1", Owner::Josh),
            owned("p1", Owner::Partner),
            owned("w", Owner::Wildcard),
        ];
        let episodes = vec![scored(
            4,
            vec![
                survived("j1"),
                EpisodeResult {
                    won_challenge: true,
                    ..survived("p1")
                },
                survived("w"),
            ],
        )];
        let predictions = vec![Prediction {
            episode_number: 4,
            player: PlayerId::Josh,
            chef_id: Some("j1".into()),
            locked: true,
            locked_at: None,
            correct: Some(true),
        }];

        let standings = SeasonStandings::compute(&chefs, &episodes, &predictions);
        // josh: 2 + 3 (prediction) = 5, partner: 6. Wildcard (2) to josh.
        assert_eq!(standings.episodes[0].josh, 7);
        assert_eq!(standings.episodes[0].partner, 6);
        assert_eq!(standings.leader, Some(PlayerId::Josh));
        assert_eq!(standings.lead_margin, 1);
        assert_eq!(standings.josh_wins, 1);
    }

    #[test]
    fn standings_streak_broken_by_tie() {
        let chefs = vec![owned("j1", Owner::Josh), owned("p1", Owner::Partner)];
        let episodes = vec![
            scored(4, vec![survived("j1")]),
            scored(5, vec![survived("j1"), survived("p1")]),
            scored(6, vec![survived("p1")]),
            scored(7, vec![survived("p1")]),
        ];
        let standings = SeasonStandings::compute(&chefs, &episodes, &[]);
        assert_eq!(standings.ties, 1);
        assert_eq!(standings.partner_wins, 2);
        assert_eq!(
            standings.streak,
            Streak {
                player: Some(PlayerId::Partner),
                count: 2
            }
        );
        assert_eq!(standings.episodes[3].partner_cumulative, 6);
    }

    #[test]
    fn standings_sort_episodes_and_chefs() {
        let chefs = vec![
            owned("j1", Owner::Josh),
            owned("j2", Owner::Josh),
            owned("free", Owner::Undrafted),
        ];
        let episodes = vec![
            scored(5, vec![survived("j2")]),
            scored(4, vec![survived("j1"), survived("j2")]),
        ];
        let standings = SeasonStandings::compute(&chefs, &episodes, &[]);
        assert_eq!(standings.episodes[0].episode_number, 4);
        assert_eq!(standings.chef_totals.len(), 2);
        assert_eq!(standings.chef_totals[0].chef_id, "j2");
        assert_eq!(standings.chef_totals[0].points, 4);
    }

    #[test]
    fn wrong_prediction_costs_two() {
        let chefs = vec![owned("j1", Owner::Josh)];
        let episodes = vec![scored(4, vec![])];
        let predictions = vec![Prediction {
            episode_number: 4,
            player: PlayerId::Partner,
            chef_id: Some("j1".into()),
            locked: true,
            locked_at: None,
            correct: Some(false),
        }];
        let standings = SeasonStandings::compute(&chefs, &episodes, &predictions);
        assert_eq!(standings.partner_total, -2);
    }
}
