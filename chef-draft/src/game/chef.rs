// Chef roster model: players, owners, lifecycle status and the seed cast.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Draft constants
// ---------------------------------------------------------------------------

/// Number of picks in the snake draft (7 per player).
pub const DRAFT_PICKS: usize = 14;

/// Fixed snake order. Josh takes slot 0, then the players alternate in pairs.
pub const SNAKE_ORDER: [PlayerId; DRAFT_PICKS] = [
    PlayerId::Josh,
    PlayerId::Partner,
    PlayerId::Partner,
    PlayerId::Josh,
    PlayerId::Josh,
    PlayerId::Partner,
    PlayerId::Partner,
    PlayerId::Josh,
    PlayerId::Josh,
    PlayerId::Partner,
    PlayerId::Partner,
    PlayerId::Josh,
    PlayerId::Josh,
    PlayerId::Partner,
];

/// One of the two people playing the game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerId {
    Josh,
    Partner,
}

impl PlayerId {
    /// Parse a player identifier ("josh" / "partner"), case-insensitive.
    pub fn from_str_id(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "josh" => Some(PlayerId::Josh),
            "partner" => Some(PlayerId::Partner),
            _ => None,
        }
    }

    /// Wire identifier for this player.
    pub fn as_str(&self) -> &'static str {
        match self {
            PlayerId::Josh => "josh",
            PlayerId::Partner => "partner",
        }
    }

    /// Name shown in notices.
    pub fn display_name(&self) -> &'static str {
        match self {
            PlayerId::Josh => "Josh",
            PlayerId::Partner => "Partner",
        }
    }

    pub fn opponent(&self) -> PlayerId {
        match self {
            PlayerId::Josh => PlayerId::Partner,
            PlayerId::Partner => PlayerId::Josh,
        }
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Who a chef belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Owner {
    Josh,
    Partner,
    Wildcard,
    Undrafted,
}

impl From<PlayerId> for Owner {
    fn from(player: PlayerId) -> Self {
        match player {
            PlayerId::Josh => Owner::Josh,
            PlayerId::Partner => Owner::Partner,
        }
    }
}

/// The three contestant pools on the show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChefCategory {
    Pro,
    Social,
    Home,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChefStatus {
    Active,
    Eliminated,
}

/// A contestant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chef {
    /// Stable identifier (e.g. "machete").
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub category: ChefCategory,
    pub status: ChefStatus,
    /// Episode the chef went home in, if eliminated.
    pub eliminated_episode: Option<u32>,
    /// Whether the elimination happened before the draft.
    pub eliminated_pre_draft: bool,
    pub owner: Owner,
}

impl Chef {
    /// A fresh, active, undrafted chef.
    pub fn new(id: &str, first_name: &str, last_name: &str, category: ChefCategory) -> Self {
        Chef {
            id: id.to_string(),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            category,
            status: ChefStatus::Active,
            eliminated_episode: None,
            eliminated_pre_draft: false,
            owner: Owner::Undrafted,
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn is_active(&self) -> bool {
        self.status == ChefStatus::Active
    }

    /// Still in the draft pool: active and not yet owned.
    pub fn is_available(&self) -> bool {
        self.is_active() && self.owner == Owner::Undrafted
    }
}

/// Owner of the given draft slot, or `None` past the last slot.
pub fn snake_slot_owner(pick: usize) -> Option<PlayerId> {
    SNAKE_ORDER.get(pick).copied()
}

/// The season cast: eight chefs in each category, all active and undrafted.
pub fn seed_roster() -> Vec<Chef> {
    use ChefCategory::{Home, Pro, Social};

    let cast: [(&str, &str, &str, ChefCategory); 24] = [
        ("machete", "Machete", "González", Pro),
        ("kevin", "Kevin", "Hill", Pro),
        ("hunter", "Hunter", "Gentry", Pro),
        ("gabrielle", "Gabrielle", "Coniglio", Pro),
        ("darian", "Darian", "Bryan", Pro),
        ("connor", "Connor", "Caine", Pro),
        ("cole", "Cole", "Lawson", Pro),
        ("belinda", "Belinda", "Vu", Pro),
        ("tim", "Tim", "Laielli", Social),
        ("miriam", "Miriam", "Green", Social),
        ("matt", "Matt", "Starcher", Social),
        ("mareya", "Mareya", "Ibrahim-Jones", Social),
        ("landon", "Landon", "Bridges", Social),
        ("henna", "Henna", "Alvarez", Social),
        ("christian", "Christian", "Alquiza", Social),
        ("andy", "Andy", "Allo", Social),
        ("michael", "Michael", "Galyean", Home),
        ("jared", "Jared", "Veldheer", Home),
        ("emerson", "Emerson", "Bartolome", Home),
        ("elise", "Elise", "Jesse", Home),
        ("earl", "Earl", "Middleton", Home),
        ("diana", "Diana", "Silva Head", Home),
        ("danielle", "Danielle", "Kartes", Home),
        ("amber", "Amber", "Kellehan", Home),
    ];

    cast.iter()
        .map(|&(id, first, last, category)| Chef::new(id, first, last, category))
        .collect()
}
