// Presence: who is online, and when a returning client should refetch.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::game::chef::PlayerId;
use crate::sync::store::{RemoteStore, StoreError};

/// Hidden for at least this long before becoming visible triggers a refetch.
pub const DEFAULT_REFETCH_AFTER_HIDDEN: Duration = Duration::from_secs(5);

/// Explicit presence handle owned by a session. Call [`PresenceTracker::leave`]
/// when the session ends.
pub struct PresenceTracker {
    store: Arc<dyn RemoteStore>,
    player: PlayerId,
    members: watch::Receiver<BTreeSet<PlayerId>>,
    joined: bool,
    hidden_since: Option<Instant>,
    refetch_after: Duration,
}

impl PresenceTracker {
    pub fn new(store: Arc<dyn RemoteStore>, player: PlayerId, refetch_after: Duration) -> Self {
        let members = store.presence();
        PresenceTracker {
            store,
            player,
            members,
            joined: false,
            hidden_since: None,
            refetch_after,
        }
    }

    /// Announce this player on the presence channel.
    pub async fn join(&mut self) -> Result<(), StoreError> {
        if self.joined {
            return Ok(());
        }
        self.store.track(self.player).await?;
        self.joined = true;
        info!("Joined presence as {}", self.player);
        Ok(())
    }

    /// Withdraw from the presence channel. Safe to call more than once.
    pub async fn leave(&mut self) -> Result<(), StoreError> {
        if !self.joined {
            return Ok(());
        }
        self.joined = false;
        self.store.untrack(self.player).await?;
        info!("Left presence as {}", self.player);
        Ok(())
    }

    pub fn is_joined(&self) -> bool {
        self.joined
    }

    pub fn online(&self) -> BTreeSet<PlayerId> {
        self.members.borrow().clone()
    }

    pub fn opponent_online(&self) -> bool {
        self.members.borrow().contains(&self.player.opponent())
    }

    /// Wait for the membership set to change and report whether the opponent
    /// is online. `None` once the store has dropped the channel.
    pub async fn changed(&mut self) -> Option<bool> {
        self.members.changed().await.ok()?;
        Some(self.opponent_online())
    }

    pub fn on_hidden(&mut self, now: Instant) {
        if self.hidden_since.is_none() {
            self.hidden_since = Some(now);
        }
    }

    /// Returns `true` when the client was hidden long enough that remote
    /// state should be refetched.
    pub fn on_visible(&mut self, now: Instant) -> bool {
        let Some(since) = self.hidden_since.take() else {
            return false;
        };
        let away = now.saturating_duration_since(since);
        let refetch = away >= self.refetch_after;
        debug!("Visible again after {away:?}, refetch: {refetch}");
        refetch
    }
}
