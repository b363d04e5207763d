// Client session and orchestration logic.
//
// The central event loop for one player's client. Applies user commands to
// the local game state, pushes changes out through the sync gateway, merges
// the opponent's changes from the remote change feed, and keeps the
// presentation layer informed through `UiUpdate` messages.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::db::Database;
use crate::game::chef::PlayerId;
use crate::game::state::{GameError, GameState, Phase, Prediction};
use crate::protocol::{ChangeEvent, GameView, UiUpdate, UserCommand};
use crate::sync::gateway::{OutboundWrite, SyncGateway};
use crate::sync::listener::{ChangeFeedListener, Inbound};
use crate::sync::presence::PresenceTracker;
use crate::sync::store::{RemoteStore, StoreError};
use crate::sync::ws_store::WsStore;

// ---------------------------------------------------------------------------
// Writer task
// ---------------------------------------------------------------------------

/// A remote write that did not go through.
#[derive(Debug)]
pub struct WriteFailure {
    pub write: OutboundWrite,
    pub error: StoreError,
}

/// Perform writes strictly in the order they were queued. Failures are
/// reported back; nothing is retried.
async fn write_loop(
    store: Arc<dyn RemoteStore>,
    mut writes: mpsc::UnboundedReceiver<OutboundWrite>,
    failures: mpsc::UnboundedSender<WriteFailure>,
) {
    while let Some(write) = writes.recv().await {
        let result = match &write {
            OutboundWrite::GameState(row) => store.upsert_game_state(row.clone()).await,
            OutboundWrite::Prediction(row) => store.upsert_prediction(row.clone()).await,
        };
        if let Err(error) = result {
            warn!("Remote write {:?} failed: {error}", write.write_id());
            if failures.send(WriteFailure { write, error }).is_err() {
                break;
            }
        }
    }
}

fn spawn_writer(
    store: Arc<dyn RemoteStore>,
) -> (
    mpsc::UnboundedSender<OutboundWrite>,
    mpsc::UnboundedReceiver<WriteFailure>,
    JoinHandle<()>,
) {
    let (write_tx, write_rx) = mpsc::unbounded_channel();
    let (fail_tx, fail_rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(write_loop(store, write_rx, fail_tx));
    (write_tx, fail_rx, handle)
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Everything one client owns: the game reducer, both sync directions, and
/// local persistence.
pub struct Session {
    config: Config,
    game: GameState,
    gateway: SyncGateway,
    listener: ChangeFeedListener,
    store: Arc<dyn RemoteStore>,
    db: Option<Database>,
}

impl Session {
    /// Build a session, resuming from the locally stored snapshot if there
    /// is one.
    pub fn new(config: Config, store: Arc<dyn RemoteStore>, db: Option<Database>) -> Self {
        let player = config.player.id;
        let game = match db.as_ref().map(Database::load_snapshot) {
            Some(Ok(Some(snapshot))) => {
                info!("Resumed local snapshot (phase {})", snapshot.phase);
                GameState::from_snapshot(snapshot)
            }
            Some(Err(e)) => {
                warn!("Failed to load local snapshot, starting fresh: {e:#}");
                GameState::new()
            }
            Some(Ok(None)) | None => GameState::new(),
        };

        Session {
            gateway: SyncGateway::new(player, config.sync.debounce()),
            listener: ChangeFeedListener::new(player),
            config,
            game,
            store,
            db,
        }
    }

    /// Connect to the configured hub and open the configured local
    /// database.
    pub async fn connect(config: Config) -> anyhow::Result<Self> {
        let store = WsStore::connect(&config.sync.hub_url)
            .await
            .with_context(|| format!("failed to connect to hub at {}", config.sync.hub_url))?;
        let db = Database::open(&config.database.path).context("failed to open local database")?;
        info!(
            "Session for {} connected to {}, local state in {}",
            config.player.id, config.sync.hub_url, config.database.path
        );
        Ok(Session::new(config, Arc::new(store), Some(db)))
    }

    pub fn player(&self) -> PlayerId {
        self.config.player.id
    }

    pub fn game(&self) -> &GameState {
        &self.game
    }

    pub fn view(&self) -> GameView {
        let snapshot = self.game.snapshot().clone();
        GameView {
            standings: snapshot.standings(),
            snapshot,
            can_undo: self.game.can_undo(),
            can_redo: self.game.can_redo(),
        }
    }

    /// Apply a game command to the local state. Session-level commands
    /// (visibility, quit) are ignored here.
    pub fn apply_command(&mut self, cmd: UserCommand) -> Result<(), GameError> {
        let player = self.player();
        match cmd {
            UserCommand::EliminateChef { chef_id, episode } => {
                self.game.eliminate_chef(&chef_id, episode)
            }
            UserCommand::RestoreChef { chef_id } => self.game.restore_chef(&chef_id),
            UserCommand::AdvanceEpisode => self.game.advance_episode(),
            UserCommand::StartDraft => self.game.start_draft(),
            UserCommand::DraftChef { chef_id } => {
                self.game.draft_chef(&chef_id)?;
                let snapshot = self.game.snapshot();
                if self.config.sync.auto_finalize_draft
                    && snapshot.phase == Phase::Draft
                    && snapshot.is_draft_complete()
                {
                    info!("Last draft slot filled, finalizing draft");
                    self.game.finalize_draft()?;
                }
                Ok(())
            }
            UserCommand::UndoLastPick => self.game.undo_last_pick(),
            UserCommand::FinalizeDraft => self.game.finalize_draft(),
            UserCommand::ScoreEpisode {
                episode_number,
                results,
            } => {
                let first_time = self.game.score_episode(episode_number, results)?;
                info!("Scored episode {episode_number} (first time: {first_time})");
                // Scoring reveals opponent picks that were still hidden; they
                // need resolving too.
                if self.merge_revealed() {
                    self.game.resolve_scored_episode(episode_number)?;
                }
                Ok(())
            }
            UserCommand::ToggleChefStatus { chef_id } => self.game.toggle_chef_status(&chef_id),
            UserCommand::LockPrediction {
                episode_number,
                chef_id,
            } => self
                .game
                .lock_prediction(episode_number, player, chef_id.as_deref()),
            UserCommand::Undo => {
                if !self.game.undo() {
                    debug!("Nothing to undo");
                }
                Ok(())
            }
            UserCommand::Redo => {
                if !self.game.redo() {
                    debug!("Nothing to redo");
                }
                Ok(())
            }
            UserCommand::ResetGame => {
                self.game.reset_game();
                Ok(())
            }
            UserCommand::VisibilityChanged { .. } | UserCommand::Quit => Ok(()),
        }
    }

    /// Merge opponent picks that have become visible. Returns `true` if any
    /// were revealed.
    fn merge_revealed(&mut self) -> bool {
        let revealed = self.listener.reveal(self.game.snapshot());
        if revealed.is_empty() {
            return false;
        }
        debug!("Revealing {} opponent predictions", revealed.len());
        self.merge_predictions(revealed);
        true
    }

    fn merge_predictions(&mut self, predictions: Vec<Prediction>) {
        self.gateway.acknowledge_remote_predictions(&predictions);
        self.game.merge_remote_predictions(predictions);
    }

    fn persist(&self) {
        if let Some(db) = &self.db {
            if let Err(e) = db.save_snapshot(self.game.snapshot()) {
                warn!("Failed to persist local snapshot: {e:#}");
            }
        }
    }

    /// Hand the current snapshot to the gateway and queue any prediction
    /// writes it produces.
    fn schedule_sync(&mut self, writes: &mpsc::UnboundedSender<OutboundWrite>) {
        let rows = self.gateway.observe(self.game.snapshot(), Instant::now());
        for row in rows {
            if writes.send(OutboundWrite::Prediction(row)).is_err() {
                warn!("Writer task is gone, dropping prediction write");
            }
        }
    }

    /// Fetch the remote rows and merge them. Seeds the remote row from the
    /// local snapshot if the store has none. Failures are logged and the
    /// local state is kept.
    pub async fn hydrate(&mut self, writes: &mpsc::UnboundedSender<OutboundWrite>) {
        let fetched = match self.store.fetch_game_state().await {
            Ok(Some(row)) => {
                self.game.merge_remote_state(&row);
                self.gateway.acknowledge_remote_state(&row);
                self.listener.prime(&row);
                info!("Hydrated game state (phase {})", row.phase);
                true
            }
            Ok(None) => {
                info!("No remote game state yet, seeding from local snapshot");
                self.schedule_sync(writes);
                if let Some(row) = self.gateway.take_pending() {
                    self.listener.prime(&row);
                    if writes.send(OutboundWrite::GameState(row)).is_err() {
                        warn!("Writer task is gone, seed write dropped");
                    }
                }
                true
            }
            Err(e) => {
                warn!("Failed to fetch remote game state: {e}");
                false
            }
        };

        match self.store.fetch_predictions().await {
            Ok(rows) => {
                let predictions = self.listener.ingest_fetched(rows, self.game.snapshot());
                self.merge_predictions(predictions);
            }
            Err(e) => warn!("Failed to fetch remote predictions: {e}"),
        }

        self.merge_revealed();
        self.persist();
        // Without a remote baseline a write could clobber newer remote state.
        if fetched {
            self.schedule_sync(writes);
        }
    }

    async fn handle_command(
        &mut self,
        cmd: UserCommand,
        ui_tx: &mpsc::Sender<UiUpdate>,
        writes: &mpsc::UnboundedSender<OutboundWrite>,
    ) {
        if let Err(e) = self.apply_command(cmd) {
            info!("Command rejected: {e}");
            let _ = ui_tx.send(UiUpdate::CommandRejected(e.to_string())).await;
            return;
        }
        self.merge_revealed();
        self.persist();
        self.schedule_sync(writes);
        let _ = ui_tx.send(UiUpdate::Snapshot(Box::new(self.view()))).await;
    }

    async fn handle_change(&mut self, event: ChangeEvent, ui_tx: &mpsc::Sender<UiUpdate>) {
        let inbound = self.listener.handle(
            event,
            self.gateway.own_writes_mut(),
            self.game.snapshot(),
        );
        let Some(inbound) = inbound else {
            return;
        };

        let (changed, notice) = match inbound {
            Inbound::GameState { row, notice } => {
                self.gateway.acknowledge_remote_state(&row);
                (self.game.merge_remote_state(&row), notice)
            }
            Inbound::Predictions {
                predictions,
                notice,
            } => {
                self.gateway.acknowledge_remote_predictions(&predictions);
                (self.game.merge_remote_predictions(predictions), notice)
            }
        };

        if let Some(notice) = notice {
            info!("Opponent: {notice}");
            let _ = ui_tx.send(UiUpdate::Notice(notice)).await;
        }
        if changed {
            self.merge_revealed();
            self.persist();
            let _ = ui_tx.send(UiUpdate::Snapshot(Box::new(self.view()))).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

/// Run a session until `Quit` arrives or the command channel closes.
///
/// Listens with `tokio::select!` on:
/// 1. User commands from the presentation layer
/// 2. The remote change feed
/// 3. Presence updates
/// 4. Failed writes reported by the writer task
/// 5. The gateway's debounce deadline
///
/// On exit the pending game-state write is flushed, queued writes are
/// drained, and presence is released.
pub async fn run(
    mut session: Session,
    mut cmd_rx: mpsc::Receiver<UserCommand>,
    ui_tx: mpsc::Sender<UiUpdate>,
) -> anyhow::Result<()> {
    let player = session.player();
    info!("Session event loop started for {player}");

    let store = session.store.clone();
    // Subscribe before hydrating so nothing written in between is missed.
    let mut feed = store.subscribe();
    let mut presence =
        PresenceTracker::new(store.clone(), player, session.config.sync.refetch_after_hidden());
    if let Err(e) = presence.join().await {
        warn!("Failed to join presence: {e}");
    }

    let (writes, mut failures, writer) = spawn_writer(store);
    session.hydrate(&writes).await;
    let _ = ui_tx.send(UiUpdate::Snapshot(Box::new(session.view()))).await;
    let _ = ui_tx
        .send(UiUpdate::OpponentOnline(presence.opponent_online()))
        .await;

    let mut feed_open = true;
    let mut presence_open = true;

    loop {
        let deadline = session.gateway.deadline();

        tokio::select! {
            // --- User commands ---
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(UserCommand::Quit) => {
                        info!("Quit command received, shutting down");
                        break;
                    }
                    Some(UserCommand::VisibilityChanged { visible }) => {
                        let now = Instant::now();
                        if !visible {
                            presence.on_hidden(now);
                        } else if presence.on_visible(now) {
                            info!("Visible after a long absence, refetching");
                            session.hydrate(&writes).await;
                            let _ = ui_tx.send(UiUpdate::Snapshot(Box::new(session.view()))).await;
                        }
                    }
                    Some(cmd) => {
                        session.handle_command(cmd, &ui_tx, &writes).await;
                    }
                    None => {
                        info!("Command channel closed, shutting down");
                        break;
                    }
                }
            }

            // --- Remote changes ---
            event = feed.recv(), if feed_open => {
                match event {
                    Ok(event) => session.handle_change(event, &ui_tx).await,
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Change feed lagged by {missed} events, refetching");
                        session.hydrate(&writes).await;
                        let _ = ui_tx.send(UiUpdate::Snapshot(Box::new(session.view()))).await;
                    }
                    Err(RecvError::Closed) => {
                        info!("Change feed closed");
                        feed_open = false;
                    }
                }
            }

            // --- Presence ---
            online = presence.changed(), if presence_open => {
                match online {
                    Some(online) => {
                        let _ = ui_tx.send(UiUpdate::OpponentOnline(online)).await;
                    }
                    None => presence_open = false,
                }
            }

            // --- Write failures ---
            Some(failure) = failures.recv() => {
                session.gateway.write_failed(&failure.write);
                let _ = ui_tx.send(UiUpdate::SyncFailed(failure.error.to_string())).await;
            }

            // --- Debounced game-state write ---
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                if deadline.is_some() =>
            {
                if let Some(row) = session.gateway.take_due(Instant::now()) {
                    debug!("Writing game state {:?}", row.write_id);
                    let _ = writes.send(OutboundWrite::GameState(row));
                }
            }
        }
    }

    // Cleanup
    if let Some(row) = session.gateway.take_pending() {
        let _ = writes.send(OutboundWrite::GameState(row));
    }
    drop(writes);
    let _ = writer.await;
    if let Err(e) = presence.leave().await {
        warn!("Failed to leave presence: {e}");
    }
    info!("Session event loop exiting");
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
