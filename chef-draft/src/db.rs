// SQLite persistence: the client's local snapshot and the hub's shared rows.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

use crate::game::state::GameSnapshot;
use crate::protocol::{GameStateRow, PredictionRow};

/// Key under which the client snapshot is stored in `client_state`.
pub const SNAPSHOT_KEY: &str = "game_snapshot";

/// SQLite-backed persistence. A client uses the key-value table for its
/// snapshot; the hub uses the row tables.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a SQLite database at `path` and ensure all tables
    /// exist. Missing parent directories are created. Pass `":memory:"` for
    /// an ephemeral in-memory database.
    pub fn open(path: &str) -> Result<Self> {
        if path != ":memory:" {
            if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS client_state (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS game_state (
                id         TEXT PRIMARY KEY,
                record     TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS predictions (
                episode_number INTEGER NOT NULL,
                player         TEXT NOT NULL,
                record         TEXT NOT NULL,
                updated_at     TEXT NOT NULL,
                PRIMARY KEY (episode_number, player)
            );
            ",
        )
        .context("failed to create database schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Panics if the mutex is poisoned.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    // --- Key-value state ---

    /// Store a JSON value under `key`, replacing any previous value.
    pub fn save_state(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        let conn = self.conn();
        let json_str =
            serde_json::to_string(value).context("failed to serialize state value")?;
        conn.execute(
            "INSERT OR REPLACE INTO client_state (key, value) VALUES (?1, ?2)",
            params![key, json_str],
        )
        .context("failed to save state")?;
        Ok(())
    }

    /// Load a value by `key`. Returns `None` if the key does not exist.
    pub fn load_state(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let conn = self.conn();
        let json_str: Option<String> = conn
            .query_row(
                "SELECT value FROM client_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .context("failed to query client state")?;

        json_str
            .map(|s| serde_json::from_str(&s).context("failed to deserialize state value"))
            .transpose()
    }

    /// Persist the full game snapshot. Undo/redo stacks are not part of it.
    pub fn save_snapshot(&self, snapshot: &GameSnapshot) -> Result<()> {
        let value = serde_json::to_value(snapshot).context("failed to serialize snapshot")?;
        self.save_state(SNAPSHOT_KEY, &value)
    }

    pub fn load_snapshot(&self) -> Result<Option<GameSnapshot>> {
        self.load_state(SNAPSHOT_KEY)?
            .map(|value| serde_json::from_value(value).context("failed to decode stored snapshot"))
            .transpose()
    }

    pub fn clear_snapshot(&self) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "DELETE FROM client_state WHERE key = ?1",
            params![SNAPSHOT_KEY],
        )
        .context("failed to clear snapshot")?;
        Ok(())
    }

    // --- Hub rows ---

    pub fn save_game_state_row(&self, row: &GameStateRow) -> Result<()> {
        let conn = self.conn();
        let record = serde_json::to_string(row).context("failed to serialize game-state row")?;
        conn.execute(
            "INSERT OR REPLACE INTO game_state (id, record, updated_at) VALUES (?1, ?2, ?3)",
            params![row.id, record, row.updated_at.to_rfc3339()],
        )
        .context("failed to save game-state row")?;
        Ok(())
    }

    pub fn load_game_state_row(&self) -> Result<Option<GameStateRow>> {
        let conn = self.conn();
        let record: Option<String> = conn
            .query_row(
                "SELECT record FROM game_state ORDER BY updated_at DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .context("failed to query game-state row")?;

        record
            .map(|s| serde_json::from_str(&s).context("failed to decode game-state row"))
            .transpose()
    }

    /// Upsert on `(episode_number, player)`.
    pub fn save_prediction_row(&self, row: &PredictionRow) -> Result<()> {
        let conn = self.conn();
        let record = serde_json::to_string(row).context("failed to serialize prediction row")?;
        conn.execute(
            "INSERT INTO predictions (episode_number, player, record, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (episode_number, player)
             DO UPDATE SET record = excluded.record, updated_at = excluded.updated_at",
            params![
                row.episode_number,
                row.player.as_str(),
                record,
                row.updated_at.to_rfc3339()
            ],
        )
        .context("failed to save prediction row")?;
        Ok(())
    }

    /// All prediction rows ordered by episode, then player.
    pub fn load_prediction_rows(&self) -> Result<Vec<PredictionRow>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT record FROM predictions ORDER BY episode_number, player")
            .context("failed to prepare prediction query")?;

        let records = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .context("failed to query predictions")?
            .collect::<Result<Vec<_>, _>>()
            .context("failed to read prediction rows")?;

        records
            .iter()
            .map(|s| serde_json::from_str(s).context("failed to decode prediction row"))
            .collect()
    }
}
