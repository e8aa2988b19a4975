//! Player Statistics
//!
//! Win/loss counters keyed by display name. Names are self-declared, so a
//! record belongs to whoever joins under that name.
//!
//! The router only needs [`StatsStore`]; the binary picks
//! [`MemoryStatsStore`] or [`JsonFileStatsStore`] from configuration.

pub mod json_file;
pub mod memory;

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use thiserror::Error;

pub use json_file::JsonFileStatsStore;
pub use memory::MemoryStatsStore;

/// Counters for one player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerStats {
    /// Display name (the identity).
    pub username: String,
    /// Games won.
    #[serde(default)]
    pub wins: u32,
    /// Games lost.
    #[serde(default)]
    pub losses: u32,
    /// Games finished.
    #[serde(default, alias = "totalGames")]
    pub total_games: u32,
    /// First seen. Records without one are stamped when loaded.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// Last finished game.
    #[serde(default)]
    pub last_played_at: Option<DateTime<Utc>>,
}

impl PlayerStats {
    /// Zeroed record.
    pub fn new(username: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            username: username.into(),
            wins: 0,
            losses: 0,
            total_games: 0,
            created_at: now,
            last_played_at: None,
        }
    }

    /// Win percentage rounded to one decimal; 0 with no games.
    pub fn win_rate(&self) -> f64 {
        if self.total_games == 0 {
            return 0.0;
        }
        let rate = self.wins as f64 / self.total_games as f64 * 100.0;
        (rate * 10.0).round() / 10.0
    }
}

/// Statistics backend errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or writing the backing file failed.
    #[error("stats io error: {0}")]
    Io(#[from] std::io::Error),

    /// Backing file is not valid JSON.
    #[error("stats encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// A writer panicked while holding the lock.
    #[error("stats store lock poisoned")]
    Poisoned,
}

/// Persistent per-name counters.
///
/// Implementations serialize all writes, so `record_result` for two
/// sessions sharing a name never loses an increment.
pub trait StatsStore: Send + Sync {
    /// Create a zeroed record if `username` is unknown; return the current one.
    fn register(&self, username: &str) -> Result<PlayerStats, StoreError>;

    /// Credit one win and one loss; both totals go up by one.
    fn record_result(&self, winner: &str, loser: &str) -> Result<(), StoreError>;

    /// Top `limit` players by win rate, then games played, then name.
    fn leaderboard(&self, limit: usize) -> Result<Vec<PlayerStats>, StoreError>;

    /// Record for `username`, if any.
    fn stats_for(&self, username: &str) -> Result<Option<PlayerStats>, StoreError>;
}

/// Leaderboard order: win rate desc, total games desc, name asc.
pub(crate) fn leaderboard_order(a: &PlayerStats, b: &PlayerStats) -> Ordering {
    b.win_rate()
        .partial_cmp(&a.win_rate())
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.total_games.cmp(&a.total_games))
        .then_with(|| a.username.cmp(&b.username))
}

/// Shared counter update used by both backends.
pub(crate) fn apply_result(
    users: &mut BTreeMap<String, PlayerStats>,
    winner: &str,
    loser: &str,
    now: DateTime<Utc>,
) {
    let w = users
        .entry(winner.to_string())
        .or_insert_with(|| PlayerStats::new(winner, now));
    w.wins += 1;
    w.total_games += 1;
    w.last_played_at = Some(now);

    let l = users
        .entry(loser.to_string())
        .or_insert_with(|| PlayerStats::new(loser, now));
    l.losses += 1;
    l.total_games += 1;
    l.last_played_at = Some(now);
}

pub(crate) fn top_n(users: &BTreeMap<String, PlayerStats>, limit: usize) -> Vec<PlayerStats> {
    let mut all: Vec<PlayerStats> = users.values().cloned().collect();
    all.sort_by(leaderboard_order);
    all.truncate(limit);
    all
}
