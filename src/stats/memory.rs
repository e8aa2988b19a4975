//! In-memory statistics store. Lost on restart.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::Utc;

use super::{apply_result, top_n, PlayerStats, StatsStore, StoreError};

/// Statistics kept in a mutex-guarded map.
#[derive(Debug, Default)]
pub struct MemoryStatsStore {
    users: Mutex<BTreeMap<String, PlayerStats>>,
}

impl MemoryStatsStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl StatsStore for MemoryStatsStore {
    fn register(&self, username: &str) -> Result<PlayerStats, StoreError> {
        let mut users = self.users.lock().map_err(|_| StoreError::Poisoned)?;
        let record = users
            .entry(username.to_string())
            .or_insert_with(|| PlayerStats::new(username, Utc::now()));
        Ok(record.clone())
    }

    fn record_result(&self, winner: &str, loser: &str) -> Result<(), StoreError> {
        let mut users = self.users.lock().map_err(|_| StoreError::Poisoned)?;
        apply_result(&mut users, winner, loser, Utc::now());
        Ok(())
    }

    fn leaderboard(&self, limit: usize) -> Result<Vec<PlayerStats>, StoreError> {
        let users = self.users.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(top_n(&users, limit))
    }

    fn stats_for(&self, username: &str) -> Result<Option<PlayerStats>, StoreError> {
        let users = self.users.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(users.get(username).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_register_is_idempotent() {
        let store = MemoryStatsStore::new();
        let first = store.register("alice").unwrap();
        store.record_result("alice", "bob").unwrap();
        let again = store.register("alice").unwrap();

        assert_eq!(first.wins, 0);
        assert_eq!(again.wins, 1);
        assert_eq!(again.created_at, first.created_at);
    }

    #[test]
    fn test_unknown_player() {
        let store = MemoryStatsStore::new();
        assert!(store.stats_for("nobody").unwrap().is_none());
    }

    #[test]
    fn test_concurrent_results_for_shared_name() {
        let store = Arc::new(MemoryStatsStore::new());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        store.record_result("alice", &format!("rival{}", i)).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let alice = store.stats_for("alice").unwrap().unwrap();
        assert_eq!(alice.wins, 400);
        assert_eq!(alice.total_games, 400);
        assert_eq!(store.stats_for("rival3").unwrap().unwrap().losses, 50);
    }
}
