//! JSON-file statistics store.
//!
//! File layout is `{ "users": { "<name>": { ...PlayerStats } } }`. Every
//! write rewrites the whole file through a temp file and rename; if that
//! fails, the in-memory counters are left as they were so a retry does not
//! double count.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use serde::{Serialize, Deserialize};
use tracing::{debug, info};

use super::{apply_result, top_n, PlayerStats, StatsStore, StoreError};

#[derive(Debug, Default, Serialize, Deserialize)]
struct StatsFile {
    #[serde(default)]
    users: BTreeMap<String, PlayerStats>,
}

/// Statistics persisted to a JSON file.
#[derive(Debug)]
pub struct JsonFileStatsStore {
    path: PathBuf,
    users: Mutex<BTreeMap<String, PlayerStats>>,
}

impl JsonFileStatsStore {
    /// Open `path`, starting empty if it does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let users = match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str::<StatsFile>(&text)?.users,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("No stats file at {}, starting empty", path.display());
                BTreeMap::new()
            }
            Err(e) => return Err(e.into()),
        };

        info!("Loaded {} player records from {}", users.len(), path.display());
        Ok(Self {
            path,
            users: Mutex::new(users),
        })
    }

    /// Backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, users: &BTreeMap<String, PlayerStats>) -> Result<(), StoreError> {
        #[derive(Serialize)]
        struct StatsFileRef<'a> {
            users: &'a BTreeMap<String, PlayerStats>,
        }

        let text = serde_json::to_string_pretty(&StatsFileRef { users })?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, text)?;
        fs::rename(&tmp, &self.path)?;
        debug!("Persisted {} player records", users.len());
        Ok(())
    }

    /// Apply `update` to a copy, persist it, then commit.
    fn write_with<F>(&self, update: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut BTreeMap<String, PlayerStats>),
    {
        let mut users = self.users.lock().map_err(|_| StoreError::Poisoned)?;
        let mut next = users.clone();
        update(&mut next);
        self.persist(&next)?;
        *users = next;
        Ok(())
    }
}

impl StatsStore for JsonFileStatsStore {
    fn register(&self, username: &str) -> Result<PlayerStats, StoreError> {
        if let Some(existing) = self.stats_for(username)? {
            return Ok(existing);
        }

        self.write_with(|users| {
            users
                .entry(username.to_string())
                .or_insert_with(|| PlayerStats::new(username, Utc::now()));
        })?;

        self.stats_for(username)?
            .ok_or_else(|| StoreError::Io(std::io::Error::other("record vanished after insert")))
    }

    fn record_result(&self, winner: &str, loser: &str) -> Result<(), StoreError> {
        self.write_with(|users| apply_result(users, winner, loser, Utc::now()))
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

    fn temp_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("code-duel-{}-{}.json", tag, uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_missing_file_starts_empty() {
        let path = temp_path("missing");
        let store = JsonFileStatsStore::open(&path).unwrap();
        assert!(store.leaderboard(10).unwrap().is_empty());
        assert!(!path.exists());
    }

    #[test]
    fn test_results_survive_reopen() {
        let path = temp_path("reopen");
        {
            let store = JsonFileStatsStore::open(&path).unwrap();
            store.register("alice").unwrap();
            store.record_result("alice", "bob").unwrap();
            store.record_result("bob", "alice").unwrap();
            store.record_result("alice", "bob").unwrap();
        }

        let store = JsonFileStatsStore::open(&path).unwrap();
        let alice = store.stats_for("alice").unwrap().unwrap();
        assert_eq!((alice.wins, alice.losses, alice.total_games), (2, 1, 3));
        let bob = store.stats_for("bob").unwrap().unwrap();
        assert_eq!((bob.wins, bob.losses, bob.total_games), (1, 2, 3));

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["users"]["alice"]["wins"], 2);

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_failed_write_leaves_counters_unchanged() {
        let dir = std::env::temp_dir().join(format!("code-duel-gone-{}", uuid::Uuid::new_v4()));
        let store = JsonFileStatsStore::open(dir.join("stats.json")).unwrap();

        assert!(matches!(
            store.record_result("alice", "bob"),
            Err(StoreError::Io(_))
        ));
        assert!(store.stats_for("alice").unwrap().is_none());
    }

    #[test]
    fn test_opens_camel_case_database() {
        let path = temp_path("legacy");
        fs::write(
            &path,
            r#"{"users":{"alice":{"username":"alice","wins":3,"losses":1,"totalGames":4}},"games":{},"leaderboard":[]}"#,
        )
        .unwrap();

        let store = JsonFileStatsStore::open(&path).unwrap();
        assert_eq!(store.path(), path.as_path());
        let alice = store.stats_for("alice").unwrap().unwrap();
        assert_eq!((alice.wins, alice.losses, alice.total_games), (3, 1, 4));
        assert_eq!(alice.win_rate(), 75.0);

        // Counters keep going from the loaded totals.
        store.record_result("alice", "bob").unwrap();
        let reopened = JsonFileStatsStore::open(&path).unwrap();
        let alice = reopened.stats_for("alice").unwrap().unwrap();
        assert_eq!((alice.wins, alice.total_games), (4, 5));

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let path = temp_path("corrupt");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            JsonFileStatsStore::open(&path),
            Err(StoreError::Encoding(_))
        ));
        fs::remove_file(&path).unwrap();
    }
}
