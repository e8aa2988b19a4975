//! # Code Duel Server
//!
//! Matchmaking and referee server for Code Duel, a two-player
//! code-breaking game: each player hides a four-digit code with distinct
//! digits and no leading zero, then both take turns guessing the other's.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CODE DUEL SERVER                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  game/           - Rules (pure, no I/O)                      │
//! │  ├── code.rs     - Code validation                           │
//! │  ├── scoring.rs  - Exact / partial feedback                  │
//! │  └── state.rs    - Per-match phase machine                   │
//! │                                                              │
//! │  network/        - Matchmaking and transport                 │
//! │  ├── matchmaking.rs - FIFO pairing queue                     │
//! │  ├── session.rs  - Session registry                          │
//! │  ├── router.rs   - Single-owner event router                 │
//! │  ├── protocol.rs - Message types                             │
//! │  └── server.rs   - WebSocket server                          │
//! │                                                              │
//! │  stats/          - Win/loss records                          │
//! │  ├── memory.rs   - In-process store                          │
//! │  └── json_file.rs- JSON file store                           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency
//!
//! All queue, registry and game mutations happen on the router task, one
//! event at a time. Connection tasks only parse frames and forward them,
//! so pairing and turn order need no locks.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod game;
pub mod network;
pub mod stats;

// Re-export commonly used types
pub use game::code::{Code, CodeError};
pub use game::scoring::{score, Feedback};
pub use game::state::{Game, GameError, Phase, Slot};
pub use network::{GameServer, GameServerError, ServerConfig};
pub use stats::{JsonFileStatsStore, MemoryStatsStore, PlayerStats, StatsStore, StoreError};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Digits in a secret or guess.
pub const CODE_LENGTH: usize = 4;

/// Most leaderboard entries ever returned.
pub const DEFAULT_LEADERBOARD_LIMIT: usize = 100;
