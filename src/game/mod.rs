//! Game Logic Module
//!
//! Rules of Code Duel. No I/O, no clocks, no randomness.
//!
//! ## Module Structure
//!
//! - `code`: Secret/guess validation
//! - `scoring`: Exact/partial feedback
//! - `state`: Per-session phase machine and guess histories

pub mod code;
pub mod scoring;
pub mod state;

// Re-export key types
pub use code::{Code, CodeError};
pub use scoring::{score, Feedback};
pub use state::{
    Game, GameError, GuessOutcome, GuessRecord, Phase, PhaseKind, SecretOutcome, Slot,
};
