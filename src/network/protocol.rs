//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Every frame is a JSON text message tagged by `type`.

use serde::{Serialize, Deserialize};

use crate::game::code::Code;
use crate::game::state::{Game, GuessRecord, PhaseKind, Slot};
use crate::stats::PlayerStats;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
///
/// Codes and slots arrive raw so that bad values become game-level
/// rejections instead of unparseable frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Claim a display name.
    Join {
        /// Requested display name, trimmed by the server.
        username: String,
    },

    /// Enter matchmaking.
    FindMatch,

    /// Leave matchmaking.
    CancelMatch,

    /// Choose a secret during setup.
    SetSecret {
        /// Candidate secret.
        secret: String,
        /// Sender's own slot number.
        slot: u8,
    },

    /// Guess the opponent's secret.
    SubmitGuess {
        /// Candidate guess.
        guess: String,
        /// Sender's own slot number.
        slot: u8,
    },

    /// Leave the current session.
    Leave,

    /// Request the leaderboard.
    Leaderboard {
        /// Maximum entries; capped by the server.
        #[serde(default)]
        limit: Option<usize>,
    },

    /// Request one player's statistics.
    Stats {
        /// Player to look up.
        username: String,
    },

    /// Ping for latency measurement.
    Ping {
        /// Client clock, echoed back.
        timestamp: u64,
    },
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Join accepted.
    Joined {
        /// Accepted display name.
        username: String,
        /// Absent if the stats store could not be read.
        stats: Option<StatsView>,
    },

    /// Join rejected.
    JoinError {
        /// Reason.
        error: String,
    },

    /// Waiting in the matchmaking queue.
    Searching,

    /// Paired with an opponent.
    MatchFound(MatchFoundInfo),

    /// Removed from the matchmaking queue.
    MatchCancelled,

    /// The opponent has chosen a secret.
    OpponentSecretSet {
        /// Slot that chose its secret.
        slot: Slot,
    },

    /// Both secrets set, guessing begins.
    GameStarted {
        /// Initial game view.
        game: GameView,
        /// Recipient's own seat.
        your_slot: Slot,
    },

    /// A non-winning guess was scored.
    GuessSubmitted {
        /// Updated game view.
        game: GameView,
        /// The new history entry.
        entry: GuessRecord,
        /// Slot that guessed.
        slot: Slot,
    },

    /// A winning guess ended the game.
    GameFinished {
        /// Final game view.
        game: GameView,
        /// Winning slot.
        winner: Slot,
        /// Both secrets.
        secrets: RevealedSecrets,
    },

    /// The opponent left; the session is gone.
    OpponentDisconnected,

    /// Leaderboard response.
    Leaderboard {
        /// Ranked players, best first.
        entries: Vec<StatsView>,
    },

    /// Single player statistics.
    Stats {
        /// The requested record.
        stats: StatsView,
    },

    /// Pong response.
    Pong {
        /// Echo of the ping timestamp.
        timestamp: u64,
        /// Server clock, ms since the epoch.
        server_time: u64,
    },

    /// Error message.
    Error(ServerError),

    /// Server is shutting down.
    Shutdown {
        /// Reason.
        reason: String,
    },
}

/// Public view of a session participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicPlayer {
    /// Seat in the session.
    pub slot: Slot,
    /// Display name.
    pub username: String,
}

/// Information about a found match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchFoundInfo {
    /// Session identifier (UUID string).
    pub session_id: String,
    /// Both participants.
    pub players: Vec<PublicPlayer>,
    /// Recipient's own seat.
    pub your_slot: Slot,
}

/// Game state safe to show to both players: no secrets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameView {
    /// Current phase.
    pub phase: PhaseKind,
    /// Slot on turn (in play only).
    pub turn: Option<Slot>,
    /// Player 1's guesses, newest first.
    pub player1_history: Vec<GuessRecord>,
    /// Player 2's guesses, newest first.
    pub player2_history: Vec<GuessRecord>,
}

impl GameView {
    /// Snapshot of `game`.
    pub fn of(game: &Game) -> Self {
        let phase = game.phase();
        Self {
            phase: phase.kind(),
            turn: phase.turn(),
            player1_history: game.history(Slot::One).to_vec(),
            player2_history: game.history(Slot::Two).to_vec(),
        }
    }
}

/// Both secrets, sent only with `GameFinished`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevealedSecrets {
    /// Player 1's secret.
    pub player1: Code,
    /// Player 2's secret.
    pub player2: Code,
}

/// Player statistics as sent to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsView {
    /// Display name.
    pub username: String,
    /// Games won.
    pub wins: u32,
    /// Games lost.
    pub losses: u32,
    /// Games finished.
    pub total_games: u32,
    /// Percentage, one decimal.
    pub win_rate: f64,
}

impl From<&PlayerStats> for StatsView {
    fn from(s: &PlayerStats) -> Self {
        Self {
            username: s.username.clone(),
            wins: s.wins,
            losses: s.losses,
            total_games: s.total_games,
            win_rate: s.win_rate(),
        }
    }
}

/// Server error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Malformed frame, code, name or slot.
    InvalidInput,
    /// Event not valid in the current state.
    ProtocolViolation,
    /// Must join first.
    NotJoined,
    /// Already joined on this connection.
    AlreadyJoined,
    /// Already queued or in an active session.
    AlreadyInMatch,
    /// Not in a session.
    NotInMatch,
    /// Guess from the player not on turn.
    NotYourTurn,
    /// Session unknown or expired.
    MatchNotFound,
    /// Player statistics unknown.
    PlayerNotFound,
    /// Server overloaded.
    ServerOverloaded,
    /// Internal error.
    InternalError,
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Shorthand for an error frame.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error(ServerError {
            code,
            message: message.into(),
        })
    }
}
