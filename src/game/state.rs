//! Game State Definitions
//!
//! The per-session referee: secret setup, alternating guesses, and the
//! terminal winner. Transport-free; the network layer decides who gets
//! told what.

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::game::code::{Code, CodeError};
use crate::game::scoring::{score, Feedback};

// =============================================================================
// SLOT
// =============================================================================

/// One of the two fixed seats in a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Slot {
    /// Player 1. Moves first.
    One,
    /// Player 2.
    Two,
}

impl Slot {
    /// Both slots in order.
    pub const BOTH: [Slot; 2] = [Slot::One, Slot::Two];

    /// The opposing slot.
    #[inline]
    pub fn other(self) -> Slot {
        match self {
            Slot::One => Slot::Two,
            Slot::Two => Slot::One,
        }
    }

    /// Zero-based array index.
    #[inline]
    pub fn index(self) -> usize {
        match self {
            Slot::One => 0,
            Slot::Two => 1,
        }
    }

    /// Wire number (1 or 2).
    #[inline]
    pub fn number(self) -> u8 {
        self.index() as u8 + 1
    }
}

/// Slot number outside 1..=2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid slot number {0}, expected 1 or 2")]
pub struct InvalidSlot(pub u8);

impl TryFrom<u8> for Slot {
    type Error = InvalidSlot;

    fn try_from(n: u8) -> Result<Self, Self::Error> {
        match n {
            1 => Ok(Slot::One),
            2 => Ok(Slot::Two),
            other => Err(InvalidSlot(other)),
        }
    }
}

impl From<Slot> for u8 {
    fn from(slot: Slot) -> Self {
        slot.number()
    }
}

// =============================================================================
// PHASE
// =============================================================================

/// Game phase. Turn and winner only exist in the phase that needs them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for both secrets.
    AwaitingSecrets,
    /// Guessing; `turn` may submit next.
    InPlay {
        /// Slot allowed to guess.
        turn: Slot,
    },
    /// Terminal.
    Finished {
        /// Slot that cracked the opponent's code.
        winner: Slot,
    },
}

/// Phase without payload, for errors and the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    /// See [`Phase::AwaitingSecrets`].
    AwaitingSecrets,
    /// See [`Phase::InPlay`].
    InPlay,
    /// See [`Phase::Finished`].
    Finished,
}

impl Phase {
    /// Payload-free kind.
    pub fn kind(&self) -> PhaseKind {
        match self {
            Phase::AwaitingSecrets => PhaseKind::AwaitingSecrets,
            Phase::InPlay { .. } => PhaseKind::InPlay,
            Phase::Finished { .. } => PhaseKind::Finished,
        }
    }

    /// Current turn, if in play.
    pub fn turn(&self) -> Option<Slot> {
        match self {
            Phase::InPlay { turn } => Some(*turn),
            _ => None,
        }
    }

    /// Winner, if finished.
    pub fn winner(&self) -> Option<Slot> {
        match self {
            Phase::Finished { winner } => Some(*winner),
            _ => None,
        }
    }
}

impl std::fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PhaseKind::AwaitingSecrets => "awaiting-secrets",
            PhaseKind::InPlay => "in-play",
            PhaseKind::Finished => "finished",
        };
        f.write_str(s)
    }
}

// =============================================================================
// HISTORY
// =============================================================================

/// One scored guess.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuessRecord {
    /// The guessed code.
    pub guess: Code,
    /// Its score against the opponent's secret.
    #[serde(flatten)]
    pub feedback: Feedback,
}

// =============================================================================
// GAME
// =============================================================================

/// Rejections from the state machine. None of them change state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GameError {
    /// Malformed secret or guess.
    #[error("invalid code: {0}")]
    InvalidCode(#[from] CodeError),

    /// Event not allowed in the current phase.
    #[error("not allowed while {actual}")]
    WrongPhase {
        /// Phase the session is in.
        actual: PhaseKind,
    },

    /// Guess from the slot that is not on turn.
    #[error("it is player {}'s turn", .turn.number())]
    OutOfTurn {
        /// Slot currently on turn.
        turn: Slot,
    },

    /// Secret submitted twice.
    #[error("secret already set")]
    SecretAlreadySet,
}

/// Result of a successful `set_secret`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretOutcome {
    /// Stored; the other slot still has to choose.
    Waiting,
    /// Both secrets set; play begins with `turn`.
    Started {
        /// First slot to guess.
        turn: Slot,
    },
}

/// Result of a successful `submit_guess`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuessOutcome {
    /// Scored, turn passed on.
    Continue {
        /// The new history entry.
        record: GuessRecord,
        /// Slot on turn now.
        next_turn: Slot,
    },
    /// Winning guess; the game is over.
    Won {
        /// The new history entry.
        record: GuessRecord,
        /// The submitter.
        winner: Slot,
    },
}

/// State for one two-player game.
#[derive(Debug, Clone)]
pub struct Game {
    phase: Phase,
    secrets: [Option<Code>; 2],
    /// Newest entry first.
    histories: [Vec<GuessRecord>; 2],
}

impl Default for Game {
    fn default() -> Self {
        Self::new()
    }
}

impl Game {
    /// Fresh game awaiting secrets.
    pub fn new() -> Self {
        Self {
            phase: Phase::AwaitingSecrets,
            secrets: [None, None],
            histories: [Vec::new(), Vec::new()],
        }
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Whether `slot` has chosen a secret.
    pub fn has_secret(&self, slot: Slot) -> bool {
        self.secrets[slot.index()].is_some()
    }

    /// `slot`'s guesses, newest first.
    pub fn history(&self, slot: Slot) -> &[GuessRecord] {
        &self.histories[slot.index()]
    }

    /// Both secrets, only once the game is finished.
    pub fn revealed_secrets(&self) -> Option<(Code, Code)> {
        match (self.phase, self.secrets) {
            (Phase::Finished { .. }, [Some(a), Some(b)]) => Some((a, b)),
            _ => None,
        }
    }

    /// Set `slot`'s secret from raw input.
    pub fn set_secret(&mut self, slot: Slot, raw: &str) -> Result<SecretOutcome, GameError> {
        if self.phase != Phase::AwaitingSecrets {
            return Err(GameError::WrongPhase { actual: self.phase.kind() });
        }
        let code = Code::parse(raw)?;
        if self.has_secret(slot) {
            return Err(GameError::SecretAlreadySet);
        }

        self.secrets[slot.index()] = Some(code);

        if self.has_secret(slot.other()) {
            self.phase = Phase::InPlay { turn: Slot::One };
            Ok(SecretOutcome::Started { turn: Slot::One })
        } else {
            Ok(SecretOutcome::Waiting)
        }
    }

    /// Submit a guess from `slot` against the opponent's secret.
    pub fn submit_guess(&mut self, slot: Slot, raw: &str) -> Result<GuessOutcome, GameError> {
        let turn = match self.phase {
            Phase::InPlay { turn } => turn,
            other => return Err(GameError::WrongPhase { actual: other.kind() }),
        };
        if slot != turn {
            return Err(GameError::OutOfTurn { turn });
        }
        let guess = Code::parse(raw)?;

        let target = self.secrets[slot.other().index()]
            .ok_or(GameError::WrongPhase { actual: PhaseKind::AwaitingSecrets })?;
        let record = GuessRecord {
            guess,
            feedback: score(&target, &guess),
        };
        self.histories[slot.index()].insert(0, record);

        if record.feedback.is_win() {
            self.phase = Phase::Finished { winner: slot };
            Ok(GuessOutcome::Won { record, winner: slot })
        } else {
            let next_turn = slot.other();
            self.phase = Phase::InPlay { turn: next_turn };
            Ok(GuessOutcome::Continue { record, next_turn })
        }
    }
}
