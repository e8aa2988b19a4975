//! Match Session Management
//!
//! A `GameSession` binds two connections to one [`Game`]. The
//! `SessionRegistry` owns every live session plus the connection →
//! session association, and is only touched from the router task.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::game::state::{Game, GameError, GuessOutcome, SecretOutcome, Slot};
use crate::network::ConnectionId;
use crate::network::protocol::{GameView, MatchFoundInfo, PublicPlayer, RevealedSecrets};

/// Unique session identifier.
pub type SessionId = [u8; 16];

/// Short hex prefix for logs.
pub fn short_id(id: &SessionId) -> String {
    hex::encode(&id[..4])
}

/// Canonical string form sent to clients.
pub fn session_id_string(id: &SessionId) -> String {
    uuid::Uuid::from_bytes(*id).to_string()
}

/// One seat in a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    /// Connection handle.
    pub conn: ConnectionId,
    /// Display name, also the statistics identity.
    pub username: String,
    /// Set once this participant acknowledged a finished game.
    pub left: bool,
}

/// A paired game between two connections.
#[derive(Debug)]
pub struct GameSession {
    /// Unique session identifier.
    pub id: SessionId,
    participants: [Participant; 2],
    game: Game,
    /// When the pairing happened.
    created_at: Instant,
}

impl GameSession {
    /// Create a session; `first` takes slot 1.
    pub fn new(id: SessionId, first: (ConnectionId, String), second: (ConnectionId, String)) -> Self {
        let seat = |(conn, username): (ConnectionId, String)| Participant {
            conn,
            username,
            left: false,
        };
        Self {
            id,
            participants: [seat(first), seat(second)],
            game: Game::new(),
            created_at: Instant::now(),
        }
    }

    /// Time since pairing.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Game state.
    pub fn game(&self) -> &Game {
        &self.game
    }

    /// Participant in `slot`.
    pub fn participant(&self, slot: Slot) -> &Participant {
        &self.participants[slot.index()]
    }

    /// Slot held by `conn`, if it belongs to this session.
    pub fn slot_of(&self, conn: ConnectionId) -> Option<Slot> {
        Slot::BOTH
            .into_iter()
            .find(|s| self.participants[s.index()].conn == conn)
    }

    /// Whether the game reached its terminal phase.
    pub fn is_finished(&self) -> bool {
        self.game.phase().winner().is_some()
    }

    /// Set a secret for `slot`.
    pub fn set_secret(&mut self, slot: Slot, raw: &str) -> Result<SecretOutcome, GameError> {
        self.game.set_secret(slot, raw)
    }

    /// Submit a guess for `slot`.
    pub fn submit_guess(&mut self, slot: Slot, raw: &str) -> Result<GuessOutcome, GameError> {
        self.game.submit_guess(slot, raw)
    }

    /// Mark `slot` as having acknowledged the finished game.
    /// Returns true once both have.
    pub fn mark_left(&mut self, slot: Slot) -> bool {
        self.participants[slot.index()].left = true;
        self.participants.iter().all(|p| p.left)
    }

    /// `matchFound` payload for `slot`.
    pub fn match_found_for(&self, slot: Slot) -> MatchFoundInfo {
        MatchFoundInfo {
            session_id: session_id_string(&self.id),
            players: Slot::BOTH
                .into_iter()
                .map(|s| PublicPlayer {
                    slot: s,
                    username: self.participant(s).username.clone(),
                })
                .collect(),
            your_slot: slot,
        }
    }

    /// Public game snapshot.
    pub fn view(&self) -> GameView {
        GameView::of(&self.game)
    }

    /// Both secrets, once finished.
    pub fn revealed_secrets(&self) -> Option<RevealedSecrets> {
        self.game
            .revealed_secrets()
            .map(|(player1, player2)| RevealedSecrets { player1, player2 })
    }
}

/// Session errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Unknown or already destroyed session.
    #[error("session not found")]
    NotFound,

    /// Connection is not seated in any session.
    #[error("not in a session")]
    NotInSession,
}

// =============================================================================
// SESSION REGISTRY
// =============================================================================

/// Owns all live sessions.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: BTreeMap<SessionId, GameSession>,
    by_conn: BTreeMap<ConnectionId, SessionId>,
}

impl SessionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session for two participants; `first` takes slot 1.
    pub fn create(
        &mut self,
        first: (ConnectionId, String),
        second: (ConnectionId, String),
    ) -> SessionId {
        let id = uuid::Uuid::new_v4().into_bytes();
        self.by_conn.insert(first.0, id);
        self.by_conn.insert(second.0, id);
        self.sessions.insert(id, GameSession::new(id, first, second));
        id
    }

    /// Get a session by ID.
    pub fn get(&self, id: &SessionId) -> Option<&GameSession> {
        self.sessions.get(id)
    }

    /// Get a session by ID, or `NotFound`.
    pub fn require(&self, id: &SessionId) -> Result<&GameSession, SessionError> {
        self.sessions.get(id).ok_or(SessionError::NotFound)
    }

    /// Mutable access, or `NotFound`.
    pub fn require_mut(&mut self, id: &SessionId) -> Result<&mut GameSession, SessionError> {
        self.sessions.get_mut(id).ok_or(SessionError::NotFound)
    }

    /// Session `conn` is seated in.
    pub fn session_of(&self, conn: ConnectionId) -> Option<SessionId> {
        self.by_conn.get(&conn).copied()
    }

    /// Drop `conn`'s association without touching the session.
    pub fn release(&mut self, conn: ConnectionId) {
        self.by_conn.remove(&conn);
    }

    /// Remove a session and release both participants.
    pub fn destroy(&mut self, id: &SessionId) -> Option<GameSession> {
        let session = self.sessions.remove(id)?;
        for p in &session.participants {
            if self.by_conn.get(&p.conn) == Some(id) {
                self.by_conn.remove(&p.conn);
            }
        }
        Some(session)
    }

    /// Active session count.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no sessions are live.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
