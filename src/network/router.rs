//! Event Router
//!
//! Single owner of the matchmaking queue, the session registry and the
//! client table. Connection tasks feed it [`RouterEvent`]s over one
//! channel; it applies them strictly one at a time, which is what keeps
//! "pair on second arrival" and "first winning guess wins" race-free
//! without locks.
//!
//! Outbound messages are `try_send`s on each client's bounded channel. A
//! slow or dead client loses messages; it never stalls the router.
//!
//! Every failure ends here: the sender gets an `error` (or `join_error`)
//! frame and nothing else changes.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::mpsc;
use tokio::task::block_in_place;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::game::state::{GameError, GuessOutcome, InvalidSlot, SecretOutcome, Slot};
use crate::network::matchmaking::{MatchQueue, QueueEntry, QueueOutcome};
use crate::network::protocol::{ClientMessage, ErrorCode, ServerMessage, StatsView};
use crate::network::session::{short_id, SessionError, SessionId, SessionRegistry};
use crate::network::ConnectionId;
use crate::stats::{StatsStore, StoreError};

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Longest accepted display name, in characters.
    pub max_name_len: usize,
    /// Upper bound on leaderboard size.
    pub leaderboard_limit: usize,
    /// Drop queue entries older than this. `None` waits forever.
    pub queue_timeout: Option<Duration>,
    /// How often queue expiry runs.
    pub sweep_interval: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_name_len: 32,
            leaderboard_limit: crate::DEFAULT_LEADERBOARD_LIMIT,
            queue_timeout: None,
            sweep_interval: Duration::from_secs(1),
        }
    }
}

/// Input to the router.
#[derive(Debug)]
pub enum RouterEvent {
    /// A transport connection opened.
    Connected {
        /// Handle assigned by the transport.
        conn: ConnectionId,
        /// Outbound channel for this connection.
        sender: mpsc::Sender<ServerMessage>,
    },
    /// A decoded client message.
    Message {
        /// Sender.
        conn: ConnectionId,
        /// Payload.
        msg: ClientMessage,
    },
    /// The connection closed. Delivered exactly once per connection.
    Disconnected {
        /// Closed connection.
        conn: ConnectionId,
    },
}

impl RouterEvent {
    /// Whether handling this event may call the stats store.
    fn touches_store(&self) -> bool {
        matches!(
            self,
            RouterEvent::Message {
                msg: ClientMessage::Join { .. }
                    | ClientMessage::SubmitGuess { .. }
                    | ClientMessage::Leaderboard { .. }
                    | ClientMessage::Stats { .. },
                ..
            }
        )
    }
}

/// Error class, for logging and the wire code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed payload.
    Validation,
    /// Right payload, wrong moment.
    Protocol,
    /// Stale reference.
    NotFound,
    /// Backend failure.
    Resource,
}

/// Why an inbound event was rejected.
#[derive(Debug, Error)]
pub enum RouterError {
    /// Display name empty or too long.
    #[error("{0}")]
    InvalidName(String),

    /// Slot number not 1 or 2.
    #[error(transparent)]
    InvalidSlot(#[from] InvalidSlot),

    /// Rejected by the game state machine.
    #[error(transparent)]
    Game(#[from] GameError),

    /// Event needs a joined connection.
    #[error("join first")]
    NotJoined,

    /// Connection already joined.
    #[error("already joined")]
    AlreadyJoined,

    /// Matchmaking requested while seated in an unfinished game.
    #[error("already in a game")]
    InActiveSession,

    /// Payload names the opponent's slot.
    #[error("you are player {}, not player {}", .actual.number(), .claimed.number())]
    SlotMismatch {
        /// Slot in the payload.
        claimed: Slot,
        /// Sender's real slot.
        actual: Slot,
    },

    /// Session lookup failed.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// No statistics for that name.
    #[error("no statistics for {0}")]
    PlayerNotFound(String),

    /// Statistics backend failed.
    #[error("stats store failure: {0}")]
    Store(#[from] StoreError),
}

impl RouterError {
    /// Error class.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RouterError::InvalidName(_) | RouterError::InvalidSlot(_) => ErrorKind::Validation,
            RouterError::Game(GameError::InvalidCode(_)) => ErrorKind::Validation,
            RouterError::Game(_)
            | RouterError::NotJoined
            | RouterError::AlreadyJoined
            | RouterError::InActiveSession
            | RouterError::SlotMismatch { .. }
            | RouterError::Session(SessionError::NotInSession) => ErrorKind::Protocol,
            RouterError::Session(SessionError::NotFound) | RouterError::PlayerNotFound(_) => {
                ErrorKind::NotFound
            }
            RouterError::Store(_) => ErrorKind::Resource,
        }
    }

    /// Wire error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            RouterError::InvalidName(_) | RouterError::InvalidSlot(_) => ErrorCode::InvalidInput,
            RouterError::Game(GameError::InvalidCode(_)) => ErrorCode::InvalidInput,
            RouterError::Game(GameError::OutOfTurn { .. }) => ErrorCode::NotYourTurn,
            RouterError::Game(_) | RouterError::SlotMismatch { .. } => ErrorCode::ProtocolViolation,
            RouterError::NotJoined => ErrorCode::NotJoined,
            RouterError::AlreadyJoined => ErrorCode::AlreadyJoined,
            RouterError::InActiveSession => ErrorCode::AlreadyInMatch,
            RouterError::Session(SessionError::NotInSession) => ErrorCode::NotInMatch,
            RouterError::Session(SessionError::NotFound) => ErrorCode::MatchNotFound,
            RouterError::PlayerNotFound(_) => ErrorCode::PlayerNotFound,
            RouterError::Store(_) => ErrorCode::InternalError,
        }
    }

    /// Text shown to the client. Backend details stay in the logs.
    pub fn client_message(&self) -> String {
        match self.kind() {
            ErrorKind::Resource => "internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

/// Connected client state.
struct ConnectedClient {
    /// Display name (after join).
    username: Option<String>,
    /// Message sender.
    sender: mpsc::Sender<ServerMessage>,
}

/// The event router.
pub struct Router {
    config: RouterConfig,
    clients: BTreeMap<ConnectionId, ConnectedClient>,
    queue: MatchQueue,
    sessions: SessionRegistry,
    stats: Arc<dyn StatsStore>,
    /// Finished games whose stats write failed: (winner, loser).
    unreconciled: Vec<(String, String)>,
}

impl Router {
    /// Create a router backed by `stats`.
    pub fn new(config: RouterConfig, stats: Arc<dyn StatsStore>) -> Self {
        Self {
            config,
            clients: BTreeMap::new(),
            queue: MatchQueue::new(),
            sessions: SessionRegistry::new(),
            stats,
            unreconciled: Vec::new(),
        }
    }

    /// Consume events until every sender is dropped.
    #[instrument(skip_all)]
    pub async fn run(mut self, mut events: mpsc::Receiver<RouterEvent>) {
        let mut sweep = interval(self.config.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.process_on_runtime(event),
                    None => break,
                },
                _ = sweep.tick() => self.expire_idle(Instant::now()),
            }
        }

        info!("Router stopped");
    }

    /// Apply one event from inside the runtime. Events that reach the
    /// stats store run under `block_in_place` on a multi-threaded runtime
    /// so file writes do not hold up a worker's other tasks.
    fn process_on_runtime(&mut self, event: RouterEvent) {
        let flavor = Handle::current().runtime_flavor();
        if flavor == RuntimeFlavor::MultiThread && event.touches_store() {
            block_in_place(|| self.process(event));
        } else {
            self.process(event);
        }
    }

    /// Apply one event.
    pub fn process(&mut self, event: RouterEvent) {
        match event {
            RouterEvent::Connected { conn, sender } => self.connect(conn, sender),
            RouterEvent::Message { conn, msg } => self.handle(conn, msg),
            RouterEvent::Disconnected { conn } => self.disconnect(conn),
        }
    }

    /// Register a connection.
    pub fn connect(&mut self, conn: ConnectionId, sender: mpsc::Sender<ServerMessage>) {
        self.clients.insert(conn, ConnectedClient { username: None, sender });
        debug!("Client {} registered", conn);
    }

    /// Dispatch a client message, reporting any failure to the sender.
    pub fn handle(&mut self, conn: ConnectionId, msg: ClientMessage) {
        if !self.clients.contains_key(&conn) {
            warn!("Message from unknown connection {}", conn);
            return;
        }

        let is_join = matches!(msg, ClientMessage::Join { .. });
        if let Err(e) = self.dispatch(conn, msg) {
            match e.kind() {
                ErrorKind::Resource => error!("Client {}: {}", conn, e),
                _ => debug!("Rejected event from {}: {}", conn, e),
            }

            let reply = if is_join {
                ServerMessage::JoinError { error: e.client_message() }
            } else {
                ServerMessage::error(e.code(), e.client_message())
            };
            self.send(conn, reply);
        }
    }

    /// Tear down everything the connection was part of.
    pub fn disconnect(&mut self, conn: ConnectionId) {
        if self.queue.cancel(conn) {
            debug!("Client {} left the queue by disconnecting", conn);
        }

        if let Some(session_id) = self.sessions.session_of(conn) {
            self.abandon_session(conn, session_id);
        }

        if let Some(client) = self.clients.remove(&conn) {
            info!(
                "Client {} ({}) disconnected",
                conn,
                client.username.as_deref().unwrap_or("anonymous")
            );
        }
    }

    /// Cancel queue entries older than the configured timeout.
    pub fn expire_idle(&mut self, now: Instant) {
        let Some(timeout) = self.config.queue_timeout else {
            return;
        };

        for entry in self.queue.expire(now, timeout) {
            info!("Matchmaking timed out for {} ({})", entry.username, entry.conn);
            self.send(entry.conn, ServerMessage::MatchCancelled);
        }
    }

    /// Session registry (read-only).
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Matchmaking queue (read-only).
    pub fn queue(&self) -> &MatchQueue {
        &self.queue
    }

    /// Connected client count.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Finished games still waiting for a successful stats write.
    pub fn unreconciled_results(&self) -> usize {
        self.unreconciled.len()
    }

    // =========================================================================
    // DISPATCH
    // =========================================================================

    fn dispatch(&mut self, conn: ConnectionId, msg: ClientMessage) -> Result<(), RouterError> {
        match msg {
            ClientMessage::Join { username } => self.handle_join(conn, &username),
            ClientMessage::FindMatch => self.handle_find_match(conn),
            ClientMessage::CancelMatch => {
                if self.queue.cancel(conn) {
                    debug!("Client {} cancelled matchmaking", conn);
                    self.send(conn, ServerMessage::MatchCancelled);
                }
                Ok(())
            }
            ClientMessage::SetSecret { secret, slot } => self.handle_set_secret(conn, &secret, slot),
            ClientMessage::SubmitGuess { guess, slot } => self.handle_submit_guess(conn, &guess, slot),
            ClientMessage::Leave => {
                self.handle_leave(conn);
                Ok(())
            }
            ClientMessage::Leaderboard { limit } => {
                let limit = limit
                    .unwrap_or(self.config.leaderboard_limit)
                    .min(self.config.leaderboard_limit);
                let entries = self.stats.leaderboard(limit)?.iter().map(StatsView::from).collect();
                self.send(conn, ServerMessage::Leaderboard { entries });
                Ok(())
            }
            ClientMessage::Stats { username } => {
                let name = username.trim();
                let stats = self
                    .stats
                    .stats_for(name)?
                    .ok_or_else(|| RouterError::PlayerNotFound(name.to_string()))?;
                self.send(conn, ServerMessage::Stats { stats: StatsView::from(&stats) });
                Ok(())
            }
            ClientMessage::Ping { timestamp } => {
                let server_time = chrono::Utc::now().timestamp_millis().max(0) as u64;
                self.send(conn, ServerMessage::Pong { timestamp, server_time });
                Ok(())
            }
        }
    }

    fn handle_join(&mut self, conn: ConnectionId, raw: &str) -> Result<(), RouterError> {
        if self.username(conn).is_some() {
            return Err(RouterError::AlreadyJoined);
        }

        let username = raw.trim();
        if username.is_empty() {
            return Err(RouterError::InvalidName("display name is required".into()));
        }
        if username.chars().count() > self.config.max_name_len {
            return Err(RouterError::InvalidName(format!(
                "display name is longer than {} characters",
                self.config.max_name_len
            )));
        }

        // A broken store must not keep anyone from playing.
        let stats = match self.stats.register(username) {
            Ok(s) => {
                info!("{} joined ({}W/{}L)", username, s.wins, s.losses);
                Some(StatsView::from(&s))
            }
            Err(e) => {
                warn!("Could not load stats for {}: {}", username, e);
                None
            }
        };

        if let Some(client) = self.clients.get_mut(&conn) {
            client.username = Some(username.to_string());
        }
        self.send(conn, ServerMessage::Joined {
            username: username.to_string(),
            stats,
        });
        Ok(())
    }

    fn handle_find_match(&mut self, conn: ConnectionId) -> Result<(), RouterError> {
        let username = self.username(conn).ok_or(RouterError::NotJoined)?.to_string();

        if let Some(session_id) = self.sessions.session_of(conn) {
            match self.sessions.get(&session_id).map(|s| s.is_finished()) {
                Some(true) => self.leave_finished(conn, session_id),
                Some(false) => return Err(RouterError::InActiveSession),
                None => self.sessions.release(conn),
            }
        }

        let entry = QueueEntry {
            conn,
            username: username.clone(),
            queued_at: Instant::now(),
        };

        match self.queue.enqueue_or_pair(entry) {
            QueueOutcome::Queued => {
                debug!("{} is searching for a match", username);
                self.send(conn, ServerMessage::Searching);
            }
            QueueOutcome::AlreadyQueued => {
                self.send(conn, ServerMessage::Searching);
            }
            QueueOutcome::Paired(opponent) => {
                let session_id = self.sessions.create(
                    (opponent.conn, opponent.username.clone()),
                    (conn, username.clone()),
                );
                let session = self.sessions.require(&session_id)?;
                let notices: Vec<_> = Slot::BOTH
                    .into_iter()
                    .map(|slot| {
                        (
                            session.participant(slot).conn,
                            ServerMessage::MatchFound(session.match_found_for(slot)),
                        )
                    })
                    .collect();
                for (to, msg) in notices {
                    self.send(to, msg);
                }

                info!(
                    "Match {}: {} vs {}",
                    short_id(&session_id),
                    opponent.username,
                    username
                );
            }
        }
        Ok(())
    }

    fn handle_set_secret(
        &mut self,
        conn: ConnectionId,
        secret: &str,
        claimed: u8,
    ) -> Result<(), RouterError> {
        let (session_id, slot) = self.seat(conn, claimed)?;
        let session = self.sessions.require_mut(&session_id)?;
        let outcome = session.set_secret(slot, secret)?;

        let session = self.sessions.require(&session_id)?;
        match outcome {
            SecretOutcome::Waiting => {
                debug!("Match {}: player {} secret set", short_id(&session_id), slot.number());
                let other = session.participant(slot.other()).conn;
                self.send(other, ServerMessage::OpponentSecretSet { slot });
            }
            SecretOutcome::Started { turn } => {
                info!(
                    "Match {} started, player {} to move",
                    short_id(&session_id),
                    turn.number()
                );
                let game = session.view();
                let notices: Vec<_> = Slot::BOTH
                    .into_iter()
                    .map(|s| {
                        (
                            session.participant(s).conn,
                            ServerMessage::GameStarted { game: game.clone(), your_slot: s },
                        )
                    })
                    .collect();
                for (to, msg) in notices {
                    self.send(to, msg);
                }
            }
        }
        Ok(())
    }

    fn handle_submit_guess(
        &mut self,
        conn: ConnectionId,
        guess: &str,
        claimed: u8,
    ) -> Result<(), RouterError> {
        let (session_id, slot) = self.seat(conn, claimed)?;
        let session = self.sessions.require_mut(&session_id)?;
        let outcome = session.submit_guess(slot, guess)?;

        let session = self.sessions.require(&session_id)?;
        let game = session.view();
        let conns = [
            session.participant(Slot::One).conn,
            session.participant(Slot::Two).conn,
        ];

        match outcome {
            GuessOutcome::Continue { record, next_turn } => {
                debug!(
                    "Match {}: player {} scored {}+ {}-, player {} to move",
                    short_id(&session_id),
                    slot.number(),
                    record.feedback.exact,
                    record.feedback.partial,
                    next_turn.number()
                );
                let msg = ServerMessage::GuessSubmitted { game, entry: record, slot };
                for to in conns {
                    self.send(to, msg.clone());
                }
            }
            GuessOutcome::Won { winner, .. } => {
                let winner_name = session.participant(winner).username.clone();
                let loser_name = session.participant(winner.other()).username.clone();
                let secrets = session
                    .revealed_secrets()
                    .ok_or(RouterError::Session(SessionError::NotFound))?;
                info!(
                    "Match {} won by {} (player {}) after {:?}",
                    short_id(&session_id),
                    winner_name,
                    winner.number(),
                    session.age()
                );

                // The outcome goes out before the stats write is attempted.
                let msg = ServerMessage::GameFinished { game, winner, secrets };
                for to in conns {
                    self.send(to, msg.clone());
                }
                self.record_result(winner_name, loser_name);
            }
        }
        Ok(())
    }

    fn handle_leave(&mut self, conn: ConnectionId) {
        if self.queue.cancel(conn) {
            self.send(conn, ServerMessage::MatchCancelled);
        }

        let Some(session_id) = self.sessions.session_of(conn) else {
            return;
        };
        match self.sessions.get(&session_id).map(|s| s.is_finished()) {
            Some(true) => self.leave_finished(conn, session_id),
            Some(false) => self.abandon_session(conn, session_id),
            None => self.sessions.release(conn),
        }
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    fn username(&self, conn: ConnectionId) -> Option<&str> {
        self.clients.get(&conn)?.username.as_deref()
    }

    /// Resolve `conn`'s session and check the claimed slot is its own.
    fn seat(&self, conn: ConnectionId, claimed: u8) -> Result<(SessionId, Slot), RouterError> {
        let claimed = Slot::try_from(claimed)?;
        let session_id = self
            .sessions
            .session_of(conn)
            .ok_or(SessionError::NotInSession)?;
        let actual = self
            .sessions
            .require(&session_id)?
            .slot_of(conn)
            .ok_or(SessionError::NotInSession)?;

        if claimed != actual {
            return Err(RouterError::SlotMismatch { claimed, actual });
        }
        Ok((session_id, actual))
    }

    /// `conn` acknowledges a finished game; destroy it once both have.
    fn leave_finished(&mut self, conn: ConnectionId, session_id: SessionId) {
        self.sessions.release(conn);
        let Ok(session) = self.sessions.require_mut(&session_id) else {
            return;
        };
        let Some(slot) = session.slot_of(conn) else {
            return;
        };
        if session.mark_left(slot) {
            self.sessions.destroy(&session_id);
            debug!("Match {} closed after both players left", short_id(&session_id));
        }
    }

    /// `conn` walked away: tell the opponent and destroy the session.
    fn abandon_session(&mut self, conn: ConnectionId, session_id: SessionId) {
        let Some(session) = self.sessions.destroy(&session_id) else {
            self.sessions.release(conn);
            return;
        };

        if let Some(slot) = session.slot_of(conn) {
            let opponent = session.participant(slot.other());
            if !opponent.left {
                self.send(opponent.conn, ServerMessage::OpponentDisconnected);
            }
        }
        info!(
            "Match {} closed: {} left while {}",
            short_id(&session_id),
            conn,
            session.game().phase().kind()
        );
    }

    /// Credit the result, retrying earlier failures first.
    fn record_result(&mut self, winner: String, loser: String) {
        let mut pending = std::mem::take(&mut self.unreconciled);
        pending.push((winner, loser));

        for (winner, loser) in pending {
            match self.stats.record_result(&winner, &loser) {
                Ok(()) => debug!("Recorded {} beat {}", winner, loser),
                Err(e) => {
                    error!("Failed to record {} beat {}: {}; will retry", winner, loser, e);
                    self.unreconciled.push((winner, loser));
                }
            }
        }
    }

    fn send(&self, conn: ConnectionId, msg: ServerMessage) {
        let Some(client) = self.clients.get(&conn) else {
            return;
        };
        if let Err(e) = client.sender.try_send(msg) {
            warn!("Dropping message for {}: {}", conn, e);
        }
    }
}
