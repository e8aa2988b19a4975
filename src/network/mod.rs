//! Network Layer
//!
//! WebSocket transport, matchmaking and session bookkeeping.
//! Game rules live in `game/`; this layer only decides who plays whom and
//! who hears about it.

pub mod matchmaking;
pub mod protocol;
pub mod router;
pub mod server;
pub mod session;

use std::fmt;

pub use matchmaking::{MatchQueue, QueueEntry, QueueOutcome};
pub use protocol::{ClientMessage, ErrorCode, ServerError, ServerMessage};
pub use router::{Router, RouterConfig, RouterError, RouterEvent};
pub use server::{GameServer, GameServerError, ServerConfig};
pub use session::{GameSession, SessionError, SessionId, SessionRegistry};

/// Opaque per-connection handle, assigned by the transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}
