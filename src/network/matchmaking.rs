//! Matchmaking Queue
//!
//! FIFO of connections waiting for an opponent. The second arrival pairs
//! with the earliest waiter, so at most one entry is resident between
//! events.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::network::ConnectionId;

/// A waiting participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    /// Connection handle.
    pub conn: ConnectionId,
    /// Display name.
    pub username: String,
    /// When the entry was queued.
    pub queued_at: Instant,
}

/// Result of [`MatchQueue::enqueue_or_pair`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueOutcome {
    /// Nobody was waiting; the caller is now queued.
    Queued,
    /// The caller was already queued; nothing changed.
    AlreadyQueued,
    /// Paired with the earliest waiter, which has been removed.
    Paired(QueueEntry),
}

/// The matchmaking queue.
#[derive(Debug, Default)]
pub struct MatchQueue {
    waiting: VecDeque<QueueEntry>,
}

impl MatchQueue {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `entry`, or pop the head and pair with it.
    pub fn enqueue_or_pair(&mut self, entry: QueueEntry) -> QueueOutcome {
        if self.contains(entry.conn) {
            return QueueOutcome::AlreadyQueued;
        }

        match self.waiting.pop_front() {
            Some(opponent) => QueueOutcome::Paired(opponent),
            None => {
                self.waiting.push_back(entry);
                QueueOutcome::Queued
            }
        }
    }

    /// Remove `conn` if present. Returns whether anything was removed.
    pub fn cancel(&mut self, conn: ConnectionId) -> bool {
        let before = self.waiting.len();
        self.waiting.retain(|e| e.conn != conn);
        self.waiting.len() != before
    }

    /// Remove and return entries queued for longer than `timeout`.
    pub fn expire(&mut self, now: Instant, timeout: Duration) -> Vec<QueueEntry> {
        let (stale, fresh): (Vec<_>, Vec<_>) = self
            .waiting
            .drain(..)
            .partition(|e| now.saturating_duration_since(e.queued_at) > timeout);
        self.waiting = fresh.into();
        stale
    }

    /// Whether `conn` is waiting.
    pub fn contains(&self, conn: ConnectionId) -> bool {
        self.waiting.iter().any(|e| e.conn == conn)
    }

    /// Number of waiting entries.
    pub fn len(&self) -> usize {
        self.waiting.len()
    }

    /// Whether nobody is waiting.
    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: u64, name: &str) -> QueueEntry {
        QueueEntry {
            conn: ConnectionId(id),
            username: name.to_string(),
            queued_at: Instant::now(),
        }
    }

    #[test]
    fn test_first_arrival_queues() {
        let mut queue = MatchQueue::new();
        assert_eq!(queue.enqueue_or_pair(entry(1, "alice")), QueueOutcome::Queued);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_second_arrival_pairs_with_first() {
        let mut queue = MatchQueue::new();
        let alice = entry(1, "alice");
        queue.enqueue_or_pair(alice.clone());

        assert_eq!(
            queue.enqueue_or_pair(entry(2, "bob")),
            QueueOutcome::Paired(alice)
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn test_repeat_request_is_idempotent() {
        let mut queue = MatchQueue::new();
        queue.enqueue_or_pair(entry(1, "alice"));
        assert_eq!(
            queue.enqueue_or_pair(entry(1, "alice")),
            QueueOutcome::AlreadyQueued
        );
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_cancel() {
        let mut queue = MatchQueue::new();
        queue.enqueue_or_pair(entry(1, "alice"));

        assert!(queue.cancel(ConnectionId(1)));
        assert!(queue.is_empty());
        // Second cancel is a no-op.
        assert!(!queue.cancel(ConnectionId(1)));
    }

    #[test]
    fn test_cancel_after_pairing_is_noop() {
        let mut queue = MatchQueue::new();
        queue.enqueue_or_pair(entry(1, "alice"));
        queue.enqueue_or_pair(entry(2, "bob"));

        assert!(!queue.cancel(ConnectionId(1)));
        assert!(!queue.cancel(ConnectionId(2)));
    }

    #[test]
    fn test_same_name_on_two_connections_pairs() {
        let mut queue = MatchQueue::new();
        queue.enqueue_or_pair(entry(1, "alice"));
        assert!(matches!(
            queue.enqueue_or_pair(entry(2, "alice")),
            QueueOutcome::Paired(e) if e.conn == ConnectionId(1)
        ));
    }

    #[test]
    fn test_expire_removes_stale_only() {
        let mut queue = MatchQueue::new();
        let start = Instant::now();
        queue.enqueue_or_pair(QueueEntry { queued_at: start, ..entry(1, "alice") });

        let stale = queue.expire(start + Duration::from_secs(5), Duration::from_secs(10));
        assert!(stale.is_empty());
        assert_eq!(queue.len(), 1);

        let stale = queue.expire(start + Duration::from_secs(11), Duration::from_secs(10));
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].conn, ConnectionId(1));
        assert!(queue.is_empty());
    }
}
