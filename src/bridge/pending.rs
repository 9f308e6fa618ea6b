//! # Pre-readiness queue.
//!
//! Messages from consumers that arrive before the connection is ready are held here
//! and flushed in FIFO order once it is. The queue doubles as the readiness gate:
//! deciding "queue or forward" and opening the gate happen under the same lock, so a
//! message can never overtake one queued before it.
//!
//! ## Rules
//! - Bounded: at capacity the **oldest** message is dropped.
//! - Closing the gate keeps queued messages.
//! - A flushed message leaves the queue only once its send completed
//!   ([`PendingQueue::commit`]), so a flush interrupted by a disconnect loses nothing.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use crate::message::{Channel, Envelope};

/// Result of [`PendingQueue::offer`].
#[derive(Debug)]
pub enum Offer {
    /// Gate is closed; the message was queued.
    Queued {
        /// Message evicted to make room, if the queue was full.
        dropped: Option<(Channel, Envelope)>,
    },
    /// Gate is open; the message is handed back for immediate delivery.
    Open(Channel, Envelope),
}

#[derive(Debug)]
struct Inner {
    items: VecDeque<(Channel, Envelope)>,
    open: bool,
}

/// Bounded, drop-oldest FIFO gated on connection readiness.
#[derive(Debug)]
pub struct PendingQueue {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl PendingQueue {
    /// Creates a closed queue; `capacity` is clamped to at least 1.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                open: false,
            }),
            capacity: capacity.max(1),
        }
    }

    /// Queues the message while closed, or returns it when open.
    pub fn offer(&self, channel: Channel, envelope: Envelope) -> Offer {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.open {
            return Offer::Open(channel, envelope);
        }
        let dropped = if inner.items.len() >= self.capacity {
            inner.items.pop_front()
        } else {
            None
        };
        inner.items.push_back((channel, envelope));
        Offer::Queued { dropped }
    }

    /// Copy of the oldest queued message; if nothing is queued, opens the gate instead.
    ///
    /// The message stays queued until [`commit`](Self::commit) is called with its id.
    pub fn front_or_open(&self) -> Option<(Channel, Envelope)> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        match inner.items.front() {
            Some(item) => Some(item.clone()),
            None => {
                inner.open = true;
                None
            }
        }
    }

    /// Removes the oldest message if it is `msg_id`. Returns `false` otherwise.
    pub fn commit(&self, msg_id: &str) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner
            .items
            .front()
            .is_some_and(|(_, env)| env.msg_id() == msg_id)
        {
            inner.items.pop_front();
            return true;
        }
        false
    }

    /// Closes the gate; subsequent offers are queued.
    pub fn close(&self) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .open = false;
    }

    pub fn is_open(&self) -> bool {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).open
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .items
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map};

    use super::*;
    use crate::message::Session;

    fn env(s: &Session) -> Envelope {
        s.message("execute_request", &json!({}), None, Map::new())
    }

    #[test]
    fn overflow_drops_oldest() {
        let s = Session::default();
        let q = PendingQueue::new(2);
        let (a, b, c) = (env(&s), env(&s), env(&s));
        let a_id = a.msg_id().to_string();
        let ids = [b.msg_id().to_string(), c.msg_id().to_string()];

        assert!(matches!(q.offer(Channel::Shell, a), Offer::Queued { dropped: None }));
        q.offer(Channel::Shell, b);
        match q.offer(Channel::Shell, c) {
            Offer::Queued { dropped: Some((_, old)) } => assert_eq!(old.msg_id(), a_id),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(q.len(), 2);

        let mut flushed = Vec::new();
        while let Some((_, e)) = q.front_or_open() {
            assert!(q.commit(e.msg_id()));
            flushed.push(e.msg_id().to_string());
        }
        assert_eq!(flushed, ids);
        assert!(q.is_open());
    }

    #[test]
    fn opens_only_when_empty() {
        let s = Session::default();
        let q = PendingQueue::new(0);
        assert_eq!(q.capacity(), 1);

        q.offer(Channel::Control, env(&s));
        let (ch, front) = q.front_or_open().unwrap();
        assert_eq!(ch, Channel::Control);
        assert!(!q.is_open());
        assert!(!q.commit("someone-else"));
        assert!(q.commit(front.msg_id()));
        assert!(q.front_or_open().is_none());
        assert!(q.is_open());
        assert!(matches!(q.offer(Channel::Shell, env(&s)), Offer::Open(Channel::Shell, _)));

        q.close();
        assert!(matches!(q.offer(Channel::Shell, env(&s)), Offer::Queued { .. }));
    }

    #[test]
    fn uncommitted_message_survives_close() {
        let s = Session::default();
        let q = PendingQueue::new(4);
        let (a, b) = (env(&s), env(&s));
        let a_id = a.msg_id().to_string();
        q.offer(Channel::Shell, a);
        q.offer(Channel::Shell, b);

        let (_, first) = q.front_or_open().unwrap();
        assert_eq!(first.msg_id(), a_id);
        q.close();

        assert_eq!(q.len(), 2);
        assert_eq!(q.front_or_open().unwrap().1.msg_id(), a_id);
    }
}
