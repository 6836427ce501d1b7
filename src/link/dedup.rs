//! Chat message deduplication.
//!
//! The firmware can surface the same logical message twice: once as a
//! decoded protobuf packet and once as a line in its human log stream. Both
//! paths funnel through here; whichever arrives first wins and the second
//! observation is silently dropped. Keys are kept in arrival order with a
//! soft cap, evicting the oldest half when the cap is exceeded.
use std::collections::{HashSet, VecDeque};

use super::ChatMessage;

/// Composite identity of a logical chat message. Both arrival paths must
/// produce byte-identical fields for the same message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub from: u32,
    pub id_hex: String,
    pub text: String,
}

impl DedupKey {
    pub fn of(msg: &ChatMessage) -> Self {
        Self {
            from: msg.from,
            id_hex: msg.id_hex.clone(),
            text: msg.text.clone(),
        }
    }
}

/// Bounded first-observation-wins filter.
#[derive(Debug)]
pub struct Deduplicator {
    seen: HashSet<DedupKey>,
    order: VecDeque<DedupKey>,
    cap: usize,
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new(400)
    }
}

impl Deduplicator {
    pub fn new(cap: usize) -> Self {
        Self {
            seen: HashSet::with_capacity(cap),
            order: VecDeque::with_capacity(cap),
            cap: cap.max(2),
        }
    }

    /// Record the message's key. Returns `true` the first time a key is
    /// seen, `false` on every repeat.
    pub fn accept(&mut self, msg: &ChatMessage) -> bool {
        let key = DedupKey::of(msg);
        if self.seen.contains(&key) {
            return false;
        }
        self.seen.insert(key.clone());
        self.order.push_back(key);
        if self.order.len() > self.cap {
            // Evict the oldest half in one sweep.
            for _ in 0..self.cap / 2 {
                if let Some(old) = self.order.pop_front() {
                    self.seen.remove(&old);
                }
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Forget everything (fresh connection).
    pub fn clear(&mut self) {
        self.seen.clear();
        self.order.clear();
    }
}
