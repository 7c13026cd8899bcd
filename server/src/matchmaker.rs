//! FIFO matchmaking queues.
//!
//! Two queues, ranked and casual, holding connection ids in arrival order.
//! Pairing pops from the front; entries whose connection died are discarded
//! as they surface. A connection sits in at most one queue at a time, so
//! switching queues abandons the earlier spot.

use crate::network::ConnId;
use std::collections::VecDeque;

pub struct Matchmaker {
    ranked: VecDeque<ConnId>,
    casual: VecDeque<ConnId>,
}

impl Matchmaker {
    pub fn new() -> Self {
        Matchmaker {
            ranked: VecDeque::new(),
            casual: VecDeque::new(),
        }
    }

    /// Adds a connection to the ranked queue. Returns `false` if it was
    /// already waiting there.
    pub fn enqueue_ranked(&mut self, conn: ConnId) -> bool {
        if self.ranked.contains(&conn) {
            return false;
        }
        self.casual.retain(|&c| c != conn);
        self.ranked.push_back(conn);
        true
    }

    /// Adds a connection to the casual queue. Returns `false` if it was
    /// already waiting there.
    pub fn enqueue_casual(&mut self, conn: ConnId) -> bool {
        if self.casual.contains(&conn) {
            return false;
        }
        self.ranked.retain(|&c| c != conn);
        self.casual.push_back(conn);
        true
    }

    /// Drains the ranked queue into pairs.
    ///
    /// Both members of a candidate pair must still be live; a pair with a
    /// dead member is dropped whole, without putting the survivor back. The
    /// survivor re-enqueues on its own when its client retries.
    pub fn ranked_pairs(&mut self, is_live: impl Fn(ConnId) -> bool) -> Vec<(ConnId, ConnId)> {
        let mut pairs = Vec::new();
        while self.ranked.len() >= 2 {
            let (first, second) = match (self.ranked.pop_front(), self.ranked.pop_front()) {
                (Some(a), Some(b)) => (a, b),
                _ => break,
            };
            if is_live(first) && is_live(second) {
                pairs.push((first, second));
            }
        }
        pairs
    }

    /// Pops one casual pair if two live entries are waiting.
    pub fn casual_pair(&mut self, is_live: impl Fn(ConnId) -> bool) -> Option<(ConnId, ConnId)> {
        if self.casual.len() < 2 {
            return None;
        }
        let (first, second) = match (self.casual.pop_front(), self.casual.pop_front()) {
            (Some(a), Some(b)) => (a, b),
            _ => return None,
        };
        if is_live(first) && is_live(second) {
            Some((first, second))
        } else {
            None
        }
    }

    /// Whether a connection is still waiting in the casual queue.
    pub fn in_casual(&self, conn: ConnId) -> bool {
        self.casual.contains(&conn)
    }

    /// Removes a specific casual entry, reporting whether it was present.
    /// Used when its solo-wait deadline fires.
    pub fn take_casual(&mut self, conn: ConnId) -> bool {
        let before = self.casual.len();
        self.casual.retain(|&c| c != conn);
        self.casual.len() != before
    }

    /// Removes a connection from both queues.
    pub fn remove(&mut self, conn: ConnId) {
        self.ranked.retain(|&c| c != conn);
        self.casual.retain(|&c| c != conn);
    }

    pub fn ranked_len(&self) -> usize {
        self.ranked.len()
    }

    pub fn casual_len(&self) -> usize {
        self.casual.len()
    }
}
