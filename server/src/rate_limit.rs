//! Per-connection fixed-window rate limiting.
//!
//! Each guarded event gets its own limiter instance, so a connection that
//! burns through its guess budget can still queue for a new match. The
//! limiter only answers allow/deny; whether a denial is reported back to the
//! client is the caller's decision.

use crate::network::ConnId;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Window and budget for `ranked.enqueue` and `casual.enqueue`.
pub const ENQUEUE_LIMIT: (Duration, u32) = (Duration::from_millis(4_000), 2);
/// Window and budget for `match.setSecret` and `match.guess`.
pub const PLAY_LIMIT: (Duration, u32) = (Duration::from_millis(2_000), 5);

struct Bucket {
    count: u32,
    reset_at: Instant,
}

/// Counts events per connection inside a fixed window.
///
/// The first event in a window starts it; once `max` events have been counted
/// the rest are denied until the window expires.
pub struct FixedWindowLimiter {
    window: Duration,
    max: u32,
    buckets: HashMap<ConnId, Bucket>,
}

impl FixedWindowLimiter {
    pub fn new(window: Duration, max: u32) -> Self {
        FixedWindowLimiter {
            window,
            max,
            buckets: HashMap::new(),
        }
    }

    /// Builds a limiter from a `(window, max)` pair.
    pub fn with_limit(limit: (Duration, u32)) -> Self {
        Self::new(limit.0, limit.1)
    }

    /// Records one event for `conn` and reports whether it fit in the window.
    pub fn allow(&mut self, conn: ConnId) -> bool {
        let now = Instant::now();
        match self.buckets.get_mut(&conn) {
            Some(bucket) if now < bucket.reset_at => {
                if bucket.count >= self.max {
                    false
                } else {
                    bucket.count += 1;
                    true
                }
            }
            _ => {
                self.buckets.insert(
                    conn,
                    Bucket {
                        count: 1,
                        reset_at: now + self.window,
                    },
                );
                true
            }
        }
    }

    /// Drops any window state held for `conn`. Called on disconnect so the
    /// bucket table stays bounded by the number of live connections.
    pub fn forget(&mut self, conn: ConnId) {
        self.buckets.remove(&conn);
    }
}
