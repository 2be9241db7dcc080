use std::time::{Duration, Instant};

/// Per-channel acceptance gate.
///
/// Two accepted crossings on the same channel are never closer together than
/// `interval`.  Each sensor loop owns exactly one of these; nothing else writes it.
#[derive(Debug)]
pub struct Cooldown {
    interval: Duration,
    last_accepted: Option<Instant>,
}

impl Cooldown {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_accepted: None,
        }
    }

    /// Accepts the crossing at `now` if at least `interval` has elapsed since the
    /// last accepted one, recording `now` as the new reference point.
    /// Rejected crossings leave the state untouched.
    pub fn try_accept(&mut self, now: Instant) -> bool {
        let ready = match self.last_accepted {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        };
        if ready {
            self.last_accepted = Some(now);
        }
        ready
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}
