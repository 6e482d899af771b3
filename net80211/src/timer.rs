//! One-shot deadline timers.
//!
//! Timers carry no callback. The owner arms them with a deadline and the
//! interface polls them from `Interface::run_timers`, so expiry always runs
//! inside the same exclusion domain as frame reception.

/// A one-shot timeout measured in microseconds of uptime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timeout {
    deadline: Option<u64>,
}

impl Timeout {
    pub const fn new() -> Self {
        Timeout { deadline: None }
    }

    /// (Re)arm to fire `after_us` from `now`.
    pub fn arm(&mut self, now: u64, after_us: u64) {
        self.deadline = Some(now.saturating_add(after_us));
    }

    /// Disarm. A no-op if never armed or already fired.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// Consume the timer if it has expired at `now`.
    pub fn fire(&mut self, now: u64) -> bool {
        match self.deadline {
            Some(d) if d <= now => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}
