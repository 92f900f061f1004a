//! Single-shot, cancellable confirm deadline
//!
//! The timer never runs anything on its own. Its owner asks whether it is
//! due and takes it; `cancel` is just forgetting the deadline, so once it
//! returns the confirm can no longer happen.

use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct ConfirmTimer {
    deadline: Option<Instant>,
}

impl ConfirmTimer {
    /// Arm the timer, replacing any previous deadline
    pub fn schedule(&mut self, now: Instant, delay: Duration) {
        self.deadline = Some(now + delay);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Disarm and return true if the deadline has been reached
    pub fn take_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}
