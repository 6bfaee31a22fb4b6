//! Debounce state machine for snapshot flushes.
//!
//! ```text
//!            notify                      notify (deadline pushed out)
//!   Idle ───────────────▶ Pending(t) ◀──────┐
//!    ▲                       │  └───────────┘
//!    │   take_due / cancel   │
//!    └───────────────────────┘
//! ```
//!
//! The scheduler only tracks time; the actor performs the write.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushState {
    Idle,
    Pending { deadline: Instant },
}

#[derive(Debug)]
pub struct FlushScheduler {
    window: Duration,
    state: FlushState,
}

impl FlushScheduler {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            state: FlushState::Idle,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn state(&self) -> FlushState {
        self.state
    }

    /// Record a mutation at `now`. Always (re)sets the deadline, so a steady
    /// stream of mutations keeps postponing the flush.
    pub fn notify(&mut self, now: Instant) {
        self.state = FlushState::Pending {
            deadline: now + self.window,
        };
    }

    /// Drop any pending flush.
    pub fn cancel(&mut self) {
        self.state = FlushState::Idle;
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            FlushState::Idle => None,
            FlushState::Pending { deadline } => Some(deadline),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, FlushState::Pending { .. })
    }

    /// If the deadline has passed, return to Idle and report that a flush
    /// is due.
    pub fn take_due(&mut self, now: Instant) -> bool {
        match self.state {
            FlushState::Pending { deadline } if deadline <= now => {
                self.state = FlushState::Idle;
                true
            }
            _ => false,
        }
    }
}
