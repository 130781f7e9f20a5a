//! Pending-navigation tracking.
//!
//! A NAVIGATE command is answered by a `DISPLAY_UPDATE` from the server.
//! Until that arrives the operator view marks the move as pending; if nothing
//! arrives within the timeout it is flagged as unconfirmed.
//!
//! ```text
//!  Settled                  no move in flight
//!  Pending { target }       command sent, waiting for the display update
//!  Unconfirmed { target }   waited too long; shown with a "?"
//! ```

use std::time::Duration;

use serde::Serialize;
use stage_proto::protocol::NavigateTarget;
use tokio::time::Instant;

pub const NAVIGATION_TIMEOUT: Duration = Duration::from_millis(3000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum NavigationHint {
    #[default]
    Settled,
    Pending { target: Option<usize> },
    Unconfirmed { target: Option<usize> },
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    /// Index the move should land on, when it can be predicted.
    target: Option<usize>,
    deadline: Instant,
    timed_out: bool,
}

#[derive(Debug, Clone)]
pub struct NavigationIntent {
    timeout: Duration,
    in_flight: Option<InFlight>,
}

impl Default for NavigationIntent {
    fn default() -> Self {
        Self::new(NAVIGATION_TIMEOUT)
    }
}

impl NavigationIntent {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            in_flight: None,
        }
    }

    /// Register a sent NAVIGATE.  `from` is the current index, `len` the
    /// setlist length (0 when unknown).
    pub fn request(&mut self, target: NavigateTarget, from: Option<usize>, len: usize, now: Instant) {
        self.in_flight = Some(InFlight {
            target: predict(target, from, len),
            deadline: now + self.timeout,
            timed_out: false,
        });
    }

    /// Deadline of a move that has not timed out yet.
    pub fn deadline(&self) -> Option<Instant> {
        self.in_flight
            .filter(|f| !f.timed_out)
            .map(|f| f.deadline)
    }

    /// Returns true if the hint changed.
    pub fn tick(&mut self, now: Instant) -> bool {
        match &mut self.in_flight {
            Some(flight) if !flight.timed_out && now >= flight.deadline => {
                flight.timed_out = true;
                true
            }
            _ => false,
        }
    }

    /// A display update carrying an index settles the move, whether or not
    /// it landed where predicted.
    pub fn on_index(&mut self, index: Option<usize>) -> bool {
        if index.is_some() && self.in_flight.is_some() {
            self.in_flight = None;
            return true;
        }
        false
    }

    pub fn clear(&mut self) {
        self.in_flight = None;
    }

    pub fn hint(&self) -> NavigationHint {
        match self.in_flight {
            None => NavigationHint::Settled,
            Some(InFlight {
                target,
                timed_out: false,
                ..
            }) => NavigationHint::Pending { target },
            Some(InFlight { target, .. }) => NavigationHint::Unconfirmed { target },
        }
    }
}

fn predict(target: NavigateTarget, from: Option<usize>, len: usize) -> Option<usize> {
    match target {
        NavigateTarget::Goto { index } => Some(index),
        NavigateTarget::Next => from
            .map(|i| i + 1)
            .filter(|i| len == 0 || *i < len),
        NavigateTarget::Prev => from.and_then(|i| i.checked_sub(1)),
    }
}
