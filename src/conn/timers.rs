//! Timeout bookkeeping.
//!
//! There is no callback registration. Records store their deadline in a [`Timer`] and the
//! endpoint inspects them during `poll`. The [`TimerLedger`] counts armed timers so that the
//! no-dangling-timer invariant is checkable: every record is disarmed through the ledger strictly
//! before its storage is released, and the live count must always equal the number of armed
//! timers reachable from live records.
//!
//! [`Timer`]: struct.Timer.html
//! [`TimerLedger`]: struct.TimerLedger.html
use crate::time::{Expiration, Instant};

/// The single retransmission or expiry deadline of one record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Timer {
    expires: Expiration,
}

/// Central accounting of armed timers.
#[derive(Debug, Default)]
pub struct TimerLedger {
    live: usize,
}

impl Timer {
    /// A timer that never fires.
    pub fn unarmed() -> Self {
        Timer::default()
    }

    /// Whether a deadline is set.
    pub fn is_armed(&self) -> bool {
        self.expires != Expiration::Never
    }

    /// Whether the deadline has been reached.
    pub fn is_due(&self, now: Instant) -> bool {
        self.expires.is_due(now)
    }

    /// The deadline, for aggregation into the next poll hint.
    pub fn poll_at(&self) -> Expiration {
        self.expires
    }
}

impl TimerLedger {
    /// Set a record's deadline.
    ///
    /// An already armed timer is rescheduled in place, a record never owns two deadlines at once.
    pub fn arm(&mut self, timer: &mut Timer, at: Instant) {
        if !timer.is_armed() {
            self.live += 1;
        }
        timer.expires = Expiration::When(at);
    }

    /// Clear a record's deadline.
    ///
    /// Must be called before the record's storage is reused or released.
    pub fn cancel(&mut self, timer: &mut Timer) {
        if timer.is_armed() {
            self.live -= 1;
        }
        timer.expires = Expiration::Never;
    }

    /// The number of armed timers.
    pub fn live(&self) -> usize {
        self.live
    }
}
