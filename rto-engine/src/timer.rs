//! Per-connection timer slots.
//!
//! A connection owns exactly one retransmit slot, which is armed for one
//! [`TimerReason`] at a time, plus a separate linger slot used only in
//! `TIME_WAIT`.  This module provides:
//! - [`TimerSlot`]: arm / cancel / fire with replace-on-arm semantics.
//! - [`TimerKey`]: how the global wheel addresses a slot.
//!
//! Every arm is stamped with a fresh generation.  The wheel hands the
//! generation back on expiry, so a fire belonging to an arm that has since
//! been cancelled or replaced is recognised and dropped instead of being
//! acted on with the wrong reason.

use std::time::Instant;

use crate::connection::ConnectionId;

/// Why the retransmit slot is armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerReason {
    /// Unacknowledged data is outstanding.
    WriteRetransmit,
    /// Data is queued but the peer advertised a zero window.
    ZeroWindowProbe,
    /// The connection is idle and keepalive is enabled.
    KeepAlive,
}

/// Which of a connection's two slots a wheel entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerKind {
    Retransmit,
    Linger,
}

/// Address of one timer slot in the global wheel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerKey {
    pub id: ConnectionId,
    pub kind: TimerKind,
}

/// A pending deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArmedTimer<R> {
    pub reason: R,
    pub deadline: Instant,
    pub generation: u64,
}

/// A single expiry slot.  At most one deadline is pending at any time.
#[derive(Debug)]
pub struct TimerSlot<R = TimerReason> {
    armed: Option<ArmedTimer<R>>,
    next_generation: u64,
}

impl<R> Default for TimerSlot<R> {
    fn default() -> Self {
        Self {
            armed: None,
            next_generation: 1,
        }
    }
}

impl<R: Copy + PartialEq> TimerSlot<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm for `reason`, replacing whatever was pending.
    pub fn arm(&mut self, reason: R, deadline: Instant) -> ArmedTimer<R> {
        let armed = ArmedTimer {
            reason,
            deadline,
            generation: self.next_generation,
        };
        self.next_generation += 1;
        self.armed = Some(armed);
        armed
    }

    /// Remove the pending deadline, if any.
    pub fn cancel(&mut self) -> Option<ArmedTimer<R>> {
        self.armed.take()
    }

    pub fn pending(&self) -> Option<ArmedTimer<R>> {
        self.armed
    }

    pub fn is_armed_for(&self, reason: R) -> bool {
        self.armed.map_or(false, |a| a.reason == reason)
    }

    /// Consume the pending arm if `generation` names it and it has expired.
    ///
    /// Returns `None` for a stale generation, an empty slot, or an early
    /// fire; the slot is left untouched in those cases.
    pub fn fire(&mut self, generation: u64, now: Instant) -> Option<R> {
        match self.armed {
            Some(a) if a.generation == generation && a.deadline <= now => {
                self.armed = None;
                Some(a.reason)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn arm_replaces_previous_reason() {
        let now = Instant::now();
        let mut slot = TimerSlot::new();
        let first = slot.arm(TimerReason::WriteRetransmit, now);
        let second = slot.arm(TimerReason::KeepAlive, now);

        assert_ne!(first.generation, second.generation);
        assert_eq!(slot.pending(), Some(second));
        // The replaced arm can no longer fire.
        assert_eq!(slot.fire(first.generation, now), None);
        assert_eq!(slot.fire(second.generation, now), Some(TimerReason::KeepAlive));
        assert_eq!(slot.pending(), None);
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut slot: TimerSlot = TimerSlot::new();
        assert_eq!(slot.cancel(), None);
        let armed = slot.arm(TimerReason::ZeroWindowProbe, Instant::now());
        assert_eq!(slot.cancel(), Some(armed));
        assert_eq!(slot.cancel(), None);
        assert_eq!(slot.fire(armed.generation, Instant::now()), None);
    }

    #[test]
    fn early_fire_leaves_slot_armed() {
        let now = Instant::now();
        let mut slot = TimerSlot::new();
        let armed = slot.arm(TimerReason::WriteRetransmit, now + Duration::from_secs(1));
        assert_eq!(slot.fire(armed.generation, now), None);
        assert!(slot.is_armed_for(TimerReason::WriteRetransmit));
    }

    #[test]
    fn at_most_one_pending_under_arbitrary_sequences() {
        // Deterministic pseudo-random walk over arm / cancel / fire.
        let now = Instant::now();
        let mut slot = TimerSlot::new();
        let reasons = [
            TimerReason::WriteRetransmit,
            TimerReason::ZeroWindowProbe,
            TimerReason::KeepAlive,
        ];
        let mut last_gen = 0;
        let mut x: u32 = 0x2545_f491;
        for _ in 0..1000 {
            x ^= x << 13;
            x ^= x >> 17;
            x ^= x << 5;
            match x % 3 {
                0 => last_gen = slot.arm(reasons[(x as usize / 3) % 3], now).generation,
                1 => {
                    slot.cancel();
                }
                _ => {
                    let fired = slot.fire(last_gen, now);
                    assert!(slot.pending().is_none() || fired.is_none());
                }
            }
            // `Option` makes two pending arms unrepresentable; check the
            // generation bookkeeping stays consistent instead.
            if let Some(p) = slot.pending() {
                assert_eq!(p.generation, last_gen);
            }
        }
    }
}
