//! Unacknowledged segments and the retransmit driver.
//!
//! [`RetransmitQueue`] holds every in-flight segment in sequence order.  The
//! ACK path is the only code that removes entries (via
//! [`RetransmitQueue::acknowledge`]); the retransmit driver, [`retransmit`],
//! sees the queue through the read-only [`UnackedQueue`] view.
//!
//! # Sequence-number layout
//!
//! ```text
//!  send_base          next_seq
//!      │                  │
//!  ────┼──────────────────┼──────────────────▶ seq space
//!      │ <── in flight ──▶│
//! ```
//!
//! Sequence numbers are u32 and wrap around; two numbers are compared as
//! "close" when their difference is less than `u32::MAX / 2`.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::connection::ConnectionId;
use crate::hooks::Hooks;

/// Control bits that occupy sequence space.
pub mod flags {
    /// Synchronise sequence numbers (handshake initiation).
    pub const SYN: u8 = 0b0000_0001;
    /// Sender has no more data to send.
    pub const FIN: u8 = 0b0000_0100;
}

/// Returns `true` when sequence number `a` is ≤ `b` in wrap-around space.
#[inline]
pub fn seq_le(a: u32, b: u32) -> bool {
    b.wrapping_sub(a) <= (u32::MAX / 2)
}

// ---------------------------------------------------------------------------
// Segment
// ---------------------------------------------------------------------------

/// A transmitted segment awaiting acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Sequence number of the first octet (or of the SYN).
    pub seq: u32,
    /// Bitmask of [`flags`].
    pub flags: u8,
    /// Opaque payload; the engine never inspects it.
    pub payload: Vec<u8>,
    /// Total number of times this segment has been transmitted.
    pub tx_count: u32,
    /// Time of the most recent transmission.
    pub sent_at: Instant,
}

impl Segment {
    /// Sequence space consumed: payload plus one for each of SYN and FIN.
    pub fn seq_len(&self) -> u32 {
        let mut len = self.payload.len() as u32;
        if self.flags & flags::SYN != 0 {
            len += 1;
        }
        if self.flags & flags::FIN != 0 {
            len += 1;
        }
        len
    }

    /// First sequence number after this segment.
    pub fn end_seq(&self) -> u32 {
        self.seq.wrapping_add(self.seq_len())
    }

    /// Drop the first `n` octets of sequence space (`n < seq_len()`).
    fn trim_front(&mut self, n: u32) {
        let mut data = n;
        if data > 0 && self.flags & flags::SYN != 0 {
            self.flags &= !flags::SYN;
            data -= 1;
        }
        let data = (data as usize).min(self.payload.len());
        self.payload.drain(..data);
        self.seq = self.seq.wrapping_add(n);
    }
}

// ---------------------------------------------------------------------------
// Read-only view
// ---------------------------------------------------------------------------

/// What the retransmit driver may see of the unacknowledged queue.
pub trait UnackedQueue {
    /// Oldest (lowest sequence) unacknowledged segment.
    fn head(&self) -> Option<&Segment>;

    /// Every unacknowledged segment, oldest first.
    fn all(&self) -> Box<dyn Iterator<Item = &Segment> + '_>;

    fn is_empty(&self) -> bool {
        self.head().is_none()
    }
}

/// Resend queued segments through `hooks`.
///
/// With `all`, every segment is resent in order; otherwise only the head.
/// An empty queue is a no-op.  Returns the number of segments handed to
/// the transport.  The queue itself is not modified.
pub fn retransmit<Q, H>(id: ConnectionId, all: bool, queue: &Q, hooks: &mut H) -> usize
where
    Q: UnackedQueue + ?Sized,
    H: Hooks + ?Sized,
{
    if all {
        let mut sent = 0;
        for segment in queue.all() {
            hooks.resend(id, segment);
            sent += 1;
        }
        sent
    } else if let Some(head) = queue.head() {
        hooks.resend(id, head);
        1
    } else {
        0
    }
}

// ---------------------------------------------------------------------------
// RetransmitQueue
// ---------------------------------------------------------------------------

/// Result of processing one cumulative ACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AckOutcome {
    /// Number of segments fully acknowledged and removed.
    pub acked: usize,
    /// `send_base` moved, whether or not a whole segment was covered.
    pub advanced: bool,
    /// RTT of the newest removed segment, if it was transmitted only once.
    pub rtt_sample: Option<Duration>,
}

/// In-flight segments for one connection, ordered by sequence number.
#[derive(Debug, Default)]
pub struct RetransmitQueue {
    /// Sequence number of the oldest unacked octet (left edge).
    pub send_base: u32,
    /// Sequence number for the next new segment.
    pub next_seq: u32,
    segments: VecDeque<Segment>,
}

impl RetransmitQueue {
    /// `seq_start` is the first sequence number that will be queued; for an
    /// active open this is the ISN carried by the SYN.
    pub fn new(seq_start: u32) -> Self {
        Self {
            send_base: seq_start,
            next_seq: seq_start,
            segments: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Record a just-transmitted segment at `next_seq` and advance it.
    ///
    /// Returns the sequence number assigned.
    pub fn push(&mut self, flags: u8, payload: Vec<u8>, now: Instant) -> u32 {
        let segment = Segment {
            seq: self.next_seq,
            flags,
            payload,
            tx_count: 1,
            sent_at: now,
        };
        let seq = segment.seq;
        self.next_seq = segment.end_seq();
        self.segments.push_back(segment);
        seq
    }

    /// Process a cumulative ACK.
    ///
    /// Removes every segment ending at or before `ack`, trims the head if
    /// `ack` lands inside it, advances `send_base` and reports what was
    /// removed.  Duplicate ACKs and ACKs for data never sent change nothing.
    pub fn acknowledge(&mut self, ack: u32, now: Instant) -> AckOutcome {
        let mut outcome = AckOutcome::default();
        if !seq_le(self.send_base, ack) || !seq_le(ack, self.next_seq) || ack == self.send_base {
            return outcome;
        }

        while let Some(front) = self.segments.front() {
            let end = front.end_seq();
            if !seq_le(end, ack) {
                break;
            }
            // Karn: a retransmitted segment's ACK is ambiguous.
            outcome.rtt_sample = (front.tx_count == 1)
                .then(|| now.saturating_duration_since(front.sent_at));
            self.send_base = end;
            self.segments.pop_front();
            outcome.acked += 1;
        }

        // Partial ACK of the head: no RTT sample, but the left edge moves.
        if self.send_base != ack {
            if let Some(head) = self.segments.front_mut() {
                head.trim_front(ack.wrapping_sub(head.seq));
            }
            self.send_base = ack;
        }
        outcome.advanced = true;
        outcome
    }

    /// Bookkeeping after the driver resent the head (or everything).
    pub fn on_retransmit(&mut self, all: bool, now: Instant) {
        let n = if all { self.segments.len() } else { 1 };
        for segment in self.segments.iter_mut().take(n) {
            segment.tx_count += 1;
            segment.sent_at = now;
        }
    }

    /// Drop everything; used on teardown.
    pub fn clear(&mut self) {
        self.segments.clear();
        self.send_base = self.next_seq;
    }
}

impl UnackedQueue for RetransmitQueue {
    fn head(&self) -> Option<&Segment> {
        self.segments.front()
    }

    fn all(&self) -> Box<dyn Iterator<Item = &Segment> + '_> {
        Box::new(self.segments.iter())
    }

    fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
