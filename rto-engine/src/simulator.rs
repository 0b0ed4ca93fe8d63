//! Lossy-path simulator for exercising the engine without a network.
//!
//! [`SimHooks`] implements [`Hooks`] for a peer at the far end of a path
//! that drops packets.  Every (re)transmission is handed to [`LossyPath`];
//! if both the segment and its ACK survive, a cumulative ACK is scheduled to
//! arrive one `rtt` later.  The driver polls [`SimHooks::take_due`] and feeds
//! the result into the connection's ACK path.
//!
//! | Knob        | Description                                         |
//! |-------------|-----------------------------------------------------|
//! | `loss_rate` | Drop probability, applied once in each direction.   |
//! | `rtt`       | Delay between transmission and ACK arrival.          |
//! | `seed`      | RNG seed; the same seed replays the same losses.    |

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::connection::ConnectionId;
use crate::error::{ConnError, PathError};
use crate::hooks::Hooks;
use crate::queue::Segment;
use crate::wheel;

/// Fault model for the simulated path.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Probability, in `[0.0, 1.0]`, that a packet is silently dropped.
    pub loss_rate: f64,
    /// Round-trip time of a delivered segment.
    pub rtt: Duration,
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // Lossless by default.
        Self {
            loss_rate: 0.0,
            rtt: Duration::from_millis(50),
            seed: 0,
        }
    }
}

/// Seeded coin flips deciding which packets survive.
#[derive(Debug)]
pub struct LossyPath {
    loss_rate: f64,
    rng: StdRng,
}

impl LossyPath {
    /// A NaN `loss_rate` is treated as lossless; anything else is clamped.
    pub fn new(config: &SimulatorConfig) -> Self {
        let loss_rate = if config.loss_rate.is_nan() {
            0.0
        } else {
            config.loss_rate.clamp(0.0, 1.0)
        };
        Self {
            loss_rate,
            rng: StdRng::seed_from_u64(config.seed),
        }
    }

    /// `true` if one packet makes it across.
    pub fn delivers(&mut self) -> bool {
        !self.rng.gen_bool(self.loss_rate)
    }

    /// `true` if a segment arrives and its ACK makes it back.
    pub fn round_trip(&mut self) -> bool {
        // Each direction always consumes one roll.
        let forward = self.delivers();
        let back = self.delivers();
        forward && back
    }
}

/// Counters collected by [`SimHooks`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimStats {
    pub transmitted: u64,
    pub resent: u64,
    pub lost: u64,
    pub probes: u64,
    pub keepalives: u64,
    pub revalidations: u64,
    pub error: Option<ConnError>,
    pub terminated: bool,
}

/// [`Hooks`] backed by a [`LossyPath`] and a queue of ACKs in flight.
#[derive(Debug)]
pub struct SimHooks {
    path: LossyPath,
    rtt: Duration,
    /// `(arrival, ack)` ordered by arrival.
    arrivals: VecDeque<(Instant, u32)>,
    pub stats: SimStats,
}

impl SimHooks {
    pub fn new(config: &SimulatorConfig) -> Self {
        Self {
            path: LossyPath::new(config),
            rtt: config.rtt,
            arrivals: VecDeque::new(),
            stats: SimStats::default(),
        }
    }

    /// A segment ending at `end_seq` was put on the path at `now`.
    pub fn transmit(&mut self, end_seq: u32, now: Instant) {
        self.stats.transmitted += 1;
        if !self.path.round_trip() {
            self.stats.lost += 1;
            log::debug!("[sim] segment ending at {end_seq} lost");
            return;
        }
        let arrival = now + self.rtt;
        // Keep `arrivals` ordered by arrival time.
        let at = self.arrivals.partition_point(|(t, _)| *t <= arrival);
        self.arrivals.insert(at, (arrival, end_seq));
    }

    /// Arrival time of the next ACK, if one is in flight.
    pub fn next_arrival(&self) -> Option<Instant> {
        self.arrivals.front().map(|(t, _)| *t)
    }

    /// Highest ACK that has arrived by `now`, removing every arrived entry.
    pub fn take_due(&mut self, now: Instant) -> Option<u32> {
        let mut best = None;
        while let Some(&(t, ack)) = self.arrivals.front() {
            if t > now {
                break;
            }
            self.arrivals.pop_front();
            best = Some(match best {
                Some(prev) if crate::queue::seq_le(ack, prev) => prev,
                _ => ack,
            });
        }
        best
    }
}

impl Hooks for SimHooks {
    fn resend(&mut self, id: ConnectionId, segment: &Segment) {
        self.stats.resent += 1;
        log::debug!("[{id}] → RESEND seq={} tx={}", segment.seq, segment.tx_count + 1);
        self.transmit(segment.end_seq(), wheel::now());
    }

    fn send_probe(&mut self, id: ConnectionId) {
        self.stats.probes += 1;
        log::debug!("[{id}] → PROBE");
    }

    fn send_keepalive(&mut self, id: ConnectionId) {
        self.stats.keepalives += 1;
        log::debug!("[{id}] → KEEPALIVE");
    }

    fn revalidate_path(&mut self, id: ConnectionId) -> Result<(), PathError> {
        self.stats.revalidations += 1;
        log::debug!("[{id}] revalidating path");
        Ok(())
    }

    fn report_error(&mut self, id: ConnectionId, err: &ConnError) {
        log::warn!("[{id}] connection failed: {err}");
        self.stats.error = Some(*err);
    }

    fn terminate(&mut self, id: ConnectionId) {
        log::info!("[{id}] terminated");
        self.stats.terminated = true;
    }
}
