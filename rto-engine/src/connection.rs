//! Per-connection retransmit engine.
//!
//! A [`Connection`] owns the complete timer-side state for one reliable
//! stream.  Its responsibilities are:
//! - Reacting to timer fires: write retransmit, zero-window probe, keepalive
//!   and the `TIME_WAIT` linger (see [`Connection::on_timer`]).
//! - Counting consecutive failures against the retry ceilings and tearing
//!   the connection down when they are exceeded.
//! - Accepting notifications from the external ACK / handshake path
//!   ([`Connection::on_ack`], [`Connection::on_progress`],
//!   [`Connection::on_window_update`], ...).
//!
//! Every operation is synchronous and bounded; anything with an outside
//! effect goes through [`Hooks`].  Callers must serialise access to one
//! connection (see [`crate::guard`]).

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::config::EngineConfig;
use crate::congestion::CongestionController;
use crate::error::{ConfigError, ConnError, EngineError};
use crate::hooks::Hooks;
use crate::queue::{self, flags, AckOutcome, RetransmitQueue};
use crate::rto::RtoEstimator;
use crate::state::ConnectionState;
use crate::timer::{ArmedTimer, TimerKind, TimerReason, TimerSlot};

/// Identifies a connection to the timer wheel and to [`Hooks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// What became of one timer expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    /// The fire matched the pending arm and was acted on.
    Handled,
    /// The connection was busy; try again at `retry_at`.
    Deferred { retry_at: Instant },
    /// Cancelled, replaced, early, or the connection is closed.
    Stale,
}

/// Timer, backoff and congestion state for one connection.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    state: ConnectionState,
    /// Consecutive timer fires since the last forward progress.
    retransmit_count: u32,
    rto: RtoEstimator,
    congestion: CongestionController,
    queue: RetransmitQueue,
    /// The retransmit / probe / keepalive slot.
    timer: TimerSlot<TimerReason>,
    /// `TIME_WAIT` linger, independent of `timer`.
    linger: TimerSlot<()>,
    /// Last window advertised by the peer.
    peer_window: u32,
    keepalive: bool,
    soft_error: Option<ConnError>,
    hard_error: Option<ConnError>,
    config: Arc<EngineConfig>,
}

impl Connection {
    // -----------------------------------------------------------------------
    // Constructors
    // -----------------------------------------------------------------------

    /// A connection in `state` whose next sequence number is `isn`.
    ///
    /// No timer is armed until something is queued.  Fails if `config` does
    /// not pass [`EngineConfig::validate`].
    pub fn new(
        id: ConnectionId,
        state: ConnectionState,
        isn: u32,
        config: Arc<EngineConfig>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            id,
            state,
            retransmit_count: 0,
            rto: RtoEstimator::new(&config),
            congestion: CongestionController::new(config.max_cwnd),
            queue: RetransmitQueue::new(isn),
            timer: TimerSlot::new(),
            linger: TimerSlot::new(),
            peer_window: u32::from(u16::MAX),
            keepalive: false,
            soft_error: None,
            hard_error: None,
            config,
        })
    }

    /// Active open: the SYN carrying `isn` has just been sent.
    pub fn connect(
        id: ConnectionId,
        isn: u32,
        config: Arc<EngineConfig>,
        now: Instant,
    ) -> Result<Self, ConfigError> {
        let mut conn = Self::new(id, ConnectionState::SynSent, isn, config)?;
        conn.queue.push(flags::SYN, Vec::new(), now);
        conn.arm_transmit(now);
        Ok(conn)
    }

    /// Start from explicit window values instead of a one-segment window.
    pub fn with_window(mut self, cwnd: u32, ssthresh: u32) -> Self {
        self.congestion = CongestionController::with_window(cwnd, ssthresh, self.config.max_cwnd);
        self
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn retransmit_count(&self) -> u32 {
        self.retransmit_count
    }

    pub fn rto(&self) -> std::time::Duration {
        self.rto.rto()
    }

    pub fn congestion(&self) -> &CongestionController {
        &self.congestion
    }

    pub fn queue(&self) -> &RetransmitQueue {
        &self.queue
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The pending retransmit-slot arm, if any.
    pub fn armed_timer(&self) -> Option<ArmedTimer<TimerReason>> {
        self.timer.pending()
    }

    /// The pending `TIME_WAIT` linger, if any.
    pub fn linger_timer(&self) -> Option<ArmedTimer<()>> {
        self.linger.pending()
    }

    /// `(deadline, generation)` currently pending in slot `kind`.
    pub fn pending(&self, kind: TimerKind) -> Option<(Instant, u64)> {
        match kind {
            TimerKind::Retransmit => self.timer.pending().map(|a| (a.deadline, a.generation)),
            TimerKind::Linger => self.linger.pending().map(|a| (a.deadline, a.generation)),
        }
    }

    pub fn soft_error(&self) -> Option<ConnError> {
        self.soft_error
    }

    pub fn hard_error(&self) -> Option<ConnError> {
        self.hard_error
    }

    pub fn peer_window(&self) -> u32 {
        self.peer_window
    }

    // -----------------------------------------------------------------------
    // Timer fires
    // -----------------------------------------------------------------------

    /// Handle the expiry of slot `kind` armed with `generation`.
    pub fn on_timer<H: Hooks + ?Sized>(
        &mut self,
        kind: TimerKind,
        generation: u64,
        now: Instant,
        hooks: &mut H,
    ) -> FireOutcome {
        if self.state == ConnectionState::Closed {
            log::debug!("[{}] fire on closed connection ignored", self.id);
            return FireOutcome::Stale;
        }

        match kind {
            TimerKind::Retransmit => match self.timer.fire(generation, now) {
                Some(TimerReason::WriteRetransmit) => self.on_write_timeout(now, hooks),
                Some(TimerReason::ZeroWindowProbe) => self.on_probe_timeout(now, hooks),
                Some(TimerReason::KeepAlive) => self.on_keepalive_timeout(now, hooks),
                None => return FireOutcome::Stale,
            },
            TimerKind::Linger => match self.linger.fire(generation, now) {
                Some(()) => self.on_linger_expired(hooks),
                None => return FireOutcome::Stale,
            },
        }
        FireOutcome::Handled
    }

    fn on_write_timeout<H: Hooks + ?Sized>(&mut self, now: Instant, hooks: &mut H) {
        if !self.state.is_active() {
            return;
        }
        if self.queue.is_empty() {
            // Everything was acknowledged before the timer could be cancelled.
            self.arm_idle(now);
            return;
        }

        self.retransmit_count += 1;
        self.rto.back_off();
        self.congestion.on_timeout_loss();
        log::debug!(
            "[{}] {} timeout #{}; rto={:?} ssthresh={}",
            self.id,
            self.state,
            self.retransmit_count,
            self.rto.rto(),
            self.congestion.ssthresh
        );

        if !self.check_retry_limits(now, hooks) {
            return;
        }

        let sent = queue::retransmit(self.id, true, &self.queue, hooks);
        self.queue.on_retransmit(true, now);
        log::debug!("[{}] retransmitted {} segment(s)", self.id, sent);
        self.timer.arm(TimerReason::WriteRetransmit, now + self.rto.rto());
    }

    fn on_probe_timeout<H: Hooks + ?Sized>(&mut self, now: Instant, hooks: &mut H) {
        if !self.state.is_active() {
            return;
        }
        if self.queue.is_empty() {
            self.arm_idle(now);
            return;
        }
        if self.peer_window > 0 {
            // Window reopened without us noticing; resume normal retransmits.
            self.timer.arm(TimerReason::WriteRetransmit, now + self.rto.rto());
            return;
        }

        hooks.send_probe(self.id);
        self.retransmit_count += 1;
        self.rto.back_off();
        self.timer.arm(TimerReason::ZeroWindowProbe, now + self.rto.rto());
        log::debug!(
            "[{}] zero-window probe #{}; rto={:?}",
            self.id,
            self.retransmit_count,
            self.rto.rto()
        );
        self.check_retry_limits(now, hooks);
    }

    fn on_keepalive_timeout<H: Hooks + ?Sized>(&mut self, now: Instant, hooks: &mut H) {
        if self.state != ConnectionState::Established || !self.keepalive {
            return;
        }

        self.timer
            .arm(TimerReason::KeepAlive, now + self.config.keepalive_interval);
        hooks.send_keepalive(self.id);
        self.retransmit_count += 1;
        log::debug!("[{}] keepalive #{}", self.id, self.retransmit_count);
        self.check_retry_limits(now, hooks);
    }

    fn on_linger_expired<H: Hooks + ?Sized>(&mut self, hooks: &mut H) {
        if self.state != ConnectionState::TimeWait {
            return;
        }
        log::debug!("[{}] TIME_WAIT linger expired", self.id);
        self.finish(hooks);
    }

    /// Advisory path check and retry ceilings.  Returns `false` once the
    /// connection has been given up.
    fn check_retry_limits<H: Hooks + ?Sized>(&mut self, now: Instant, hooks: &mut H) -> bool {
        let count = self.retransmit_count;
        let periodic = count % self.config.soft_period == 0;
        let past_first = self.state != ConnectionState::Established && count > self.config.soft_retries;
        if periodic || past_first {
            if let Err(err) = hooks.revalidate_path(self.id) {
                log::debug!("[{}] {err}; ignored", self.id);
            }
        }

        let ceiling = match self.state {
            ConnectionState::SynSent => self.config.syn_retries,
            _ => self.config.hard_retries,
        };
        if count > ceiling {
            self.give_up(now, hooks);
            return false;
        }
        true
    }

    /// Fatal teardown after the retry ceiling.
    ///
    /// Closing states still linger in `TIME_WAIT` so the address tuple stays
    /// reserved; earlier states drop straight to `CLOSED` without a FIN.
    fn give_up<H: Hooks + ?Sized>(&mut self, now: Instant, hooks: &mut H) {
        let err = self.soft_error.unwrap_or(ConnError::TimedOut);
        self.hard_error = Some(err);
        self.timer.cancel();
        self.queue.clear();
        log::warn!(
            "[{}] giving up in {} after {} retries: {err}",
            self.id,
            self.state,
            self.retransmit_count
        );
        hooks.report_error(self.id, &err);

        if self.state.is_closing() {
            self.enter_time_wait(now);
        } else {
            self.finish(hooks);
        }
    }

    fn enter_time_wait(&mut self, now: Instant) {
        self.state = ConnectionState::TimeWait;
        self.timer.cancel();
        self.queue.clear();
        self.linger.arm((), now + self.config.time_wait_linger);
    }

    /// Move to `CLOSED`, cancel both slots and hand the connection back.
    fn finish<H: Hooks + ?Sized>(&mut self, hooks: &mut H) {
        self.state = ConnectionState::Closed;
        self.timer.cancel();
        self.linger.cancel();
        self.queue.clear();
        hooks.terminate(self.id);
    }

    // -----------------------------------------------------------------------
    // Arming helpers
    // -----------------------------------------------------------------------

    /// Arm the write or probe timer for the data currently queued.
    fn arm_transmit(&mut self, now: Instant) {
        let reason = if self.peer_window == 0 {
            TimerReason::ZeroWindowProbe
        } else {
            TimerReason::WriteRetransmit
        };
        self.timer.arm(reason, now + self.rto.rto());
    }

    /// Nothing in flight: keepalive if enabled, otherwise no timer.
    fn arm_idle(&mut self, now: Instant) {
        if self.keepalive && self.state == ConnectionState::Established {
            self.timer
                .arm(TimerReason::KeepAlive, now + self.config.keepalive_interval);
        } else {
            self.timer.cancel();
        }
    }

    fn ensure_open(&self) -> Result<(), EngineError> {
        match self.state {
            ConnectionState::Closed => Err(EngineError::Closed),
            ConnectionState::TimeWait => Err(EngineError::BadState(self.state)),
            _ => Ok(()),
        }
    }

    // -----------------------------------------------------------------------
    // ACK path and application entry points
    // -----------------------------------------------------------------------

    /// Record a segment that has just been transmitted for the first time.
    ///
    /// Arms the write (or probe) timer unless one is already running.
    pub fn enqueue(&mut self, seg_flags: u8, payload: Vec<u8>, now: Instant) -> Result<u32, EngineError> {
        self.ensure_open()?;
        let seq = self.queue.push(seg_flags, payload, now);
        let transmitting = self.timer.is_armed_for(TimerReason::WriteRetransmit)
            || self.timer.is_armed_for(TimerReason::ZeroWindowProbe);
        if !transmitting {
            self.arm_transmit(now);
        }
        Ok(seq)
    }

    /// Process a cumulative acknowledgement from the peer.
    pub fn on_ack(&mut self, ack: u32, now: Instant) -> Result<AckOutcome, EngineError> {
        self.ensure_open()?;
        let outcome = self.queue.acknowledge(ack, now);
        if outcome.advanced {
            if outcome.acked > 0 {
                self.congestion.on_ack(outcome.acked as u32);
            }
            self.on_progress(outcome.rtt_sample, now);
        } else if self.queue.is_empty() && self.timer.is_armed_for(TimerReason::KeepAlive) {
            // Reply to a keepalive: the peer is alive even though nothing moved.
            self.retransmit_count = 0;
        }
        Ok(outcome)
    }

    /// Forward progress: the oldest unacknowledged sequence advanced.
    ///
    /// Clears the failure count, drops the backoff (folding in `rtt_sample`
    /// when there is one) and re-arms for whatever is still outstanding.
    pub fn on_progress(&mut self, rtt_sample: Option<std::time::Duration>, now: Instant) {
        self.retransmit_count = 0;
        self.rto.on_progress(rtt_sample);
        if !self.state.is_active() {
            return;
        }
        if self.queue.is_empty() {
            self.arm_idle(now);
        } else {
            self.arm_transmit(now);
        }
    }

    /// The peer advertised a new receive window.
    pub fn on_window_update(&mut self, window: u32, now: Instant) -> Result<(), EngineError> {
        self.ensure_open()?;
        self.peer_window = window;
        if self.queue.is_empty() {
            return Ok(());
        }
        let probing = self.timer.is_armed_for(TimerReason::ZeroWindowProbe);
        if window == 0 && !probing {
            self.timer.arm(TimerReason::ZeroWindowProbe, now + self.rto.rto());
        } else if window > 0 && probing {
            self.timer.arm(TimerReason::WriteRetransmit, now + self.rto.rto());
        }
        Ok(())
    }

    /// Resend only the oldest segment, leaving timers, backoff and the
    /// congestion window alone.
    pub fn nudge<H: Hooks + ?Sized>(&mut self, now: Instant, hooks: &mut H) -> usize {
        if !self.state.is_active() {
            return 0;
        }
        let sent = queue::retransmit(self.id, false, &self.queue, hooks);
        if sent > 0 {
            self.queue.on_retransmit(false, now);
        }
        sent
    }

    /// Remember a recoverable error (e.g. an ICMP unreachable) to report if
    /// the connection later times out.
    pub fn record_soft_error(&mut self, err: ConnError) {
        self.soft_error = Some(err);
    }

    /// State change made by the external handshake / close path.
    ///
    /// Use [`Connection::close`] to reach `CLOSED`.
    pub fn transition(&mut self, next: ConnectionState, now: Instant) -> Result<(), EngineError> {
        self.ensure_open()?;
        match next {
            ConnectionState::Closed => return Err(EngineError::BadState(next)),
            ConnectionState::TimeWait => self.enter_time_wait(now),
            _ => {
                log::debug!("[{}] {} → {}", self.id, self.state, next);
                self.state = next;
                if self.queue.is_empty() {
                    self.arm_idle(now);
                }
            }
        }
        Ok(())
    }

    /// Turn keepalive probing on or off.
    pub fn set_keepalive(&mut self, enabled: bool, now: Instant) {
        self.keepalive = enabled;
        let idle = self.timer.pending().is_none() || self.timer.is_armed_for(TimerReason::KeepAlive);
        if idle && self.queue.is_empty() && self.state.is_active() {
            self.arm_idle(now);
        }
    }

    /// Administrative close: cancel everything and release the connection.
    ///
    /// No error is reported.  Closing an already closed connection is a
    /// no-op.
    pub fn close<H: Hooks + ?Sized>(&mut self, hooks: &mut H) {
        if self.state == ConnectionState::Closed {
            return;
        }
        log::debug!("[{}] closed from {}", self.id, self.state);
        self.finish(hooks);
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PathError;
    use std::time::Duration;

    #[derive(Default)]
    struct Calls {
        resent: Vec<u32>,
        probes: usize,
        keepalives: usize,
        revalidations: usize,
        errors: Vec<ConnError>,
        terminated: usize,
    }

    impl Hooks for Calls {
        fn resend(&mut self, _id: ConnectionId, segment: &queue::Segment) {
            self.resent.push(segment.seq);
        }
        fn send_probe(&mut self, _id: ConnectionId) {
            self.probes += 1;
        }
        fn send_keepalive(&mut self, _id: ConnectionId) {
            self.keepalives += 1;
        }
        fn revalidate_path(&mut self, _id: ConnectionId) -> Result<(), PathError> {
            self.revalidations += 1;
            Err(PathError("no neighbour".into()))
        }
        fn report_error(&mut self, _id: ConnectionId, err: &ConnError) {
            self.errors.push(*err);
        }
        fn terminate(&mut self, _id: ConnectionId) {
            self.terminated += 1;
        }
    }

    fn established(now: Instant) -> Connection {
        let mut conn = Connection::new(
            ConnectionId(1),
            ConnectionState::Established,
            1000,
            Arc::new(EngineConfig::default()),
        )
        .unwrap();
        conn.enqueue(0, vec![0u8; 100], now).unwrap();
        conn
    }

    /// Fire whatever is pending in the retransmit slot at its deadline.
    fn fire(conn: &mut Connection, calls: &mut Calls) -> (FireOutcome, Instant) {
        let armed = conn.armed_timer().expect("timer armed");
        let out = conn.on_timer(TimerKind::Retransmit, armed.generation, armed.deadline, calls);
        (out, armed.deadline)
    }

    #[test]
    fn enqueue_arms_write_timer_at_rto() {
        let now = Instant::now();
        let conn = established(now);
        let armed = conn.armed_timer().unwrap();
        assert_eq!(armed.reason, TimerReason::WriteRetransmit);
        assert_eq!(armed.deadline, now + Duration::from_secs(1));
    }

    #[test]
    fn write_timeout_backs_off_and_collapses() {
        let now = Instant::now();
        let mut conn = established(now).with_window(16, 16);
        let mut calls = Calls::default();

        let (out, at) = fire(&mut conn, &mut calls);
        assert_eq!(out, FireOutcome::Handled);
        assert_eq!(conn.retransmit_count(), 1);
        assert_eq!(conn.rto(), Duration::from_secs(2));
        assert_eq!(conn.congestion().cwnd, 1);
        assert_eq!(conn.congestion().ssthresh, 8);
        assert_eq!(calls.resent, [1000]);
        assert_eq!(conn.armed_timer().unwrap().deadline, at + Duration::from_secs(2));
    }

    #[test]
    fn stale_generation_is_ignored() {
        let now = Instant::now();
        let mut conn = established(now);
        let mut calls = Calls::default();
        let old = conn.armed_timer().unwrap();
        conn.on_window_update(0, now).unwrap(); // re-arms as probe

        let out = conn.on_timer(TimerKind::Retransmit, old.generation, old.deadline, &mut calls);
        assert_eq!(out, FireOutcome::Stale);
        assert_eq!(conn.retransmit_count(), 0);
        assert!(calls.resent.is_empty());
    }

    #[test]
    fn progress_resets_count_and_backoff() {
        let now = Instant::now();
        let mut conn = established(now);
        let mut calls = Calls::default();
        for _ in 0..4 {
            fire(&mut conn, &mut calls);
        }
        assert_eq!(conn.retransmit_count(), 4);
        assert_eq!(conn.rto(), Duration::from_secs(16));

        conn.on_progress(None, now);
        assert_eq!(conn.retransmit_count(), 0);
        assert_eq!(conn.rto(), Duration::from_secs(1));
    }

    #[test]
    fn ack_of_everything_cancels_timer() {
        let now = Instant::now();
        let mut conn = established(now);
        let out = conn.on_ack(1100, now + Duration::from_millis(40)).unwrap();
        assert_eq!(out.acked, 1);
        assert_eq!(conn.armed_timer(), None);
        // 40 ms sample is clamped up to rto_min.
        assert_eq!(conn.rto(), Duration::from_millis(200));
    }

    #[test]
    fn ack_inside_head_counts_as_progress() {
        let now = Instant::now();
        let mut conn = established(now).with_window(4, 4);
        let mut calls = Calls::default();
        for _ in 0..3 {
            fire(&mut conn, &mut calls);
        }
        assert_eq!(conn.retransmit_count(), 3);

        let out = conn.on_ack(1050, now).unwrap();
        assert_eq!(out.acked, 0);
        assert!(out.advanced);
        assert_eq!(conn.retransmit_count(), 0);
        assert_eq!(conn.rto(), Duration::from_secs(1));
        assert_eq!(conn.queue().send_base, 1050);
        // Window growth waits for a whole segment.
        assert_eq!(conn.congestion().cwnd, 1);
        assert_eq!(
            conn.armed_timer().map(|a| a.reason),
            Some(TimerReason::WriteRetransmit)
        );
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let broken = [
            EngineConfig {
                soft_period: 0,
                ..EngineConfig::default()
            },
            EngineConfig {
                rto_min: Duration::from_secs(10),
                rto_max: Duration::from_secs(1),
                ..EngineConfig::default()
            },
            EngineConfig {
                max_cwnd: 0,
                ..EngineConfig::default()
            },
            EngineConfig {
                syn_retries: 20,
                hard_retries: 15,
                ..EngineConfig::default()
            },
        ];
        for config in broken {
            let config = Arc::new(config);
            let id = ConnectionId(1);
            let state = ConnectionState::Established;
            assert!(Connection::new(id, state, 0, config.clone()).is_err());
            assert!(Connection::connect(id, 0, config, Instant::now()).is_err());
        }
    }

    #[test]
    fn nudge_resends_head_without_touching_state() {
        let now = Instant::now();
        let mut conn = established(now).with_window(10, 20);
        conn.enqueue(0, vec![0u8; 100], now).unwrap();
        let before = conn.armed_timer();
        let mut calls = Calls::default();

        assert_eq!(conn.nudge(now, &mut calls), 1);
        assert_eq!(calls.resent, [1000]);
        assert_eq!(conn.armed_timer(), before);
        assert_eq!(conn.congestion().cwnd, 10);
        assert_eq!(conn.retransmit_count(), 0);
        assert_eq!(conn.rto(), Duration::from_secs(1));
    }

    #[test]
    fn every_eighth_retransmit_revalidates_path_when_established() {
        let now = Instant::now();
        let mut conn = established(now);
        let mut calls = Calls::default();
        for _ in 0..8 {
            fire(&mut conn, &mut calls);
        }
        assert_eq!(calls.revalidations, 1);
        // Revalidation failure is ignored.
        assert_eq!(conn.state(), ConnectionState::Established);
    }

    #[test]
    fn zero_window_probe_counts_but_keeps_congestion() {
        let now = Instant::now();
        let mut conn = established(now).with_window(8, 8);
        let mut calls = Calls::default();
        conn.on_window_update(0, now).unwrap();
        assert!(conn.timer.is_armed_for(TimerReason::ZeroWindowProbe));

        fire(&mut conn, &mut calls);
        assert_eq!(calls.probes, 1);
        assert!(calls.resent.is_empty());
        assert_eq!(conn.retransmit_count(), 1);
        assert_eq!(conn.congestion().cwnd, 8);
        assert!(conn.timer.is_armed_for(TimerReason::ZeroWindowProbe));

        conn.on_window_update(4096, now).unwrap();
        assert!(conn.timer.is_armed_for(TimerReason::WriteRetransmit));
    }

    #[test]
    fn probe_fire_after_silent_reopen_switches_to_write() {
        let now = Instant::now();
        let mut conn = established(now);
        let mut calls = Calls::default();
        conn.on_window_update(0, now).unwrap();
        conn.peer_window = 512;

        fire(&mut conn, &mut calls);
        assert_eq!(calls.probes, 0);
        assert_eq!(conn.retransmit_count(), 0);
        assert!(conn.timer.is_armed_for(TimerReason::WriteRetransmit));
    }

    #[test]
    fn keepalive_rearms_and_counts() {
        let now = Instant::now();
        let mut conn = established(now);
        conn.on_ack(1100, now).unwrap();
        conn.set_keepalive(true, now);
        let armed = conn.armed_timer().unwrap();
        assert_eq!(armed.reason, TimerReason::KeepAlive);
        assert_eq!(armed.deadline, now + Duration::from_secs(75));

        let mut calls = Calls::default();
        fire(&mut conn, &mut calls);
        assert_eq!(calls.keepalives, 1);
        assert_eq!(conn.retransmit_count(), 1);
        assert!(conn.timer.is_armed_for(TimerReason::KeepAlive));

        // The peer answers.
        conn.on_ack(1100, now).unwrap();
        assert_eq!(conn.retransmit_count(), 0);
    }

    #[test]
    fn keepalive_gives_up_after_hard_retries() {
        let now = Instant::now();
        let mut conn = established(now);
        conn.on_ack(1100, now).unwrap();
        conn.set_keepalive(true, now);
        let mut calls = Calls::default();
        for _ in 0..=conn.config().hard_retries {
            fire(&mut conn, &mut calls);
        }
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(calls.errors, [ConnError::TimedOut]);
        assert_eq!(calls.terminated, 1);
    }

    #[test]
    fn soft_error_is_reported_instead_of_timeout() {
        let now = Instant::now();
        let mut conn = established(now);
        conn.record_soft_error(ConnError::HostUnreachable);
        let mut calls = Calls::default();
        while conn.state() != ConnectionState::Closed {
            fire(&mut conn, &mut calls);
        }
        assert_eq!(calls.errors, [ConnError::HostUnreachable]);
        assert_eq!(conn.hard_error(), Some(ConnError::HostUnreachable));
    }

    #[test]
    fn fire_after_close_is_a_noop() {
        let now = Instant::now();
        let mut conn = established(now);
        let armed = conn.armed_timer().unwrap();
        let mut calls = Calls::default();
        conn.close(&mut calls);
        assert_eq!(calls.terminated, 1);
        assert_eq!(conn.armed_timer(), None);

        let out = conn.on_timer(TimerKind::Retransmit, armed.generation, armed.deadline, &mut calls);
        assert_eq!(out, FireOutcome::Stale);
        conn.close(&mut calls);
        assert_eq!(calls.terminated, 1);
        assert_eq!(conn.enqueue(0, vec![1], now), Err(EngineError::Closed));
    }

    #[test]
    fn external_time_wait_arms_linger_and_expires() {
        let now = Instant::now();
        let mut conn = established(now);
        conn.transition(ConnectionState::TimeWait, now).unwrap();
        assert_eq!(conn.armed_timer(), None);
        let linger = conn.linger_timer().unwrap();
        assert_eq!(linger.deadline, now + Duration::from_secs(60));

        let mut calls = Calls::default();
        let out = conn.on_timer(TimerKind::Linger, linger.generation, linger.deadline, &mut calls);
        assert_eq!(out, FireOutcome::Handled);
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(calls.terminated, 1);
        assert!(calls.errors.is_empty());
    }

    #[test]
    fn transition_to_closed_is_rejected() {
        let now = Instant::now();
        let mut conn = established(now);
        assert_eq!(
            conn.transition(ConnectionState::Closed, now),
            Err(EngineError::BadState(ConnectionState::Closed))
        );
    }
}
