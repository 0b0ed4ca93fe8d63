//! Tunables of the retransmit engine.
//!
//! Defaults follow the classic BSD/Linux timer constants: a first retry
//! ceiling of 3 after which the route is re-checked, a second ceiling of 15
//! after which the connection is given up, and an RTO clamped to 120 s.

use std::time::Duration;

use crate::error::ConfigError;

/// Configuration shared by every connection of an engine instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Retry ceiling while in `SYN_SENT`.
    pub syn_retries: u32,
    /// Retry ceiling in every other state (the "second" ceiling).
    pub hard_retries: u32,
    /// Outside `ESTABLISHED`, revalidate the path once retries exceed this
    /// (the "first" ceiling).
    pub soft_retries: u32,
    /// In `ESTABLISHED`, revalidate the path on every n-th retransmit.
    pub soft_period: u32,
    /// RTO before the first RTT sample is available.
    pub initial_rto: Duration,
    /// Lower clamp for RTT-derived timeouts.
    pub rto_min: Duration,
    /// Upper clamp for backed-off timeouts.
    pub rto_max: Duration,
    /// Interval between keepalive probes.
    pub keepalive_interval: Duration,
    /// How long a connection lingers in `TIME_WAIT`.
    pub time_wait_linger: Duration,
    /// Delay before retrying a timer fire that found the connection busy.
    pub defer_tick: Duration,
    /// Upper bound on the congestion window, in segments.
    pub max_cwnd: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            syn_retries: 5,
            hard_retries: 15,
            soft_retries: 3,
            soft_period: 8,
            initial_rto: Duration::from_secs(1),
            rto_min: Duration::from_millis(200),
            rto_max: Duration::from_secs(120),
            keepalive_interval: Duration::from_secs(75),
            time_wait_linger: Duration::from_secs(60),
            defer_tick: Duration::from_millis(100),
            max_cwnd: 65_535,
        }
    }
}

impl EngineConfig {
    /// Reject configurations the engine cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rto_min > self.rto_max {
            return Err(ConfigError::RtoBounds {
                min: self.rto_min,
                max: self.rto_max,
            });
        }
        if self.syn_retries > self.hard_retries {
            return Err(ConfigError::SynRetries {
                syn: self.syn_retries,
                hard: self.hard_retries,
            });
        }
        let non_zero = [
            ("syn_retries", self.syn_retries == 0),
            ("hard_retries", self.hard_retries == 0),
            ("soft_period", self.soft_period == 0),
            ("max_cwnd", self.max_cwnd == 0),
            ("rto_max", self.rto_max.is_zero()),
            ("defer_tick", self.defer_tick.is_zero()),
            ("keepalive_interval", self.keepalive_interval.is_zero()),
        ];
        match non_zero.iter().find(|(_, zero)| *zero) {
            Some((field, _)) => Err(ConfigError::Zero(field)),
            None => Ok(()),
        }
    }

    /// `initial_rto` clamped into `[rto_min, rto_max]`.
    pub fn clamped_initial_rto(&self) -> Duration {
        self.initial_rto.clamp(self.rto_min, self.rto_max)
    }
}
