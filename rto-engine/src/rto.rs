//! Retransmission timeout estimation and exponential backoff.
//!
//! RTO is computed using Jacobson's algorithm (RFC 6298):
//!   `RTO = SRTT + 4 × RTTVAR`
//! clamped into `[rto_min, rto_max]`, and doubles on each consecutive
//! retransmit timeout up to `rto_max`.
//!
//! Only the ACK path feeds samples in (via [`RtoEstimator::on_progress`]), so
//! a timeout measured across a retransmission never shortens the timer.  All
//! arithmetic is on [`Duration`], which saturates instead of going negative.

use std::time::Duration;

use crate::config::EngineConfig;

/// Smoothed RTT state and the current (possibly backed-off) RTO.
#[derive(Debug, Clone)]
pub struct RtoEstimator {
    initial_rto: Duration,
    rto_min: Duration,
    rto_max: Duration,
    /// Current RTO, including any backoff.
    current_rto: Duration,
    /// Smoothed RTT estimate (SRTT).
    srtt: Option<Duration>,
    /// RTT variance estimate (RTTVAR).
    rttvar: Option<Duration>,
}

impl RtoEstimator {
    pub fn new(config: &EngineConfig) -> Self {
        let initial_rto = config.clamped_initial_rto();
        Self {
            initial_rto,
            rto_min: config.rto_min,
            rto_max: config.rto_max,
            current_rto: initial_rto,
            srtt: None,
            rttvar: None,
        }
    }

    /// The timeout the next write-retransmit timer should be armed with.
    pub fn rto(&self) -> Duration {
        self.current_rto
    }

    pub fn srtt(&self) -> Option<Duration> {
        self.srtt
    }

    /// Record a new RTT sample and update SRTT / RTTVAR / RTO (RFC 6298 §2).
    ///
    /// On the first sample:  SRTT = R,  RTTVAR = R/2.
    /// Subsequent samples:   RTTVAR = 3/4·RTTVAR + 1/4·|SRTT − R|
    ///                       SRTT   = 7/8·SRTT   + 1/8·R
    pub fn record_rtt_sample(&mut self, sample: Duration) {
        match (self.srtt, self.rttvar) {
            (Some(srtt), Some(rttvar)) => {
                let diff = sample.abs_diff(srtt);
                self.rttvar = Some(rttvar * 3 / 4 + diff / 4);
                self.srtt = Some(srtt * 7 / 8 + sample / 8);
            }
            _ => {
                self.srtt = Some(sample);
                self.rttvar = Some(sample / 2);
            }
        }
        self.reset();
    }

    /// Double the RTO on retransmit timeout (RFC 6298 §5.5), capped at
    /// `rto_max`.
    pub fn back_off(&mut self) {
        self.current_rto = self.current_rto.saturating_mul(2).min(self.rto_max);
    }

    /// Restore the RTO from the current SRTT / RTTVAR estimates, dropping any
    /// backoff.
    ///
    /// Falls back to the initial RTO before the first sample.
    pub fn reset(&mut self) {
        self.current_rto = match (self.srtt, self.rttvar) {
            (Some(srtt), Some(rttvar)) => srtt
                .saturating_add(rttvar.saturating_mul(4))
                .clamp(self.rto_min, self.rto_max),
            _ => self.initial_rto,
        };
    }

    /// Forward progress: fold in the sample if there is one, then drop the
    /// backoff.
    pub fn on_progress(&mut self, sample: Option<Duration>) {
        match sample {
            Some(rtt) => self.record_rtt_sample(rtt),
            None => self.reset(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn estimator() -> RtoEstimator {
        RtoEstimator::new(&EngineConfig::default())
    }

    #[test]
    fn backoff_sequence_is_clamped_power_of_two() {
        let mut rto = estimator();
        let mut seen = vec![rto.rto().as_secs()];
        for _ in 0..10 {
            rto.back_off();
            seen.push(rto.rto().as_secs());
        }
        assert_eq!(seen, [1, 2, 4, 8, 16, 32, 64, 120, 120, 120, 120]);
    }

    #[test]
    fn backoff_is_non_decreasing() {
        let mut rto = estimator();
        let mut prev = rto.rto();
        for _ in 0..32 {
            rto.back_off();
            assert!(rto.rto() >= prev);
            prev = rto.rto();
        }
        assert_eq!(prev, Duration::from_secs(120));
    }

    #[test]
    fn first_sample_sets_srtt_and_half_variance() {
        let mut rto = estimator();
        rto.record_rtt_sample(Duration::from_millis(100));
        assert_eq!(rto.srtt(), Some(Duration::from_millis(100)));
        // 100 + 4 * 50
        assert_eq!(rto.rto(), Duration::from_millis(300));
    }

    #[test]
    fn progress_never_drops_below_rto_min() {
        let mut rto = estimator();
        rto.back_off();
        rto.back_off();
        rto.on_progress(Some(Duration::from_millis(1)));
        assert_eq!(rto.rto(), Duration::from_millis(200));
    }

    #[test]
    fn progress_without_sample_drops_backoff() {
        let mut rto = estimator();
        rto.back_off();
        rto.back_off();
        assert_eq!(rto.rto(), Duration::from_secs(4));
        rto.on_progress(None);
        assert_eq!(rto.rto(), Duration::from_secs(1));
    }
}
