//! Congestion window and slow-start threshold.
//!
//! Windows are counted in segments.  A retransmit timeout is treated as a
//! strong congestion signal: the window collapses to one segment and slow
//! start restarts towards half the previous window.  Duplicate-ACK driven
//! fast retransmit is handled elsewhere and never reaches this module.

/// Congestion control state for one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CongestionController {
    /// Congestion window, in segments.  Always ≥ 1.
    pub cwnd: u32,
    /// Slow-start threshold, in segments.
    pub ssthresh: u32,
    /// Segments acknowledged since the last linear `cwnd` increment.
    pub cong_count: u32,
    max_cwnd: u32,
}

impl CongestionController {
    /// Start in slow start with a one-segment window and no threshold.
    pub fn new(max_cwnd: u32) -> Self {
        Self {
            cwnd: 1,
            ssthresh: max_cwnd,
            cong_count: 0,
            max_cwnd,
        }
    }

    /// Construct with explicit window values, e.g. when adopting a
    /// connection mid-stream.
    pub fn with_window(cwnd: u32, ssthresh: u32, max_cwnd: u32) -> Self {
        Self {
            cwnd: cwnd.clamp(1, max_cwnd),
            ssthresh: ssthresh.max(1),
            cong_count: 0,
            max_cwnd,
        }
    }

    /// React to a write-retransmit timeout.
    ///
    /// Touches only `cwnd`, `ssthresh` and `cong_count`.
    pub fn on_timeout_loss(&mut self) {
        self.ssthresh = (self.cwnd / 2).max(1);
        self.cwnd = 1;
        self.cong_count = 0;
    }

    /// Grow the window for `acked` newly acknowledged segments.
    ///
    /// Exponential below `ssthresh`, one segment per window's worth of ACKs
    /// above it.
    pub fn on_ack(&mut self, acked: u32) {
        for _ in 0..acked {
            if self.cwnd >= self.max_cwnd {
                break;
            }
            if self.cwnd < self.ssthresh {
                self.cwnd += 1;
            } else {
                self.cong_count += 1;
                if self.cong_count >= self.cwnd {
                    self.cong_count = 0;
                    self.cwnd += 1;
                }
            }
        }
    }

    pub fn in_slow_start(&self) -> bool {
        self.cwnd < self.ssthresh
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_halves_into_ssthresh_and_collapses_cwnd() {
        let mut cc = CongestionController::with_window(16, 16, 1000);
        cc.cong_count = 5;
        cc.on_timeout_loss();
        assert_eq!(cc.cwnd, 1);
        assert_eq!(cc.ssthresh, 8);
        assert_eq!(cc.cong_count, 0);
    }

    #[test]
    fn timeout_with_tiny_window_keeps_ssthresh_at_one() {
        for cwnd in [1, 2, 3] {
            let mut cc = CongestionController::with_window(cwnd, 64, 1000);
            cc.on_timeout_loss();
            assert_eq!(cc.ssthresh, (cwnd / 2).max(1));
            assert_eq!(cc.cwnd, 1);
        }
    }

    #[test]
    fn huge_window_collapses_all_the_same() {
        let mut cc = CongestionController::with_window(u32::MAX, u32::MAX, u32::MAX);
        cc.on_timeout_loss();
        assert_eq!(cc.cwnd, 1);
        assert_eq!(cc.ssthresh, u32::MAX / 2);
    }

    #[test]
    fn slow_start_then_linear_growth() {
        let mut cc = CongestionController::with_window(1, 4, 1000);
        cc.on_ack(3);
        assert_eq!(cc.cwnd, 4);
        assert!(!cc.in_slow_start());

        // Needs a full window of ACKs for one more segment.
        cc.on_ack(3);
        assert_eq!(cc.cwnd, 4);
        cc.on_ack(1);
        assert_eq!(cc.cwnd, 5);
        assert_eq!(cc.cong_count, 0);
    }

    #[test]
    fn growth_stops_at_max_cwnd() {
        let mut cc = CongestionController::new(4);
        cc.on_ack(100);
        assert_eq!(cc.cwnd, 4);
    }
}
