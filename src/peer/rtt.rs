//! 往返时间（RTT）估算器。
//! An estimator for the round-trip time (RTT).

use std::time::Duration;

/// A snapshot of the link quality estimators, published to the application
/// whenever a new RTT sample is folded in.
/// 链路质量估算器的快照，在每次合入新的RTT样本时发布给应用。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkInfo {
    /// Smoothed round-trip time.
    /// 平滑往返时间。
    pub srtt: Duration,
    /// Round-trip time variance.
    /// 往返时间方差。
    pub rttvar: Duration,
    /// Current retransmission timeout.
    /// 当前重传超时。
    pub rto: Duration,
}

/// Integer-millisecond RTT estimator driving the retransmission timeout.
///
/// The smoothing follows the classic 7/8 + 3/4 exponential averages; the
/// RTO is the smoothed RTT itself, capped at `max_rto`, and doubles on
/// every retransmission of the same packet (also capped).
///
/// 以整数毫秒为单位、驱动重传超时的RTT估算器。
///
/// 平滑采用经典的 7/8 + 3/4 指数平均；RTO即平滑RTT本身，以 `max_rto`
/// 为上限，并在同一个包的每次重传时翻倍（同样有上限）。
#[derive(Debug, Clone)]
pub struct RttEstimator {
    /// Smoothed round-trip time, in milliseconds.
    /// 平滑的往返时间（毫秒）。
    srtt: u64,
    /// Round-trip time variance, in milliseconds.
    /// 往返时间方差（毫秒）。
    rttvar: u64,
    /// Current retransmission timeout, in milliseconds.
    /// 当前重传超时（毫秒）。
    rto: u64,
    /// Upper bound for `rto`, in milliseconds.
    /// `rto` 的上限（毫秒）。
    max_rto: u64,
}

impl RttEstimator {
    /// Creates a new estimator. A fresh peer starts with the configured
    /// initial smoothed RTT, half of it as variance, and the maximum RTO.
    /// 创建一个新的估算器。新对端以配置的初始平滑RTT、其一半作为方差、
    /// 以及最大RTO开始。
    pub fn new(initial_srtt: Duration, max_rto: Duration) -> Self {
        let srtt = initial_srtt.as_millis() as u64;
        let max_rto = max_rto.as_millis() as u64;
        Self {
            srtt,
            rttvar: srtt / 2,
            rto: max_rto,
            max_rto,
        }
    }

    /// Folds a new RTT sample (milliseconds) into the estimators.
    /// 将一个新的RTT样本（毫秒）合入估算器。
    pub fn sample(&mut self, rtt: u64) {
        self.rttvar = (3 * self.rttvar + self.srtt.abs_diff(rtt)) / 4;
        self.srtt = (7 * self.srtt + rtt) / 8;
        self.rto = self.srtt.min(self.max_rto);
    }

    /// Doubles the RTO after a retransmission, bounded by the maximum.
    /// 在一次重传后将RTO翻倍，受上限约束。
    pub fn backoff(&mut self) {
        self.rto = (self.rto * 2).min(self.max_rto);
    }

    /// Current retransmission timeout.
    pub fn rto(&self) -> Duration {
        Duration::from_millis(self.rto)
    }

    /// Current link quality snapshot.
    /// 当前链路质量快照。
    pub fn link_info(&self) -> LinkInfo {
        LinkInfo {
            srtt: Duration::from_millis(self.srtt),
            rttvar: Duration::from_millis(self.rttvar),
            rto: Duration::from_millis(self.rto),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn estimator() -> RttEstimator {
        RttEstimator::new(Duration::from_millis(100), Duration::from_millis(3000))
    }

    #[test]
    fn test_initial_values() {
        let rtt = estimator();
        assert_eq!(rtt.link_info().srtt, Duration::from_millis(100));
        assert_eq!(rtt.link_info().rttvar, Duration::from_millis(50));
        assert_eq!(rtt.rto(), Duration::from_millis(3000));
    }

    #[test]
    fn test_sample_moves_srtt_toward_measurement() {
        let mut rtt = estimator();
        rtt.sample(80);
        // srtt = (7 * 100 + 80) / 8, rttvar = (3 * 50 + 20) / 4
        assert_eq!(rtt.link_info().srtt, Duration::from_millis(97));
        assert_eq!(rtt.link_info().rttvar, Duration::from_millis(42));
        assert_eq!(rtt.rto(), Duration::from_millis(97));
    }

    #[test]
    fn test_rto_is_capped() {
        let mut rtt = estimator();
        rtt.sample(60_000);
        assert_eq!(rtt.rto(), Duration::from_millis(3000));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut rtt = estimator();
        rtt.sample(100);
        assert_eq!(rtt.rto(), Duration::from_millis(100));

        rtt.backoff();
        assert_eq!(rtt.rto(), Duration::from_millis(200));
        rtt.backoff();
        assert_eq!(rtt.rto(), Duration::from_millis(400));

        for _ in 0..10 {
            rtt.backoff();
        }
        assert_eq!(rtt.rto(), Duration::from_millis(3000));
    }

    #[test]
    fn test_converges_to_stable_rtt() {
        let mut rtt = estimator();
        for _ in 0..64 {
            rtt.sample(40);
        }
        assert_eq!(rtt.link_info().srtt, Duration::from_millis(40));
        assert_eq!(rtt.rto(), Duration::from_millis(40));
    }
}
