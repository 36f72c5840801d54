//! See [`RttEstimator`].

use std::time::Duration;

/// Smoothed RTT / RTT variance estimator, used to size a slot's
/// retransmission deadline instead of a fixed timeout.
///
/// Adapted from `aeronet_transport::rtt::RttEstimator`, itself based on
/// [`quinn-proto`'s `RttEstimator`](https://github.com/quinn-rs/quinn/blob/411abe9/quinn-proto/src/connection/paths.rs#L151),
/// which follows [RFC 9002 Section 5].
///
/// [RFC 9002 Section 5]: https://www.rfc-editor.org/rfc/rfc9002.html#section-5
#[derive(Debug, Clone)]
pub struct RttEstimator {
    latest: Duration,
    smoothed: Duration,
    var: Duration,
    min: Duration,
}

const TIMER_GRANULARITY: Duration = Duration::from_micros(10);

/// Default initial RTT before any samples have been taken.
///
/// Unlike `aeronet_transport`'s `DEFAULT_INITIAL_RTT` (333&nbsp;ms, tuned
/// for wide-area UDP per RFC 9002 §6.2.2), this runtime only ever runs
/// intra-datacenter over RoCE/InfiniBand, where round trips are
/// microseconds, not milliseconds; seeding the estimator with a
/// millisecond-scale guess would make the first few retransmission
/// deadlines absurdly conservative.
pub const DEFAULT_INITIAL_RTT: Duration = Duration::from_micros(20);

impl RttEstimator {
    /// Creates a new estimator from a given initial RTT.
    #[must_use]
    pub fn new(initial_rtt: Duration) -> Self {
        Self {
            latest: initial_rtt,
            smoothed: initial_rtt,
            var: initial_rtt / 2,
            min: initial_rtt,
        }
    }

    /// Gets the current best RTT estimation.
    #[must_use]
    pub const fn get(&self) -> Duration {
        self.smoothed
    }

    /// Gets a conservative estimate of RTT: the maximum of smoothed and
    /// latest RTT, as recommended in RFC 9002 §6.1.2.
    #[must_use]
    pub fn conservative(&self) -> Duration {
        self.get().max(self.latest)
    }

    /// Gets the minimum RTT registered so far.
    #[must_use]
    pub const fn min(&self) -> Duration {
        self.min
    }

    /// Computes the probe timeout (PTO) per RFC 9002 §6.2.1, used directly
    /// as a slot's retransmission deadline after sending.
    #[must_use]
    pub fn pto(&self) -> Duration {
        self.get() + (self.var * 4).max(TIMER_GRANULARITY)
    }

    /// Adds an RTT sample to this estimation.
    pub fn update(&mut self, rtt: Duration) {
        self.latest = rtt;
        self.min = self.min.min(rtt);

        let var_sample = self.smoothed.abs_diff(rtt);
        self.var = (3 * self.var + var_sample) / 4;
        self.smoothed = (7 * self.smoothed + rtt) / 8;
    }
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_RTT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pto_is_conservative_but_finite() {
        let rtt = RttEstimator::default();
        assert!(rtt.pto() > rtt.get());
    }

    #[test]
    fn converges_toward_stable_samples() {
        let mut rtt = RttEstimator::new(Duration::from_micros(100));
        for _ in 0..50 {
            rtt.update(Duration::from_micros(10));
        }
        assert!(rtt.get() < Duration::from_micros(15));
        assert_eq!(rtt.min(), Duration::from_micros(10));
    }

    #[test]
    fn tracks_variance_on_jitter() {
        let mut rtt = RttEstimator::new(Duration::from_micros(10));
        let before = rtt.pto();
        rtt.update(Duration::from_micros(200));
        assert!(rtt.pto() > before);
    }
}
