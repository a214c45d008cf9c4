use std::time::Duration;

/// Smoothed round-trip time and its mean deviation, from which the retransmission timeout is
///  derived: `rto = smoothed + 4 * deviation`, clamped to the configured bounds.
///
/// Until the first sample arrives, the configured initial RTT stands in with half of it as
///  deviation. The first sample replaces both, later samples are blended in with gains 1/8 and
///  1/4 respectively.
#[derive(Debug, Clone)]
pub struct RttEstimator {
    smoothed: Duration,
    deviation: Duration,
    rto_min: Duration,
    rto_max: Duration,
    has_sample: bool,
}

impl RttEstimator {
    pub fn new(initial_rtt: Duration, rto_min: Duration, rto_max: Duration) -> RttEstimator {
        assert!(rto_min <= rto_max);
        RttEstimator {
            smoothed: initial_rtt,
            deviation: initial_rtt / 2,
            rto_min,
            rto_max,
            has_sample: false,
        }
    }

    pub fn smoothed(&self) -> Duration {
        self.smoothed
    }

    pub fn deviation(&self) -> Duration {
        self.deviation
    }

    pub fn rto(&self) -> Duration {
        (self.smoothed + self.deviation * 4).clamp(self.rto_min, self.rto_max)
    }

    /// the timeout for the next attempt after `rto` expired without an acknowledgement
    pub fn backoff(&self, rto: Duration) -> Duration {
        (rto * 2).min(self.rto_max)
    }

    pub fn update(&mut self, sample: Duration) {
        if !self.has_sample {
            self.has_sample = true;
            self.smoothed = sample;
            self.deviation = sample / 2;
            return;
        }

        let error = if self.smoothed > sample {
            self.smoothed - sample
        }
        else {
            sample - self.smoothed
        };
        self.deviation = (self.deviation * 3 + error) / 4;
        self.smoothed = (self.smoothed * 7 + sample) / 8;
    }
}
