//! Clock-drift estimation from ping/pong samples.
//!
//! The client periodically pings the server with its local millisecond
//! timestamp T0; the server echoes (T0, T1) where T1 is its receive time.
//! On the pong at local time T2:
//!
//! ```text
//! RTT   = T2 - T0
//! delta = T1 - T0 - RTT / 2        (server time minus client time)
//! ```
//!
//! Delta drifts because the two clocks do not tick at exactly the same
//! rate, so it is modeled as a line over client time: `delta(t) = B0 *
//! (t - base) + B1`. Samples with lower RTT have better-balanced path
//! delays, so only the lowest quarter by RTT feeds the estimate; below a
//! minimum sample count the estimate falls back to the subset mean with no
//! slope. The base time sits before the oldest sample so 32-bit timestamp
//! subtraction stays stable across rollover.

use crate::core::constants::{
    MAX_TS_SAMPLES, MIN_DRIFT_SAMPLES, MIN_TS_SAMPLES, TIME_SYNC_INTERVAL_MS,
};

#[derive(Debug, Clone, Copy)]
struct Sample {
    /// Local pong receive time.
    when: u32,
    /// Measured round trip.
    rtt: u32,
    /// Measured clock delta.
    delta: i32,
}

/// Drift estimator over a bounded ring of ping/pong samples.
///
/// Callers wrap this in a mutex: the (base, B0, B1) triple must be read
/// consistently by `to_server_time` while the tick thread updates it.
#[derive(Debug)]
pub struct ClockSync {
    samples: Vec<Sample>,
    next_index: usize,
    base: u32,
    b0: f64,
    b1: i32,
}

impl ClockSync {
    /// Empty estimator: server time equals client time until samples
    /// arrive.
    pub fn new() -> Self {
        Self {
            samples: Vec::with_capacity(MAX_TS_SAMPLES),
            next_index: 0,
            base: 0,
            b0: 0.0,
            b1: 0,
        }
    }

    /// Number of samples collected (saturates at the ring size).
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Estimated drift slope.
    pub fn drift_slope(&self) -> f64 {
        self.b0
    }

    /// Estimated offset in milliseconds.
    pub fn offset_ms(&self) -> i32 {
        self.b1
    }

    /// Convert a local timestamp to server time.
    pub fn to_server_time(&self, client_time: u32) -> u32 {
        let rel = client_time.wrapping_sub(self.base) as f64;
        let correction = (self.b0 * rel + self.b1 as f64).round() as i64;
        client_time.wrapping_add(correction as u32)
    }

    /// Fold in a new (pong time, RTT, delta) measurement.
    pub fn update(&mut self, pong_time: u32, rtt: u32, delta: i32) {
        let sample = Sample { when: pong_time, rtt, delta };
        if self.samples.len() < MAX_TS_SAMPLES {
            self.samples.push(sample);
        } else {
            self.samples[self.next_index] = sample;
        }
        self.next_index = (self.next_index + 1) % MAX_TS_SAMPLES;

        if self.samples.len() <= 1 {
            self.b0 = 0.0;
            self.b1 = delta;
            return;
        }

        let best = self.best_samples();
        if best.len() < MIN_DRIFT_SAMPLES {
            let sum: i64 = best.iter().map(|s| s.delta as i64).sum();
            self.b0 = 0.0;
            self.b1 = (sum / best.len() as i64) as i32;
            return;
        }

        // Base point slightly before the oldest possible sample keeps the
        // 32-bit subtraction stable across rollover.
        let base = pong_time
            .wrapping_sub((MAX_TS_SAMPLES as u32) * TIME_SYNC_INTERVAL_MS)
            .wrapping_sub(TIME_SYNC_INTERVAL_MS);

        let n = best.len() as f64;
        let mut sum_w = 0.0;
        let mut sum_d = 0.0;
        for s in &best {
            sum_w += s.when.wrapping_sub(base) as f64;
            sum_d += s.delta as f64;
        }
        let mean_w = sum_w / n;
        let mean_d = sum_d / n;

        let mut numerator = 0.0;
        let mut denominator = 0.0;
        for s in &best {
            let dw = s.when.wrapping_sub(base) as f64 - mean_w;
            let dd = s.delta as f64 - mean_d;
            numerator += dw * dd;
            denominator += dw * dw;
        }

        if denominator <= 0.0 {
            // No temporal spread to regress over; the subset mean is the
            // best available delta.
            self.b0 = 0.0;
            self.b1 = mean_d.round() as i32;
            return;
        }

        self.base = base;
        self.b0 = numerator / denominator;
        self.b1 = (mean_d - self.b0 * mean_w).round() as i32;
    }

    /// The lowest-quarter-by-RTT subset, at least `MIN_TS_SAMPLES` strong.
    fn best_samples(&self) -> Vec<Sample> {
        let want = (self.samples.len() / 4)
            .max(MIN_TS_SAMPLES)
            .min(self.samples.len());
        let mut sorted = self.samples.clone();
        sorted.sort_by_key(|s| s.rtt);
        sorted.truncate(want);
        sorted
    }
}

impl Default for ClockSync {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_sample_sets_offset() {
        let mut sync = ClockSync::new();
        sync.update(1_000, 40, 500);
        assert_eq!(sync.drift_slope(), 0.0);
        assert_eq!(sync.offset_ms(), 500);
        assert_eq!(sync.to_server_time(2_000), 2_500);
    }

    #[test]
    fn test_constant_delta_has_no_slope() {
        let mut sync = ClockSync::new();
        for i in 0..16u32 {
            sync.update(10_000 + i * 20_000, 30 + (i % 5), -250);
        }
        assert!(sync.drift_slope().abs() < 1e-6);
        let t = 400_000;
        assert_eq!(sync.to_server_time(t), t.wrapping_add((-250i32) as u32));
    }

    #[test]
    fn test_linear_drift_recovered() {
        // delta grows by 1 ms per second: slope 0.001.
        let mut sync = ClockSync::new();
        for i in 0..32u32 {
            let when = i * 20_000;
            let delta = (when / 1000) as i32 + 100;
            sync.update(when, 25, delta);
        }
        let b0 = sync.drift_slope();
        assert!((b0 - 0.001).abs() < 0.0001, "slope {b0}");
    }

    #[test]
    fn test_noisy_drift_within_ten_percent() {
        // Synthetic pairs with true slope 0.001, gaussian-ish noise
        // (sigma ~2 ms via summed uniforms) and RTT uniform in 10..200.
        let mut sync = ClockSync::new();
        let mut state = 0x2545_F491_4F6C_DD1Du64;
        let mut next = || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state
        };
        for i in 0..32u32 {
            let when = 5_000 + i * 20_000;
            let noise: f64 = (0..12).map(|_| (next() % 1000) as f64 / 1000.0).sum::<f64>() - 6.0;
            let delta = (0.001 * when as f64 + 40.0 + noise * 2.0).round() as i32;
            let rtt = 10 + (next() % 190) as u32;
            sync.update(when, rtt, delta);
        }
        let b0 = sync.drift_slope();
        assert!(
            (b0 - 0.001).abs() <= 0.0001,
            "estimated slope {b0} not within 10% of 0.001"
        );
    }

    #[test]
    fn test_zero_time_variance_falls_back_to_subset_mean() {
        // Every sample in the low-RTT subset shares one timestamp, so the
        // regression denominator is zero and the estimate must fall back
        // to the subset mean rather than the newest raw delta.
        let mut sync = ClockSync::new();
        for delta in [100, 200, 300, 400] {
            sync.update(50_000, 20, delta);
        }
        // Later samples carry a wild delta behind a high RTT; they stay
        // outside the lowest-quarter subset.
        for _ in 0..12 {
            sync.update(50_000, 800, 9_999);
        }
        assert_eq!(sync.drift_slope(), 0.0);
        assert_eq!(sync.offset_ms(), 250);
    }

    #[test]
    fn test_high_rtt_samples_excluded() {
        let mut sync = ClockSync::new();
        // Twelve clean samples at constant delta, plus heavily skewed
        // deltas behind huge RTTs that must not poison the estimate.
        for i in 0..12u32 {
            sync.update(i * 20_000, 20, 100);
        }
        for i in 12..16u32 {
            sync.update(i * 20_000, 900, 9_000);
        }
        assert!((sync.offset_ms() - 100).abs() <= 1, "offset {}", sync.offset_ms());
    }

    #[test]
    fn test_ring_replaces_oldest() {
        let mut sync = ClockSync::new();
        for i in 0..(MAX_TS_SAMPLES as u32 + 10) {
            sync.update(i * 1_000, 20, 7);
        }
        assert_eq!(sync.sample_count(), MAX_TS_SAMPLES);
        assert_eq!(sync.offset_ms(), 7);
    }
}
