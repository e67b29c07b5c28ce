//! Per-report link throughput.
//!
//! The link adds every sent frame; the scheduler drains the totals each
//! time it logs.

use std::time::Duration;

/// Frames, bytes and write time accumulated since the last drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThroughputMeter {
    frames: u64,
    bytes: u64,
    write_total: Duration,
    write_max: Duration,
}

/// Summary returned by [`ThroughputMeter::drain`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ThroughputReport {
    pub frames: u64,
    pub bytes_per_sec: f64,
    /// Mean time spent writing one frame.
    pub mean_write: Duration,
    pub max_write: Duration,
}

impl ThroughputMeter {
    /// Account one frame of `bytes` that took `took` to write.
    pub fn record(&mut self, bytes: u64, took: Duration) {
        self.frames += 1;
        self.bytes += bytes;
        self.write_total += took;
        self.write_max = self.write_max.max(took);
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Summarize the last `elapsed` and start over.
    pub fn drain(&mut self, elapsed: Duration) -> ThroughputReport {
        let meter = std::mem::take(self);
        let secs = elapsed.as_secs_f64();
        ThroughputReport {
            frames: meter.frames,
            bytes_per_sec: if secs > 0.0 { meter.bytes as f64 / secs } else { 0.0 },
            mean_write: match u32::try_from(meter.frames) {
                Ok(0) | Err(_) => Duration::ZERO,
                Ok(n) => meter.write_total / n,
            },
            max_write: meter.write_max,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_drain_is_zero() {
        let report = ThroughputMeter::default().drain(Duration::from_secs(30));
        assert_eq!(report, ThroughputReport::default());
    }

    #[test]
    fn drain_averages_and_resets() {
        let mut m = ThroughputMeter::default();
        // Two 480x480 RGB565 frames.
        m.record(460_800, Duration::from_millis(10));
        m.record(460_800, Duration::from_millis(30));
        assert_eq!(m.frames(), 2);

        let report = m.drain(Duration::from_secs(2));
        assert_eq!(report.frames, 2);
        assert_eq!(report.bytes_per_sec, 460_800.0);
        assert_eq!(report.mean_write, Duration::from_millis(20));
        assert_eq!(report.max_write, Duration::from_millis(30));
        assert_eq!(m, ThroughputMeter::default());
    }
}
