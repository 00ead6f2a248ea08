//! Once-per-second framerate reporting.

use std::time::{Duration, Instant};

const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Counts events and logs the average rate every second.
#[derive(Debug)]
pub struct FrameRateCounter {
    label: &'static str,
    count: u32,
    last: Instant,
}

impl FrameRateCounter {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            count: 0,
            last: Instant::now(),
        }
    }

    /// Record one event; returns the average rate when a report is due.
    pub fn tick(&mut self) -> Option<f64> {
        self.tick_at(Instant::now())
    }

    fn tick_at(&mut self, now: Instant) -> Option<f64> {
        self.count += 1;
        let elapsed = now.saturating_duration_since(self.last);
        if elapsed < REPORT_INTERVAL {
            return None;
        }
        let hz = self.count as f64 / elapsed.as_secs_f64();
        log::info!("Average framerate({}): {:.1} Hz", self.label, hz);
        self.count = 0;
        self.last = now;
        Some(hz)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reports_once_per_interval() {
        let start = Instant::now();
        let mut counter = FrameRateCounter {
            label: "test",
            count: 0,
            last: start,
        };
        for k in 1..10 {
            assert!(counter
                .tick_at(start + Duration::from_millis(k * 100))
                .is_none());
        }
        let hz = counter.tick_at(start + Duration::from_secs(2)).unwrap();
        assert!((hz - 5.0).abs() < 1e-9);
        assert_eq!(counter.count, 0);
    }
}
