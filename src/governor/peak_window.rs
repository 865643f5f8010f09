use std::collections::VecDeque;
use tokio::time::{Duration, Instant};

/// One closed span of time spent at or above the peak threshold.
#[derive(Debug, Clone, Copy)]
struct ClosedSpan {
    start: Instant,
    duration: Duration,
}

/// Tracks the total wall time spent at or above `threshold` over the last
/// `horizon` (`spec.md` §4.3). A burst longer than the horizon keeps
/// contributing exactly `horizon` seconds, never more.
pub struct PeakWindow {
    horizon: Duration,
    threshold: f64,
    closed: VecDeque<ClosedSpan>,
    open_start: Option<Instant>,
}

impl PeakWindow {
    pub fn new(horizon: Duration, threshold: f64) -> Self {
        Self {
            horizon,
            threshold,
            closed: VecDeque::new(),
            open_start: None,
        }
    }

    /// Advances the eviction cursor then applies the enter/leave-peak
    /// transition for `cpu_pct` observed at `now`.
    pub fn update(&mut self, now: Instant, cpu_pct: f64) {
        self.cleanup(now);

        let is_peak = cpu_pct >= self.threshold;
        match (is_peak, self.open_start) {
            (true, None) => self.open_start = Some(now),
            (false, Some(start)) => {
                self.closed.push_back(ClosedSpan {
                    start,
                    duration: now.saturating_duration_since(start),
                });
                self.open_start = None;
            }
            _ => {}
        }
    }

    fn cleanup(&mut self, now: Instant) {
        let cutoff = now.checked_sub(self.horizon);
        let Some(cutoff) = cutoff else {
            return;
        };

        while let Some(span) = self.closed.front() {
            if span.start < cutoff {
                self.closed.pop_front();
            } else {
                break;
            }
        }

        if let Some(start) = self.open_start
            && start < cutoff
        {
            // The open span's accrued duration in-window is capped: its
            // effective start can't predate the horizon.
            self.open_start = Some(cutoff);
        }
    }

    /// Total seconds spent at or above the threshold within the horizon,
    /// including the in-progress span if one is open.
    pub fn total_peak_seconds(&self, now: Instant) -> f64 {
        let closed: f64 = self.closed.iter().map(|s| s.duration.as_secs_f64()).sum();
        let open = self
            .open_start
            .map(|start| now.saturating_duration_since(start).as_secs_f64())
            .unwrap_or(0.0);
        closed + open
    }

    pub fn remaining(&self, now: Instant, budget_seconds: f64) -> f64 {
        (budget_seconds - self.total_peak_seconds(now)).max(0.0)
    }

    pub fn is_peaking(&self) -> bool {
        self.open_start.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn idle_window_has_zero_peak() {
        let mut window = PeakWindow::new(secs(86400), 95.0);
        let start = Instant::now();
        for i in 0..10u64 {
            window.update(start + secs(i), 10.0);
        }
        assert_eq!(window.total_peak_seconds(start + secs(9)), 0.0);
    }

    #[test]
    fn peak_monotonicity_within_horizon() {
        let horizon = secs(100);
        let mut window = PeakWindow::new(horizon, 95.0);
        let start = Instant::now();
        for i in 0..=30u64 {
            window.update(start + secs(i), 98.0);
        }
        let total = window.total_peak_seconds(start + secs(30));
        assert!((total - 30.0).abs() <= 1.0, "total={total}");
    }

    #[test]
    fn peak_saturates_at_horizon() {
        let horizon = secs(50);
        let mut window = PeakWindow::new(horizon, 95.0);
        let start = Instant::now();
        for i in 0..=200u64 {
            window.update(start + secs(i), 98.0);
        }
        let total = window.total_peak_seconds(start + secs(200));
        assert!((total - 50.0).abs() <= 1.0, "total={total}");
    }

    #[test]
    fn open_span_closes_on_drop_below_threshold() {
        let mut window = PeakWindow::new(secs(3600), 95.0);
        let start = Instant::now();
        window.update(start, 98.0);
        assert!(window.is_peaking());
        window.update(start + secs(10), 50.0);
        assert!(!window.is_peaking());
        assert_eq!(window.total_peak_seconds(start + secs(10)), 10.0);
    }

    #[test]
    fn closed_spans_outside_horizon_are_evicted() {
        let mut window = PeakWindow::new(secs(20), 95.0);
        let start = Instant::now();
        window.update(start, 98.0);
        window.update(start + secs(5), 50.0); // closed span of 5s at t=0..5
        window.update(start + secs(30), 10.0); // now far beyond horizon
        assert_eq!(window.total_peak_seconds(start + secs(30)), 0.0);
    }

    #[test]
    fn remaining_never_negative() {
        let mut window = PeakWindow::new(secs(600), 95.0);
        let start = Instant::now();
        for i in 0..700u64 {
            window.update(start + secs(i), 99.0);
        }
        assert_eq!(window.remaining(start + secs(700), 600.0), 0.0);
    }
}
