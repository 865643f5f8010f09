use std::collections::VecDeque;
use tokio::time::{Duration, Instant};

/// Rebuild `sum` from scratch every this many evictions, to bound
/// floating-point drift from repeated `+=`/`-=` (`spec.md` §4.2).
const REBUILD_EVERY: u32 = 4096;

/// Fixed-capacity ring of timestamped samples with a running sum, supporting
/// O(1) insert/evict and O(1) average (`spec.md` §3/§4.2).
pub struct AverageWindow {
    horizon: Duration,
    capacity: usize,
    entries: VecDeque<(Instant, f64)>,
    sum: f64,
    evictions_since_rebuild: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum AverageWindowError {
    #[error("sample timestamp is older than the current tail of the window")]
    NonMonotonicTimestamp,
}

impl AverageWindow {
    pub fn new(horizon: Duration, tick_interval: Duration) -> Self {
        let ticks = (horizon.as_secs_f64() / tick_interval.as_secs_f64()).ceil();
        let capacity = (ticks as usize).max(1);

        Self {
            horizon,
            capacity,
            entries: VecDeque::with_capacity(capacity),
            sum: 0.0,
            evictions_since_rebuild: 0,
        }
    }

    /// Inserts a sample. Rejects timestamps older than the current tail —
    /// the caller must supply monotonic timestamps.
    pub fn push(&mut self, ts: Instant, cpu_pct: f64) -> Result<(), AverageWindowError> {
        if let Some((tail_ts, _)) = self.entries.back()
            && ts < *tail_ts
        {
            return Err(AverageWindowError::NonMonotonicTimestamp);
        }

        if self.entries.len() >= self.capacity
            && let Some((_, old)) = self.entries.pop_front()
        {
            self.sum -= old;
        }

        self.entries.push_back((ts, cpu_pct));
        self.sum += cpu_pct;
        Ok(())
    }

    /// Drops all entries older than `now - horizon`. Returns the number of
    /// entries evicted.
    pub fn evict(&mut self, now: Instant) -> usize {
        let cutoff = now.checked_sub(self.horizon);
        let mut evicted = 0;

        while let Some((ts, _)) = self.entries.front() {
            let expired = match cutoff {
                Some(cutoff) => *ts < cutoff,
                None => false,
            };
            if !expired {
                break;
            }

            let (_, value) = self.entries.pop_front().unwrap();
            self.sum -= value;
            evicted += 1;
        }

        if evicted > 0 {
            self.evictions_since_rebuild += evicted as u32;
            if self.evictions_since_rebuild >= REBUILD_EVERY {
                self.rebuild_sum();
            }
        }

        evicted
    }

    fn rebuild_sum(&mut self) {
        self.sum = self.entries.iter().map(|(_, v)| v).sum();
        self.evictions_since_rebuild = 0;
    }

    pub fn average(&self) -> f64 {
        if self.entries.is_empty() {
            0.0
        } else {
            self.sum / self.entries.len() as f64
        }
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn oldest_ts(&self) -> Option<Instant> {
        self.entries.front().map(|(ts, _)| *ts)
    }

    /// Sum of samples whose timestamp is `>= start_ts` — used by the solver
    /// to find the partial sum of samples about to age out of the window.
    pub fn sum_over_suffix(&self, start_ts: Instant) -> f64 {
        self.entries
            .iter()
            .rev()
            .take_while(|(ts, _)| *ts >= start_ts)
            .map(|(_, v)| v)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn empty_window_averages_to_zero() {
        let window = AverageWindow::new(secs(3600), secs(5));
        assert_eq!(window.average(), 0.0);
        assert_eq!(window.count(), 0);
    }

    #[test]
    fn push_and_average() {
        let mut window = AverageWindow::new(secs(3600), secs(5));
        let start = Instant::now();
        window.push(start, 10.0).unwrap();
        window.push(start + secs(5), 20.0).unwrap();
        window.push(start + secs(10), 30.0).unwrap();
        assert!((window.average() - 20.0).abs() < f64::EPSILON);
        assert_eq!(window.count(), 3);
    }

    #[test]
    fn rejects_non_monotonic_push() {
        let mut window = AverageWindow::new(secs(3600), secs(5));
        let start = Instant::now();
        window.push(start + secs(10), 10.0).unwrap();
        assert!(window.push(start, 5.0).is_err());
    }

    #[test]
    fn accepts_equal_timestamp_push() {
        let mut window = AverageWindow::new(secs(3600), secs(5));
        let start = Instant::now();
        window.push(start, 10.0).unwrap();
        assert!(window.push(start, 20.0).is_ok());
        assert_eq!(window.count(), 2);
    }

    #[test]
    fn evict_drops_entries_older_than_horizon() {
        // Capacity sized well beyond the push count so the ring buffer's own
        // capacity-eviction in `push` doesn't mask what `evict` does.
        let mut window = AverageWindow::new(secs(10), Duration::from_millis(100));
        let start = Instant::now();
        for i in 0..20u64 {
            window.push(start + secs(i), 1.0).unwrap();
        }
        let evicted = window.evict(start + secs(19));
        assert!(evicted > 0);
        assert!(window.oldest_ts().unwrap() >= (start + secs(19)) - secs(10));
    }

    #[test]
    fn sum_integrity_under_many_insert_evict_cycles() {
        let mut window = AverageWindow::new(secs(100), secs(1));
        let start = Instant::now();
        for i in 0..10_000u64 {
            window.push(start + secs(i), (i % 7) as f64).unwrap();
            window.evict(start + secs(i));
            let actual: f64 = window.entries.iter().map(|(_, v)| v).sum();
            assert!(
                (window.sum() - actual).abs() < 1e-6 * window.count().max(1) as f64,
                "sum drifted at i={i}"
            );
        }
    }

    #[test]
    fn sum_over_suffix_covers_trailing_samples() {
        let mut window = AverageWindow::new(secs(100), secs(1));
        let start = Instant::now();
        for i in 0..10u64 {
            window.push(start + secs(i), 1.0).unwrap();
        }
        // Last 3 samples (ts 7, 8, 9) sum to 3.0
        assert_eq!(window.sum_over_suffix(start + secs(7)), 3.0);
    }

    #[test]
    fn ring_capacity_bounds_memory_even_without_eviction() {
        let mut window = AverageWindow::new(secs(10), secs(1));
        assert_eq!(window.capacity(), 10);
        let start = Instant::now();
        for i in 0..100u64 {
            window.push(start + secs(i), 5.0).unwrap();
        }
        assert!(window.count() <= window.capacity());
    }
}
