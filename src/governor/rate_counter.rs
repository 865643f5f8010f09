use tokio::time::Instant;

/// Turns a monotonically increasing cumulative counter (bytes, ops, usec)
/// into a per-second rate between successive samples. Used to expose
/// disk/network telemetry as Gauges instead of leaving rate computation to
/// a downstream Prometheus query.
pub struct RateCounter {
    last: Option<(Instant, u64)>,
}

impl Default for RateCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateCounter {
    pub fn new() -> Self {
        Self { last: None }
    }

    /// Feeds a new cumulative reading, returning the rate per second since
    /// the previous call. `None` on the first call, or if the counter went
    /// backwards (a reset — e.g. device remounted).
    pub fn sample(&mut self, now: Instant, cumulative: u64) -> Option<f64> {
        let rate = match self.last {
            Some((last_ts, last_value)) if cumulative >= last_value => {
                let elapsed = now.saturating_duration_since(last_ts).as_secs_f64();
                if elapsed > 0.0 {
                    Some((cumulative - last_value) as f64 / elapsed)
                } else {
                    None
                }
            }
            _ => None,
        };
        self.last = Some((now, cumulative));
        rate
    }
}
