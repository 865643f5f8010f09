use crate::config::GovernorConfig;
use crate::datasource::Reader;
use crate::governor::actuator::{ActuatorError, CgroupActuator, CgroupIo, ProcessEnumerator};
use crate::governor::average_window::AverageWindow;
use crate::governor::event::{DecisionEvent, EventSink, MetricEvent, ResyncEvent, ResyncTrigger};
use crate::governor::peak_window::PeakWindow;
use crate::governor::reservation::Reservations;
use crate::governor::sample::CpuSampler;
use crate::governor::solver::{QuotaSolver, SolveInput};
use chrono::Utc;
use tokio::time::Instant;

/// What the loop actually did on the most recent tick — surfaced to the
/// `/status` endpoint (`spec.md` §6).
#[derive(Debug, Clone, serde::Serialize)]
pub struct ControlState {
    pub last_decision: Option<DecisionEvent>,
    pub current_limit_pct: Option<f64>,
    pub observe_only: bool,
    pub ticks: u64,
}

/// Drives the sampler -> windows -> solver -> actuator pipeline on a fixed
/// tick, plus the slower control-step and resync cadences (`spec.md` §5).
pub struct ControlLoop<R, Io, Enum> {
    config: GovernorConfig,
    sampler: CpuSampler<R>,
    avg_win: AverageWindow,
    peak_win: PeakWindow,
    reservations: Reservations,
    actuator: CgroupActuator<Io, Enum>,
    sink: Box<dyn EventSink>,

    current_limit_pct: f64,
    last_applied_mono: Option<Instant>,
    last_resync_mono: Option<Instant>,
    last_decision: Option<DecisionEvent>,
    ticks: u64,
}

impl<R, Io, Enum> ControlLoop<R, Io, Enum>
where
    R: Reader,
    Io: CgroupIo,
    Enum: ProcessEnumerator,
{
    pub fn new(
        config: GovernorConfig,
        sampler: CpuSampler<R>,
        reservations: Reservations,
        actuator: CgroupActuator<Io, Enum>,
        sink: Box<dyn EventSink>,
    ) -> Self {
        let avg_win = AverageWindow::new(config.h_avg(), config.tick_interval());
        let peak_win = PeakWindow::new(config.h_peak(), config.t_peak_pct);
        let start_limit = config.max_limit_pct;

        Self {
            config,
            sampler,
            avg_win,
            peak_win,
            reservations,
            actuator,
            sink,
            current_limit_pct: start_limit,
            last_applied_mono: None,
            last_resync_mono: None,
            last_decision: None,
            ticks: 0,
        }
    }

    /// Brings up the actuator. Actuator initialization failure is not fatal:
    /// the loop degrades to observe-only and keeps sampling and deciding,
    /// it just never writes `cpu.max` (`spec.md` §7).
    pub async fn start(&mut self) {
        match self.actuator.initialize().await {
            Ok(()) => {
                if let Ok(report) = self.actuator.resync_all().await {
                    self.sink.on_resync(&ResyncEvent {
                        timestamp: Utc::now(),
                        report,
                        triggered_by: ResyncTrigger::Startup,
                    });
                }
            }
            Err(ActuatorError::InsufficientPrivilege(_)) | Err(ActuatorError::NoCgroupV2(_)) => {
                tracing::warn!("cgroup actuator unavailable, running observe-only");
            }
            Err(e) => {
                tracing::warn!(error = %e, "cgroup actuator initialization failed, running observe-only");
            }
        }
    }

    /// Runs one tick: sample, update windows, solve, apply, resync if due.
    pub async fn tick(&mut self) -> anyhow::Result<()> {
        let sample = self.sampler.sample().await?;
        self.ticks += 1;

        self.avg_win.evict(sample.mono);
        self.avg_win.push(sample.mono, sample.cpu_pct)?;
        self.peak_win.update(sample.mono, sample.cpu_pct);

        let due_for_control_step = match self.last_applied_mono {
            None => true,
            Some(last) => sample.mono.saturating_duration_since(last) >= self.config.control_step(),
        };

        let tolerance_violation = self.actuator_drifted(sample.mono).await;

        if due_for_control_step || tolerance_violation {
            self.apply_decision(sample.mono).await?;
        }

        self.sink.on_metric(&MetricEvent {
            wall_ts: Utc::now(),
            cpu_pct: sample.cpu_pct,
            applied_limit_pct: self.current_limit_pct,
            window_avg_pct: self.avg_win.average(),
            peak_total_sec: self.peak_win.total_peak_seconds(sample.mono),
        });

        let due_for_resync = match self.last_resync_mono {
            None => true,
            Some(last) => {
                sample.mono.saturating_duration_since(last)
                    >= tokio::time::Duration::from_secs(self.config.proc_resync_interval_secs)
            }
        };

        if due_for_resync || tolerance_violation {
            self.run_resync(tolerance_violation).await;
        }

        Ok(())
    }

    async fn actuator_drifted(&self, _now: Instant) -> bool {
        if self.actuator.is_observe_only() {
            return false;
        }

        let Some(applied) = self.actuator.current_limit().await else {
            return false;
        };

        (applied - self.current_limit_pct).abs() > self.config.tolerance_pct
    }

    async fn apply_decision(&mut self, now_mono: Instant) -> anyhow::Result<()> {
        let reservation = self.reservations.active(Utc::now());
        let decision = QuotaSolver::solve(&SolveInput {
            avg_win: &self.avg_win,
            peak_win: &self.peak_win,
            reservation: reservation.clone(),
            now_mono,
            config: &self.config,
        });

        let before_pct = self.current_limit_pct;
        let delta = decision.limit_pct - before_pct;

        // Write-gate (spec.md §4.7 step 5): only adjust once the solved
        // target has drifted far enough to be worth a write. Smoothing
        // always blends toward the target (§4.7 step 6) rather than
        // snapping — it just never fires below the threshold.
        if delta.abs() < self.config.change_threshold_pct {
            return Ok(());
        }

        let next_limit = before_pct + delta * self.config.smooth_factor;

        self.current_limit_pct = next_limit;
        self.actuator.set_limit(next_limit).await?;
        self.last_applied_mono = Some(now_mono);

        let event = DecisionEvent {
            wall_ts: Utc::now(),
            before_pct,
            after_pct: next_limit,
            avg_pct: self.avg_win.average(),
            peak_total_sec: self.peak_win.total_peak_seconds(now_mono),
            peak_remaining_sec: self
                .peak_win
                .remaining(now_mono, self.config.peak_budget_seconds),
            reservation_id: reservation.map(|r| r.id),
            reason: decision.reason,
            observe_only: self.actuator.is_observe_only(),
        };
        self.sink.on_decision(&event);
        self.last_decision = Some(event);

        Ok(())
    }

    async fn run_resync(&mut self, tolerance_violation: bool) {
        if let Ok(report) = self.actuator.resync_all().await {
            self.last_resync_mono = Some(Instant::now());
            self.sink.on_resync(&ResyncEvent {
                timestamp: Utc::now(),
                report,
                triggered_by: if tolerance_violation {
                    ResyncTrigger::ToleranceViolation
                } else {
                    ResyncTrigger::Periodic
                },
            });
        }
    }

    pub fn state(&self) -> ControlState {
        ControlState {
            last_decision: self.last_decision.clone(),
            current_limit_pct: Some(self.current_limit_pct),
            observe_only: self.actuator.is_observe_only(),
            ticks: self.ticks,
        }
    }

    pub async fn shutdown(&mut self) {
        self.actuator.teardown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReservationEntry;
    use crate::datasource::tests::HardcodedReader;
    use crate::governor::actuator::{FakeCgroupIo, FakeProcessEnumerator};
    use crate::governor::event::TracingEventSink;

    fn config() -> GovernorConfig {
        GovernorConfig {
            tick_interval_secs: 1,
            control_step_secs: 1,
            proc_resync_interval_secs: 3600,
            cgroup_path: "/sys/fs/cgroup/cpu-governor".to_owned(),
            ..Default::default()
        }
    }

    fn host_reader_cycling() -> HardcodedReader {
        let mut reader = HardcodedReader::new();
        for i in 0..5u64 {
            reader.add_response(
                "/proc/stat",
                format!("cpu  {} 0 0 {} 0 0 0 0 0 0\n", i * 1000, 10_000 - i * 1000),
            );
        }
        reader
    }

    fn host_reader_repeating(n: usize) -> HardcodedReader {
        let mut reader = HardcodedReader::new();
        for j in 0..n as u64 {
            let i = j % 5;
            reader.add_response(
                "/proc/stat",
                format!("cpu  {} 0 0 {} 0 0 0 0 0 0\n", i * 1000, 10_000 - i * 1000),
            );
        }
        reader
    }

    /// Cumulative `/proc/stat` counters advancing at a constant busy fraction
    /// every tick, so the rolling average converges to `busy_pct`.
    fn host_reader_steady(n: usize, busy_pct: u64) -> HardcodedReader {
        let mut reader = HardcodedReader::new();
        let idle_pct = 100 - busy_pct;
        for j in 0..=n as u64 {
            reader.add_response(
                "/proc/stat",
                format!("cpu  {} 0 0 {} 0 0 0 0 0 0\n", busy_pct * j, idle_pct * j),
            );
        }
        reader
    }

    #[tokio::test]
    async fn cold_start_is_conservative_and_non_fatal() {
        let cfg = config();
        let sampler = CpuSampler::host(host_reader_cycling());
        let reservations = Reservations::new(&[]);
        let io = FakeCgroupIo::new(false);
        let actuator = crate::governor::actuator::CgroupActuator::new(
            io,
            FakeProcessEnumerator(vec![]),
            cfg.cgroup_path.clone(),
            4.0,
            cfg.protected_process_names.clone(),
        );
        let mut loop_ = ControlLoop::new(
            cfg,
            sampler,
            reservations,
            actuator,
            Box::new(TracingEventSink),
        );
        loop_.start().await;
        assert!(loop_.state().observe_only);
        loop_.tick().await.unwrap();
        assert_eq!(loop_.state().ticks, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reservation_pins_ceiling_through_full_pipeline() {
        let mut cfg = config();
        cfg.reservations = vec![ReservationEntry {
            id: "pin".into(),
            start: Utc::now() - chrono::Duration::hours(1),
            end: Utc::now() + chrono::Duration::hours(1),
            cpu_quota_pct: 8.0,
            priority: 5,
            enabled: true,
        }];

        let sampler = CpuSampler::host(host_reader_repeating(30));
        let reservations = Reservations::new(&cfg.reservations);
        let io = FakeCgroupIo::new(true);
        io.seed(
            std::path::Path::new(&cfg.cgroup_path).join("cpu.max"),
            "max 100000\n",
        );
        let actuator = crate::governor::actuator::CgroupActuator::new(
            io,
            FakeProcessEnumerator(vec![]),
            cfg.cgroup_path.clone(),
            4.0,
            cfg.protected_process_names.clone(),
        );
        let mut loop_ = ControlLoop::new(
            cfg,
            sampler,
            reservations,
            actuator,
            Box::new(TracingEventSink),
        );
        loop_.start().await;
        for _ in 0..30 {
            tokio::time::advance(tokio::time::Duration::from_secs(1)).await;
            loop_.tick().await.unwrap();
        }
        assert!(loop_.state().current_limit_pct.unwrap() <= 8.0 + 2.0);
        let last_decision = loop_.state().last_decision.expect("a decision was applied");
        assert!(last_decision.after_pct <= 8.0 + 2.0);
        assert_eq!(last_decision.reservation_id.as_deref(), Some("pin"));
    }

    struct RecordingSink {
        metrics: std::sync::Arc<std::sync::atomic::AtomicUsize>,
        decisions: std::sync::Arc<std::sync::atomic::AtomicUsize>,
    }

    impl EventSink for RecordingSink {
        fn on_metric(&self, _event: &crate::governor::event::MetricEvent) {
            self.metrics
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }

        fn on_decision(&self, _event: &DecisionEvent) {
            self.decisions
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }

        fn on_resync(&self, _event: &ResyncEvent) {}
    }

    #[tokio::test(start_paused = true)]
    async fn steady_usage_settles_and_stops_writing() {
        let cfg = config();
        let sampler = CpuSampler::host(host_reader_steady(60, 90));
        let reservations = Reservations::new(&[]);
        let io = FakeCgroupIo::new(true);
        io.seed(
            std::path::Path::new(&cfg.cgroup_path).join("cpu.max"),
            "max 100000\n",
        );
        let actuator = crate::governor::actuator::CgroupActuator::new(
            io,
            FakeProcessEnumerator(vec![]),
            cfg.cgroup_path.clone(),
            4.0,
            cfg.protected_process_names.clone(),
        );
        let metrics = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let decisions = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut loop_ = ControlLoop::new(
            cfg,
            sampler,
            reservations,
            actuator,
            Box::new(RecordingSink {
                metrics: metrics.clone(),
                decisions: decisions.clone(),
            }),
        );
        loop_.start().await;
        for _ in 0..40 {
            tokio::time::advance(tokio::time::Duration::from_secs(1)).await;
            loop_.tick().await.unwrap();
        }
        let settled = loop_.state().current_limit_pct.unwrap();
        let settled_writes = decisions.load(std::sync::atomic::Ordering::SeqCst);

        // A steady signal converges to a fixed point and then the write-gate
        // suppresses every further write: running more ticks changes neither
        // the applied limit nor the decision count (testable property 7).
        for _ in 0..20 {
            tokio::time::advance(tokio::time::Duration::from_secs(1)).await;
            loop_.tick().await.unwrap();
        }

        assert_eq!(loop_.state().current_limit_pct, Some(settled));
        assert_eq!(
            decisions.load(std::sync::atomic::Ordering::SeqCst),
            settled_writes
        );
        assert_eq!(metrics.load(std::sync::atomic::Ordering::SeqCst), 60);
    }
}
