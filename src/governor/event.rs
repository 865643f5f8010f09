use crate::governor::actuator::ResyncReport;
use crate::governor::solver::DecisionReason;
use chrono::{DateTime, Utc};

/// Emitted once per tick regardless of whether a decision was applied
/// (`spec.md` §4.7 step 9 / §6). Carries the raw sample, not a window
/// average.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricEvent {
    pub wall_ts: DateTime<Utc>,
    pub cpu_pct: f64,
    pub applied_limit_pct: f64,
    pub window_avg_pct: f64,
    pub peak_total_sec: f64,
}

/// Emitted only when the control loop actually writes a new limit, shaped
/// for both the `/status` endpoint and the tracing log line (`spec.md` §6).
#[derive(Debug, Clone, serde::Serialize)]
pub struct DecisionEvent {
    pub wall_ts: DateTime<Utc>,
    pub before_pct: f64,
    pub after_pct: f64,
    pub avg_pct: f64,
    pub peak_total_sec: f64,
    pub peak_remaining_sec: f64,
    pub reservation_id: Option<String>,
    pub reason: DecisionReason,
    pub observe_only: bool,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ResyncEvent {
    pub timestamp: DateTime<Utc>,
    pub report: ResyncReport,
    pub triggered_by: ResyncTrigger,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResyncTrigger {
    Startup,
    Periodic,
    ToleranceViolation,
}

/// Sink for governor telemetry. Mirrors the teacher's `Metric`/`Collector`
/// split: the control loop only knows it is reporting events, not where
/// they end up.
pub trait EventSink: Send + Sync {
    fn on_metric(&self, event: &MetricEvent);
    fn on_decision(&self, event: &DecisionEvent);
    fn on_resync(&self, event: &ResyncEvent);
}

/// Logs every event at the level the teacher's bootstrap uses for
/// request-scoped tracing.
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn on_metric(&self, event: &MetricEvent) {
        tracing::debug!(
            cpu_pct = event.cpu_pct,
            applied_limit_pct = event.applied_limit_pct,
            window_avg_pct = event.window_avg_pct,
            peak_total_sec = event.peak_total_sec,
            "governor tick"
        );
    }

    fn on_decision(&self, event: &DecisionEvent) {
        tracing::info!(
            before_pct = event.before_pct,
            after_pct = event.after_pct,
            avg_pct = event.avg_pct,
            peak_total_sec = event.peak_total_sec,
            peak_remaining_sec = event.peak_remaining_sec,
            reservation_id = ?event.reservation_id,
            reason = ?event.reason,
            observe_only = event.observe_only,
            "governor decision"
        );
    }

    fn on_resync(&self, event: &ResyncEvent) {
        tracing::info!(
            scanned = event.report.scanned,
            added = event.report.added,
            skipped = event.report.skipped,
            failed = event.report.failed,
            triggered_by = ?event.triggered_by,
            "cgroup resync"
        );
    }
}

/// Publishes the same events as Prometheus gauges, following the
/// registration idiom of `crate::metrics`.
pub struct PrometheusEventSink {
    cpu_pct: prometheus::Gauge,
    limit_pct: prometheus::Gauge,
    avg_pct: prometheus::Gauge,
    peak_seconds_used: prometheus::Gauge,
    peak_remaining_sec: prometheus::Gauge,
    observe_only: prometheus::Gauge,
    resync_added_total: prometheus::Counter,
    resync_failed_total: prometheus::Counter,
}

impl PrometheusEventSink {
    pub fn new(registry: &prometheus::Registry) -> Result<Self, prometheus::Error> {
        let cpu_pct = prometheus::Gauge::new(
            "cpu_governor_cpu_pct",
            "Most recent raw CPU sample as a percentage of machine capacity",
        )?;
        let limit_pct = prometheus::Gauge::new(
            "cpu_governor_limit_pct",
            "Currently applied CPU ceiling as a percentage of machine capacity",
        )?;
        let avg_pct = prometheus::Gauge::new(
            "cpu_governor_avg_pct",
            "Rolling-average CPU usage over the configured window",
        )?;
        let peak_seconds_used = prometheus::Gauge::new(
            "cpu_governor_peak_seconds_used",
            "Seconds of peak-threshold budget consumed within the horizon",
        )?;
        let peak_remaining_sec = prometheus::Gauge::new(
            "cpu_governor_peak_remaining_sec",
            "Seconds of peak-threshold budget left within the horizon",
        )?;
        let observe_only = prometheus::Gauge::new(
            "cpu_governor_observe_only",
            "1 when the actuator could not be initialized and the loop only observes",
        )?;
        let resync_added_total = prometheus::Counter::new(
            "cpu_governor_resync_added_total",
            "Processes added to the cgroup across all resyncs",
        )?;
        let resync_failed_total = prometheus::Counter::new(
            "cpu_governor_resync_failed_total",
            "Process adds that failed across all resyncs",
        )?;

        for metric in [
            &cpu_pct,
            &limit_pct,
            &avg_pct,
            &peak_seconds_used,
            &peak_remaining_sec,
            &observe_only,
        ] {
            registry.register(Box::new(metric.clone()))?;
        }
        registry.register(Box::new(resync_added_total.clone()))?;
        registry.register(Box::new(resync_failed_total.clone()))?;

        Ok(Self {
            cpu_pct,
            limit_pct,
            avg_pct,
            peak_seconds_used,
            peak_remaining_sec,
            observe_only,
            resync_added_total,
            resync_failed_total,
        })
    }
}

impl EventSink for PrometheusEventSink {
    fn on_metric(&self, event: &MetricEvent) {
        self.cpu_pct.set(event.cpu_pct);
        self.limit_pct.set(event.applied_limit_pct);
        self.avg_pct.set(event.window_avg_pct);
        self.peak_seconds_used.set(event.peak_total_sec);
    }

    fn on_decision(&self, event: &DecisionEvent) {
        self.limit_pct.set(event.after_pct);
        self.avg_pct.set(event.avg_pct);
        self.peak_seconds_used.set(event.peak_total_sec);
        self.peak_remaining_sec.set(event.peak_remaining_sec);
        self.observe_only
            .set(if event.observe_only { 1.0 } else { 0.0 });
    }

    fn on_resync(&self, event: &ResyncEvent) {
        self.resync_added_total.inc_by(event.report.added as f64);
        self.resync_failed_total.inc_by(event.report.failed as f64);
    }
}

/// Fans an event out to every registered sink.
pub struct CompositeEventSink {
    sinks: Vec<Box<dyn EventSink>>,
}

impl CompositeEventSink {
    pub fn new(sinks: Vec<Box<dyn EventSink>>) -> Self {
        Self { sinks }
    }
}

impl EventSink for CompositeEventSink {
    fn on_metric(&self, event: &MetricEvent) {
        for sink in &self.sinks {
            sink.on_metric(event);
        }
    }

    fn on_decision(&self, event: &DecisionEvent) {
        for sink in &self.sinks {
            sink.on_decision(event);
        }
    }

    fn on_resync(&self, event: &ResyncEvent) {
        for sink in &self.sinks {
            sink.on_resync(event);
        }
    }
}
