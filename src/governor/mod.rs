pub mod actuator;
pub mod average_window;
pub mod control_loop;
pub mod event;
pub mod peak_window;
pub mod rate_counter;
pub mod reservation;
pub mod sample;
pub mod solver;

use crate::config::GovernorConfig;
use crate::datasource::TokioReader;
use crate::governor::actuator::{CgroupActuator, ProcfsEnumerator, TokioCgroupIo};
use crate::governor::control_loop::ControlLoop;
use crate::governor::event::{
    CompositeEventSink, EventSink, PrometheusEventSink, TracingEventSink,
};
use crate::governor::reservation::Reservations;
use crate::governor::sample::CpuSampler;

pub type Controller = ControlLoop<TokioReader, TokioCgroupIo, ProcfsEnumerator>;

/// Wires the production `Reader`/`CgroupIo`/`ProcessEnumerator` and the
/// tracing+Prometheus sinks together, the way `bootstrap.rs` wires up the
/// teacher's collectors.
pub fn build_controller(
    config: GovernorConfig,
    registry: &prometheus::Registry,
) -> anyhow::Result<Controller> {
    let n_cpus = std::thread::available_parallelism()
        .map(|n| n.get() as f64)
        .unwrap_or(1.0);

    let sampler = if config.cgroup_enabled {
        CpuSampler::cgroup(TokioReader::new(), config.cgroup_path.clone(), n_cpus)
    } else {
        CpuSampler::host(TokioReader::new())
    };

    let reservations = Reservations::new(&config.reservations);

    let actuator = CgroupActuator::new(
        TokioCgroupIo,
        ProcfsEnumerator,
        config.cgroup_path.clone(),
        n_cpus,
        config.protected_process_names.clone(),
    );

    let mut sinks: Vec<Box<dyn EventSink>> = vec![Box::new(TracingEventSink)];
    sinks.push(Box::new(PrometheusEventSink::new(registry)?));
    let sink = Box::new(CompositeEventSink::new(sinks));

    Ok(ControlLoop::new(
        config,
        sampler,
        reservations,
        actuator,
        sink,
    ))
}
