use crate::config::Collectors;
use crate::datasource::TokioReader;
use crate::domain::{Collector, Metric};
use crate::{datasource, metrics};
use prometheus::Registry;

/// Wires the ambient host-telemetry collectors (disk/network/CPU), kept
/// alongside the governor's own control-loop telemetry since they are
/// observability, not the excluded HTTP/dashboard surface.
pub fn init_collectors(
    config: &Collectors,
    registry: &Registry,
) -> anyhow::Result<Vec<Box<dyn Collector>>> {
    let mut collectors = vec![];

    let cpu_usage = metrics::cpu_usage::CpuUsage::new(
        config.cpu_usage.clone(),
        datasource::cpu_usage::CpuUsage::new(TokioReader::new()),
    );
    collectors.push(cpu_usage.register(registry)?);

    let disk_io = metrics::disk_io::DiskIo::new(
        config.disk_io.clone(),
        datasource::disk_io::DiskIo::new(TokioReader::new()),
    );
    collectors.push(disk_io.register(registry)?);

    let network_io = metrics::network_io::NetworkIo::new(
        config.network_io.clone(),
        datasource::network_io::NetworkIo::new(TokioReader::new()),
    );
    collectors.push(network_io.register(registry)?);

    Ok(collectors)
}
