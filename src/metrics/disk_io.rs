use crate::domain::{Collector, Metric};
use crate::governor::rate_counter::RateCounter;
use crate::metrics::no_operation::NoOpCollector;
use crate::metrics::util::{into_labels, maybe_gauge};
use prometheus::Registry;
use prometheus::core::Desc;
use prometheus::proto::{LabelPair, MetricFamily};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone)]
pub struct DeviceIoStats {
    pub device_name: String,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub read_ops: u64,
    pub write_ops: u64,
}

#[derive(Debug, Clone)]
pub struct DiskIoStats {
    pub timestamp: Instant,
    pub disks: Vec<DeviceIoStats>,
}

pub trait DataSource {
    fn disk_io(&self) -> impl Future<Output = anyhow::Result<DiskIoStats>> + Send;
}

#[derive(Debug, Clone, Default)]
struct DeviceRates {
    bytes_read_per_sec: Option<f64>,
    bytes_written_per_sec: Option<f64>,
    read_ops_per_sec: Option<f64>,
    write_ops_per_sec: Option<f64>,
}

#[derive(Clone)]
struct Metrics {
    state: Arc<Mutex<HashMap<String, DeviceRates>>>,
    bytes_read: Desc,
    bytes_written: Desc,
    read_ops: Desc,
    write_ops: Desc,
}

impl Metrics {
    fn new(state: Arc<Mutex<HashMap<String, DeviceRates>>>) -> anyhow::Result<Self> {
        let labels = vec!["device".to_owned()];

        let bytes_read = Desc::new(
            "system_disk_read_bytes_per_second".into(),
            "Bytes read per second".into(),
            labels.clone(),
            HashMap::new(),
        )?;

        let bytes_written = Desc::new(
            "system_disk_written_bytes_per_second".into(),
            "Bytes written per second".into(),
            labels.clone(),
            HashMap::new(),
        )?;

        let read_ops = Desc::new(
            "system_disk_read_ops_per_second".into(),
            "Read ops per second".into(),
            labels.clone(),
            HashMap::new(),
        )?;

        let write_ops = Desc::new(
            "system_disk_write_ops_per_second".into(),
            "Write ops per second".into(),
            labels,
            HashMap::new(),
        )?;

        Ok(Self {
            state,
            bytes_read,
            bytes_written,
            read_ops,
            write_ops,
        })
    }

    pub fn register(&self, registry: &Registry) -> anyhow::Result<()> {
        registry.register(Box::new(self.clone()))?;
        Ok(())
    }

    fn make_labels(device: &str) -> Vec<LabelPair> {
        into_labels(&[("device", device)])
    }
}

impl prometheus::core::Collector for Metrics {
    fn desc(&self) -> Vec<&Desc> {
        vec![
            &self.bytes_read,
            &self.bytes_written,
            &self.read_ops,
            &self.write_ops,
        ]
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let guard = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let mut mf = Vec::with_capacity(guard.len());
        for (device, rates) in guard.iter() {
            let l = Self::make_labels(device);
            maybe_gauge(&mut mf, &self.bytes_read, &l, rates.bytes_read_per_sec);
            maybe_gauge(
                &mut mf,
                &self.bytes_written,
                &l,
                rates.bytes_written_per_sec,
            );
            maybe_gauge(&mut mf, &self.read_ops, &l, rates.read_ops_per_sec);
            maybe_gauge(&mut mf, &self.write_ops, &l, rates.write_ops_per_sec);
        }

        mf
    }
}

pub struct DiskIo<T> {
    config: Config,
    data_source: T,
}

impl<T> DiskIo<T>
where
    T: DataSource,
{
    pub fn new(config: Config, data_source: T) -> Self {
        Self {
            config,
            data_source,
        }
    }
}

impl<T> Metric for DiskIo<T>
where
    T: DataSource + Send + Sync + 'static,
{
    fn register(self, registry: &Registry) -> anyhow::Result<Box<dyn Collector>> {
        if !self.config.enabled {
            return Ok(Box::new(NoOpCollector::new()));
        }

        let collector = DiskIoCollector::new(self.data_source);
        let measurements = collector.measurements();

        let metrics = Metrics::new(measurements)?;
        metrics.register(registry)?;

        Ok(Box::new(collector))
    }
}

struct DiskIoCollector<T> {
    state: Arc<Mutex<HashMap<String, DeviceRates>>>,
    counters: Mutex<HashMap<String, (RateCounter, RateCounter, RateCounter, RateCounter)>>,
    data_source: T,
}

impl<T> DiskIoCollector<T>
where
    T: DataSource,
{
    fn new(data_source: T) -> Self {
        Self {
            state: Arc::new(Mutex::new(HashMap::new())),
            counters: Mutex::new(HashMap::new()),
            data_source,
        }
    }

    fn measurements(&self) -> Arc<Mutex<HashMap<String, DeviceRates>>> {
        Arc::clone(&self.state)
    }

    fn should_collect(&self, device_name: &str) -> bool {
        if device_name.starts_with("loop") || device_name.starts_with("zram") {
            return false;
        }

        if device_name.starts_with("nvme") && device_name.rsplit_once('p').is_some() {
            // Ignore NVMe partitions
            return false;
        }

        if device_name.starts_with("sd")
            && device_name.len() > 3
            && device_name.as_bytes().last().unwrap().is_ascii_digit()
        {
            // Ignore HDD partitions (i.e. sda1, sda2, etc)
            return false;
        }

        true
    }
}

#[async_trait::async_trait]
impl<T> Collector for DiskIoCollector<T>
where
    T: DataSource + Send + Sync + 'static,
{
    async fn collect(&self) -> anyhow::Result<()> {
        let mut stats = self.data_source.disk_io().await?;
        stats
            .disks
            .retain(|disk| self.should_collect(&disk.device_name));

        let now = Instant::now();
        let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        let mut rates = HashMap::with_capacity(stats.disks.len());

        for disk in &stats.disks {
            let entry = counters.entry(disk.device_name.clone()).or_default();
            rates.insert(
                disk.device_name.clone(),
                DeviceRates {
                    bytes_read_per_sec: entry.0.sample(now, disk.bytes_read),
                    bytes_written_per_sec: entry.1.sample(now, disk.bytes_written),
                    read_ops_per_sec: entry.2.sample(now, disk.read_ops),
                    write_ops_per_sec: entry.3.sample(now, disk.write_ops),
                },
            );
        }

        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        *guard = rates;

        Ok(())
    }
}
