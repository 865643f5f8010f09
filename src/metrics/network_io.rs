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
    pub watch_interfaces: Option<Vec<String>>,
    pub ignore_interfaces: Option<Vec<String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            watch_interfaces: Some(vec!["bond0".to_owned(), "tailscale1".to_owned()]),
            ignore_interfaces: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InterfaceStats {
    pub interface: String,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
}

pub struct NetworkIoStats {
    pub timestamp: Instant,
    pub interfaces: Vec<InterfaceStats>,
}

pub trait DataSource {
    fn network_io(&self) -> impl Future<Output = anyhow::Result<NetworkIoStats>> + Send;
}

#[derive(Debug, Clone, Default)]
struct InterfaceRates {
    bytes_sent_per_sec: Option<f64>,
    bytes_received_per_sec: Option<f64>,
    packets_sent_per_sec: Option<f64>,
    packets_received_per_sec: Option<f64>,
}

#[derive(Clone)]
pub struct Metrics {
    state: Arc<Mutex<HashMap<String, InterfaceRates>>>,
    bytes_sent: Desc,
    bytes_received: Desc,
    packets_sent: Desc,
    packets_received: Desc,
}

impl Metrics {
    fn new(state: Arc<Mutex<HashMap<String, InterfaceRates>>>) -> anyhow::Result<Self> {
        let labels = vec!["device".to_string()];
        Ok(Self {
            state,
            bytes_sent: Desc::new(
                "system_network_transmit_bytes_per_second".into(),
                "Bytes sent per second".into(),
                labels.clone(),
                HashMap::new(),
            )?,
            bytes_received: Desc::new(
                "system_network_receive_bytes_per_second".into(),
                "Bytes received per second".into(),
                labels.clone(),
                HashMap::new(),
            )?,
            packets_sent: Desc::new(
                "system_network_transmit_packets_per_second".into(),
                "Packets sent per second".into(),
                labels.clone(),
                HashMap::new(),
            )?,
            packets_received: Desc::new(
                "system_network_receive_packets_per_second".into(),
                "Packets received per second".into(),
                labels,
                HashMap::new(),
            )?,
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
            &self.bytes_sent,
            &self.bytes_received,
            &self.packets_sent,
            &self.packets_received,
        ]
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let guard = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let mut mf = vec![];
        for (device, rates) in guard.iter() {
            let l = Self::make_labels(device);
            maybe_gauge(&mut mf, &self.bytes_sent, &l, rates.bytes_sent_per_sec);
            maybe_gauge(
                &mut mf,
                &self.bytes_received,
                &l,
                rates.bytes_received_per_sec,
            );
            maybe_gauge(&mut mf, &self.packets_sent, &l, rates.packets_sent_per_sec);
            maybe_gauge(
                &mut mf,
                &self.packets_received,
                &l,
                rates.packets_received_per_sec,
            );
        }

        mf
    }
}
pub struct NetworkIo<T> {
    config: Config,
    data_source: T,
}
impl<T> NetworkIo<T>
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

impl<T> Metric for NetworkIo<T>
where
    T: DataSource + Send + Sync + 'static,
{
    fn register(self, registry: &Registry) -> anyhow::Result<Box<dyn Collector>> {
        if !self.config.enabled {
            return Ok(Box::new(NoOpCollector::new()));
        }

        let collector = NetworkIoCollector::new(self.config, self.data_source);
        let measurements = collector.measurements();

        let metrics = Metrics::new(measurements)?;
        metrics.register(registry)?;

        Ok(Box::new(collector))
    }
}

struct NetworkIoCollector<T> {
    config: Config,
    state: Arc<Mutex<HashMap<String, InterfaceRates>>>,
    counters: Mutex<HashMap<String, (RateCounter, RateCounter, RateCounter, RateCounter)>>,
    data_source: T,
}

impl<T> NetworkIoCollector<T> {
    fn new(config: Config, data_source: T) -> Self {
        Self {
            config,
            data_source,
            state: Arc::new(Mutex::new(HashMap::new())),
            counters: Mutex::new(HashMap::new()),
        }
    }

    fn measurements(&self) -> Arc<Mutex<HashMap<String, InterfaceRates>>> {
        Arc::clone(&self.state)
    }

    fn should_collect(&self, interface_name: &str) -> bool {
        if let Some(watch) = &self.config.watch_interfaces {
            return watch.iter().any(|i| i == interface_name);
        }

        if let Some(ignore) = &self.config.ignore_interfaces {
            return !ignore.iter().any(|i| i == interface_name);
        }

        true
    }
}

#[async_trait::async_trait]
impl<T> Collector for NetworkIoCollector<T>
where
    T: DataSource + Send + Sync + 'static,
{
    #[tracing::instrument(level = "debug", skip_all)]
    async fn collect(&self) -> anyhow::Result<()> {
        let Some(mut stats) = self
            .data_source
            .network_io()
            .await
            .inspect_err(|e| tracing::error!(error=?e, "Failed to collect network IO statistics"))
            .ok()
        else {
            return Ok(());
        };

        stats
            .interfaces
            .retain(|iface| self.should_collect(iface.interface.as_str()));

        let now = Instant::now();
        let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        let mut rates = HashMap::with_capacity(stats.interfaces.len());

        for iface in &stats.interfaces {
            let entry = counters.entry(iface.interface.clone()).or_default();
            rates.insert(
                iface.interface.clone(),
                InterfaceRates {
                    bytes_sent_per_sec: entry.0.sample(now, iface.bytes_sent),
                    bytes_received_per_sec: entry.1.sample(now, iface.bytes_received),
                    packets_sent_per_sec: entry.2.sample(now, iface.packets_sent),
                    packets_received_per_sec: entry.3.sample(now, iface.packets_received),
                },
            );
        }

        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        *guard = rates;

        Ok(())
    }
}
