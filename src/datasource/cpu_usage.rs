use crate::datasource::Reader;
use crate::metrics::cpu_usage::{CoreStats, CoreUsageStats, CpuUsageStats, DataSource};
use std::sync::Mutex;
use tokio::time::{Duration, Instant};

const PATH_PROC_STAT: &str = "/proc/stat";
const MIN_TIME_BETWEEN_MEASUREMENTS: Duration = Duration::from_millis(250);

const CPU_USER: usize = 0;
const CPU_NICE: usize = 1;
const CPU_SYSTEM: usize = 2;
const CPU_IDLE: usize = 3;
const CPU_IOWAIT: usize = 4;
const CPU_IRQ: usize = 5;
const CPU_SOFTIRQ: usize = 6;
const CPU_STEAL: usize = 7;
const CPU_GUEST: usize = 8;
const CPU_GUEST_NICE: usize = 9;
const CPU_STATS_COUNT: usize = 10;

// We sum the first 8 columns for the total (User through Steal) because
// the kernel includes Guest and Guest_Nice inside User and Nice counters.
const CPU_TOTAL_COLUMNS: usize = 8;

pub struct CpuUsage<R> {
    reader: R,
    // [user, nice, system, idle, iowait, irq, softirq, steal, guest, guest_nice]
    measurement: Mutex<Option<(Instant, Vec<[u64; 10]>)>>,
}

impl<R> CpuUsage<R>
where
    R: Reader,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            measurement: Mutex::new(None),
        }
    }
}

impl<R> DataSource for CpuUsage<R>
where
    R: Reader,
{
    #[allow(clippy::manual_async_fn)]
    fn cpu_usage(&self) -> impl Future<Output = anyhow::Result<CpuUsageStats>> + Send {
        async move {
            let Ok(mut previous) = self.measurement.lock().map(|x| x.clone()) else {
                return Err(anyhow::anyhow!(
                    "Failed to retrieve previous CPU usage measurement snapshot due to a poisoned lock"
                ));
            };

            let (timestamp, previous) = match previous.take() {
                Some(previous) => previous,
                None => {
                    let measurement = make_measurement(&self.reader).await?;
                    (Instant::now(), measurement)
                }
            };

            let time_since_measurement = timestamp.elapsed();
            if time_since_measurement < MIN_TIME_BETWEEN_MEASUREMENTS {
                let to_sleep = MIN_TIME_BETWEEN_MEASUREMENTS.saturating_sub(time_since_measurement);
                tokio::time::sleep(to_sleep).await;
            }

            let current = make_measurement(&self.reader).await?;
            let now = Instant::now();
            if previous.len() != current.len() {
                return Err(anyhow::anyhow!(
                    "Failed to perform CPU usage measurement because of changed core count: previous={}; current={}",
                    previous.len(),
                    current.len()
                ));
            }

            let (total_usage, total_breakdown) = calculate_usage(&current[0], &previous[0]);
            let cores = previous
                .iter()
                .zip(current.iter())
                .skip(1) // the first element is the "total" CPU usage across all cores
                .map(|(prev, curr)| calculate_usage(curr, prev))
                .enumerate()
                .map(|(core, (total_usage, breakdown))| CoreUsageStats {
                    core,
                    total_usage,
                    breakdown,
                })
                .collect::<Vec<_>>();

            match self.measurement.lock() {
                Ok(mut guard) => {
                    *guard = Some((now, current));
                }
                Err(_) => {
                    return Err(anyhow::anyhow!(
                        "Failed to update CPU usage measurement snapshot due to a poisoned lock"
                    ));
                }
            }

            Ok(CpuUsageStats {
                total_usage,
                total_breakdown,
                cores,
            })
        }
    }
}

async fn make_measurement<R: Reader>(reader: &R) -> anyhow::Result<Vec<[u64; 10]>> {
    let content = reader.read_to_string(PATH_PROC_STAT).await?;
    Ok(parse_proc_stat(&content))
}

fn parse_proc_stat(content: &str) -> Vec<[u64; 10]> {
    content
        .lines()
        .filter(|l| l.starts_with("cpu"))
        .map(|line| {
            let mut vals = [0u64; 10];
            for (idx, part) in line.split_whitespace().skip(1).take(10).enumerate() {
                vals[idx] = part.parse::<u64>().unwrap_or(0);
            }

            vals
        })
        .collect()
}

fn calculate_usage(curr: &[u64; 10], prev: &[u64; 10]) -> (f64, CoreStats) {
    let mut deltas = [0u64; CPU_STATS_COUNT];
    for i in 0..CPU_STATS_COUNT {
        deltas[i] = curr[i].saturating_sub(prev[i]);
    }

    // The kernel includes Guest and Guest_Nice inside User and Nice counters.
    // To calculate the actual total elapsed time, we sum columns 0 through 7.
    let total_delta: u64 = deltas.iter().take(CPU_TOTAL_COLUMNS).sum();
    if total_delta == 0 {
        return (0.0, CoreStats::default());
    }

    let t = total_delta as f64;

    let times = CoreStats {
        user: deltas[CPU_USER] as f64 / t,
        nice: deltas[CPU_NICE] as f64 / t,
        system: deltas[CPU_SYSTEM] as f64 / t,
        idle: deltas[CPU_IDLE] as f64 / t,
        iowait: deltas[CPU_IOWAIT] as f64 / t,
        irq: deltas[CPU_IRQ] as f64 / t,
        softirq: deltas[CPU_SOFTIRQ] as f64 / t,
        steal: deltas[CPU_STEAL] as f64 / t,
        guest: deltas[CPU_GUEST] as f64 / t,
        guest_nice: deltas[CPU_GUEST_NICE] as f64 / t,
    };

    let busy_percentage = 1.0 - times.idle - times.iowait;
    (busy_percentage.max(0.0), times)
}
