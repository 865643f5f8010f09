use crate::datasource::Reader;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use tokio::time::Instant;

const PATH_PROC_STAT: &str = "/proc/stat";
const CPU_TOTAL_COLUMNS: usize = 8;
const CPU_IDLE: usize = 3;
const CPU_IOWAIT: usize = 4;

/// A single normalized CPU% reading, immutable once produced.
///
/// `cpu_pct` is expressed as a share of the whole machine: 100.0 means every
/// core is fully busy.
#[derive(Debug, Clone, Copy)]
pub struct Sample {
    pub mono: Instant,
    pub wall: DateTime<Utc>,
    pub cpu_pct: f64,
}

/// Produces one [`Sample`] per tick. Stateful: holds the previous reading so
/// it can compute a rate. Must be driven by a single task, one call per tick
/// (`spec.md` §4.1) — reordering or dropping calls under-reports usage.
pub struct CpuSampler<R> {
    mode: Mode<R>,
}

enum Mode<R> {
    Host {
        reader: R,
        prev: Option<(Instant, [u64; CPU_TOTAL_COLUMNS])>,
    },
    Cgroup {
        reader: R,
        cpu_stat_path: PathBuf,
        n_cpus: f64,
        prev: Option<(Instant, u64)>,
    },
}

impl<R> CpuSampler<R>
where
    R: Reader,
{
    pub fn host(reader: R) -> Self {
        Self {
            mode: Mode::Host { reader, prev: None },
        }
    }

    pub fn cgroup(reader: R, cgroup_path: impl Into<PathBuf>, n_cpus: f64) -> Self {
        Self {
            mode: Mode::Cgroup {
                reader,
                cpu_stat_path: cgroup_path.into().join("cpu.stat"),
                n_cpus,
                prev: None,
            },
        }
    }

    pub fn mode_name(&self) -> &'static str {
        match self.mode {
            Mode::Host { .. } => "host",
            Mode::Cgroup { .. } => "cgroup",
        }
    }

    /// Reads the current counters and returns the normalized CPU% over the
    /// interval since the previous call. The first call establishes the
    /// baseline and returns `0`.
    pub async fn sample(&mut self) -> anyhow::Result<Sample> {
        let wall = Utc::now();
        match &mut self.mode {
            Mode::Host { reader, prev } => {
                let content = reader.read_to_string(PATH_PROC_STAT).await?;
                let current = parse_total_cpu_line(&content)?;
                let mono = Instant::now();

                let cpu_pct = match prev.replace((mono, current)) {
                    None => 0.0,
                    Some((_, previous)) => host_busy_pct(&current, &previous),
                };

                Ok(Sample {
                    mono,
                    wall,
                    cpu_pct,
                })
            }

            Mode::Cgroup {
                reader,
                cpu_stat_path,
                n_cpus,
                prev,
            } => {
                let content = reader.read_to_string(&*cpu_stat_path).await?;
                let usage_usec = parse_usage_usec(&content)?;
                let mono = Instant::now();

                let cpu_pct = match prev.replace((mono, usage_usec)) {
                    None => 0.0,
                    Some((prev_mono, prev_usage)) => {
                        let elapsed = mono.saturating_duration_since(prev_mono).as_secs_f64();
                        cgroup_busy_pct(usage_usec, prev_usage, elapsed, *n_cpus)
                    }
                };

                Ok(Sample {
                    mono,
                    wall,
                    cpu_pct,
                })
            }
        }
    }
}

// The kernel includes Guest/Guest_Nice inside User/Nice, so the elapsed total
// is the sum of the first 8 columns only (user..steal), same convention the
// host-metrics datasource uses.
fn parse_total_cpu_line(content: &str) -> anyhow::Result<[u64; CPU_TOTAL_COLUMNS]> {
    let line = content
        .lines()
        .find(|l| l.starts_with("cpu "))
        .ok_or_else(|| anyhow::anyhow!("no aggregate 'cpu' line in /proc/stat"))?;

    let mut vals = [0u64; CPU_TOTAL_COLUMNS];
    for (idx, part) in line
        .split_whitespace()
        .skip(1)
        .take(CPU_TOTAL_COLUMNS)
        .enumerate()
    {
        vals[idx] = part.parse::<u64>().unwrap_or(0);
    }

    Ok(vals)
}

fn host_busy_pct(curr: &[u64; CPU_TOTAL_COLUMNS], prev: &[u64; CPU_TOTAL_COLUMNS]) -> f64 {
    let mut deltas = [0u64; CPU_TOTAL_COLUMNS];
    for i in 0..CPU_TOTAL_COLUMNS {
        deltas[i] = curr[i].saturating_sub(prev[i]);
    }

    let total: u64 = deltas.iter().sum();
    if total == 0 {
        return 0.0;
    }

    let t = total as f64;
    let idle_ratio = deltas[CPU_IDLE] as f64 / t;
    let iowait_ratio = deltas[CPU_IOWAIT] as f64 / t;

    ((1.0 - idle_ratio - iowait_ratio) * 100.0).clamp(0.0, 100.0)
}

fn parse_usage_usec(cpu_stat: &str) -> anyhow::Result<u64> {
    cpu_stat
        .lines()
        .find_map(|line| line.strip_prefix("usage_usec "))
        .and_then(|v| v.trim().parse::<u64>().ok())
        .ok_or_else(|| anyhow::anyhow!("missing usage_usec in cpu.stat"))
}

fn cgroup_busy_pct(current: u64, previous: u64, elapsed_secs: f64, n_cpus: f64) -> f64 {
    if elapsed_secs <= 0.0 || n_cpus <= 0.0 {
        return 0.0;
    }

    let delta_usec = current.saturating_sub(previous) as f64;
    (delta_usec / (elapsed_secs * 1_000_000.0 * n_cpus) * 100.0).clamp(0.0, 100.0)
}
