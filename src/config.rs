use chrono::{DateTime, Utc};
use config::Config;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Log {
    pub enable_stdout: bool,
    pub enable_log_file: bool,
    pub log_file_directory: Option<String>,
    pub level: String,
    pub directives: Vec<String>,
    pub max_log_files: usize,
}

impl Default for Log {
    fn default() -> Self {
        Self {
            enable_stdout: true,
            enable_log_file: true,
            log_file_directory: Some("/tmp/var/log/cpu-governor/".to_owned()),
            level: "INFO".to_owned(),
            directives: vec![],
            max_log_files: 7,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Http {
    pub port: u16,
    pub timeout: u64,
}

impl Default for Http {
    fn default() -> Self {
        Self {
            port: 8081,
            timeout: Duration::from_secs(10).as_millis() as u64,
        }
    }
}

/// A single scheduled reservation, read-only to the control loop once loaded.
///
/// In this core, reservations are a static list supplied at startup; a live
/// CRUD-backed store is the out-of-scope external collaborator (see `spec.md`
/// §9's reservation-conflict-detection note).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReservationEntry {
    pub id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub cpu_quota_pct: f64,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_priority() -> i32 {
    5
}

fn default_true() -> bool {
    true
}

/// The `Config` values of `spec.md` §3/§6: everything the sliding-window
/// accounting, the quota solver and the control loop need.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GovernorConfig {
    pub tick_interval_secs: u64,
    pub control_step_secs: u64,
    pub h_avg_hours: f64,
    pub h_peak_hours: f64,
    pub t_peak_pct: f64,
    pub avg_budget_pct: f64,
    pub peak_budget_seconds: f64,
    pub min_limit_pct: f64,
    pub max_limit_pct: f64,
    pub safety: f64,
    pub startup_safety: f64,
    pub startup_threshold_frac: f64,
    pub change_threshold_pct: f64,
    pub smooth_factor: f64,
    pub tolerance_pct: f64,
    pub proc_resync_interval_secs: u64,

    /// When `PeakWindow::remaining()` drops to or below this many seconds,
    /// the solver clamps to `emergency_limit_pct` (§4.5 step 2).
    pub peak_critical_threshold_seconds: f64,
    pub emergency_limit_pct: f64,

    /// Cgroup v2 actuator settings.
    pub cgroup_enabled: bool,
    pub cgroup_path: String,

    /// Process names the resync filter always skips (§4.6), e.g. init/ssh.
    pub protected_process_names: Vec<String>,

    #[serde(default)]
    pub reservations: Vec<ReservationEntry>,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 5,
            control_step_secs: 15,
            h_avg_hours: 12.0,
            h_peak_hours: 24.0,
            t_peak_pct: 95.0,
            avg_budget_pct: 30.0,
            peak_budget_seconds: 600.0,
            min_limit_pct: 5.0,
            max_limit_pct: 95.0,
            safety: 0.9,
            startup_safety: 0.7,
            startup_threshold_frac: 0.10,
            change_threshold_pct: 2.0,
            smooth_factor: 0.3,
            tolerance_pct: 1.0,
            proc_resync_interval_secs: 60,
            peak_critical_threshold_seconds: 0.0,
            emergency_limit_pct: 20.0,
            cgroup_enabled: true,
            cgroup_path: "/sys/fs/cgroup/cpu-governor".to_owned(),
            protected_process_names: vec![
                "init".to_owned(),
                "systemd".to_owned(),
                "sshd".to_owned(),
                "kthreadd".to_owned(),
            ],
            reservations: vec![],
        }
    }
}

impl GovernorConfig {
    /// Rejects out-of-range values and inverted bounds, per `spec.md` §6.
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        let in_range = |name: &str, v: f64, lo: f64, hi: f64| -> Result<(), config::ConfigError> {
            if v < lo || v > hi {
                return Err(config::ConfigError::Message(format!(
                    "{name}={v} is out of range [{lo}, {hi}]"
                )));
            }
            Ok(())
        };

        if self.tick_interval_secs == 0 || self.tick_interval_secs > 60 {
            return Err(config::ConfigError::Message(
                "tick_interval_secs must be in 1..=60".to_owned(),
            ));
        }
        if self.control_step_secs < self.tick_interval_secs {
            return Err(config::ConfigError::Message(
                "control_step_secs must be >= tick_interval_secs".to_owned(),
            ));
        }
        in_range("h_avg_hours", self.h_avg_hours, 1.0, 48.0)?;
        in_range("h_peak_hours", self.h_peak_hours, 1.0, 48.0)?;
        in_range("t_peak_pct", self.t_peak_pct, 50.0, 100.0)?;
        in_range("avg_budget_pct", self.avg_budget_pct, 0.0, 100.0)?;
        if self.peak_budget_seconds < 0.0 {
            return Err(config::ConfigError::Message(
                "peak_budget_seconds must be >= 0".to_owned(),
            ));
        }
        in_range("min_limit_pct", self.min_limit_pct, 0.0, 100.0)?;
        in_range("max_limit_pct", self.max_limit_pct, 0.0, 100.0)?;
        if self.min_limit_pct > self.max_limit_pct {
            return Err(config::ConfigError::Message(
                "min_limit_pct must be <= max_limit_pct".to_owned(),
            ));
        }
        in_range("safety", self.safety, 0.5, 1.0)?;
        in_range("startup_safety", self.startup_safety, 0.5, 1.0)?;
        in_range(
            "startup_threshold_frac",
            self.startup_threshold_frac,
            0.01,
            0.5,
        )?;
        in_range("smooth_factor", self.smooth_factor, 0.0, 1.0)?;

        for reservation in &self.reservations {
            if reservation.start >= reservation.end {
                return Err(config::ConfigError::Message(format!(
                    "reservation '{}' has start >= end",
                    reservation.id
                )));
            }
            in_range(
                &format!("reservation '{}' cpu_quota_pct", reservation.id),
                reservation.cpu_quota_pct,
                0.0,
                100.0,
            )?;
        }

        Ok(())
    }

    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.tick_interval_secs)
    }

    pub fn control_step(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.control_step_secs)
    }

    pub fn h_avg(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.h_avg_hours * 3600.0)
    }

    pub fn h_peak(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.h_peak_hours * 3600.0)
    }
}

/// Ambient host-telemetry collectors exposed alongside the governor's own
/// metrics, mirroring the per-metric `Config` types the teacher registers
/// one per datasource.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Collectors {
    #[serde(default)]
    pub cpu_usage: crate::metrics::cpu_usage::Config,
    #[serde(default)]
    pub disk_io: crate::metrics::disk_io::Config,
    #[serde(default)]
    pub network_io: crate::metrics::network_io::Config,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Configuration {
    #[serde(default = "Log::default")]
    pub log: Log,

    #[serde(default = "Http::default")]
    pub http: Http,

    #[serde(default)]
    pub governor: GovernorConfig,

    #[serde(default)]
    pub collectors: Collectors,
}

impl Configuration {
    pub fn load(base_path: impl AsRef<str>) -> Result<Self, config::ConfigError> {
        let base_path = base_path.as_ref();
        let cfg = Config::builder()
            .add_source(
                config::File::with_name(&format!("{base_path}/config.toml"))
                    .format(config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                config::File::with_name(&format!("{base_path}/config.yml"))
                    .format(config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                config::File::with_name(&format!("{base_path}/config.json"))
                    .format(config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(config::Environment::with_prefix("CFG").separator("__"))
            .build()?;

        let configuration: Self = cfg.try_deserialize()?;
        configuration.governor.validate()?;
        Ok(configuration)
    }
}
