use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

/// Number of log lines reported as the error output of an exited proxy
const ERROR_TAIL_LINES: usize = 20;

/// Whether the proxy process is alive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyState {
    Running,
    Stopped,
}

/// Snapshot returned by [`Supervisor::status`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProxyStatus {
    pub status: ProxyState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub active_config: String,
}

/// How to launch the proxy client
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Proxy executable
    pub binary: PathBuf,
    /// Arguments placed before the config path
    pub args: Vec<String>,
    /// Directory config file names are resolved against
    pub config_dir: PathBuf,
    /// Combined stdout/stderr of the proxy, truncated on every start
    pub log_file: PathBuf,
    /// Time between SIGTERM and SIGKILL
    pub grace_period: Duration,
}

impl SupervisorConfig {
    pub fn from_proxy_config(config: &crate::config::ProxyConfig) -> Self {
        Self {
            binary: PathBuf::from(&config.binary),
            args: config.args.clone(),
            config_dir: config.config_dir(),
            log_file: PathBuf::from(&config.log_file),
            grace_period: config.shutdown_grace_period(),
        }
    }
}

/// A live proxy child
struct ProxyProcess {
    child: Child,
    pid: u32,
}

/// Why the last proxy is no longer running
#[derive(Debug, Clone)]
struct ExitReport {
    exit_code: Option<i32>,
    error: Option<String>,
}

struct SupervisorState {
    active_config: String,
    process: Option<ProxyProcess>,
    last_exit: Option<ExitReport>,
}

/// Owns the single proxy child process and the active config pointer.
///
/// All transitions run under one async mutex, so concurrent start/stop calls
/// are applied one after another and never leave two children alive.
pub struct Supervisor {
    config: SupervisorConfig,
    state: Mutex<SupervisorState>,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig, active_config: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            config,
            state: Mutex::new(SupervisorState {
                active_config: active_config.into(),
                process: None,
                last_exit: None,
            }),
        })
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn log_file(&self) -> &Path {
        &self.config.log_file
    }

    pub async fn active_config(&self) -> String {
        self.state.lock().await.active_config.clone()
    }

    /// Take the transition lock. Other transitions wait until the guard drops.
    pub async fn lock(&self) -> SupervisorGuard<'_> {
        SupervisorGuard {
            supervisor: self,
            state: self.state.lock().await,
        }
    }

    /// Make `filename` the active config and (re)start the proxy with it.
    ///
    /// Spawn failures are logged and reported through [`status`](Self::status);
    /// they are not returned to the caller.
    pub async fn start(&self, filename: &str) -> Option<u32> {
        self.lock().await.start(filename).await
    }

    /// Restart the proxy with the current active config
    pub async fn restart(&self) -> Option<u32> {
        self.lock().await.restart().await
    }

    /// Stop the proxy. A no-op when nothing is running.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        state.last_exit = None;
        self.stop_locked(&mut state).await;
    }

    pub async fn status(&self) -> ProxyStatus {
        let mut state = self.state.lock().await;
        self.reap_locked(&mut state);

        match (&state.process, &state.last_exit) {
            (Some(process), _) => ProxyStatus {
                status: ProxyState::Running,
                pid: Some(process.pid),
                exit_code: None,
                error: None,
                active_config: state.active_config.clone(),
            },
            (None, Some(report)) => ProxyStatus {
                status: ProxyState::Stopped,
                pid: None,
                exit_code: report.exit_code,
                error: report.error.clone(),
                active_config: state.active_config.clone(),
            },
            (None, None) => ProxyStatus {
                status: ProxyState::Stopped,
                pid: None,
                exit_code: None,
                error: None,
                active_config: state.active_config.clone(),
            },
        }
    }

    /// Whether a live proxy is running with `filename`
    pub async fn is_running_with(&self, filename: &str) -> bool {
        self.lock().await.is_running_with(filename)
    }

    async fn start_locked(&self, state: &mut SupervisorState) -> Option<u32> {
        self.stop_locked(state).await;
        state.last_exit = None;

        let config_path = self.config.config_dir.join(&state.active_config);
        info!(
            config = %state.active_config,
            binary = %self.config.binary.display(),
            "Starting proxy"
        );

        match self.spawn(&config_path) {
            Ok(process) => {
                info!(pid = process.pid, config = %state.active_config, "Proxy process spawned");
                let pid = process.pid;
                state.process = Some(process);
                Some(pid)
            }
            Err(e) => {
                error!(config = %state.active_config, error = %e, "Failed to start proxy");
                state.last_exit = Some(ExitReport {
                    exit_code: None,
                    error: Some(format!("failed to start proxy: {e:#}")),
                });
                None
            }
        }
    }

    fn spawn(&self, config_path: &Path) -> anyhow::Result<ProxyProcess> {
        // bare names are looked up on PATH by the OS
        if !is_bare_command(&self.config.binary) {
            ensure_executable(&self.config.binary)?;
        }

        let log = std::fs::File::create(&self.config.log_file).map_err(|e| {
            anyhow::anyhow!(
                "cannot open log file '{}': {}",
                self.config.log_file.display(),
                e
            )
        })?;
        let log_err = log.try_clone()?;

        let mut cmd = Command::new(&self.config.binary);
        cmd.args(&self.config.args);
        cmd.arg(config_path);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::from(log));
        cmd.stderr(Stdio::from(log_err));
        cmd.kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| {
            anyhow::anyhow!("cannot spawn '{}': {}", self.config.binary.display(), e)
        })?;
        let pid = child
            .id()
            .ok_or_else(|| anyhow::anyhow!("proxy exited before its pid could be read"))?;
        Ok(ProxyProcess { child, pid })
    }

    async fn stop_locked(&self, state: &mut SupervisorState) {
        let Some(mut process) = state.process.take() else {
            return;
        };
        let pid = process.pid;
        let grace_period = self.config.grace_period;

        if let Ok(Some(status)) = process.child.try_wait() {
            debug!(pid, ?status, "Proxy already exited");
            return;
        }

        info!(pid, "Sending SIGTERM to proxy");

        #[cfg(unix)]
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }

        #[cfg(not(unix))]
        {
            let _ = process.child.start_kill();
        }

        match tokio::time::timeout(grace_period, process.child.wait()).await {
            Ok(Ok(status)) => {
                info!(pid, ?status, "Proxy exited gracefully");
            }
            Ok(Err(e)) => {
                warn!(pid, error = %e, "Error waiting for proxy to exit");
            }
            Err(_) => {
                warn!(
                    pid,
                    grace_period_secs = grace_period.as_secs_f64(),
                    "Grace period exceeded, sending SIGKILL"
                );
                let _ = process.child.kill().await;
            }
        }
    }

    /// Move an exited child out of the Running state, keeping its exit report
    fn reap_locked(&self, state: &mut SupervisorState) {
        let Some(process) = state.process.as_mut() else {
            return;
        };

        match process.child.try_wait() {
            Ok(None) => {}
            Ok(Some(status)) => {
                let exit_code = exit_code(status);
                warn!(pid = process.pid, ?exit_code, "Proxy exited unexpectedly");
                state.process = None;
                state.last_exit = Some(ExitReport {
                    exit_code,
                    error: read_log_tail(&self.config.log_file, ERROR_TAIL_LINES),
                });
            }
            Err(e) => {
                warn!(pid = process.pid, error = %e, "Failed to poll proxy status");
            }
        }
    }
}

/// Supervisor access held across several steps, see [`Supervisor::lock`]
pub struct SupervisorGuard<'a> {
    supervisor: &'a Supervisor,
    state: MutexGuard<'a, SupervisorState>,
}

impl SupervisorGuard<'_> {
    pub fn active_config(&self) -> &str {
        &self.state.active_config
    }

    pub fn is_running_with(&mut self, filename: &str) -> bool {
        self.supervisor.reap_locked(&mut self.state);
        self.state.process.is_some() && self.state.active_config == filename
    }

    pub async fn start(&mut self, filename: &str) -> Option<u32> {
        self.state.active_config = filename.to_string();
        self.supervisor.start_locked(&mut self.state).await
    }

    pub async fn restart(&mut self) -> Option<u32> {
        self.supervisor.start_locked(&mut self.state).await
    }
}

/// Exit code of a finished child; a signal death N is reported as -N
fn exit_code(status: ExitStatus) -> Option<i32> {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return Some(-signal);
        }
    }
    status.code()
}

/// A program name without any directory part, such as `frpc`
fn is_bare_command(path: &Path) -> bool {
    path.parent() == Some(Path::new(""))
}

/// Grant execute permission to the proxy binary when it lacks it
pub fn ensure_executable(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let meta = std::fs::metadata(path)?;
        let mode = meta.permissions().mode();
        if mode & 0o111 == 0 {
            info!(path = %path.display(), "Granting execute permission to proxy binary");
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode | 0o755))?;
        }
    }

    #[cfg(not(unix))]
    {
        std::fs::metadata(path)?;
    }

    Ok(())
}

/// Last `lines` lines of a log file, or None if it is missing or empty
fn read_log_tail(path: &Path, lines: usize) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    let all: Vec<&str> = content.lines().collect();
    let start = all.len().saturating_sub(lines);
    let tail = all[start..].join("\n");
    if tail.trim().is_empty() {
        None
    } else {
        Some(tail)
    }
}
