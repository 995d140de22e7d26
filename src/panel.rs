//! The control panel: config file management tied to the supervised proxy
//!
//! `ControlPanel` is the object handed to the HTTP layer. It owns the
//! [`ConfigStore`] and shares the [`Supervisor`], so every operation that
//! touches both (updating or deleting the active config, switching configs)
//! lives in one place.

use crate::error::{PanelError, PanelResult};
use crate::process::{ProxyStatus, Supervisor};
use crate::store::ConfigStore;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Shown by [`ControlPanel::logs`] when the proxy never wrote a log
pub const NO_LOGS_MESSAGE: &str = "No logs yet";

/// Result of listing the config directory
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigListing {
    pub configs: Vec<String>,
    pub active: String,
}

/// What an update did besides writing the file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Saved,
    SavedAndRestarted,
}

pub struct ControlPanel {
    store: ConfigStore,
    supervisor: Arc<Supervisor>,
}

impl ControlPanel {
    pub fn new(store: ConfigStore, supervisor: Arc<Supervisor>) -> Arc<Self> {
        Arc::new(Self { store, supervisor })
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    pub async fn list_configs(&self) -> PanelResult<ConfigListing> {
        Ok(ConfigListing {
            configs: self.store.list().await?,
            active: self.supervisor.active_config().await,
        })
    }

    /// Create a config from the default template, returning its stored name
    pub async fn create_config(&self, filename: &str) -> PanelResult<String> {
        self.store.create(filename).await
    }

    pub async fn read_config(&self, filename: &str) -> PanelResult<String> {
        self.store.read(filename).await
    }

    /// Write a config. Saving the active config restarts the proxy with it.
    ///
    /// Operations that touch both a file and the proxy hold the supervisor
    /// lock throughout, so a concurrent run or switch cannot slip in between.
    pub async fn update_config(&self, filename: &str, content: &str) -> PanelResult<UpdateOutcome> {
        let mut supervisor = self.supervisor.lock().await;
        self.store.update(filename, content).await?;

        if filename == supervisor.active_config() {
            info!(filename, "Active config changed, restarting proxy");
            supervisor.restart().await;
            Ok(UpdateOutcome::SavedAndRestarted)
        } else {
            Ok(UpdateOutcome::Saved)
        }
    }

    /// Delete a config unless the proxy is currently running with it
    pub async fn delete_config(&self, filename: &str) -> PanelResult<()> {
        let mut supervisor = self.supervisor.lock().await;
        if !self.store.exists(filename).await? {
            return Err(PanelError::NotFound(filename.to_string()));
        }
        if supervisor.is_running_with(filename) {
            return Err(PanelError::InUse(filename.to_string()));
        }
        self.store.delete(filename).await
    }

    /// Switch the active config and restart the proxy with it
    pub async fn run_config(&self, filename: &str) -> PanelResult<Option<u32>> {
        let mut supervisor = self.supervisor.lock().await;
        if !self.store.exists(filename).await? {
            return Err(PanelError::NotFound(filename.to_string()));
        }
        info!(filename, "Switching active config");
        Ok(supervisor.start(filename).await)
    }

    pub async fn stop(&self) {
        self.supervisor.stop().await;
    }

    pub async fn status(&self) -> ProxyStatus {
        self.supervisor.status().await
    }

    /// Full content of the proxy log file.
    /// Read failures are reported in the returned text rather than as errors.
    pub async fn logs(&self) -> String {
        match tokio::fs::read(self.supervisor.log_file()).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => NO_LOGS_MESSAGE.to_string(),
            Err(e) => format!("Failed to read logs: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{ProxyState, SupervisorConfig};
    use crate::store::DEFAULT_TEMPLATE;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;

    fn panel(dir: &TempDir) -> Arc<ControlPanel> {
        std::fs::write(dir.path().join("frpc.toml"), "serverPort = 7000\n").unwrap();
        let supervisor = Supervisor::new(
            SupervisorConfig {
                binary: PathBuf::from("/bin/sh"),
                args: vec!["-c".to_string(), "echo \"using $0\"; exec sleep 30".to_string()],
                config_dir: dir.path().to_path_buf(),
                log_file: dir.path().join("frpc.log"),
                grace_period: Duration::from_secs(2),
            },
            "frpc.toml",
        );
        ControlPanel::new(ConfigStore::new(dir.path()), supervisor)
    }

    #[tokio::test]
    async fn test_list_includes_active() {
        let dir = TempDir::new().unwrap();
        let panel = panel(&dir);
        panel.create_config("office").await.unwrap();

        let listing = panel.list_configs().await.unwrap();
        assert_eq!(listing.configs, vec!["frpc.toml".to_string(), "office.toml".to_string()]);
        assert_eq!(listing.active, "frpc.toml");
    }

    #[tokio::test]
    async fn test_update_inactive_config_does_not_restart() {
        let dir = TempDir::new().unwrap();
        let panel = panel(&dir);
        panel.create_config("office").await.unwrap();

        let outcome = panel.update_config("office.toml", "serverPort = 7001\n").await.unwrap();
        assert_eq!(outcome, UpdateOutcome::Saved);
        assert_eq!(panel.status().await.status, ProxyState::Stopped);
    }

    #[tokio::test]
    async fn test_update_active_config_restarts() {
        let dir = TempDir::new().unwrap();
        let panel = panel(&dir);
        let before = panel.supervisor().restart().await.unwrap();

        let outcome = panel.update_config("frpc.toml", "serverPort = 7002\n").await.unwrap();
        assert_eq!(outcome, UpdateOutcome::SavedAndRestarted);

        let status = panel.status().await;
        assert_eq!(status.status, ProxyState::Running);
        assert_ne!(status.pid, Some(before));
        panel.stop().await;
    }

    #[tokio::test]
    async fn test_invalid_update_does_not_restart() {
        let dir = TempDir::new().unwrap();
        let panel = panel(&dir);
        let pid = panel.supervisor().restart().await.unwrap();

        let err = panel.update_config("frpc.toml", "not valid toml {{{").await.unwrap_err();
        assert!(matches!(err, PanelError::InvalidToml(_)));
        assert_eq!(panel.status().await.pid, Some(pid));
        panel.stop().await;
    }

    #[tokio::test]
    async fn test_delete_active_running_config_is_refused() {
        let dir = TempDir::new().unwrap();
        let panel = panel(&dir);
        panel.supervisor().restart().await.unwrap();

        let err = panel.delete_config("frpc.toml").await.unwrap_err();
        assert!(matches!(err, PanelError::InUse(_)));

        panel.stop().await;
        panel.delete_config("frpc.toml").await.unwrap();
        assert!(!dir.path().join("frpc.toml").exists());
    }

    #[tokio::test]
    async fn test_delete_inactive_while_running() {
        let dir = TempDir::new().unwrap();
        let panel = panel(&dir);
        panel.create_config("office").await.unwrap();
        panel.supervisor().restart().await.unwrap();

        panel.delete_config("office.toml").await.unwrap();
        panel.stop().await;
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let panel = panel(&dir);
        assert!(matches!(
            panel.delete_config("nope.toml").await.unwrap_err(),
            PanelError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_run_switches_and_starts() {
        let dir = TempDir::new().unwrap();
        let panel = panel(&dir);
        panel.create_config("office").await.unwrap();

        let pid = panel.run_config("office.toml").await.unwrap();
        assert!(pid.is_some());

        let status = panel.status().await;
        assert_eq!(status.status, ProxyState::Running);
        assert_eq!(status.active_config, "office.toml");
        assert_eq!(panel.list_configs().await.unwrap().active, "office.toml");
        panel.stop().await;
    }

    #[tokio::test]
    async fn test_run_missing_keeps_active() {
        let dir = TempDir::new().unwrap();
        let panel = panel(&dir);

        let err = panel.run_config("nope.toml").await.unwrap_err();
        assert!(matches!(err, PanelError::NotFound(_)));
        assert_eq!(panel.status().await.active_config, "frpc.toml");
    }

    #[tokio::test]
    async fn test_concurrent_delete_and_run_never_both_succeed() {
        let dir = TempDir::new().unwrap();
        let panel = panel(&dir);

        for _ in 0..20 {
            panel.create_config("b").await.unwrap();

            let (deleted, ran) =
                tokio::join!(panel.delete_config("b.toml"), panel.run_config("b.toml"));
            match (deleted, ran) {
                (Ok(()), Err(PanelError::NotFound(_))) => {
                    assert!(!dir.path().join("b.toml").exists());
                    assert!(!panel.supervisor().is_running_with("b.toml").await);
                }
                (Err(PanelError::InUse(_)), Ok(_)) => {
                    assert!(dir.path().join("b.toml").exists());
                    assert!(panel.supervisor().is_running_with("b.toml").await);
                    panel.stop().await;
                    panel.delete_config("b.toml").await.unwrap();
                }
                (deleted, ran) => panic!("interleaved delete/run: {deleted:?} / {ran:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_non_toml_files_cannot_be_touched() {
        let dir = TempDir::new().unwrap();
        let panel = panel(&dir);
        std::fs::write(dir.path().join("frpc"), "binary").unwrap();

        assert!(matches!(
            panel.update_config("frpc", "").await.unwrap_err(),
            PanelError::InvalidFilename(_)
        ));
        assert!(matches!(
            panel.run_config("frpc").await.unwrap_err(),
            PanelError::InvalidFilename(_)
        ));
        assert_eq!(std::fs::read_to_string(dir.path().join("frpc")).unwrap(), "binary");
    }

    #[tokio::test]
    async fn test_logs() {
        let dir = TempDir::new().unwrap();
        let panel = panel(&dir);
        assert_eq!(panel.logs().await, NO_LOGS_MESSAGE);

        panel.supervisor().restart().await.unwrap();
        let mut logs = String::new();
        for _ in 0..100 {
            logs = panel.logs().await;
            if logs.contains("using") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(logs.contains("frpc.toml"), "logs: {logs}");
        panel.stop().await;
    }

    #[tokio::test]
    async fn test_create_uses_template() {
        let dir = TempDir::new().unwrap();
        let panel = panel(&dir);
        let name = panel.create_config("lab").await.unwrap();
        assert_eq!(panel.read_config(&name).await.unwrap(), DEFAULT_TEMPLATE);
    }
}
