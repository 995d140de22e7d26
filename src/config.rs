use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings file looked up in the working directory when no path is given
pub const DEFAULT_SETTINGS_FILE: &str = "frpc-panel.toml";

/// Global configuration for the panel
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// HTTP listener configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Supervised proxy configuration
    #[serde(default)]
    pub proxy: ProxyConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Bind address (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind: String,

    /// Listen port (default: 8000)
    #[serde(default = "default_listen_port")]
    pub port: u16,

    /// Directory holding index.html and the assets/ folder
    #[serde(default = "default_static_dir")]
    pub static_dir: String,

    /// File the admin credentials are persisted to when generated.
    /// Stored in plain text; keep it readable only by the service user.
    #[serde(default = "default_password_file")]
    pub password_file: String,

    /// Enable TLS (default: false). If true without cert/key, generates self-signed.
    #[serde(default)]
    pub tls: bool,

    /// Path to TLS certificate file (PEM format)
    pub tls_cert: Option<String>,

    /// Path to TLS private key file (PEM format)
    pub tls_key: Option<String>,
}

impl ServerConfig {
    pub fn tls_enabled(&self) -> bool {
        self.tls || self.has_tls_files()
    }

    pub fn has_tls_files(&self) -> bool {
        self.tls_cert.is_some() && self.tls_key.is_some()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind_address(),
            port: default_listen_port(),
            static_dir: default_static_dir(),
            password_file: default_password_file(),
            tls: false,
            tls_cert: None,
            tls_key: None,
        }
    }
}

/// Configuration of the supervised proxy client
///
/// # Security Warning
///
/// `binary` and `args` are executed directly. Settings files must be
/// protected with appropriate file permissions.
#[derive(Debug, Deserialize, Clone)]
pub struct ProxyConfig {
    /// Proxy executable (default: ./frpc)
    #[serde(default = "default_binary")]
    pub binary: String,

    /// Arguments placed before the config path (default: ["-c"])
    #[serde(default = "default_args")]
    pub args: Vec<String>,

    /// Directory holding the TOML config files
    #[serde(default = "default_config_dir")]
    pub config_dir: String,

    /// Config file made active at startup
    #[serde(default = "default_active_config")]
    pub default_config: String,

    /// File receiving the proxy's combined stdout/stderr, truncated on every start
    #[serde(default = "default_log_file")]
    pub log_file: String,

    /// Grace period in seconds between SIGTERM and SIGKILL
    #[serde(default = "default_shutdown_grace_period")]
    pub shutdown_grace_period_secs: u64,
}

impl ProxyConfig {
    pub fn shutdown_grace_period(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_period_secs)
    }

    pub fn config_dir(&self) -> PathBuf {
        PathBuf::from(&self.config_dir)
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            args: default_args(),
            config_dir: default_config_dir(),
            default_config: default_active_config(),
            log_file: default_log_file(),
            shutdown_grace_period_secs: default_shutdown_grace_period(),
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_listen_port() -> u16 {
    8000
}

fn default_static_dir() -> String {
    "static".to_string()
}

fn default_password_file() -> String {
    "admin_password.txt".to_string()
}

fn default_binary() -> String {
    "./frpc".to_string()
}

fn default_args() -> Vec<String> {
    vec!["-c".to_string()]
}

fn default_config_dir() -> String {
    ".".to_string()
}

fn default_active_config() -> String {
    "frpc.toml".to_string()
}

fn default_log_file() -> String {
    "frpc.log".to_string()
}

fn default_shutdown_grace_period() -> u64 {
    5
}

impl Config {
    /// Load and validate a settings file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read settings file '{}': {}", path.display(), e)
        })?;
        let config: Config = toml::from_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse settings file '{}': {}", path.display(), e)
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load the given settings file, or `frpc-panel.toml` if it exists,
    /// falling back to built-in defaults.
    pub fn load_or_default(path: Option<&Path>) -> anyhow::Result<(Self, Option<PathBuf>)> {
        if let Some(path) = path {
            return Ok((Self::load(path)?, Some(path.to_path_buf())));
        }

        let fallback = PathBuf::from(DEFAULT_SETTINGS_FILE);
        if fallback.is_file() {
            let config = Self::load(&fallback)?;
            return Ok((config, Some(fallback)));
        }

        Ok((Self::default(), None))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("server.port must not be 0");
        }
        if self.server.tls_cert.is_some() != self.server.tls_key.is_some() {
            anyhow::bail!("server.tls_cert and server.tls_key must be set together");
        }
        if self.proxy.binary.trim().is_empty() {
            anyhow::bail!("proxy.binary must not be empty");
        }
        if !crate::store::is_valid_filename(&self.proxy.default_config) {
            anyhow::bail!(
                "proxy.default_config must be a plain *.toml file name, got '{}'",
                self.proxy.default_config
            );
        }
        if self.proxy.shutdown_grace_period_secs == 0 {
            anyhow::bail!("proxy.shutdown_grace_period_secs must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_config() {
        let toml = r#"
[server]
bind = "127.0.0.1"
port = 9090
static_dir = "/srv/panel"
password_file = "/etc/frpc-panel/credentials"

[proxy]
binary = "/usr/local/bin/frpc"
args = ["--config"]
config_dir = "/etc/frp"
default_config = "home.toml"
log_file = "/var/log/frpc.log"
shutdown_grace_period_secs = 10
"#;

        let config: Config = toml::from_str(toml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.server.bind, "127.0.0.1");
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.static_dir, "/srv/panel");
        assert_eq!(config.server.password_file, "/etc/frpc-panel/credentials");
        assert!(!config.server.tls_enabled());

        assert_eq!(config.proxy.binary, "/usr/local/bin/frpc");
        assert_eq!(config.proxy.args, vec!["--config".to_string()]);
        assert_eq!(config.proxy.config_dir(), PathBuf::from("/etc/frp"));
        assert_eq!(config.proxy.default_config, "home.toml");
        assert_eq!(config.proxy.shutdown_grace_period(), Duration::from_secs(10));
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        config.validate().unwrap();

        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.server.static_dir, "static");
        assert_eq!(config.server.password_file, "admin_password.txt");
        assert_eq!(config.proxy.binary, "./frpc");
        assert_eq!(config.proxy.args, vec!["-c".to_string()]);
        assert_eq!(config.proxy.config_dir, ".");
        assert_eq!(config.proxy.default_config, "frpc.toml");
        assert_eq!(config.proxy.log_file, "frpc.log");
        assert_eq!(config.proxy.shutdown_grace_period(), Duration::from_secs(5));
    }

    #[test]
    fn test_tls_enabled() {
        let config: Config = toml::from_str("[server]\ntls = true\n").unwrap();
        assert!(config.server.tls_enabled());
        assert!(!config.server.has_tls_files());

        let config: Config = toml::from_str(
            "[server]\ntls_cert = \"cert.pem\"\ntls_key = \"key.pem\"\n",
        )
        .unwrap();
        assert!(config.server.tls_enabled());
        assert!(config.server.has_tls_files());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config: Config = toml::from_str("[server]\nport = 0\n").unwrap();
        assert!(config.validate().is_err());

        let config: Config = toml::from_str("[server]\ntls_cert = \"cert.pem\"\n").unwrap();
        assert!(config.validate().is_err());

        let config: Config = toml::from_str("[proxy]\ndefault_config = \"../frpc.toml\"\n").unwrap();
        assert!(config.validate().is_err());

        let config: Config = toml::from_str("[proxy]\ndefault_config = \"frpc.ini\"\n").unwrap();
        assert!(config.validate().is_err());

        let config: Config = toml::from_str("[proxy]\nshutdown_grace_period_secs = 0\n").unwrap();
        assert!(config.validate().is_err());

        let config: Config = toml::from_str("[proxy]\nbinary = \"  \"\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nport = 8123").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.server.port, 8123);

        let (config, source) = Config::load_or_default(Some(file.path())).unwrap();
        assert_eq!(config.server.port, 8123);
        assert_eq!(source.as_deref(), Some(file.path()));
    }

    #[test]
    fn test_load_reports_parse_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server\nport = ").unwrap();

        let err = Config::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse settings file"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load("/nonexistent/frpc-panel.toml").unwrap_err();
        assert!(err.to_string().contains("Failed to read settings file"));
    }
}
