//! TOML config file storage
//!
//! The config directory on disk is the only source of truth: every read goes
//! to disk and every write is synced before returning.

use crate::error::{PanelError, PanelResult};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Suffix every config file carries
pub const CONFIG_EXTENSION: &str = ".toml";

/// Content written by [`ConfigStore::create`]
pub const DEFAULT_TEMPLATE: &str = r#"# New frpc configuration
serverAddr = "127.0.0.1"
serverPort = 7000
"#;

/// Whether `name` is a plain `*.toml` file name inside the config directory.
///
/// The config directory may also hold the proxy binary, its log and the
/// password file; the suffix check keeps those out of reach.
pub fn is_valid_filename(name: &str) -> bool {
    name.len() > CONFIG_EXTENSION.len()
        && name.ends_with(CONFIG_EXTENSION)
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0'])
}

/// Append the `.toml` suffix unless it is already present
pub fn with_extension(name: &str) -> String {
    if name.ends_with(CONFIG_EXTENSION) {
        name.to_string()
    } else {
        format!("{name}{CONFIG_EXTENSION}")
    }
}

/// Parse `content` as TOML, returning the parser message on failure
pub fn validate_toml(content: &str) -> PanelResult<()> {
    content
        .parse::<toml::Table>()
        .map(|_| ())
        .map_err(|e| PanelError::InvalidToml(e.message().to_string()))
}

/// Config files in a single directory
#[derive(Debug, Clone)]
pub struct ConfigStore {
    dir: PathBuf,
}

impl ConfigStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Absolute-or-relative path of a config file, after validating its name
    pub fn path_of(&self, filename: &str) -> PanelResult<PathBuf> {
        if !is_valid_filename(filename) {
            return Err(PanelError::InvalidFilename(filename.to_string()));
        }
        Ok(self.dir.join(filename))
    }

    pub async fn exists(&self, filename: &str) -> PanelResult<bool> {
        let path = self.path_of(filename)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Names of all non-hidden `*.toml` files, sorted
    pub async fn list(&self) -> PanelResult<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut names = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with('.') || !name.ends_with(CONFIG_EXTENSION) {
                continue;
            }
            if entry.file_type().await?.is_file() {
                names.push(name);
            }
        }

        names.sort();
        Ok(names)
    }

    /// Create a config from the default template; returns the stored file name
    pub async fn create(&self, filename: &str) -> PanelResult<String> {
        let filename = with_extension(filename.trim());
        let path = self.path_of(&filename)?;

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => PanelError::AlreadyExists(filename.clone()),
                _ => PanelError::Io(e),
            })?;
        file.write_all(DEFAULT_TEMPLATE.as_bytes()).await?;
        file.sync_all().await?;

        info!(filename = %filename, "Config file created");
        Ok(filename)
    }

    pub async fn read(&self, filename: &str) -> PanelResult<String> {
        let path = self.path_of(filename)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(PanelError::NotFound(filename.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Validate then atomically replace (or create) a config file.
    /// Invalid TOML never reaches the disk.
    pub async fn update(&self, filename: &str, content: &str) -> PanelResult<()> {
        let path = self.path_of(filename)?;
        validate_toml(content)?;

        let dir = self.dir.clone();
        let content = content.to_owned();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
            tmp.write_all(content.as_bytes())?;
            // keep the mode of the file being replaced
            match std::fs::metadata(&path) {
                Ok(meta) => tmp.as_file().set_permissions(meta.permissions())?,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
            tmp.as_file().sync_all()?;
            tmp.persist(&path).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| PanelError::Io(std::io::Error::other(e)))??;

        debug!(filename, "Config file written");
        Ok(())
    }

    pub async fn delete(&self, filename: &str) -> PanelResult<()> {
        let path = self.path_of(filename)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!(filename, "Config file deleted");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(PanelError::NotFound(filename.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
