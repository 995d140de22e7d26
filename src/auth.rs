//! Admin credential resolution and HTTP Basic authentication
//!
//! The password is resolved once at startup, in this order:
//! 1. an explicit override (the `ADMIN_PASSWORD` environment variable)
//! 2. the `Password: ` line of a previously persisted credentials file
//! 3. a freshly generated 16 character alphanumeric secret, which is logged
//!    once and persisted for the next start

use base64::Engine;
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;
use std::io::Write;
use std::path::Path;
use tracing::{info, warn};

/// The single admin account name
pub const ADMIN_USERNAME: &str = "admin";

/// Environment variable overriding the admin password
pub const PASSWORD_ENV: &str = "ADMIN_PASSWORD";

/// Length of generated passwords
pub const GENERATED_PASSWORD_LEN: usize = 16;

const USERNAME_PREFIX: &str = "Username: ";
const PASSWORD_PREFIX: &str = "Password: ";

/// Where the admin password came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Override,
    File,
    Generated,
}

/// Admin username/password pair, immutable for the process lifetime
#[derive(Clone)]
pub struct Credentials {
    username: String,
    password: String,
    source: CredentialSource,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("source", &self.source)
            .finish()
    }
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            source: CredentialSource::Override,
        }
    }

    /// Resolve the admin credentials.
    ///
    /// Never fails: unreadable or unwritable credential files are logged and
    /// the next source is used. An existing file is never rewritten.
    pub fn resolve(password_override: Option<String>, password_file: &Path) -> Self {
        if let Some(password) = password_override.filter(|p| !p.is_empty()) {
            info!("Using admin password from {}", PASSWORD_ENV);
            return Self {
                username: ADMIN_USERNAME.to_string(),
                password,
                source: CredentialSource::Override,
            };
        }

        match read_password_file(password_file) {
            Ok(Some(password)) => {
                info!(path = %password_file.display(), "Loaded admin password from file");
                return Self {
                    username: ADMIN_USERNAME.to_string(),
                    password,
                    source: CredentialSource::File,
                };
            }
            Ok(None) => {}
            Err(e) => {
                warn!(path = %password_file.display(), error = %e, "Failed to read password file");
            }
        }

        let password = generate_password();
        info!(
            username = ADMIN_USERNAME,
            password = %password,
            "Generated admin credentials (set {} to use a fixed password)",
            PASSWORD_ENV
        );

        match write_password_file(password_file, ADMIN_USERNAME, &password) {
            Ok(()) => info!(path = %password_file.display(), "Admin credentials saved"),
            Err(e) => {
                warn!(path = %password_file.display(), error = %e, "Failed to save admin credentials")
            }
        }

        Self {
            username: ADMIN_USERNAME.to_string(),
            password,
            source: CredentialSource::Generated,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn source(&self) -> CredentialSource {
        self.source
    }

    /// Compare supplied credentials in constant time.
    /// Both fields are always compared so a wrong username costs the same as a wrong password.
    pub fn verify(&self, username: &str, password: &str) -> bool {
        let username_ok = constant_time_compare(&self.username, username);
        let password_ok = constant_time_compare(&self.password, password);
        username_ok & password_ok
    }

    /// Check an `Authorization` header value
    pub fn check_header(&self, header: Option<&str>) -> bool {
        header
            .and_then(parse_basic_auth)
            .map(|(username, password)| self.verify(&username, &password))
            .unwrap_or(false)
    }
}

/// Decode a `Basic <base64(user:pass)>` header value
pub fn parse_basic_auth(header: &str) -> Option<(String, String)> {
    let (scheme, encoded) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

/// Generate a random alphanumeric password from the OS random source
pub fn generate_password() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(GENERATED_PASSWORD_LEN)
        .map(char::from)
        .collect()
}

/// Read the password line from a credentials file.
/// Returns `Ok(None)` if the file does not exist or holds no password line.
pub fn read_password_file(path: &Path) -> std::io::Result<Option<String>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    Ok(content
        .lines()
        .find_map(|line| line.strip_prefix(PASSWORD_PREFIX))
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty()))
}

fn write_password_file(path: &Path, username: &str, password: &str) -> std::io::Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    write!(file, "{USERNAME_PREFIX}{username}\n{PASSWORD_PREFIX}{password}\n")?;
    file.sync_all()
}

/// Constant-time string comparison to prevent timing attacks
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}
