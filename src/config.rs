//! Daemon and registry configuration.
//!
//! This module provides the connection settings for the Docker daemon and
//! the registry credential surface, assembled once before any task executes
//! and validated fail-fast before the first remote call.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default registry endpoint used when none is configured.
pub const DEFAULT_REGISTRY_URL: &str = "https://index.docker.io/v1/";

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// Manifest could not be parsed.
    #[error("Manifest parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// IO error while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Connection settings for the Docker daemon.
#[derive(Debug, Clone, PartialEq)]
pub struct DaemonConfig {
    /// Daemon URL (unix socket, tcp/http, or npipe on Windows).
    pub url: String,
    /// Directory holding `key.pem`, `cert.pem` and `ca.pem` for TLS.
    pub cert_path: Option<PathBuf>,
    /// Whether to verify the daemon over TLS.
    pub tls_verify: bool,
    /// Remote API version as `major.minor`, negotiated by default.
    pub api_version: Option<String>,
    /// Connection timeout for daemon requests.
    pub connect_timeout: Duration,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            url: default_daemon_url(),
            cert_path: None,
            tls_verify: false,
            api_version: None,
            connect_timeout: Duration::from_secs(120),
        }
    }
}

fn default_daemon_url() -> String {
    if cfg!(windows) {
        "npipe:////./pipe/docker_engine".to_string()
    } else {
        "unix:///var/run/docker.sock".to_string()
    }
}

impl DaemonConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `DOCKER_HOST`: Daemon URL (default: platform socket)
    /// - `DOCKER_CERT_PATH`: TLS certificate directory
    /// - `DOCKER_TLS_VERIFY`: Enable TLS verification (boolean)
    /// - `DOCKER_API_VERSION`: Remote API version, e.g. `1.43`
    /// - `DOCKFORGE_CONNECT_TIMEOUT_SECS`: Connection timeout in seconds
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value or the
    /// resulting configuration does not validate.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Overlays environment variables onto the current values without
    /// validating, so explicit settings can still override them.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(val) = std::env::var("DOCKER_HOST") {
            self.url = val;
        }

        if let Ok(val) = std::env::var("DOCKER_CERT_PATH") {
            self.cert_path = Some(PathBuf::from(val));
        }

        if let Ok(val) = std::env::var("DOCKER_TLS_VERIFY") {
            self.tls_verify = parse_env_bool(&val, "DOCKER_TLS_VERIFY")?;
        }

        if let Ok(val) = std::env::var("DOCKER_API_VERSION") {
            self.api_version = Some(val);
        }

        if let Ok(val) = std::env::var("DOCKFORGE_CONNECT_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "DOCKFORGE_CONNECT_TIMEOUT_SECS")?;
            self.connect_timeout = Duration::from_secs(secs);
        }

        Ok(())
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "daemon url cannot be empty".to_string(),
            ));
        }

        let has_known_scheme = ["unix://", "tcp://", "http://", "https://", "npipe://"]
            .iter()
            .any(|scheme| self.url.starts_with(scheme));
        if !has_known_scheme {
            return Err(ConfigError::ValidationFailed(format!(
                "daemon url '{}' must start with unix://, tcp://, http://, https:// or npipe://",
                self.url
            )));
        }

        if self.connect_timeout.as_secs() == 0 {
            return Err(ConfigError::ValidationFailed(
                "connect_timeout must be greater than 0".to_string(),
            ));
        }

        if self.tls_verify {
            match &self.cert_path {
                Some(path) if path.is_dir() => {}
                Some(path) => {
                    return Err(ConfigError::ValidationFailed(format!(
                        "cert_path '{}' is not a directory",
                        path.display()
                    )));
                }
                None => {
                    return Err(ConfigError::ValidationFailed(
                        "tls_verify requires cert_path to be set".to_string(),
                    ));
                }
            }
        }

        if let Some(version) = &self.api_version {
            if parse_api_version(version).is_none() {
                return Err(ConfigError::ValidationFailed(format!(
                    "api_version '{}' must be formatted as major.minor",
                    version
                )));
            }
        }

        Ok(())
    }

    /// Builder method to set the daemon URL.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Builder method to set the TLS certificate directory.
    pub fn with_cert_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cert_path = Some(path.into());
        self
    }

    /// Builder method to enable or disable TLS verification.
    pub fn with_tls_verify(mut self, verify: bool) -> Self {
        self.tls_verify = verify;
        self
    }

    /// Builder method to pin the remote API version.
    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = Some(version.into());
        self
    }

    /// Builder method to set the connection timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// Credentials for a Docker registry.
///
/// Username, password and email are optional; pushes to protected
/// registries require at least a username and password.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryCredentials {
    /// Registry URL, defaulting to the Docker Hub index.
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub email: Option<String>,
}

impl Default for RegistryCredentials {
    fn default() -> Self {
        Self {
            url: DEFAULT_REGISTRY_URL.to_string(),
            username: None,
            password: None,
            email: None,
        }
    }
}

impl RegistryCredentials {
    /// Creates credentials with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates credentials from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `DOCKFORGE_REGISTRY_URL`: Registry URL (default: Docker Hub index)
    /// - `DOCKFORGE_REGISTRY_USERNAME`: Registry username
    /// - `DOCKFORGE_REGISTRY_PASSWORD`: Registry password
    /// - `DOCKFORGE_REGISTRY_EMAIL`: Registry email address
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut credentials = Self::default();
        credentials.apply_env();
        credentials.validate()?;
        Ok(credentials)
    }

    /// Overlays environment variables onto the current values without
    /// validating, so explicit settings can still override them.
    pub fn apply_env(&mut self) {
        if let Ok(val) = std::env::var("DOCKFORGE_REGISTRY_URL") {
            self.url = val;
        }

        if let Ok(val) = std::env::var("DOCKFORGE_REGISTRY_USERNAME") {
            self.username = Some(val);
        }

        if let Ok(val) = std::env::var("DOCKFORGE_REGISTRY_PASSWORD") {
            self.password = Some(val);
        }

        if let Ok(val) = std::env::var("DOCKFORGE_REGISTRY_EMAIL") {
            self.email = Some(val);
        }
    }

    /// Validates the credential values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "registry url cannot be empty".to_string(),
            ));
        }

        if self.password.is_some() && self.username.is_none() {
            return Err(ConfigError::ValidationFailed(
                "registry password requires a username".to_string(),
            ));
        }

        Ok(())
    }

    /// True when neither username nor password is set.
    pub fn is_anonymous(&self) -> bool {
        self.username.is_none() && self.password.is_none()
    }

    /// Builder method to set the registry URL.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Builder method to set the username.
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Builder method to set the password.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Builder method to set the email address.
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

/// Parse a `major.minor` API version string.
pub(crate) fn parse_api_version(version: &str) -> Option<(usize, usize)> {
    let (major, minor) = version.split_once('.')?;
    Some((major.parse().ok()?, minor.parse().ok()?))
}

/// Validate an image reference: `[registry[:port]/]repo[:tag][@digest]`.
///
/// Repository components must be lowercase; tags allow alphanumerics,
/// underscores, periods and hyphens up to 128 characters.
pub fn is_valid_image_ref(image: &str) -> bool {
    if image.is_empty() {
        return false;
    }

    let (name, digest) = match image.split_once('@') {
        Some((name, digest)) => (name, Some(digest)),
        None => (image, None),
    };
    if let Some(digest) = digest {
        if !digest.contains(':') {
            return false;
        }
    }

    let (repo, tag) = split_repo_tag(name);
    if repo.is_empty() {
        return false;
    }
    let repo_ok = repo.chars().all(|c| {
        c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-' | '/' | ':')
    });
    if !repo_ok {
        return false;
    }

    match tag {
        None => true,
        Some(tag) => is_valid_tag(tag),
    }
}

/// Validate an image tag.
pub fn is_valid_tag(tag: &str) -> bool {
    if tag.is_empty() || tag.len() > 128 {
        return false;
    }
    let mut chars = tag.chars();
    let first_ok = chars
        .next()
        .map(|c| c.is_ascii_alphanumeric() || c == '_')
        .unwrap_or(false);
    first_ok && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

/// Validate a container name: first character alphanumeric, the rest
/// alphanumeric, underscores, periods or hyphens, two characters minimum.
pub fn is_valid_container_name(name: &str) -> bool {
    let mut chars = name.chars();
    let first_ok = chars
        .next()
        .map(|c| c.is_ascii_alphanumeric())
        .unwrap_or(false);
    first_ok
        && name.len() >= 2
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

/// Split `repo[:tag]`, treating a colon followed by a slash as a registry
/// port rather than a tag separator.
pub(crate) fn split_repo_tag(name: &str) -> (&str, Option<&str>) {
    match name.rfind(':') {
        Some(index) if !name[index + 1..].contains('/') => {
            (&name[..index], Some(&name[index + 1..]))
        }
        _ => (name, None),
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}
