//! Registry credential resolution.
//!
//! Resolves the credentials to use for an image reference in order:
//! explicitly configured credentials, then environment variables, then the
//! `auths` table of the Docker config file (`$DOCKER_CONFIG/config.json`
//! or `~/.docker/config.json`). Credential helpers declared in the config
//! file are recognized but never executed.

use crate::config::{RegistryCredentials, DEFAULT_REGISTRY_URL};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bollard::auth::DockerCredentials;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Locates registry credentials for image references.
#[derive(Debug, Clone)]
pub struct RegistryAuthLocator {
    config_path: PathBuf,
}

impl Default for RegistryAuthLocator {
    fn default() -> Self {
        Self {
            config_path: default_config_path(),
        }
    }
}

impl RegistryAuthLocator {
    /// Locator reading the default Docker config file location.
    pub fn new() -> Self {
        Self::default()
    }

    /// Locator reading a specific config file path.
    pub fn with_config_path(path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: path.into(),
        }
    }

    /// Resolve the credentials to use for `image`.
    ///
    /// Explicit credentials carrying both username and password win
    /// outright; environment credentials come next; otherwise the Docker
    /// config file is consulted for the image's registry. Falls back to
    /// the explicit credentials when nothing else matches.
    pub fn lookup(&self, image: &str, explicit: &RegistryCredentials) -> RegistryCredentials {
        if explicit.username.is_some() && explicit.password.is_some() {
            return explicit.clone();
        }

        if let Some(env) = env_credentials() {
            debug!(image, "using registry credentials from environment");
            return env;
        }

        let registry = registry_for_image(image);
        match self.lookup_in_config_file(&registry) {
            Some(credentials) => credentials,
            None => explicit.clone(),
        }
    }

    fn lookup_in_config_file(&self, registry: &str) -> Option<RegistryCredentials> {
        let content = match fs::read_to_string(&self.config_path) {
            Ok(content) => content,
            Err(_) => {
                debug!(
                    path = %self.config_path.display(),
                    "docker config file not readable, skipping"
                );
                return None;
            }
        };

        let parsed: DockerConfigFile = match serde_json::from_str(&content) {
            Ok(parsed) => parsed,
            Err(error) => {
                warn!(
                    path = %self.config_path.display(),
                    %error,
                    "failed to parse docker config file"
                );
                return None;
            }
        };

        let scheme_suffix = format!("://{}", registry);
        if let Some((key, entry)) = parsed
            .auths
            .iter()
            .find(|(key, _)| key.as_str() == registry || key.ends_with(&scheme_suffix))
        {
            if let Some(credentials) = decode_auth_entry(key, entry) {
                debug!(registry, "found credentials in docker config file");
                return Some(credentials);
            }
        }

        if parsed.cred_helpers.contains_key(registry) {
            debug!(
                registry,
                "credential helper configured but helpers are not executed"
            );
        } else if parsed.creds_store.is_some() {
            debug!(
                registry,
                "credential store configured but helpers are not executed"
            );
        }

        None
    }
}

/// Derive the registry for an image reference: the first path segment when
/// it names a host (contains `.` or `:`, or is `localhost`), otherwise the
/// Docker Hub default.
pub fn registry_for_image(image: &str) -> String {
    if let Some((first, _)) = image.split_once('/') {
        if first.contains('.') || first.contains(':') || first == "localhost" {
            return first.to_string();
        }
    }
    DEFAULT_REGISTRY_URL.to_string()
}

/// Credentials supplied through `DOCKFORGE_REGISTRY_*` variables, if both
/// username and password are present.
fn env_credentials() -> Option<RegistryCredentials> {
    let username = std::env::var("DOCKFORGE_REGISTRY_USERNAME").ok()?;
    let password = std::env::var("DOCKFORGE_REGISTRY_PASSWORD").ok()?;

    let mut credentials = RegistryCredentials::new()
        .with_username(username)
        .with_password(password);
    if let Ok(url) = std::env::var("DOCKFORGE_REGISTRY_URL") {
        credentials = credentials.with_url(url);
    }
    if let Ok(email) = std::env::var("DOCKFORGE_REGISTRY_EMAIL") {
        credentials = credentials.with_email(email);
    }
    Some(credentials)
}

fn default_config_path() -> PathBuf {
    let dir = std::env::var_os("DOCKER_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| home_dir().join(".docker"));
    dir.join("config.json")
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

#[derive(Debug, Deserialize)]
struct DockerConfigFile {
    #[serde(default)]
    auths: HashMap<String, AuthEntry>,
    #[serde(rename = "credHelpers", default)]
    cred_helpers: HashMap<String, String>,
    #[serde(rename = "credsStore", default)]
    creds_store: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct AuthEntry {
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

/// Decode one `auths` entry. The `auth` field holds base64 of
/// `username:password`; plain username/password fields are honored too.
fn decode_auth_entry(key: &str, entry: &AuthEntry) -> Option<RegistryCredentials> {
    if let Some(auth) = &entry.auth {
        let decoded = match BASE64.decode(auth) {
            Ok(decoded) => decoded,
            Err(error) => {
                warn!(registry = key, %error, "invalid base64 in auth entry");
                return None;
            }
        };
        let decoded = String::from_utf8_lossy(&decoded).into_owned();
        let (username, password) = match decoded.split_once(':') {
            Some(parts) => parts,
            None => {
                warn!(registry = key, "auth entry is not username:password");
                return None;
            }
        };
        let mut credentials = RegistryCredentials::new()
            .with_url(key)
            .with_username(username)
            .with_password(password);
        if let Some(email) = &entry.email {
            credentials = credentials.with_email(email.clone());
        }
        return Some(credentials);
    }

    match (&entry.username, &entry.password) {
        (Some(username), Some(password)) => {
            let mut credentials = RegistryCredentials::new()
                .with_url(key)
                .with_username(username.clone())
                .with_password(password.clone());
            if let Some(email) = &entry.email {
                credentials = credentials.with_email(email.clone());
            }
            Some(credentials)
        }
        _ => None,
    }
}

impl From<&RegistryCredentials> for DockerCredentials {
    fn from(credentials: &RegistryCredentials) -> Self {
        DockerCredentials {
            username: credentials.username.clone(),
            password: credentials.password.clone(),
            email: credentials.email.clone(),
            serveraddress: Some(credentials.url.clone()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(dir: &tempfile::TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("config.json");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, "{}", content).unwrap();
        path
    }

    #[test]
    fn test_registry_for_image() {
        assert_eq!(registry_for_image("ubuntu"), DEFAULT_REGISTRY_URL);
        assert_eq!(registry_for_image("myorg/app"), DEFAULT_REGISTRY_URL);
        assert_eq!(registry_for_image("quay.io/org/app:1.0"), "quay.io");
        assert_eq!(registry_for_image("localhost:5000/app"), "localhost:5000");
        assert_eq!(registry_for_image("localhost/app"), "localhost");
    }

    #[test]
    fn test_explicit_credentials_win() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"{"auths": {"quay.io": {"auth": "ZmlsZTpzZWNyZXQ="}}}"#,
        );

        let explicit = RegistryCredentials::new()
            .with_username("build")
            .with_password("pwd");
        let locator = RegistryAuthLocator::with_config_path(path);

        let resolved = locator.lookup("quay.io/org/app", &explicit);
        assert_eq!(resolved.username.as_deref(), Some("build"));
        assert_eq!(resolved.password.as_deref(), Some("pwd"));
    }

    #[test]
    fn test_config_file_auth_field_decodes() {
        let dir = tempfile::tempdir().unwrap();
        // "user:pass"
        let path = write_config(
            &dir,
            r#"{"auths": {"https://index.docker.io/v1/": {"auth": "dXNlcjpwYXNz"}}}"#,
        );

        let locator = RegistryAuthLocator::with_config_path(path);
        let resolved = locator.lookup("ubuntu", &RegistryCredentials::default());

        assert_eq!(resolved.url, DEFAULT_REGISTRY_URL);
        assert_eq!(resolved.username.as_deref(), Some("user"));
        assert_eq!(resolved.password.as_deref(), Some("pass"));
    }

    #[test]
    fn test_config_file_scheme_prefix_matches() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"{"auths": {"https://quay.io": {"username": "q", "password": "s"}}}"#,
        );

        let locator = RegistryAuthLocator::with_config_path(path);
        let resolved = locator.lookup("quay.io/org/app", &RegistryCredentials::default());

        assert_eq!(resolved.url, "https://quay.io");
        assert_eq!(resolved.username.as_deref(), Some("q"));
        assert_eq!(resolved.password.as_deref(), Some("s"));
    }

    #[test]
    fn test_missing_config_falls_back_to_explicit() {
        let locator = RegistryAuthLocator::with_config_path("/nonexistent/config.json");
        let explicit = RegistryCredentials::new().with_url("https://registry.example.com");

        let resolved = locator.lookup("registry.example.com/app", &explicit);
        assert_eq!(resolved.url, "https://registry.example.com");
        assert!(resolved.is_anonymous());
    }

    #[test]
    fn test_invalid_auth_entry_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, r#"{"auths": {"quay.io": {"auth": "!!!"}}}"#);

        let locator = RegistryAuthLocator::with_config_path(path);
        let resolved = locator.lookup("quay.io/org/app", &RegistryCredentials::default());
        assert!(resolved.is_anonymous());
    }

    #[test]
    fn test_docker_credentials_conversion() {
        let credentials = RegistryCredentials::new()
            .with_username("user")
            .with_password("pass");
        let docker: DockerCredentials = (&credentials).into();

        assert_eq!(docker.username.as_deref(), Some("user"));
        assert_eq!(docker.password.as_deref(), Some("pass"));
        assert_eq!(docker.serveraddress.as_deref(), Some(DEFAULT_REGISTRY_URL));
    }
}
