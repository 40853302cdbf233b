//! Pipeline manifest parsing.
//!
//! A manifest is a YAML file describing a Dockerfile, an image build and
//! a container in one place. Unknown fields are rejected so typos fail
//! fast instead of silently configuring nothing.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::client::{ContainerSpec, ImageBuildSpec};
use crate::config::{
    is_valid_container_name, is_valid_image_ref, ConfigError, DaemonConfig, RegistryCredentials,
};
use crate::dockerfile::Dockerfile;
use crate::error::DockerfileError;

/// Default manifest file name.
pub const DEFAULT_MANIFEST: &str = "dockforge.yaml";

/// A parsed pipeline manifest.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    /// Daemon connection overrides.
    #[serde(default)]
    pub daemon: DaemonSection,
    /// Registry credential overrides.
    #[serde(default)]
    pub registry: RegistrySection,
    /// Dockerfile to render.
    #[serde(default)]
    pub dockerfile: Option<DockerfileSection>,
    /// Image build settings.
    #[serde(default)]
    pub image: Option<ImageSection>,
    /// Container settings.
    #[serde(default)]
    pub container: Option<ContainerSection>,
}

impl Manifest {
    /// Loads and validates a manifest file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Io` when the file cannot be read,
    /// `ConfigError::Yaml` when it does not parse and
    /// `ConfigError::ValidationFailed` for invalid values.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parses and validates a manifest from a YAML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let manifest: Manifest = serde_yaml::from_str(content)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Validates image references and the container name.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(image) = &self.image {
            for tag in &image.tags {
                if !is_valid_image_ref(tag) {
                    return Err(ConfigError::ValidationFailed(format!(
                        "invalid image reference '{}'",
                        tag
                    )));
                }
            }
        }
        if let Some(container) = &self.container {
            if let Some(name) = &container.name {
                if !is_valid_container_name(name) {
                    return Err(ConfigError::ValidationFailed(format!(
                        "invalid container name '{}'",
                        name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Resolves the daemon configuration: explicit manifest values win
    /// over `DOCKER_*` environment variables, which win over defaults.
    pub fn daemon_config(&self) -> Result<DaemonConfig, ConfigError> {
        self.daemon.to_config()
    }

    /// Resolves registry credentials: explicit manifest values win over
    /// `DOCKFORGE_REGISTRY_*` environment variables.
    pub fn registry_credentials(&self) -> Result<RegistryCredentials, ConfigError> {
        self.registry.to_credentials()
    }

    /// Where the rendered Dockerfile is written: the section's explicit
    /// destination, or the image build context joined with the build's
    /// Dockerfile name.
    pub fn dockerfile_destination(&self) -> PathBuf {
        if let Some(destination) = self
            .dockerfile
            .as_ref()
            .and_then(|section| section.destination.clone())
        {
            return destination;
        }
        let name = self
            .image
            .as_ref()
            .and_then(|image| image.dockerfile.clone())
            .unwrap_or_else(|| "Dockerfile".to_string());
        match &self.image {
            Some(image) => image.context.join(name),
            None => PathBuf::from(name),
        }
    }
}

/// Daemon connection settings, all optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DaemonSection {
    pub url: Option<String>,
    pub cert_path: Option<PathBuf>,
    pub tls_verify: Option<bool>,
    pub api_version: Option<String>,
    pub connect_timeout_secs: Option<u64>,
}

impl DaemonSection {
    fn to_config(&self) -> Result<DaemonConfig, ConfigError> {
        let mut config = DaemonConfig::default();
        config.apply_env()?;
        if let Some(url) = &self.url {
            config.url = url.clone();
        }
        if let Some(cert_path) = &self.cert_path {
            config.cert_path = Some(cert_path.clone());
        }
        if let Some(tls_verify) = self.tls_verify {
            config.tls_verify = tls_verify;
        }
        if let Some(api_version) = &self.api_version {
            config.api_version = Some(api_version.clone());
        }
        if let Some(secs) = self.connect_timeout_secs {
            config.connect_timeout = Duration::from_secs(secs);
        }
        config.validate()?;
        Ok(config)
    }
}

/// Registry credentials, all optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistrySection {
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub email: Option<String>,
}

impl RegistrySection {
    fn to_credentials(&self) -> Result<RegistryCredentials, ConfigError> {
        let mut credentials = RegistryCredentials::default();
        credentials.apply_env();
        if let Some(url) = &self.url {
            credentials.url = url.clone();
        }
        if let Some(username) = &self.username {
            credentials.username = Some(username.clone());
        }
        if let Some(password) = &self.password {
            credentials.password = Some(password.clone());
        }
        if let Some(email) = &self.email {
            credentials.email = Some(email.clone());
        }
        credentials.validate()?;
        Ok(credentials)
    }
}

/// Dockerfile instructions, from a template file and/or inline lines.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DockerfileSection {
    /// Template file loaded first.
    pub template: Option<PathBuf>,
    /// Raw instruction lines appended after the template.
    #[serde(default)]
    pub instructions: Vec<String>,
    /// Variables substituted into the template.
    #[serde(default)]
    pub variables: HashMap<String, String>,
    /// Where to write the rendered file.
    pub destination: Option<PathBuf>,
}

impl DockerfileSection {
    /// Builds the instruction sequence this section describes.
    pub fn build(&self) -> Result<Dockerfile, DockerfileError> {
        let mut dockerfile = Dockerfile::new();
        if let Some(template) = &self.template {
            if self.variables.is_empty() {
                dockerfile.instructions_from_template(template)?;
            } else {
                dockerfile.instructions_from_template_with_vars(template, &self.variables)?;
            }
        }
        for line in &self.instructions {
            dockerfile.instruction(line);
        }
        Ok(dockerfile)
    }
}

/// Image build settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImageSection {
    /// Build context directory.
    pub context: PathBuf,
    /// Image tags, first tag applied at build time.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Build arguments.
    #[serde(default)]
    pub build_args: BTreeMap<String, String>,
    /// Dockerfile name within the context.
    pub dockerfile: Option<String>,
    /// Always attempt to pull newer base images.
    #[serde(default)]
    pub pull: bool,
    /// Disable the build cache.
    #[serde(default)]
    pub no_cache: bool,
}

impl ImageSection {
    /// Converts the section into a build spec.
    pub fn to_spec(&self) -> Result<ImageBuildSpec, ConfigError> {
        let first = self.tags.first().ok_or_else(|| {
            ConfigError::ValidationFailed("image.tags must contain at least one tag".to_string())
        })?;
        let mut spec = ImageBuildSpec::new(&self.context, first);
        for tag in self.tags.iter().skip(1) {
            spec = spec.with_tag(tag);
        }
        if let Some(dockerfile) = &self.dockerfile {
            spec = spec.with_dockerfile(dockerfile);
        }
        for (key, value) in &self.build_args {
            spec = spec.with_build_arg(key, value);
        }
        spec = spec.with_pull(self.pull).with_no_cache(self.no_cache);
        Ok(spec)
    }
}

/// Container settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContainerSection {
    /// Container name; required for `down` and `logs`.
    pub name: Option<String>,
    /// Port bindings as `host:container[/proto]` or bare container ports.
    #[serde(default)]
    pub ports: Vec<String>,
    /// Environment variables.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Host bind mounts as `host:container[:mode]`.
    #[serde(default)]
    pub binds: Vec<String>,
    /// Links to other containers.
    #[serde(default)]
    pub links: Vec<String>,
    /// Remove the container when it exits.
    #[serde(default)]
    pub auto_remove: bool,
    /// Allocate a pseudo-TTY.
    #[serde(default)]
    pub tty: bool,
    /// Command overriding the image default.
    #[serde(default)]
    pub command: Vec<String>,
    /// Grace period for `stop` before the daemon kills the container.
    pub stop_timeout_secs: Option<i64>,
}

impl ContainerSection {
    /// Converts the section into a container spec.
    pub fn to_spec(&self) -> ContainerSpec {
        let mut spec = ContainerSpec::new();
        if let Some(name) = &self.name {
            spec = spec.with_name(name);
        }
        for port in &self.ports {
            spec = spec.with_port_binding(port);
        }
        for (key, value) in &self.env {
            spec = spec.with_env(key, value);
        }
        for bind in &self.binds {
            spec = spec.with_bind(bind);
        }
        for link in &self.links {
            spec = spec.with_link(link);
        }
        if !self.command.is_empty() {
            spec = spec.with_cmd(self.command.clone());
        }
        spec.with_auto_remove(self.auto_remove).with_tty(self.tty)
    }
}
