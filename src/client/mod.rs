//! Docker Remote API wrapper using the bollard crate.
//!
//! One `DockerClient` is shared by every task in a run. It owns the daemon
//! connection resolved from a `DaemonConfig` and exposes the image and
//! container operations the task set is built from, each issuing exactly
//! one logical daemon request.

pub mod archive;
pub mod logs;

use std::collections::HashMap;
use std::path::PathBuf;
use std::pin::Pin;

use bollard::auth::DockerCredentials;
use bollard::container::{
    Config, CreateContainerOptions, LogsOptions, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::{
    BuildImageOptions, CreateImageOptions, ListImagesOptions, PushImageOptions,
    RemoveImageOptions, TagImageOptions,
};
use bollard::models::{BuildInfoAux, HostConfig, ImageSummary, PortBinding};
use bollard::{ClientVersion, Docker, API_DEFAULT_VERSION};
use futures::{Stream, StreamExt};
use tracing::{debug, info, warn};

use crate::config::{parse_api_version, split_repo_tag, DaemonConfig, RegistryCredentials};
use crate::error::RemoteApiError;

pub use self::logs::{LogLine, LogSource, LogStreamOptions};

/// Inputs for an image build.
#[derive(Debug, Clone)]
pub struct ImageBuildSpec {
    /// Directory archived and sent to the daemon as the build context.
    pub context_dir: PathBuf,
    /// Dockerfile path relative to the context.
    pub dockerfile: String,
    /// Tags applied to the built image; the first tag names the build.
    pub tags: Vec<String>,
    /// Build-time variables passed as `--build-arg` equivalents.
    pub build_args: HashMap<String, String>,
    /// Disable the layer cache.
    pub no_cache: bool,
    /// Always attempt to pull newer base images.
    pub pull: bool,
    /// Remove intermediate containers after a successful build.
    pub remove_intermediate: bool,
}

impl ImageBuildSpec {
    /// Creates a build spec for a context directory and a first tag.
    pub fn new(context_dir: impl Into<PathBuf>, tag: impl Into<String>) -> Self {
        Self {
            context_dir: context_dir.into(),
            dockerfile: "Dockerfile".to_string(),
            tags: vec![tag.into()],
            build_args: HashMap::new(),
            no_cache: false,
            pull: false,
            remove_intermediate: true,
        }
    }

    /// Builder method to set the Dockerfile path within the context.
    pub fn with_dockerfile(mut self, dockerfile: impl Into<String>) -> Self {
        self.dockerfile = dockerfile.into();
        self
    }

    /// Builder method to add another tag for the built image.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Builder method to add a build argument.
    pub fn with_build_arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.build_args.insert(key.into(), value.into());
        self
    }

    /// Builder method to disable the layer cache.
    pub fn with_no_cache(mut self, no_cache: bool) -> Self {
        self.no_cache = no_cache;
        self
    }

    /// Builder method to always pull newer base images.
    pub fn with_pull(mut self, pull: bool) -> Self {
        self.pull = pull;
        self
    }
}

/// Host-side configuration for creating a container.
///
/// The image reference is supplied separately at create time, so the same
/// surface can be wired against a literal reference or the output of a
/// build task.
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    /// Container name; the daemon assigns one when absent.
    pub name: Option<String>,
    /// Command overriding the image CMD.
    pub cmd: Option<Vec<String>>,
    /// Entrypoint overriding the image ENTRYPOINT.
    pub entrypoint: Option<Vec<String>>,
    /// Environment variables in `KEY=VALUE` form.
    pub env: Vec<String>,
    /// Working directory inside the container.
    pub working_dir: Option<String>,
    /// User to run as.
    pub user: Option<String>,
    /// Port bindings in `host:container` form; a bare port exposes the
    /// container port on an engine-assigned host port.
    pub port_bindings: Vec<String>,
    /// Volume binds in `host:container` form.
    pub binds: Vec<String>,
    /// Links to other containers.
    pub links: Vec<String>,
    /// Remove the container when it exits.
    pub auto_remove: bool,
    /// Allocate a pseudo-TTY.
    pub tty: bool,
}

impl ContainerSpec {
    /// Creates an empty container spec.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to set the container name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Builder method to set the command.
    pub fn with_cmd(mut self, cmd: Vec<String>) -> Self {
        self.cmd = Some(cmd);
        self
    }

    /// Builder method to set the entrypoint.
    pub fn with_entrypoint(mut self, entrypoint: Vec<String>) -> Self {
        self.entrypoint = Some(entrypoint);
        self
    }

    /// Builder method to add an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push(format!("{}={}", key.into(), value.into()));
        self
    }

    /// Builder method to set the working directory.
    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Builder method to set the user.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Builder method to add a `host:container` port binding.
    pub fn with_port_binding(mut self, binding: impl Into<String>) -> Self {
        self.port_bindings.push(binding.into());
        self
    }

    /// Builder method to add a `host:container` volume bind.
    pub fn with_bind(mut self, bind: impl Into<String>) -> Self {
        self.binds.push(bind.into());
        self
    }

    /// Builder method to add a container link.
    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.links.push(link.into());
        self
    }

    /// Builder method to remove the container when it exits.
    pub fn with_auto_remove(mut self, auto_remove: bool) -> Self {
        self.auto_remove = auto_remove;
        self
    }

    /// Builder method to allocate a pseudo-TTY.
    pub fn with_tty(mut self, tty: bool) -> Self {
        self.tty = tty;
        self
    }
}

/// Client for the Docker Remote API.
#[derive(Debug, Clone)]
pub struct DockerClient {
    docker: Docker,
}

impl DockerClient {
    /// Connects to the daemon described by `config` and verifies the
    /// connection with a version handshake.
    ///
    /// # Errors
    ///
    /// Returns `RemoteApiError::Connect` if the daemon is unreachable or
    /// the URL scheme cannot be handled.
    pub async fn connect(config: &DaemonConfig) -> Result<Self, RemoteApiError> {
        let docker = build_docker(config)?;

        let version = docker.version().await.map_err(|e| {
            RemoteApiError::Connect(format!(
                "{e}; is the daemon running at {}?",
                config.url
            ))
        })?;

        debug!(
            url = %config.url,
            daemon_version = version.version.unwrap_or_default(),
            api_version = version.api_version.unwrap_or_default(),
            "Connected to Docker daemon"
        );

        Ok(Self { docker })
    }

    /// Builds an image from a context directory and returns its ID.
    ///
    /// The daemon only accepts one tag per build request, so the first tag
    /// names the build and the rest are applied afterwards via the tag
    /// endpoint.
    pub async fn build_image(
        &self,
        spec: &ImageBuildSpec,
        credentials: Option<&RegistryCredentials>,
    ) -> Result<String, RemoteApiError> {
        let context = archive::pack_build_context(&spec.context_dir)?;
        debug!(
            context = %spec.context_dir.display(),
            bytes = context.len(),
            "Assembled build context"
        );

        let options = BuildImageOptions {
            dockerfile: spec.dockerfile.clone(),
            t: spec.tags.first().cloned().unwrap_or_default(),
            nocache: spec.no_cache,
            pull: spec.pull,
            rm: spec.remove_intermediate,
            buildargs: spec.build_args.clone(),
            ..Default::default()
        };

        let registry_auth = credentials.map(|c| {
            let mut auth = HashMap::new();
            auth.insert(c.url.clone(), DockerCredentials::from(c));
            auth
        });

        let mut stream = self
            .docker
            .build_image(options, registry_auth, Some(context.into()));

        let mut image_id = None;
        while let Some(result) = stream.next().await {
            let progress = result.map_err(|e| RemoteApiError::Build(e.to_string()))?;

            if let Some(line) = progress.stream {
                let line = line.trim_end();
                if !line.is_empty() {
                    info!("{line}");
                }
            }
            if let Some(error) = progress.error {
                return Err(RemoteApiError::Build(error));
            }
            if let Some(BuildInfoAux::Default(id)) = progress.aux {
                image_id = id.id;
            }
        }

        let image_id = image_id
            .ok_or_else(|| RemoteApiError::Build("daemon reported no image ID".to_string()))?;

        for tag in spec.tags.iter().skip(1) {
            self.tag_image(&image_id, tag).await?;
        }

        Ok(image_id)
    }

    /// Applies an additional `repo[:tag]` reference to an existing image.
    pub async fn tag_image(&self, image_id: &str, reference: &str) -> Result<(), RemoteApiError> {
        let (repo, tag) = split_repo_tag(reference);
        let options = TagImageOptions {
            repo: repo.to_string(),
            tag: tag.unwrap_or("latest").to_string(),
        };

        self.docker
            .tag_image(image_id, Some(options))
            .await
            .map_err(|e| RemoteApiError::Build(format!("tagging '{reference}' failed: {e}")))
    }

    /// Pulls an image from a registry.
    pub async fn pull_image(
        &self,
        image: &str,
        credentials: Option<&RegistryCredentials>,
    ) -> Result<(), RemoteApiError> {
        // Digest references go through as-is; repo:tag references pull a
        // single tag, defaulting to latest.
        let options = if image.contains('@') {
            CreateImageOptions {
                from_image: image.to_string(),
                ..Default::default()
            }
        } else {
            let (repo, tag) = split_repo_tag(image);
            CreateImageOptions {
                from_image: repo.to_string(),
                tag: tag.unwrap_or("latest").to_string(),
                ..Default::default()
            }
        };

        let auth = credentials.map(DockerCredentials::from);
        let mut stream = self.docker.create_image(Some(options), None, auth);

        while let Some(result) = stream.next().await {
            let progress = result.map_err(|e| RemoteApiError::Pull {
                image: image.to_string(),
                message: e.to_string(),
            })?;

            if let Some(error) = progress.error {
                return Err(RemoteApiError::Pull {
                    image: image.to_string(),
                    message: error,
                });
            }
            if let Some(status) = progress.status {
                debug!(image, "{status}");
            }
        }

        Ok(())
    }

    /// Pushes a `repo[:tag]` reference to its registry.
    pub async fn push_image(
        &self,
        image: &str,
        credentials: Option<&RegistryCredentials>,
    ) -> Result<(), RemoteApiError> {
        let (repo, tag) = split_repo_tag(image);
        let options = PushImageOptions {
            tag: tag.unwrap_or("latest").to_string(),
        };

        let auth = credentials.map(DockerCredentials::from);
        let mut stream = self.docker.push_image(repo, Some(options), auth);

        while let Some(result) = stream.next().await {
            let progress = result.map_err(|e| RemoteApiError::Push {
                image: image.to_string(),
                message: e.to_string(),
            })?;

            if let Some(error) = progress.error {
                return Err(RemoteApiError::Push {
                    image: image.to_string(),
                    message: error,
                });
            }
            if let Some(status) = progress.status {
                debug!(image, "{status}");
            }
        }

        Ok(())
    }

    /// Lists local images, optionally filtered by a `repo[:tag]` reference
    /// pattern.
    pub async fn list_images(
        &self,
        reference: Option<&str>,
    ) -> Result<Vec<ImageSummary>, RemoteApiError> {
        let mut filters = HashMap::new();
        if let Some(reference) = reference {
            filters.insert("reference".to_string(), vec![reference.to_string()]);
        }

        let options = ListImagesOptions {
            filters,
            ..Default::default()
        };

        self.docker
            .list_images(Some(options))
            .await
            .map_err(|e| RemoteApiError::List(e.to_string()))
    }

    /// True when the image reference resolves locally.
    pub async fn image_exists(&self, image: &str) -> Result<bool, RemoteApiError> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(RemoteApiError::List(e.to_string())),
        }
    }

    /// Removes a local image.
    pub async fn remove_image(&self, image: &str, force: bool) -> Result<(), RemoteApiError> {
        let options = RemoveImageOptions {
            force,
            noprune: false,
        };

        self.docker
            .remove_image(image, Some(options), None)
            .await
            .map_err(|e| RemoteApiError::RemoveImage {
                image: image.to_string(),
                message: e.to_string(),
            })?;

        Ok(())
    }

    /// Creates a container from an image and returns its ID.
    pub async fn create_container(
        &self,
        image: &str,
        spec: &ContainerSpec,
    ) -> Result<String, RemoteApiError> {
        let mut exposed_ports = HashMap::new();
        let mut port_bindings = HashMap::new();
        for mapping in &spec.port_bindings {
            let (key, binding) = parse_port_binding(mapping);
            exposed_ports.insert(key.clone(), HashMap::new());
            port_bindings.insert(key, Some(vec![binding]));
        }

        let host_config = HostConfig {
            binds: none_if_empty(&spec.binds),
            links: none_if_empty(&spec.links),
            port_bindings: if port_bindings.is_empty() {
                None
            } else {
                Some(port_bindings)
            },
            auto_remove: Some(spec.auto_remove),
            ..Default::default()
        };

        let container_config = Config {
            image: Some(image.to_string()),
            cmd: spec.cmd.clone(),
            entrypoint: spec.entrypoint.clone(),
            env: none_if_empty(&spec.env),
            working_dir: spec.working_dir.clone(),
            user: spec.user.clone(),
            exposed_ports: if exposed_ports.is_empty() {
                None
            } else {
                Some(exposed_ports)
            },
            tty: Some(spec.tty),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = spec.name.as_ref().map(|name| CreateContainerOptions {
            name: name.clone(),
            platform: None,
        });

        let response = self
            .docker
            .create_container(options, container_config)
            .await
            .map_err(|e| RemoteApiError::Create {
                image: image.to_string(),
                message: e.to_string(),
            })?;

        for warning in &response.warnings {
            warn!(container = %response.id, "{warning}");
        }

        Ok(response.id)
    }

    /// Starts a container.
    pub async fn start_container(&self, id: &str) -> Result<(), RemoteApiError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| RemoteApiError::Start {
                id: id.to_string(),
                message: e.to_string(),
            })
    }

    /// Stops a container, sending SIGKILL after `timeout_secs`.
    pub async fn stop_container(&self, id: &str, timeout_secs: i64) -> Result<(), RemoteApiError> {
        let options = StopContainerOptions { t: timeout_secs };

        self.docker
            .stop_container(id, Some(options))
            .await
            .map_err(|e| RemoteApiError::Stop {
                id: id.to_string(),
                message: e.to_string(),
            })
    }

    /// Removes a container.
    pub async fn remove_container(
        &self,
        id: &str,
        force: bool,
        remove_volumes: bool,
    ) -> Result<(), RemoteApiError> {
        let options = RemoveContainerOptions {
            force,
            v: remove_volumes,
            ..Default::default()
        };

        self.docker
            .remove_container(id, Some(options))
            .await
            .map_err(|e| RemoteApiError::Remove {
                id: id.to_string(),
                message: e.to_string(),
            })
    }

    /// Waits until a container stops and returns its exit code.
    pub async fn wait_container(&self, id: &str) -> Result<i64, RemoteApiError> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };

        let mut stream = self.docker.wait_container(id, Some(options));

        // bollard reports a non-zero exit as a wait error carrying the code.
        let mut status_code = 0;
        while let Some(result) = stream.next().await {
            match result {
                Ok(response) => status_code = response.status_code,
                Err(BollardError::DockerContainerWaitError { code, .. }) => status_code = code,
                Err(e) => {
                    return Err(RemoteApiError::Wait {
                        id: id.to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        Ok(status_code)
    }

    /// Streams demuxed log lines from a container.
    pub fn container_logs(
        &self,
        id: &str,
        options: &LogStreamOptions,
    ) -> Pin<Box<dyn Stream<Item = Result<LogLine, RemoteApiError>> + Send>> {
        let bollard_options = LogsOptions::<String> {
            follow: options.follow,
            stdout: options.stdout,
            stderr: options.stderr,
            timestamps: options.timestamps,
            since: options.since.unwrap_or(0),
            tail: options
                .tail
                .map(|n| n.to_string())
                .unwrap_or_else(|| "all".to_string()),
            ..Default::default()
        };

        let frames = self.docker.logs(id, Some(bollard_options));
        logs::demux(id.to_string(), frames)
    }
}

/// Builds the bollard handle for a daemon URL, dispatching on the scheme.
fn build_docker(config: &DaemonConfig) -> Result<Docker, RemoteApiError> {
    let timeout = config.connect_timeout.as_secs();
    let version = resolve_client_version(config);

    let connection = if config.url.starts_with("unix://") || config.url.starts_with("npipe://") {
        Docker::connect_with_socket(&config.url, timeout, &version)
    } else if config.tls_verify {
        let cert_dir = config.cert_path.as_ref().ok_or_else(|| {
            RemoteApiError::Connect("tls_verify requires cert_path to be set".to_string())
        })?;
        Docker::connect_with_ssl(
            &config.url,
            &cert_dir.join("key.pem"),
            &cert_dir.join("cert.pem"),
            &cert_dir.join("ca.pem"),
            timeout,
            &version,
        )
    } else {
        Docker::connect_with_http(&config.url, timeout, &version)
    };

    connection.map_err(|e| RemoteApiError::Connect(format!("{e} (url: {})", config.url)))
}

/// Pins the negotiated API version when the configuration requests one.
fn resolve_client_version(config: &DaemonConfig) -> ClientVersion {
    match config.api_version.as_deref().and_then(parse_api_version) {
        Some((major_version, minor_version)) => ClientVersion {
            major_version,
            minor_version,
        },
        None => ClientVersion {
            major_version: API_DEFAULT_VERSION.major_version,
            minor_version: API_DEFAULT_VERSION.minor_version,
        },
    }
}

/// Parses a `host:container` port mapping into the daemon's exposed-port
/// key and host binding. A bare container port gets an engine-assigned
/// host port; an explicit protocol suffix (`80/udp`) is kept.
fn parse_port_binding(mapping: &str) -> (String, PortBinding) {
    let (host_port, container_port) = match mapping.split_once(':') {
        Some((host, container)) => (Some(host.to_string()), container),
        None => (None, mapping),
    };

    let key = if container_port.contains('/') {
        container_port.to_string()
    } else {
        format!("{container_port}/tcp")
    };

    (
        key,
        PortBinding {
            host_ip: None,
            host_port,
        },
    )
}

fn none_if_empty(values: &[String]) -> Option<Vec<String>> {
    if values.is_empty() {
        None
    } else {
        Some(values.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_build_spec_defaults() {
        let spec = ImageBuildSpec::new("/tmp/context", "test/app:1.0");

        assert_eq!(spec.context_dir, PathBuf::from("/tmp/context"));
        assert_eq!(spec.dockerfile, "Dockerfile");
        assert_eq!(spec.tags, vec!["test/app:1.0".to_string()]);
        assert!(spec.build_args.is_empty());
        assert!(!spec.no_cache);
        assert!(!spec.pull);
        assert!(spec.remove_intermediate);
    }

    #[test]
    fn test_image_build_spec_builder() {
        let spec = ImageBuildSpec::new("/tmp/context", "test/app:1.0")
            .with_tag("test/app:latest")
            .with_dockerfile("docker/Dockerfile.release")
            .with_build_arg("VERSION", "1.0")
            .with_no_cache(true)
            .with_pull(true);

        assert_eq!(spec.tags.len(), 2);
        assert_eq!(spec.dockerfile, "docker/Dockerfile.release");
        assert_eq!(spec.build_args.get("VERSION").map(String::as_str), Some("1.0"));
        assert!(spec.no_cache);
        assert!(spec.pull);
    }

    #[test]
    fn test_container_spec_builder() {
        let spec = ContainerSpec::new()
            .with_name("app")
            .with_cmd(vec!["serve".to_string()])
            .with_env("PORT", "8080")
            .with_working_dir("/app")
            .with_user("nobody")
            .with_port_binding("8080:80")
            .with_bind("/data:/var/lib/data")
            .with_link("db:db")
            .with_auto_remove(true)
            .with_tty(true);

        assert_eq!(spec.name.as_deref(), Some("app"));
        assert_eq!(spec.env, vec!["PORT=8080".to_string()]);
        assert_eq!(spec.working_dir.as_deref(), Some("/app"));
        assert_eq!(spec.user.as_deref(), Some("nobody"));
        assert_eq!(spec.port_bindings, vec!["8080:80".to_string()]);
        assert_eq!(spec.binds, vec!["/data:/var/lib/data".to_string()]);
        assert_eq!(spec.links, vec!["db:db".to_string()]);
        assert!(spec.auto_remove);
        assert!(spec.tty);
    }

    #[test]
    fn test_parse_port_binding_with_host_port() {
        let (key, binding) = parse_port_binding("8080:80");
        assert_eq!(key, "80/tcp");
        assert_eq!(binding.host_port.as_deref(), Some("8080"));
        assert!(binding.host_ip.is_none());
    }

    #[test]
    fn test_parse_port_binding_bare_container_port() {
        let (key, binding) = parse_port_binding("9000");
        assert_eq!(key, "9000/tcp");
        assert!(binding.host_port.is_none());
    }

    #[test]
    fn test_parse_port_binding_keeps_protocol() {
        let (key, binding) = parse_port_binding("514:514/udp");
        assert_eq!(key, "514/udp");
        assert_eq!(binding.host_port.as_deref(), Some("514"));
    }

    #[test]
    fn test_resolve_client_version_pinned() {
        let config = DaemonConfig::new().with_api_version("1.43");
        let version = resolve_client_version(&config);
        assert_eq!(version.major_version, 1);
        assert_eq!(version.minor_version, 43);
    }

    #[test]
    fn test_resolve_client_version_default() {
        let config = DaemonConfig::new();
        let version = resolve_client_version(&config);
        assert_eq!(version.major_version, API_DEFAULT_VERSION.major_version);
        assert_eq!(version.minor_version, API_DEFAULT_VERSION.minor_version);
    }

    #[test]
    fn test_none_if_empty() {
        assert_eq!(none_if_empty(&[]), None);
        assert_eq!(
            none_if_empty(&["a=b".to_string()]),
            Some(vec!["a=b".to_string()])
        );
    }
}
