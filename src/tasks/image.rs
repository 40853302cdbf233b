//! Image tasks: build, pull, push, list and remove.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::client::{archive, ImageBuildSpec};
use crate::config::RegistryCredentials;
use crate::error::TaskError;
use crate::registry::RegistryAuthLocator;
use crate::tasks::{write_id_file, ErrorPolicy, RunContext, Task, ValueRef};

/// Builds an image from a context directory and records its ID.
///
/// With the up-to-date check enabled and an image ID file configured, the
/// build is skipped when the context fingerprint matches the one recorded
/// by the previous build and the image still exists in the daemon.
pub struct BuildImage {
    id: String,
    spec: ImageBuildSpec,
    credentials: RegistryCredentials,
    image_id_file: Option<PathBuf>,
    up_to_date_check: bool,
    policy: ErrorPolicy,
}

impl BuildImage {
    /// Creates a build task.
    pub fn new(id: impl Into<String>, spec: ImageBuildSpec) -> Self {
        Self {
            id: id.into(),
            spec,
            credentials: RegistryCredentials::default(),
            image_id_file: None,
            up_to_date_check: false,
            policy: ErrorPolicy::Propagate,
        }
    }

    /// Builder method to set credentials for base image pulls.
    pub fn with_credentials(mut self, credentials: RegistryCredentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Builder method to record the built image ID in a file.
    pub fn with_image_id_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.image_id_file = Some(path.into());
        self
    }

    /// Builder method to skip the build when the context is unchanged.
    pub fn with_up_to_date_check(mut self, enabled: bool) -> Self {
        self.up_to_date_check = enabled;
        self
    }

    /// Builder method to set the error policy.
    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn recorded_build(&self) -> Option<(String, String)> {
        let id_file = self.image_id_file.as_ref()?;
        let image_id = std::fs::read_to_string(id_file).ok()?;
        let fingerprint = std::fs::read_to_string(fingerprint_path(id_file)).ok()?;
        Some((
            image_id.trim().to_string(),
            fingerprint.trim().to_string(),
        ))
    }

    fn write_record(&self, image_id: &str, fingerprint: Option<&str>) -> Result<(), TaskError> {
        if let Some(path) = &self.image_id_file {
            write_id_file(path, image_id)?;
            if let Some(fingerprint) = fingerprint {
                std::fs::write(fingerprint_path(path), format!("{fingerprint}\n"))?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Task for BuildImage {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> String {
        format!(
            "Builds image '{}' from '{}'",
            self.spec.tags.first().map(String::as_str).unwrap_or(""),
            self.spec.context_dir.display()
        )
    }

    fn error_policy(&self) -> ErrorPolicy {
        self.policy.clone()
    }

    async fn execute(&self, context: &RunContext) -> Result<(), TaskError> {
        let client = context.client()?;

        let fingerprint = if self.up_to_date_check {
            Some(archive::context_fingerprint(&self.spec.context_dir)?)
        } else {
            None
        };

        if let Some(current) = &fingerprint {
            if let Some((recorded_id, recorded_fingerprint)) = self.recorded_build() {
                if recorded_fingerprint == *current && client.image_exists(&recorded_id).await? {
                    info!(
                        task = %self.id,
                        image = %recorded_id,
                        "Build context unchanged, reusing image"
                    );
                    context.record_image_id(&self.id, recorded_id);
                    return Ok(());
                }
                debug!(task = %self.id, "Build context changed since last build");
            }
        }

        let credentials = if self.credentials.is_anonymous() {
            None
        } else {
            Some(&self.credentials)
        };

        let image_id = client.build_image(&self.spec, credentials).await?;
        info!(
            task = %self.id,
            image = %image_id,
            tags = ?self.spec.tags,
            "Built image"
        );

        self.write_record(&image_id, fingerprint.as_deref())?;
        context.record_image_id(&self.id, image_id);
        Ok(())
    }
}

fn fingerprint_path(id_file: &Path) -> PathBuf {
    let mut name = id_file.as_os_str().to_os_string();
    name.push(".fingerprint");
    PathBuf::from(name)
}

/// Pulls an image from its registry.
pub struct PullImage {
    id: String,
    image: String,
    credentials: RegistryCredentials,
    policy: ErrorPolicy,
}

impl PullImage {
    /// Creates a pull task for a `repo[:tag]` reference.
    pub fn new(id: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            image: image.into(),
            credentials: RegistryCredentials::default(),
            policy: ErrorPolicy::Propagate,
        }
    }

    /// Builder method to set explicit registry credentials.
    pub fn with_credentials(mut self, credentials: RegistryCredentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Builder method to set the error policy.
    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[async_trait]
impl Task for PullImage {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> String {
        format!("Pulls image '{}'", self.image)
    }

    fn error_policy(&self) -> ErrorPolicy {
        self.policy.clone()
    }

    async fn execute(&self, context: &RunContext) -> Result<(), TaskError> {
        let client = context.client()?;

        let credentials = RegistryAuthLocator::default().lookup(&self.image, &self.credentials);
        let auth = if credentials.is_anonymous() {
            None
        } else {
            Some(&credentials)
        };

        info!(task = %self.id, image = %self.image, "Pulling image");
        client.pull_image(&self.image, auth).await?;
        Ok(())
    }
}

/// Pushes an image to its registry.
pub struct PushImage {
    id: String,
    image: String,
    credentials: RegistryCredentials,
    policy: ErrorPolicy,
}

impl PushImage {
    /// Creates a push task for a `repo[:tag]` reference.
    pub fn new(id: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            image: image.into(),
            credentials: RegistryCredentials::default(),
            policy: ErrorPolicy::Propagate,
        }
    }

    /// Builder method to set explicit registry credentials.
    pub fn with_credentials(mut self, credentials: RegistryCredentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Builder method to set the error policy.
    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[async_trait]
impl Task for PushImage {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> String {
        format!("Pushes image '{}'", self.image)
    }

    fn error_policy(&self) -> ErrorPolicy {
        self.policy.clone()
    }

    async fn execute(&self, context: &RunContext) -> Result<(), TaskError> {
        let client = context.client()?;

        let credentials = RegistryAuthLocator::default().lookup(&self.image, &self.credentials);
        let auth = if credentials.is_anonymous() {
            None
        } else {
            Some(&credentials)
        };

        info!(task = %self.id, image = %self.image, "Pushing image");
        client.push_image(&self.image, auth).await?;
        Ok(())
    }
}

/// Lists local images and logs one line per match.
pub struct ListImages {
    id: String,
    filter: Option<String>,
    policy: ErrorPolicy,
}

impl ListImages {
    /// Creates a list task.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            filter: None,
            policy: ErrorPolicy::Propagate,
        }
    }

    /// Builder method to filter by a `repo[:tag]` reference pattern.
    pub fn with_filter(mut self, reference: impl Into<String>) -> Self {
        self.filter = Some(reference.into());
        self
    }

    /// Builder method to set the error policy.
    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[async_trait]
impl Task for ListImages {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> String {
        match &self.filter {
            Some(filter) => format!("Lists images matching '{filter}'"),
            None => "Lists images".to_string(),
        }
    }

    fn error_policy(&self) -> ErrorPolicy {
        self.policy.clone()
    }

    async fn execute(&self, context: &RunContext) -> Result<(), TaskError> {
        let client = context.client()?;

        let images = client.list_images(self.filter.as_deref()).await?;
        info!(task = %self.id, count = images.len(), "Listed images");
        for image in &images {
            info!(
                id = short_id(&image.id),
                tags = ?image.repo_tags,
                size = image.size,
                "image"
            );
        }
        Ok(())
    }
}

/// Removes a local image.
pub struct RemoveImage {
    id: String,
    image: ValueRef,
    force: bool,
    policy: ErrorPolicy,
}

impl RemoveImage {
    /// Creates a remove task for a literal reference or a build task's
    /// recorded image ID.
    pub fn new(id: impl Into<String>, image: ValueRef) -> Self {
        Self {
            id: id.into(),
            image,
            force: false,
            policy: ErrorPolicy::Propagate,
        }
    }

    /// Builder method to force removal of tagged or in-use images.
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Builder method to suppress the error for an image that is already
    /// gone.
    pub fn ignoring_missing(mut self) -> Self {
        self.policy = ErrorPolicy::suppress_matching("No such image");
        self
    }

    /// Builder method to set the error policy.
    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[async_trait]
impl Task for RemoveImage {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> String {
        format!("Removes image '{}'", self.image)
    }

    fn error_policy(&self) -> ErrorPolicy {
        self.policy.clone()
    }

    async fn execute(&self, context: &RunContext) -> Result<(), TaskError> {
        let client = context.client()?;
        let image = context.resolve_image(&self.image)?;

        client.remove_image(&image, self.force).await?;
        info!(task = %self.id, image = %image, "Removed image");
        Ok(())
    }
}

/// Shortens a daemon image ID for display.
pub fn short_id(id: &str) -> &str {
    let id = id.strip_prefix("sha256:").unwrap_or(id);
    &id[..id.len().min(12)]
}
