//! Container lifecycle tasks: create, start, stop, remove, wait and logs.

use std::io::Write;
use std::path::PathBuf;

use async_trait::async_trait;
use futures::StreamExt;
use tracing::{info, warn};

use crate::client::{ContainerSpec, LogSource, LogStreamOptions};
use crate::error::TaskError;
use crate::tasks::{write_id_file, ErrorPolicy, RunContext, Task, ValueRef};

/// Creates a container from an image and records its ID.
pub struct CreateContainer {
    id: String,
    image: ValueRef,
    spec: ContainerSpec,
    container_id_file: Option<PathBuf>,
    policy: ErrorPolicy,
}

impl CreateContainer {
    /// Creates a create task for a literal image reference or a build
    /// task's recorded image ID.
    pub fn new(id: impl Into<String>, image: ValueRef, spec: ContainerSpec) -> Self {
        Self {
            id: id.into(),
            image,
            spec,
            container_id_file: None,
            policy: ErrorPolicy::Propagate,
        }
    }

    /// Builder method to record the container ID in a file.
    pub fn with_container_id_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.container_id_file = Some(path.into());
        self
    }

    /// Builder method to set the error policy.
    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[async_trait]
impl Task for CreateContainer {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> String {
        format!("Creates a container from image '{}'", self.image)
    }

    fn error_policy(&self) -> ErrorPolicy {
        self.policy.clone()
    }

    async fn execute(&self, context: &RunContext) -> Result<(), TaskError> {
        let client = context.client()?;
        let image = context.resolve_image(&self.image)?;

        let container_id = client.create_container(&image, &self.spec).await?;
        info!(
            task = %self.id,
            container = %container_id,
            image = %image,
            "Created container"
        );

        if let Some(path) = &self.container_id_file {
            write_id_file(path, &container_id)?;
        }

        context.record_container_id(&self.id, container_id);
        Ok(())
    }
}

/// Starts a container.
pub struct StartContainer {
    id: String,
    container: ValueRef,
    policy: ErrorPolicy,
}

impl StartContainer {
    /// Creates a start task.
    pub fn new(id: impl Into<String>, container: ValueRef) -> Self {
        Self {
            id: id.into(),
            container,
            policy: ErrorPolicy::Propagate,
        }
    }

    /// Builder method to set the error policy.
    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[async_trait]
impl Task for StartContainer {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> String {
        format!("Starts container '{}'", self.container)
    }

    fn error_policy(&self) -> ErrorPolicy {
        self.policy.clone()
    }

    async fn execute(&self, context: &RunContext) -> Result<(), TaskError> {
        let client = context.client()?;
        let container = context.resolve_container(&self.container)?;

        client.start_container(&container).await?;
        info!(task = %self.id, container = %container, "Started container");
        Ok(())
    }
}

/// Stops a container, giving it time to exit before the daemon kills it.
pub struct StopContainer {
    id: String,
    container: ValueRef,
    timeout_secs: i64,
    policy: ErrorPolicy,
}

impl StopContainer {
    /// Creates a stop task with the daemon's default 10 second grace
    /// period.
    pub fn new(id: impl Into<String>, container: ValueRef) -> Self {
        Self {
            id: id.into(),
            container,
            timeout_secs: 10,
            policy: ErrorPolicy::Propagate,
        }
    }

    /// Builder method to set the grace period before SIGKILL.
    pub fn with_timeout_secs(mut self, timeout_secs: i64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Builder method to suppress the error for a container that is
    /// already gone.
    pub fn ignoring_missing(mut self) -> Self {
        self.policy = ErrorPolicy::suppress_matching("No such container");
        self
    }

    /// Builder method to set the error policy.
    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[async_trait]
impl Task for StopContainer {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> String {
        format!("Stops container '{}'", self.container)
    }

    fn error_policy(&self) -> ErrorPolicy {
        self.policy.clone()
    }

    async fn execute(&self, context: &RunContext) -> Result<(), TaskError> {
        let client = context.client()?;
        let container = context.resolve_container(&self.container)?;

        client.stop_container(&container, self.timeout_secs).await?;
        info!(task = %self.id, container = %container, "Stopped container");
        Ok(())
    }
}

/// Removes a container.
pub struct RemoveContainer {
    id: String,
    container: ValueRef,
    force: bool,
    remove_volumes: bool,
    policy: ErrorPolicy,
}

impl RemoveContainer {
    /// Creates a remove task.
    pub fn new(id: impl Into<String>, container: ValueRef) -> Self {
        Self {
            id: id.into(),
            container,
            force: false,
            remove_volumes: false,
            policy: ErrorPolicy::Propagate,
        }
    }

    /// Builder method to force removal of a running container.
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Builder method to also remove anonymous volumes.
    pub fn with_remove_volumes(mut self, remove_volumes: bool) -> Self {
        self.remove_volumes = remove_volumes;
        self
    }

    /// Builder method to suppress the error for a container that is
    /// already gone.
    pub fn ignoring_missing(mut self) -> Self {
        self.policy = ErrorPolicy::suppress_matching("No such container");
        self
    }

    /// Builder method to set the error policy.
    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[async_trait]
impl Task for RemoveContainer {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> String {
        format!("Removes container '{}'", self.container)
    }

    fn error_policy(&self) -> ErrorPolicy {
        self.policy.clone()
    }

    async fn execute(&self, context: &RunContext) -> Result<(), TaskError> {
        let client = context.client()?;
        let container = context.resolve_container(&self.container)?;

        client
            .remove_container(&container, self.force, self.remove_volumes)
            .await?;
        info!(task = %self.id, container = %container, "Removed container");
        Ok(())
    }
}

/// Waits for a container to stop and records its exit code.
///
/// A non-zero exit code is recorded, not treated as a task failure.
pub struct WaitContainer {
    id: String,
    container: ValueRef,
    policy: ErrorPolicy,
}

impl WaitContainer {
    /// Creates a wait task.
    pub fn new(id: impl Into<String>, container: ValueRef) -> Self {
        Self {
            id: id.into(),
            container,
            policy: ErrorPolicy::Propagate,
        }
    }

    /// Builder method to set the error policy.
    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[async_trait]
impl Task for WaitContainer {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> String {
        format!("Waits for container '{}' to stop", self.container)
    }

    fn error_policy(&self) -> ErrorPolicy {
        self.policy.clone()
    }

    async fn execute(&self, context: &RunContext) -> Result<(), TaskError> {
        let client = context.client()?;
        let container = context.resolve_container(&self.container)?;

        let exit_code = client.wait_container(&container).await?;
        info!(
            task = %self.id,
            container = %container,
            exit_code,
            "Container stopped"
        );

        context.record_exit_code(&self.id, exit_code);
        Ok(())
    }
}

/// Streams container logs to the run's log output or to a sink file.
///
/// The stream is consumed on the task's future: with follow enabled the
/// task runs until the container stops.
pub struct LogsContainer {
    id: String,
    container: ValueRef,
    options: LogStreamOptions,
    sink: Option<PathBuf>,
    policy: ErrorPolicy,
}

impl LogsContainer {
    /// Creates a logs task with default stream options.
    pub fn new(id: impl Into<String>, container: ValueRef) -> Self {
        Self {
            id: id.into(),
            container,
            options: LogStreamOptions::default(),
            sink: None,
            policy: ErrorPolicy::Propagate,
        }
    }

    /// Builder method to set the stream options.
    pub fn with_options(mut self, options: LogStreamOptions) -> Self {
        self.options = options;
        self
    }

    /// Builder method to write lines to a file instead of the log output.
    pub fn with_sink(mut self, path: impl Into<PathBuf>) -> Self {
        self.sink = Some(path.into());
        self
    }

    /// Builder method to set the error policy.
    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[async_trait]
impl Task for LogsContainer {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> String {
        format!("Streams logs from container '{}'", self.container)
    }

    fn error_policy(&self) -> ErrorPolicy {
        self.policy.clone()
    }

    async fn execute(&self, context: &RunContext) -> Result<(), TaskError> {
        let client = context.client()?;
        let container = context.resolve_container(&self.container)?;

        let mut sink = match &self.sink {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)?;
                    }
                }
                Some(std::fs::File::create(path)?)
            }
            None => None,
        };

        let mut stream = client.container_logs(&container, &self.options);
        let mut lines = 0u64;
        while let Some(line) = stream.next().await {
            let line = line?;
            lines += 1;
            match &mut sink {
                Some(file) => writeln!(file, "{}: {}", line.source.marker(), line.text)?,
                None => match line.source {
                    LogSource::Stdout => info!(container = %container, "{}", line.text),
                    LogSource::Stderr => warn!(container = %container, "{}", line.text),
                },
            }
        }

        info!(task = %self.id, container = %container, lines, "Log stream ended");
        Ok(())
    }
}
