//! Task definitions for Docker workflows.
//!
//! This module defines the core pieces every task is built from:
//!
//! - `Task`: a unit of work scheduled by the task graph
//! - `RunContext`: shared state tasks read inputs from and record outputs to
//! - `ValueRef`: a task input that is literal or produced by an earlier task
//! - `ErrorPolicy`: opt-in suppression of expected daemon errors

pub mod container;
pub mod dockerfile;
pub mod image;

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::client::DockerClient;
use crate::error::TaskError;

pub use self::container::{
    CreateContainer, LogsContainer, RemoveContainer, StartContainer, StopContainer, WaitContainer,
};
pub use self::dockerfile::WriteDockerfile;
pub use self::image::{BuildImage, ListImages, PullImage, PushImage, RemoveImage};

/// A unit of work scheduled by the task graph.
///
/// Tasks are wired together by ID; outputs flow between them through the
/// shared `RunContext` rather than through return values.
#[async_trait]
pub trait Task: Send + Sync {
    /// Stable identifier used for wiring and output lookups.
    fn id(&self) -> &str;

    /// Human-readable description logged when the task starts.
    fn description(&self) -> String {
        self.id().to_string()
    }

    /// Error policy consulted by the runner when `execute` fails.
    fn error_policy(&self) -> ErrorPolicy {
        ErrorPolicy::Propagate
    }

    /// Runs the task against the shared context.
    async fn execute(&self, context: &RunContext) -> Result<(), TaskError>;
}

/// A task input that is either a literal value or the recorded output of
/// an earlier task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueRef {
    /// A fixed value supplied at wiring time.
    Literal(String),
    /// The output recorded by the named task, looked up at execution time.
    FromTask(String),
}

impl ValueRef {
    /// Creates a literal value.
    pub fn literal(value: impl Into<String>) -> Self {
        ValueRef::Literal(value.into())
    }

    /// Creates a reference to another task's recorded output.
    pub fn from_task(task: impl Into<String>) -> Self {
        ValueRef::FromTask(task.into())
    }
}

impl std::fmt::Display for ValueRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueRef::Literal(value) => write!(f, "{value}"),
            ValueRef::FromTask(task) => write!(f, "output of '{task}'"),
        }
    }
}

/// Output recorded by a task for downstream consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutput {
    /// Image ID reported by a build.
    ImageId(String),
    /// Container ID reported by a create call.
    ContainerId(String),
    /// Exit code reported by a wait call.
    ExitCode(i64),
}

/// Shared state for one run of a task graph.
///
/// Holds the daemon client and the outputs recorded so far, keyed by task
/// ID. Offline runs (Dockerfile generation only) carry no client.
pub struct RunContext {
    client: Option<DockerClient>,
    outputs: Mutex<HashMap<String, TaskOutput>>,
}

impl RunContext {
    /// Creates a context backed by a daemon connection.
    pub fn new(client: DockerClient) -> Self {
        Self {
            client: Some(client),
            outputs: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a context without a daemon connection.
    pub fn offline() -> Self {
        Self {
            client: None,
            outputs: Mutex::new(HashMap::new()),
        }
    }

    /// Client handle for daemon-backed tasks.
    ///
    /// # Errors
    ///
    /// Returns `TaskError::InvalidInput` when the run has no daemon
    /// connection.
    pub fn client(&self) -> Result<&DockerClient, TaskError> {
        self.client.as_ref().ok_or_else(|| {
            TaskError::InvalidInput("this run has no daemon connection".to_string())
        })
    }

    /// Records the image ID produced by a task.
    pub fn record_image_id(&self, task: &str, id: impl Into<String>) {
        self.outputs()
            .insert(task.to_string(), TaskOutput::ImageId(id.into()));
    }

    /// Records the container ID produced by a task.
    pub fn record_container_id(&self, task: &str, id: impl Into<String>) {
        self.outputs()
            .insert(task.to_string(), TaskOutput::ContainerId(id.into()));
    }

    /// Records the exit code observed by a task.
    pub fn record_exit_code(&self, task: &str, code: i64) {
        self.outputs()
            .insert(task.to_string(), TaskOutput::ExitCode(code));
    }

    /// Image ID recorded by the named task.
    pub fn image_id(&self, task: &str) -> Result<String, TaskError> {
        match self.outputs().get(task) {
            Some(TaskOutput::ImageId(id)) => Ok(id.clone()),
            _ => Err(missing_output(task, "image ID")),
        }
    }

    /// Container ID recorded by the named task.
    pub fn container_id(&self, task: &str) -> Result<String, TaskError> {
        match self.outputs().get(task) {
            Some(TaskOutput::ContainerId(id)) => Ok(id.clone()),
            _ => Err(missing_output(task, "container ID")),
        }
    }

    /// Exit code recorded by the named task.
    pub fn exit_code(&self, task: &str) -> Result<i64, TaskError> {
        match self.outputs().get(task) {
            Some(TaskOutput::ExitCode(code)) => Ok(*code),
            _ => Err(missing_output(task, "exit code")),
        }
    }

    /// Resolves a value that names an image: literal or a build task's
    /// recorded image ID.
    pub fn resolve_image(&self, value: &ValueRef) -> Result<String, TaskError> {
        match value {
            ValueRef::Literal(image) => Ok(image.clone()),
            ValueRef::FromTask(task) => self.image_id(task),
        }
    }

    /// Resolves a value that names a container: literal or a create task's
    /// recorded container ID.
    pub fn resolve_container(&self, value: &ValueRef) -> Result<String, TaskError> {
        match value {
            ValueRef::Literal(container) => Ok(container.clone()),
            ValueRef::FromTask(task) => self.container_id(task),
        }
    }

    fn outputs(&self) -> MutexGuard<'_, HashMap<String, TaskOutput>> {
        self.outputs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn missing_output(task: &str, kind: &str) -> TaskError {
    TaskError::MissingOutput {
        task: task.to_string(),
        kind: kind.to_string(),
    }
}

/// Writes a daemon-assigned ID to a file, creating parent directories.
pub(crate) fn write_id_file(path: &std::path::Path, id: &str) -> Result<(), TaskError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, format!("{id}\n"))?;
    Ok(())
}

/// Per-task error handling, opt-in at wiring time.
///
/// Suppression exists for tasks whose failure is an acceptable state, such
/// as removing a container that is already gone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Fail the run when the task errors.
    #[default]
    Propagate,
    /// Treat the task as completed when the rendered error contains the
    /// given fragment; other errors still fail the run.
    SuppressMatching(String),
}

impl ErrorPolicy {
    /// Creates a policy suppressing errors whose message contains
    /// `fragment`.
    pub fn suppress_matching(fragment: impl Into<String>) -> Self {
        ErrorPolicy::SuppressMatching(fragment.into())
    }

    /// True when this policy suppresses the given error.
    pub fn suppresses(&self, error: &TaskError) -> bool {
        match self {
            ErrorPolicy::Propagate => false,
            ErrorPolicy::SuppressMatching(fragment) => error.to_string().contains(fragment),
        }
    }
}
