//! Error types for dockforge operations.
//!
//! Defines error types for all major subsystems:
//! - Dockerfile construction, templating, and writing
//! - Docker remote API operations (image and container lifecycle)
//! - Task graph construction and pipeline execution

use thiserror::Error;

/// Errors that can occur while building or writing a Dockerfile.
#[derive(Debug, Error)]
pub enum DockerfileError {
    #[error("Dockerfile contains no instructions")]
    Empty,

    #[error("First effective instruction must be FROM, found '{0}'")]
    MissingFrom(String),

    #[error("Instruction index {index} out of bounds (length {len})")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("Blank keys are not allowed in {0} key=value pairs")]
    BlankKey(String),

    #[error("Template file '{0}' not found")]
    TemplateNotFound(String),

    #[error("Template rendering error: {0}")]
    Tera(#[from] tera::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced from Docker remote API operations.
#[derive(Debug, Error)]
pub enum RemoteApiError {
    #[error("Docker daemon not available: {0}")]
    Connect(String),

    #[error("Failed to assemble build context from '{path}': {message}")]
    Archive { path: String, message: String },

    #[error("Image build failed: {0}")]
    Build(String),

    #[error("Image push failed for '{image}': {message}")]
    Push { image: String, message: String },

    #[error("Image pull failed for '{image}': {message}")]
    Pull { image: String, message: String },

    #[error("Image listing failed: {0}")]
    List(String),

    #[error("Image removal failed for '{image}': {message}")]
    RemoveImage { image: String, message: String },

    #[error("Container creation failed for image '{image}': {message}")]
    Create { image: String, message: String },

    #[error("Container start failed for '{id}': {message}")]
    Start { id: String, message: String },

    #[error("Container stop failed for '{id}': {message}")]
    Stop { id: String, message: String },

    #[error("Container removal failed for '{id}': {message}")]
    Remove { id: String, message: String },

    #[error("Container wait failed for '{id}': {message}")]
    Wait { id: String, message: String },

    #[error("Container log streaming failed for '{id}': {message}")]
    Logs { id: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors in task graph construction and validation.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Task '{0}' is not part of this graph")]
    UnknownTask(String),

    #[error("Task '{0}' already exists in graph")]
    DuplicateTask(String),

    #[error("Task '{0}' cannot be wired to itself")]
    SelfReference(String),

    #[error("Edge from '{from}' to '{to}' would create a cycle")]
    Cycle { from: String, to: String },
}

/// Errors produced by individual pipeline tasks.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    RemoteApi(#[from] RemoteApiError),

    #[error(transparent)]
    Dockerfile(#[from] DockerfileError),

    #[error("Task '{task}' produced no {kind} output")]
    MissingOutput { task: String, kind: String },

    #[error("Invalid task input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced from a pipeline run.
///
/// A task failure carries the summary of the aborted run so callers can
/// still inspect every task's terminal state.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Task '{task}' failed: {source}")]
    TaskFailed {
        task: String,
        #[source]
        source: TaskError,
        summary: crate::graph::RunSummary,
    },

    #[error(transparent)]
    Graph(#[from] GraphError),
}
