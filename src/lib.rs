//! dockforge: Dockerfile generation and Docker Remote API pipelines.
//!
//! This library models Dockerfiles as typed instruction sequences,
//! exposes the Docker daemon operations behind task types, and wires
//! tasks into dependency-ordered graphs with guaranteed cleanup.

// Core modules
pub mod cli;
pub mod client;
pub mod config;
pub mod convention;
pub mod dockerfile;
pub mod error;
pub mod graph;
pub mod pipeline;
pub mod registry;
pub mod tasks;

// Re-export commonly used error types
pub use error::{DockerfileError, GraphError, RemoteApiError, RunError, TaskError};
