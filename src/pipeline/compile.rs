//! Compiles a manifest into task graphs.
//!
//! Each workflow gets its own graph built from the same manifest. Task
//! ids are fixed so `--target` and cross-workflow wiring stay stable.

use thiserror::Error;

use crate::client::{ContainerSpec, LogStreamOptions};
use crate::config::ConfigError;
use crate::error::{DockerfileError, GraphError};
use crate::graph::TaskGraph;
use crate::tasks::{
    BuildImage, CreateContainer, LogsContainer, RemoveContainer, StartContainer, StopContainer,
    ValueRef, WriteDockerfile,
};

use super::manifest::{ContainerSection, Manifest};

/// Task id for the Dockerfile write step.
pub const WRITE_DOCKERFILE: &str = "writeDockerfile";
/// Task id for the image build step.
pub const BUILD_IMAGE: &str = "buildImage";
/// Task id for the container create step.
pub const CREATE_CONTAINER: &str = "createContainer";
/// Task id for the container start step.
pub const START_CONTAINER: &str = "startContainer";
/// Task id for the container stop step.
pub const STOP_CONTAINER: &str = "stopContainer";
/// Task id for the container remove step.
pub const REMOVE_CONTAINER: &str = "removeContainer";
/// Task id for the log streaming step.
pub const LOGS_CONTAINER: &str = "logsContainer";

/// Errors raised while compiling a manifest into a graph.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Manifest values are missing or invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Graph wiring failed.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// The Dockerfile section does not describe a valid file.
    #[error(transparent)]
    Dockerfile(#[from] DockerfileError),
}

/// Graph that writes the Dockerfile described by the manifest.
///
/// The instruction sequence is built here so template and syntax
/// problems surface before any task runs.
///
/// # Errors
///
/// Returns an error when the manifest has no `dockerfile` section or
/// the section does not produce a valid instruction sequence.
pub fn render_graph(manifest: &Manifest) -> Result<TaskGraph, PipelineError> {
    let section = manifest
        .dockerfile
        .as_ref()
        .ok_or_else(|| missing("dockerfile"))?;
    let dockerfile = section.build()?;

    let mut graph = TaskGraph::new();
    graph.add_task(WriteDockerfile::new(
        WRITE_DOCKERFILE,
        dockerfile,
        manifest.dockerfile_destination(),
    ))?;
    Ok(graph)
}

/// Graph that builds the image, rendering the Dockerfile first when the
/// manifest has a `dockerfile` section.
///
/// Registry credentials are attached to the build only when the
/// manifest or environment actually provides them.
///
/// # Errors
///
/// Returns an error when the manifest has no `image` section or its
/// values do not validate.
pub fn build_graph(manifest: &Manifest) -> Result<TaskGraph, PipelineError> {
    let image = manifest.image.as_ref().ok_or_else(|| missing("image"))?;
    let spec = image.to_spec()?;
    let credentials = manifest.registry_credentials()?;

    let mut build = BuildImage::new(BUILD_IMAGE, spec);
    if !credentials.is_anonymous() {
        build = build.with_credentials(credentials);
    }

    let mut graph = TaskGraph::new();
    if let Some(section) = &manifest.dockerfile {
        let dockerfile = section.build()?;
        graph.add_task(WriteDockerfile::new(
            WRITE_DOCKERFILE,
            dockerfile,
            manifest.dockerfile_destination(),
        ))?;
    }
    graph.add_task(build)?;
    if graph.contains(WRITE_DOCKERFILE) {
        graph.depends_on(BUILD_IMAGE, WRITE_DOCKERFILE)?;
    }
    Ok(graph)
}

/// Graph that builds the image, then creates and starts the container.
///
/// With `remove_on_exit` the container is removed again once the run
/// finishes, whether or not the start succeeded. The remove step is a
/// finalizer of the start step, so it is skipped when the container was
/// never created.
pub fn up_graph(manifest: &Manifest, remove_on_exit: bool) -> Result<TaskGraph, PipelineError> {
    let mut graph = build_graph(manifest)?;
    let spec = match &manifest.container {
        Some(section) => section.to_spec(),
        None => ContainerSpec::new(),
    };

    graph.add_task(CreateContainer::new(
        CREATE_CONTAINER,
        ValueRef::from_task(BUILD_IMAGE),
        spec,
    ))?;
    graph.depends_on(CREATE_CONTAINER, BUILD_IMAGE)?;

    graph.add_task(StartContainer::new(
        START_CONTAINER,
        ValueRef::from_task(CREATE_CONTAINER),
    ))?;
    graph.depends_on(START_CONTAINER, CREATE_CONTAINER)?;

    if remove_on_exit {
        graph.add_task(
            RemoveContainer::new(REMOVE_CONTAINER, ValueRef::from_task(CREATE_CONTAINER))
                .with_force(true)
                .ignoring_missing(),
        )?;
        graph.finalized_by(START_CONTAINER, REMOVE_CONTAINER)?;
    }
    Ok(graph)
}

/// Graph that stops and removes the container named in the manifest.
///
/// Both steps tolerate a container that is already gone, so `down` is
/// safe to run twice.
pub fn down_graph(manifest: &Manifest) -> Result<TaskGraph, PipelineError> {
    let (section, name) = named_container(manifest)?;

    let mut stop = StopContainer::new(STOP_CONTAINER, ValueRef::literal(name)).ignoring_missing();
    if let Some(timeout) = section.stop_timeout_secs {
        stop = stop.with_timeout_secs(timeout);
    }

    let mut graph = TaskGraph::new();
    graph.add_task(stop)?;
    graph.add_task(
        RemoveContainer::new(REMOVE_CONTAINER, ValueRef::literal(name)).ignoring_missing(),
    )?;
    graph.depends_on(REMOVE_CONTAINER, STOP_CONTAINER)?;
    Ok(graph)
}

/// Graph that streams logs from the container named in the manifest.
pub fn logs_graph(
    manifest: &Manifest,
    options: LogStreamOptions,
) -> Result<TaskGraph, PipelineError> {
    let (_, name) = named_container(manifest)?;

    let mut graph = TaskGraph::new();
    graph.add_task(
        LogsContainer::new(LOGS_CONTAINER, ValueRef::literal(name)).with_options(options),
    )?;
    Ok(graph)
}

fn missing(section: &str) -> PipelineError {
    PipelineError::Config(ConfigError::ValidationFailed(format!(
        "manifest has no {} section",
        section
    )))
}

fn named_container(manifest: &Manifest) -> Result<(&ContainerSection, &str), PipelineError> {
    let section = manifest
        .container
        .as_ref()
        .ok_or_else(|| missing("container"))?;
    match section.name.as_deref() {
        Some(name) => Ok((section, name)),
        None => Err(PipelineError::Config(ConfigError::ValidationFailed(
            "container.name must be set to target an existing container".to_string(),
        ))),
    }
}
