//! Manifest-driven pipelines.
//!
//! A manifest (`dockforge.yaml` by default) describes the Dockerfile,
//! image and container for one service in a single YAML file. The
//! [`compile`] functions turn a parsed [`Manifest`] into a
//! [`TaskGraph`](crate::graph::TaskGraph) for each workflow.
//!
//! # Workflows
//!
//! - **render**: write the Dockerfile described by the manifest
//! - **build**: render (when configured) and build the image
//! - **up**: build, then create and start the container
//! - **down**: stop and remove the container by name
//! - **logs**: stream logs from the named container
//!
//! # Example
//!
//! ```rust,ignore
//! use dockforge::graph::Runner;
//! use dockforge::pipeline::{up_graph, Manifest};
//! use dockforge::tasks::RunContext;
//! use std::path::Path;
//!
//! let manifest = Manifest::from_path(Path::new("dockforge.yaml"))?;
//! let graph = up_graph(&manifest, false)?;
//!
//! let client = DockerClient::connect(&manifest.daemon_config()?).await?;
//! let summary = Runner::new(RunContext::new(client)).run(&graph).await?;
//! println!("run {} finished in {:?}", summary.run_id, summary.elapsed());
//! ```

pub mod compile;
pub mod manifest;

pub use compile::{build_graph, down_graph, logs_graph, render_graph, up_graph, PipelineError};
pub use manifest::{
    ContainerSection, DaemonSection, DockerfileSection, ImageSection, Manifest, RegistrySection,
    DEFAULT_MANIFEST,
};
