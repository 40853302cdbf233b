//! Command-line interface for dockforge.
//!
//! Provides commands for rendering Dockerfiles, building and moving
//! images, and managing the container lifecycle from a manifest.

mod commands;

pub use commands::{parse_cli, run, run_with_cli};
