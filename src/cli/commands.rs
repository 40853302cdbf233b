//! CLI command definitions for dockforge.
//!
//! Every command compiles the manifest into a task graph and hands it
//! to the runner, so ordering, failure handling and logging behave the
//! same whether a workflow has one task or six.

use std::path::{Path, PathBuf};

use clap::Parser;
use tracing::info;

use crate::client::{DockerClient, LogStreamOptions};
use crate::graph::{Runner, TaskGraph, TaskStatus};
use crate::pipeline::compile::{BUILD_IMAGE, CREATE_CONTAINER, START_CONTAINER};
use crate::pipeline::{
    build_graph, down_graph, logs_graph, render_graph, up_graph, Manifest, DEFAULT_MANIFEST,
};
use crate::tasks::{ListImages, PullImage, PushImage, RunContext, ValueRef};

/// Dockerfile generation and Docker pipelines driven by one manifest.
#[derive(Parser)]
#[command(name = "dockforge")]
#[command(about = "Generate Dockerfiles and run Docker image and container pipelines")]
#[command(version)]
#[command(
    long_about = "dockforge compiles a YAML manifest into a dependency-ordered task graph and runs it against the Docker daemon.\n\nExample usage:\n  dockforge up --rm\n  dockforge build -f deploy/dockforge.yaml\n  dockforge logs --follow --tail 100"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Manifest file describing the pipeline.
    #[arg(short = 'f', long, default_value = DEFAULT_MANIFEST, global = true)]
    pub manifest: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Write the Dockerfile described by the manifest.
    #[command(alias = "r")]
    Render,

    /// Build the image, rendering the Dockerfile first when configured.
    #[command(alias = "b")]
    Build,

    /// Pull an image from a registry.
    Pull(PullArgs),

    /// Push an image to a registry.
    Push(PushArgs),

    /// List local images.
    Images(ImagesArgs),

    /// Build the image, then create and start the container.
    Up(UpArgs),

    /// Stop and remove the container named in the manifest.
    Down,

    /// Stream logs from the container named in the manifest.
    Logs(LogsArgs),
}

/// Arguments for `dockforge pull`.
#[derive(Parser, Debug)]
pub struct PullArgs {
    /// Image reference to pull, e.g. `alpine:3.19`.
    pub image: String,
}

/// Arguments for `dockforge push`.
#[derive(Parser, Debug)]
pub struct PushArgs {
    /// Image reference to push, e.g. `registry.example.com/web:1.0`.
    pub image: String,
}

/// Arguments for `dockforge images`.
#[derive(Parser, Debug)]
pub struct ImagesArgs {
    /// Only list images matching this `repo[:tag]` reference.
    #[arg(long)]
    pub filter: Option<String>,
}

/// Arguments for `dockforge up`.
#[derive(Parser, Debug)]
pub struct UpArgs {
    /// Remove the container again once the run finishes.
    #[arg(long)]
    pub rm: bool,

    /// Run only this task and everything it depends on.
    #[arg(long)]
    pub target: Option<String>,
}

/// Arguments for `dockforge logs`.
#[derive(Parser, Debug)]
pub struct LogsArgs {
    /// Keep the stream open and deliver new output as it appears.
    #[arg(long)]
    pub follow: bool,

    /// Only return the last N lines.
    #[arg(long)]
    pub tail: Option<u64>,

    /// Prefix each line with an RFC 3339 timestamp.
    #[arg(long)]
    pub timestamps: bool,

    /// Only return lines logged after this Unix timestamp.
    #[arg(long)]
    pub since: Option<i64>,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before
/// running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let manifest = load_manifest(&cli.manifest)?;
    match cli.command {
        Commands::Render => run_render_command(&manifest).await,
        Commands::Build => run_build_command(&manifest).await,
        Commands::Pull(args) => run_pull_command(&manifest, args).await,
        Commands::Push(args) => run_push_command(&manifest, args).await,
        Commands::Images(args) => run_images_command(&manifest, args).await,
        Commands::Up(args) => run_up_command(&manifest, args).await,
        Commands::Down => run_down_command(&manifest).await,
        Commands::Logs(args) => run_logs_command(&manifest, args).await,
    }
}

/// Loads the manifest, falling back to an empty one when the default
/// file is absent so registry commands work without a manifest on disk.
fn load_manifest(path: &Path) -> anyhow::Result<Manifest> {
    if !path.exists() && path == Path::new(DEFAULT_MANIFEST) {
        return Ok(Manifest::default());
    }
    Manifest::from_path(path)
        .map_err(|e| anyhow::anyhow!("Failed to load manifest {}: {}", path.display(), e))
}

async fn connect_runner(manifest: &Manifest) -> anyhow::Result<Runner> {
    let config = manifest.daemon_config()?;
    let client = DockerClient::connect(&config).await?;
    Ok(Runner::new(RunContext::new(client)))
}

async fn run_render_command(manifest: &Manifest) -> anyhow::Result<()> {
    let destination = manifest.dockerfile_destination();
    let graph = render_graph(manifest)?;
    Runner::new(RunContext::offline()).run(&graph).await?;
    println!("Wrote {}", destination.display());
    Ok(())
}

async fn run_build_command(manifest: &Manifest) -> anyhow::Result<()> {
    let graph = build_graph(manifest)?;
    let runner = connect_runner(manifest).await?;
    runner.run(&graph).await?;

    let image = runner
        .context()
        .resolve_image(&ValueRef::from_task(BUILD_IMAGE))?;
    println!("Built {}", image);
    Ok(())
}

async fn run_pull_command(manifest: &Manifest, args: PullArgs) -> anyhow::Result<()> {
    let credentials = manifest.registry_credentials()?;
    let mut task = PullImage::new("pullImage", args.image);
    if !credentials.is_anonymous() {
        task = task.with_credentials(credentials);
    }

    let mut graph = TaskGraph::new();
    graph.add_task(task)?;
    connect_runner(manifest).await?.run(&graph).await?;
    Ok(())
}

async fn run_push_command(manifest: &Manifest, args: PushArgs) -> anyhow::Result<()> {
    let credentials = manifest.registry_credentials()?;
    let mut task = PushImage::new("pushImage", args.image);
    if !credentials.is_anonymous() {
        task = task.with_credentials(credentials);
    }

    let mut graph = TaskGraph::new();
    graph.add_task(task)?;
    connect_runner(manifest).await?.run(&graph).await?;
    Ok(())
}

async fn run_images_command(manifest: &Manifest, args: ImagesArgs) -> anyhow::Result<()> {
    let mut task = ListImages::new("listImages");
    if let Some(filter) = args.filter {
        task = task.with_filter(filter);
    }

    let mut graph = TaskGraph::new();
    graph.add_task(task)?;
    connect_runner(manifest).await?.run(&graph).await?;
    Ok(())
}

async fn run_up_command(manifest: &Manifest, args: UpArgs) -> anyhow::Result<()> {
    let graph = up_graph(manifest, args.rm)?;
    let runner = connect_runner(manifest).await?;
    let summary = match &args.target {
        Some(target) => runner.run_targets(&graph, &[target.clone()]).await?,
        None => runner.run(&graph).await?,
    };

    if summary.status_of(START_CONTAINER) == Some(TaskStatus::Completed) {
        let container = runner
            .context()
            .resolve_container(&ValueRef::from_task(CREATE_CONTAINER))?;
        println!("Started container {}", container);
    }
    Ok(())
}

async fn run_down_command(manifest: &Manifest) -> anyhow::Result<()> {
    let graph = down_graph(manifest)?;
    let summary = connect_runner(manifest).await?.run(&graph).await?;
    info!(run = %summary.run_id, "Teardown complete");
    Ok(())
}

async fn run_logs_command(manifest: &Manifest, args: LogsArgs) -> anyhow::Result<()> {
    let options = LogStreamOptions {
        follow: args.follow,
        timestamps: args.timestamps,
        since: args.since,
        tail: args.tail,
        ..LogStreamOptions::default()
    };

    let graph = logs_graph(manifest, options)?;
    connect_runner(manifest).await?.run(&graph).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["dockforge", "build"]).expect("should parse");
        assert_eq!(cli.manifest, PathBuf::from(DEFAULT_MANIFEST));
        assert_eq!(cli.log_level, "info");
        assert!(matches!(cli.command, Commands::Build));
    }

    #[test]
    fn test_build_alias_and_manifest_flag() {
        let cli = Cli::try_parse_from(["dockforge", "b", "-f", "deploy/dockforge.yaml"])
            .expect("should parse with alias");
        assert_eq!(cli.manifest, PathBuf::from("deploy/dockforge.yaml"));
        assert!(matches!(cli.command, Commands::Build));
    }

    #[test]
    fn test_render_alias() {
        let cli = Cli::try_parse_from(["dockforge", "r"]).expect("should parse with alias");
        assert!(matches!(cli.command, Commands::Render));
    }

    #[test]
    fn test_pull_requires_image() {
        assert!(Cli::try_parse_from(["dockforge", "pull"]).is_err());

        let cli = Cli::try_parse_from(["dockforge", "pull", "alpine:3.19"]).expect("should parse");
        match cli.command {
            Commands::Pull(args) => assert_eq!(args.image, "alpine:3.19"),
            _ => panic!("Expected Pull command"),
        }
    }

    #[test]
    fn test_up_flags() {
        let cli = Cli::try_parse_from(["dockforge", "up", "--rm", "--target", "buildImage"])
            .expect("should parse");
        match cli.command {
            Commands::Up(args) => {
                assert!(args.rm);
                assert_eq!(args.target.as_deref(), Some("buildImage"));
            }
            _ => panic!("Expected Up command"),
        }
    }

    #[test]
    fn test_logs_flags() {
        let cli = Cli::try_parse_from(["dockforge", "logs", "--follow", "--tail", "100"])
            .expect("should parse");
        match cli.command {
            Commands::Logs(args) => {
                assert!(args.follow);
                assert_eq!(args.tail, Some(100));
                assert!(!args.timestamps);
            }
            _ => panic!("Expected Logs command"),
        }
    }

    #[test]
    fn test_images_filter() {
        let cli = Cli::try_parse_from(["dockforge", "images", "--filter", "example/web"])
            .expect("should parse");
        match cli.command {
            Commands::Images(args) => {
                assert_eq!(args.filter.as_deref(), Some("example/web"));
            }
            _ => panic!("Expected Images command"),
        }
    }

    #[test]
    fn test_missing_default_manifest_falls_back_to_empty() {
        let manifest = load_manifest(Path::new(DEFAULT_MANIFEST)).expect("should fall back");
        assert!(manifest.image.is_none());

        let err = load_manifest(Path::new("definitely-absent.yaml")).unwrap_err();
        assert!(err.to_string().contains("definitely-absent.yaml"));
    }
}
