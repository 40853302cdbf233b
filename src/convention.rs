//! Convention pipeline for JVM application images.
//!
//! [`JvmAppImage`] derives a complete Dockerfile from a handful of
//! settings and expands into a wired write/build/push pipeline. The
//! layout mirrors how a JVM build lays out its distribution: `libs`,
//! `resources` and `classes` directories next to the Dockerfile, with
//! the application started through `java -cp`.

use std::path::Path;

use crate::client::ImageBuildSpec;
use crate::config::RegistryCredentials;
use crate::dockerfile::Dockerfile;
use crate::error::GraphError;
use crate::graph::TaskGraph;
use crate::tasks::{BuildImage, PushImage, WriteDockerfile};

/// Default base image for JVM applications.
pub const DEFAULT_BASE_IMAGE: &str = "eclipse-temurin:21-jre";

/// Default user the application runs as.
pub const DEFAULT_USER: &str = "nobody";

/// Default exposed port.
pub const DEFAULT_PORT: u16 = 8080;

/// Settings for a conventional JVM application image.
#[derive(Debug, Clone)]
pub struct JvmAppImage {
    main_class: String,
    base_image: String,
    maintainer: Option<String>,
    user: String,
    ports: Vec<u16>,
    jvm_args: Vec<String>,
    args: Vec<String>,
    tags: Vec<String>,
}

impl JvmAppImage {
    /// Creates a convention image for a main class, tagged with the
    /// primary image name.
    pub fn new(main_class: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            main_class: main_class.into(),
            base_image: DEFAULT_BASE_IMAGE.to_string(),
            maintainer: None,
            user: DEFAULT_USER.to_string(),
            ports: vec![DEFAULT_PORT],
            jvm_args: Vec::new(),
            args: Vec::new(),
            tags: vec![tag.into()],
        }
    }

    /// Sets the base image.
    pub fn with_base_image(mut self, image: impl Into<String>) -> Self {
        self.base_image = image.into();
        self
    }

    /// Sets the maintainer label.
    pub fn with_maintainer(mut self, maintainer: impl Into<String>) -> Self {
        self.maintainer = Some(maintainer.into());
        self
    }

    /// Sets the user the entrypoint runs as.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Replaces the exposed ports.
    pub fn with_ports(mut self, ports: Vec<u16>) -> Self {
        self.ports = ports;
        self
    }

    /// Adds a JVM argument, passed before `-cp`.
    pub fn with_jvm_arg(mut self, arg: impl Into<String>) -> Self {
        self.jvm_args.push(arg.into());
        self
    }

    /// Adds a program argument, passed after the main class.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Adds an extra image tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// The image tags the pipeline builds and pushes.
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Default image name derived from project coordinates:
    /// `<group>/<name>:<version>` lowercased, with `latest` when no
    /// version is supplied and no group segment when the group is empty.
    pub fn derive_image_name(group: &str, name: &str, version: Option<&str>) -> String {
        let version = version.filter(|v| !v.is_empty()).unwrap_or("latest");
        let reference = if group.is_empty() {
            format!("{name}:{version}")
        } else {
            format!("{group}/{name}:{version}")
        };
        reference.to_lowercase()
    }

    /// The derived Dockerfile.
    pub fn dockerfile(&self) -> Dockerfile {
        let mut dockerfile = Dockerfile::new();
        dockerfile.from(&self.base_image);
        if let Some(maintainer) = &self.maintainer {
            dockerfile.label(vec![("maintainer".to_string(), maintainer.clone())]);
        }
        dockerfile
            .workdir("/app")
            .copy("libs", "libs")
            .copy("resources", "resources")
            .copy("classes", "classes")
            .expose(&self.ports)
            .user(&self.user)
            .entrypoint(self.entrypoint());
        dockerfile
    }

    /// Expands into a writeDockerfile -> buildImage pipeline rooted at
    /// the build context directory.
    pub fn pipeline(&self, context_dir: &Path) -> Result<TaskGraph, GraphError> {
        self.build_pipeline(context_dir, None)
    }

    /// Like [`JvmAppImage::pipeline`], with every tag pushed after the
    /// build using the given credentials.
    pub fn pipeline_with_push(
        &self,
        context_dir: &Path,
        credentials: RegistryCredentials,
    ) -> Result<TaskGraph, GraphError> {
        self.build_pipeline(context_dir, Some(credentials))
    }

    fn build_pipeline(
        &self,
        context_dir: &Path,
        push: Option<RegistryCredentials>,
    ) -> Result<TaskGraph, GraphError> {
        let mut spec = ImageBuildSpec::new(context_dir, self.primary_tag());
        for tag in self.tags.iter().skip(1) {
            spec = spec.with_tag(tag.clone());
        }

        let mut graph = TaskGraph::new();
        graph.add_task(WriteDockerfile::new(
            "writeDockerfile",
            self.dockerfile(),
            context_dir.join("Dockerfile"),
        ))?;
        graph.add_task(BuildImage::new("buildImage", spec))?;
        graph.depends_on("buildImage", "writeDockerfile")?;

        if let Some(credentials) = push {
            for (index, tag) in self.tags.iter().enumerate() {
                let id = if index == 0 {
                    "pushImage".to_string()
                } else {
                    format!("pushImage{}", index + 1)
                };
                graph.add_task(
                    PushImage::new(&id, tag.clone()).with_credentials(credentials.clone()),
                )?;
                graph.depends_on(&id, "buildImage")?;
            }
        }

        Ok(graph)
    }

    fn primary_tag(&self) -> String {
        self.tags.first().cloned().unwrap_or_default()
    }

    fn entrypoint(&self) -> Vec<String> {
        let mut command = Vec::with_capacity(4 + self.jvm_args.len() + self.args.len());
        command.push("java".to_string());
        command.extend(self.jvm_args.iter().cloned());
        command.push("-cp".to_string());
        command.push("/app/resources:/app/classes:/app/libs/*".to_string());
        command.push(self.main_class.clone());
        command.extend(self.args.iter().cloned());
        command
    }
}
