//! Task that renders a [`Dockerfile`] to disk.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::info;

use crate::dockerfile::Dockerfile;
use crate::error::TaskError;
use crate::tasks::{ErrorPolicy, RunContext, Task};

/// Validates an instruction sequence and writes it to a file.
///
/// Runs without a daemon connection, so it also works in offline runs
/// that only render build inputs.
pub struct WriteDockerfile {
    id: String,
    dockerfile: Dockerfile,
    destination: PathBuf,
    policy: ErrorPolicy,
}

impl WriteDockerfile {
    /// Creates a write task for an instruction sequence.
    pub fn new(
        id: impl Into<String>,
        dockerfile: Dockerfile,
        destination: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: id.into(),
            dockerfile,
            destination: destination.into(),
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
impl Task for WriteDockerfile {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> String {
        format!("Writes Dockerfile to '{}'", self.destination.display())
    }

    fn error_policy(&self) -> ErrorPolicy {
        self.policy.clone()
    }

    async fn execute(&self, _context: &RunContext) -> Result<(), TaskError> {
        self.dockerfile.write(&self.destination)?;
        info!(
            task = %self.id,
            path = %self.destination.display(),
            instructions = self.dockerfile.len(),
            "Wrote Dockerfile"
        );
        Ok(())
    }
}
