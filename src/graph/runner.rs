//! Sequential pipeline execution.
//!
//! The [`Runner`] resolves a target set against a [`TaskGraph`], walks
//! the resulting schedule in order and enforces the failure rules:
//!
//! - An unsuppressed dependency failure skips dependents transitively.
//! - The first unhandled error aborts remaining non-finalizer tasks.
//! - Finalizers of started tasks still run, and the error is returned
//!   only after they complete.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{GraphError, RunError, TaskError};
use crate::graph::TaskGraph;
use crate::tasks::RunContext;

/// Terminal state of a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Task ran to completion.
    Completed,
    /// Task failed but its error policy suppressed the error.
    Suppressed,
    /// Task failed with an unhandled error.
    Failed,
    /// Task never ran.
    Skipped,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Suppressed => write!(f, "suppressed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Terminal state of one task in a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskReport {
    /// ID of the task.
    pub task: String,
    /// Terminal status.
    pub status: TaskStatus,
    /// Error message for failed or suppressed tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskReport {
    fn completed(task: &str) -> Self {
        Self {
            task: task.to_string(),
            status: TaskStatus::Completed,
            error: None,
        }
    }

    fn suppressed(task: &str, error: impl Into<String>) -> Self {
        Self {
            task: task.to_string(),
            status: TaskStatus::Suppressed,
            error: Some(error.into()),
        }
    }

    fn failed(task: &str, error: impl Into<String>) -> Self {
        Self {
            task: task.to_string(),
            status: TaskStatus::Failed,
            error: Some(error.into()),
        }
    }

    fn skipped(task: &str) -> Self {
        Self {
            task: task.to_string(),
            status: TaskStatus::Skipped,
            error: None,
        }
    }
}

/// Outcome of a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique identifier of this run.
    pub run_id: Uuid,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished, finalizers included.
    pub finished_at: DateTime<Utc>,
    /// Per-task terminal states in execution order.
    pub tasks: Vec<TaskReport>,
}

impl RunSummary {
    /// Terminal status of a task, if it was scheduled.
    pub fn status_of(&self, task: &str) -> Option<TaskStatus> {
        self.tasks
            .iter()
            .find(|report| report.task == task)
            .map(|report| report.status)
    }

    /// Whether no task failed with an unhandled error.
    pub fn succeeded(&self) -> bool {
        self.tasks
            .iter()
            .all(|report| report.status != TaskStatus::Failed)
    }

    /// Wall clock duration of the run.
    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Executes task graphs sequentially on the tokio runtime.
pub struct Runner {
    context: RunContext,
}

impl Runner {
    /// Creates a runner over a run context.
    pub fn new(context: RunContext) -> Self {
        Self { context }
    }

    /// The run context tasks execute against.
    pub fn context(&self) -> &RunContext {
        &self.context
    }

    /// Runs every task in the graph.
    pub async fn run(&self, graph: &TaskGraph) -> Result<RunSummary, RunError> {
        self.run_targets(graph, graph.task_ids()).await
    }

    /// Runs the requested targets and everything they pull in.
    ///
    /// Returns the run summary, or the first unhandled task error once
    /// all due finalizers have completed. The failure carries the
    /// summary of the aborted run.
    pub async fn run_targets(
        &self,
        graph: &TaskGraph,
        targets: &[String],
    ) -> Result<RunSummary, RunError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let schedule = graph.resolve_schedule(targets)?;
        info!(run = %run_id, tasks = schedule.len(), "Starting pipeline run");

        // Finalizer ID to the scheduled tasks it cleans up after.
        let mut finalized_map: HashMap<&str, Vec<&str>> = HashMap::new();
        for id in &schedule {
            for finalizer in graph.finalizers_of(id) {
                finalized_map.entry(finalizer.as_str()).or_default().push(id.as_str());
            }
        }

        let mut reports: Vec<TaskReport> = Vec::with_capacity(schedule.len());
        let mut started: HashSet<&str> = HashSet::new();
        // Unsuppressed failures and skips, for dependent propagation.
        let mut bad: HashSet<&str> = HashSet::new();
        let mut first_failure: Option<(String, TaskError)> = None;

        for id in &schedule {
            let id = id.as_str();
            let skip_reason = match finalized_map.get(id) {
                Some(finalized) if !finalized.iter().any(|task| started.contains(task)) => {
                    Some("finalized task never started")
                }
                // A due finalizer runs regardless of earlier failures.
                Some(_) => None,
                None if graph
                    .dependencies_of(id)
                    .iter()
                    .any(|dep| bad.contains(dep.as_str())) =>
                {
                    Some("a dependency failed or was skipped")
                }
                None if first_failure.is_some() => Some("an earlier task failed"),
                None => None,
            };

            if let Some(reason) = skip_reason {
                info!(task = %id, reason, "Skipping task");
                bad.insert(id);
                reports.push(TaskReport::skipped(id));
                continue;
            }

            let Some(task) = graph.task(id) else {
                return Err(GraphError::UnknownTask(id.to_string()).into());
            };

            started.insert(id);
            info!(task = %id, "{}", task.description());
            match task.execute(&self.context).await {
                Ok(()) => reports.push(TaskReport::completed(id)),
                Err(err) if task.error_policy().suppresses(&err) => {
                    warn!(task = %id, error = %err, "Suppressed task error");
                    reports.push(TaskReport::suppressed(id, err.to_string()));
                }
                Err(err) => {
                    error!(task = %id, error = %err, "Task failed");
                    bad.insert(id);
                    reports.push(TaskReport::failed(id, err.to_string()));
                    if first_failure.is_none() {
                        first_failure = Some((id.to_string(), err));
                    }
                }
            }
        }

        let summary = RunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            tasks: reports,
        };
        for report in &summary.tasks {
            info!(run = %run_id, task = %report.task, status = %report.status, "Task finished");
        }

        match first_failure {
            Some((task, source)) => {
                error!(run = %run_id, task = %task, "Pipeline run failed");
                Err(RunError::TaskFailed {
                    task,
                    source,
                    summary,
                })
            }
            None => {
                info!(
                    run = %run_id,
                    elapsed_ms = summary.elapsed().num_milliseconds(),
                    "Pipeline run finished"
                );
                Ok(summary)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::{ErrorPolicy, Task};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    /// Test task that records its execution order and optionally fails.
    struct Probe {
        id: String,
        fail: bool,
        policy: ErrorPolicy,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Probe {
        fn ok(id: &str, log: &Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                id: id.to_string(),
                fail: false,
                policy: ErrorPolicy::Propagate,
                log: log.clone(),
            }
        }

        fn failing(id: &str, log: &Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                id: id.to_string(),
                fail: true,
                policy: ErrorPolicy::Propagate,
                log: log.clone(),
            }
        }

        fn with_policy(mut self, policy: ErrorPolicy) -> Self {
            self.policy = policy;
            self
        }
    }

    #[async_trait]
    impl Task for Probe {
        fn id(&self) -> &str {
            &self.id
        }

        fn error_policy(&self) -> ErrorPolicy {
            self.policy.clone()
        }

        async fn execute(&self, _context: &RunContext) -> Result<(), TaskError> {
            self.log.lock().unwrap().push(self.id.clone());
            if self.fail {
                Err(TaskError::InvalidInput(format!("{} exploded", self.id)))
            } else {
                Ok(())
            }
        }
    }

    fn execution_log() -> Arc<Mutex<Vec<String>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn targets(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    #[tokio::test]
    async fn test_run_executes_in_dependency_order() {
        let log = execution_log();
        let mut graph = TaskGraph::new();
        graph.add_task(Probe::ok("build", &log)).unwrap();
        graph.add_task(Probe::ok("render", &log)).unwrap();
        graph.add_task(Probe::ok("push", &log)).unwrap();
        graph.depends_on("build", "render").unwrap();
        graph.depends_on("push", "build").unwrap();

        let runner = Runner::new(RunContext::offline());
        let summary = runner
            .run_targets(&graph, &targets(&["push"]))
            .await
            .unwrap();

        assert_eq!(*log.lock().unwrap(), ["render", "build", "push"]);
        assert!(summary.succeeded());
        assert_eq!(summary.status_of("render"), Some(TaskStatus::Completed));
        assert_eq!(summary.status_of("push"), Some(TaskStatus::Completed));
    }

    #[tokio::test]
    async fn test_failure_skips_dependents() {
        let log = execution_log();
        let mut graph = TaskGraph::new();
        graph.add_task(Probe::ok("render", &log)).unwrap();
        graph.add_task(Probe::failing("build", &log)).unwrap();
        graph.add_task(Probe::ok("push", &log)).unwrap();
        graph.depends_on("build", "render").unwrap();
        graph.depends_on("push", "build").unwrap();

        let runner = Runner::new(RunContext::offline());
        let err = runner
            .run_targets(&graph, &targets(&["push"]))
            .await
            .unwrap_err();

        assert_eq!(*log.lock().unwrap(), ["render", "build"]);
        let RunError::TaskFailed { task, summary, .. } = err else {
            panic!("expected task failure");
        };
        assert_eq!(task, "build");
        assert_eq!(summary.status_of("build"), Some(TaskStatus::Failed));
        assert_eq!(summary.status_of("push"), Some(TaskStatus::Skipped));
    }

    #[tokio::test]
    async fn test_suppressed_failure_does_not_skip_dependents() {
        let log = execution_log();
        let mut graph = TaskGraph::new();
        graph
            .add_task(
                Probe::failing("stop", &log)
                    .with_policy(ErrorPolicy::suppress_matching("exploded")),
            )
            .unwrap();
        graph.add_task(Probe::ok("remove", &log)).unwrap();
        graph.depends_on("remove", "stop").unwrap();

        let runner = Runner::new(RunContext::offline());
        let summary = runner
            .run_targets(&graph, &targets(&["remove"]))
            .await
            .unwrap();

        assert_eq!(*log.lock().unwrap(), ["stop", "remove"]);
        assert_eq!(summary.status_of("stop"), Some(TaskStatus::Suppressed));
        assert_eq!(summary.status_of("remove"), Some(TaskStatus::Completed));
    }

    #[tokio::test]
    async fn test_finalizer_runs_after_failure() {
        let log = execution_log();
        let mut graph = TaskGraph::new();
        graph.add_task(Probe::failing("start", &log)).unwrap();
        graph.add_task(Probe::ok("remove", &log)).unwrap();
        graph.finalized_by("start", "remove").unwrap();

        let runner = Runner::new(RunContext::offline());
        let err = runner
            .run_targets(&graph, &targets(&["start"]))
            .await
            .unwrap_err();

        assert_eq!(*log.lock().unwrap(), ["start", "remove"]);
        let RunError::TaskFailed { task, summary, .. } = err else {
            panic!("expected task failure");
        };
        assert_eq!(task, "start");
        assert_eq!(summary.status_of("remove"), Some(TaskStatus::Completed));
    }

    #[tokio::test]
    async fn test_finalizer_skipped_when_task_never_started() {
        let log = execution_log();
        let mut graph = TaskGraph::new();
        graph.add_task(Probe::failing("create", &log)).unwrap();
        graph.add_task(Probe::ok("start", &log)).unwrap();
        graph.add_task(Probe::ok("remove", &log)).unwrap();
        graph.depends_on("start", "create").unwrap();
        graph.finalized_by("start", "remove").unwrap();

        let runner = Runner::new(RunContext::offline());
        let err = runner
            .run_targets(&graph, &targets(&["start"]))
            .await
            .unwrap_err();

        assert_eq!(*log.lock().unwrap(), ["create"]);
        let RunError::TaskFailed { summary, .. } = err else {
            panic!("expected task failure");
        };
        assert_eq!(summary.status_of("start"), Some(TaskStatus::Skipped));
        assert_eq!(summary.status_of("remove"), Some(TaskStatus::Skipped));
    }

    #[tokio::test]
    async fn test_abort_skips_unrelated_tasks() {
        let log = execution_log();
        let mut graph = TaskGraph::new();
        graph.add_task(Probe::failing("build", &log)).unwrap();
        graph.add_task(Probe::ok("images", &log)).unwrap();
        graph.runs_after("images", "build").unwrap();

        let runner = Runner::new(RunContext::offline());
        let err = runner
            .run_targets(&graph, &targets(&["build", "images"]))
            .await
            .unwrap_err();

        assert_eq!(*log.lock().unwrap(), ["build"]);
        let RunError::TaskFailed { summary, .. } = err else {
            panic!("expected task failure");
        };
        assert_eq!(summary.status_of("images"), Some(TaskStatus::Skipped));
    }

    #[tokio::test]
    async fn test_unknown_target_is_a_graph_error() {
        let graph = TaskGraph::new();
        let runner = Runner::new(RunContext::offline());
        let err = runner
            .run_targets(&graph, &targets(&["deploy"]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RunError::Graph(GraphError::UnknownTask(id)) if id == "deploy"
        ));
    }
}
