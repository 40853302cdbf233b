//! Task graph construction and wiring.
//!
//! A [`TaskGraph`] holds named tasks and three kinds of edges between
//! them:
//!
//! - `depends_on`: producer/consumer edge. The dependency is scheduled
//!   whenever the dependent is, and runs strictly before it.
//! - `runs_after`: pure ordering. Orders two tasks when both are
//!   scheduled, but never pulls a task into the schedule.
//! - `finalized_by`: guaranteed cleanup. The finalizer is scheduled with
//!   the finalized task and runs after it and after everything that
//!   depends on it, whether they succeed or fail.
//!
//! Cycles across the union of all three edge kinds are rejected when the
//! edge is declared, naming the offending edge.

use std::collections::{HashMap, HashSet};

use crate::error::GraphError;
use crate::tasks::Task;

pub mod runner;

pub use runner::{RunSummary, Runner, TaskReport, TaskStatus};

/// A directed acyclic graph of pipeline tasks.
pub struct TaskGraph {
    tasks: HashMap<String, Box<dyn Task>>,
    /// Insertion order, used for deterministic scheduling.
    order: Vec<String>,
    /// Task ID to the IDs it depends on.
    dependencies: HashMap<String, Vec<String>>,
    /// Task ID to the IDs it is ordered after.
    ordered_after: HashMap<String, Vec<String>>,
    /// Task ID to the IDs of its finalizers.
    finalizers: HashMap<String, Vec<String>>,
}

impl TaskGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
            order: Vec::new(),
            dependencies: HashMap::new(),
            ordered_after: HashMap::new(),
            finalizers: HashMap::new(),
        }
    }

    /// Adds a task to the graph.
    ///
    /// # Errors
    ///
    /// Returns `GraphError::DuplicateTask` if a task with the same ID is
    /// already present.
    pub fn add_task(&mut self, task: impl Task + 'static) -> Result<(), GraphError> {
        let id = task.id().to_string();
        if self.tasks.contains_key(&id) {
            return Err(GraphError::DuplicateTask(id));
        }
        self.order.push(id.clone());
        self.tasks.insert(id, Box::new(task));
        Ok(())
    }

    /// Declares that `task` depends on `dep`.
    ///
    /// Scheduling `task` pulls `dep` into the schedule, and `dep` runs
    /// strictly before `task`. An unsuppressed failure of `dep` skips
    /// `task` and everything downstream of it.
    pub fn depends_on(&mut self, task: &str, dep: &str) -> Result<(), GraphError> {
        self.check_edge(task, dep)?;
        if self.reaches(task, dep) {
            return Err(GraphError::Cycle {
                from: task.to_string(),
                to: dep.to_string(),
            });
        }
        push_unique(self.dependencies.entry(task.to_string()).or_default(), dep);
        Ok(())
    }

    /// Declares that `task` runs after `other` whenever both are
    /// scheduled. Never pulls `other` into the schedule.
    pub fn runs_after(&mut self, task: &str, other: &str) -> Result<(), GraphError> {
        self.check_edge(task, other)?;
        if self.reaches(task, other) {
            return Err(GraphError::Cycle {
                from: task.to_string(),
                to: other.to_string(),
            });
        }
        push_unique(self.ordered_after.entry(task.to_string()).or_default(), other);
        Ok(())
    }

    /// Declares that `finalizer` cleans up after `task`.
    ///
    /// Scheduling `task` pulls `finalizer` (and its dependencies) into
    /// the schedule. The finalizer runs after `task` and after every
    /// scheduled task that transitively depends on `task`, regardless of
    /// failures. It is skipped only when `task` never started.
    pub fn finalized_by(&mut self, task: &str, finalizer: &str) -> Result<(), GraphError> {
        self.check_edge(task, finalizer)?;
        if self.reaches(finalizer, task) {
            return Err(GraphError::Cycle {
                from: task.to_string(),
                to: finalizer.to_string(),
            });
        }
        push_unique(self.finalizers.entry(task.to_string()).or_default(), finalizer);
        Ok(())
    }

    /// Looks up a task by ID.
    pub fn task(&self, id: &str) -> Option<&dyn Task> {
        self.tasks.get(id).map(Box::as_ref)
    }

    /// Whether a task with this ID exists.
    pub fn contains(&self, id: &str) -> bool {
        self.tasks.contains_key(id)
    }

    /// All task IDs in insertion order.
    pub fn task_ids(&self) -> &[String] {
        &self.order
    }

    /// Number of tasks in the graph.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// The declared dependencies of a task.
    pub fn dependencies_of(&self, id: &str) -> &[String] {
        self.dependencies.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The declared finalizers of a task.
    pub fn finalizers_of(&self, id: &str) -> &[String] {
        self.finalizers.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Resolves the requested targets to an ordered schedule.
    ///
    /// The schedule contains the targets, their transitive dependencies,
    /// the finalizers of every scheduled task and the finalizers' own
    /// dependencies. Tasks referenced only by `runs_after` edges are not
    /// pulled in. The result is topologically ordered and deterministic
    /// for a given graph.
    ///
    /// # Errors
    ///
    /// Returns `GraphError::UnknownTask` for an unknown target and
    /// `GraphError::Cycle` if finalizer placement cannot be ordered.
    pub fn resolve_schedule(&self, targets: &[String]) -> Result<Vec<String>, GraphError> {
        for target in targets {
            self.ensure_known(target)?;
        }

        // Grow the scheduled set to a fixpoint: dependencies and
        // finalizers pull tasks in, runs_after never does.
        let mut scheduled: HashSet<&str> = targets.iter().map(String::as_str).collect();
        loop {
            let mut added: Vec<&str> = Vec::new();
            for id in &scheduled {
                for dep in self.dependencies_of(id) {
                    if !scheduled.contains(dep.as_str()) {
                        added.push(dep);
                    }
                }
                for finalizer in self.finalizers_of(id) {
                    if !scheduled.contains(finalizer.as_str()) {
                        added.push(finalizer);
                    }
                }
            }
            if added.is_empty() {
                break;
            }
            scheduled.extend(added);
        }

        // Predecessor sets over the scheduled tasks. A finalizer is
        // ordered after its finalized task and after every scheduled
        // task that transitively depends on the finalized task.
        let mut preds: HashMap<&str, HashSet<&str>> = scheduled
            .iter()
            .map(|id| (*id, HashSet::new()))
            .collect();
        for id in &scheduled {
            for dep in self.dependencies_of(id) {
                if scheduled.contains(dep.as_str()) {
                    insert_pred(&mut preds, id, dep);
                }
            }
            for other in self.ordered_after.get(*id).map(Vec::as_slice).unwrap_or(&[]) {
                if scheduled.contains(other.as_str()) {
                    insert_pred(&mut preds, id, other);
                }
            }
            for finalizer in self.finalizers_of(id) {
                insert_pred(&mut preds, finalizer, id);
                for dependent in self.dependents_within(id, &scheduled) {
                    if dependent != finalizer.as_str() {
                        insert_pred(&mut preds, finalizer, dependent);
                    }
                }
            }
        }

        // Repeated sweeps in insertion order keep the schedule stable.
        let mut schedule: Vec<String> = Vec::with_capacity(scheduled.len());
        let mut placed: HashSet<&str> = HashSet::new();
        while schedule.len() < scheduled.len() {
            let mut progressed = false;
            for id in &self.order {
                let id = id.as_str();
                if !scheduled.contains(id) || placed.contains(id) {
                    continue;
                }
                let ready = preds
                    .get(id)
                    .map(|set| set.iter().all(|pred| placed.contains(pred)))
                    .unwrap_or(true);
                if ready {
                    placed.insert(id);
                    schedule.push(id.to_string());
                    progressed = true;
                }
            }
            if !progressed {
                // Finalizer placement can contradict edges declared after
                // the finalizer was wired. Report the first remaining task
                // and the predecessor blocking it.
                let mut from = None;
                let mut to = None;
                for id in &self.order {
                    if scheduled.contains(id.as_str()) && !placed.contains(id.as_str()) {
                        to = Some(id.clone());
                        from = preds.get(id.as_str()).and_then(|set| {
                            set.iter()
                                .find(|pred| !placed.contains(**pred))
                                .map(|pred| (*pred).to_string())
                        });
                        break;
                    }
                }
                let to = to.unwrap_or_default();
                let from = from.unwrap_or_else(|| to.clone());
                return Err(GraphError::Cycle { from, to });
            }
        }

        Ok(schedule)
    }

    fn check_edge(&self, from: &str, to: &str) -> Result<(), GraphError> {
        self.ensure_known(from)?;
        self.ensure_known(to)?;
        if from == to {
            return Err(GraphError::SelfReference(from.to_string()));
        }
        Ok(())
    }

    fn ensure_known(&self, id: &str) -> Result<(), GraphError> {
        if self.tasks.contains_key(id) {
            Ok(())
        } else {
            Err(GraphError::UnknownTask(id.to_string()))
        }
    }

    /// Successors of a node in the "runs before" direction, across all
    /// three edge kinds.
    ///
    /// A finalizer also runs after every task that depends on its
    /// finalized task, so those implied edges count here too.
    fn successors(&self, id: &str) -> Vec<&str> {
        let mut next = Vec::new();
        for (task, deps) in &self.dependencies {
            if deps.iter().any(|dep| dep == id) {
                next.push(task.as_str());
            }
        }
        for (task, others) in &self.ordered_after {
            if others.iter().any(|other| other == id) {
                next.push(task.as_str());
            }
        }
        if let Some(finalizers) = self.finalizers.get(id) {
            next.extend(finalizers.iter().map(String::as_str));
        }
        for ancestor in self.dependency_ancestors(id) {
            if let Some(finalizers) = self.finalizers.get(ancestor) {
                next.extend(finalizers.iter().map(String::as_str));
            }
        }
        next
    }

    /// Tasks that `id` transitively depends on.
    fn dependency_ancestors(&self, id: &str) -> Vec<&str> {
        let mut found = Vec::new();
        let mut seen = HashSet::new();
        let mut stack: Vec<&str> = self
            .dependencies
            .get(id)
            .map(|deps| deps.iter().map(String::as_str).collect())
            .unwrap_or_default();
        while let Some(node) = stack.pop() {
            if seen.insert(node) {
                found.push(node);
                if let Some(deps) = self.dependencies.get(node) {
                    stack.extend(deps.iter().map(String::as_str));
                }
            }
        }
        found
    }

    /// Whether `from` already runs before `to` via any declared edges.
    fn reaches(&self, from: &str, to: &str) -> bool {
        let mut stack = vec![from];
        let mut seen = HashSet::new();
        while let Some(node) = stack.pop() {
            if node == to {
                return true;
            }
            if seen.insert(node) {
                stack.extend(self.successors(node));
            }
        }
        false
    }

    /// Scheduled tasks that transitively depend on `id`.
    fn dependents_within<'a>(&'a self, id: &str, scheduled: &HashSet<&'a str>) -> Vec<&'a str> {
        let mut found: Vec<&str> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        let mut stack = vec![id.to_string()];
        while let Some(current) = stack.pop() {
            for (task, deps) in &self.dependencies {
                if deps.iter().any(|dep| dep == &current)
                    && scheduled.contains(task.as_str())
                    && seen.insert(task)
                {
                    found.push(task);
                    stack.push(task.clone());
                }
            }
        }
        found
    }
}

impl Default for TaskGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TaskGraph {
    // Tasks are trait objects without Debug; represent them by ID.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGraph")
            .field("tasks", &self.order)
            .field("dependencies", &self.dependencies)
            .field("ordered_after", &self.ordered_after)
            .field("finalizers", &self.finalizers)
            .finish()
    }
}

fn push_unique(edges: &mut Vec<String>, id: &str) {
    if !edges.iter().any(|existing| existing == id) {
        edges.push(id.to_string());
    }
}

fn insert_pred<'a>(preds: &mut HashMap<&'a str, HashSet<&'a str>>, task: &'a str, pred: &'a str) {
    preds.entry(task).or_default().insert(pred);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;
    use crate::tasks::RunContext;
    use async_trait::async_trait;

    struct Noop {
        id: String,
    }

    impl Noop {
        fn new(id: &str) -> Self {
            Self { id: id.to_string() }
        }
    }

    #[async_trait]
    impl Task for Noop {
        fn id(&self) -> &str {
            &self.id
        }

        async fn execute(&self, _context: &RunContext) -> Result<(), TaskError> {
            Ok(())
        }
    }

    fn graph_with(ids: &[&str]) -> TaskGraph {
        let mut graph = TaskGraph::new();
        for id in ids {
            graph.add_task(Noop::new(id)).unwrap();
        }
        graph
    }

    #[test]
    fn test_add_task_rejects_duplicate() {
        let mut graph = graph_with(&["build"]);
        let err = graph.add_task(Noop::new("build")).unwrap_err();
        assert!(matches!(err, GraphError::DuplicateTask(id) if id == "build"));
    }

    #[test]
    fn test_wiring_unknown_task_errors() {
        let mut graph = graph_with(&["build"]);
        let err = graph.depends_on("build", "render").unwrap_err();
        assert!(matches!(err, GraphError::UnknownTask(id) if id == "render"));

        let err = graph.runs_after("push", "build").unwrap_err();
        assert!(matches!(err, GraphError::UnknownTask(id) if id == "push"));
    }

    #[test]
    fn test_self_reference_rejected() {
        let mut graph = graph_with(&["build"]);
        let err = graph.finalized_by("build", "build").unwrap_err();
        assert!(matches!(err, GraphError::SelfReference(id) if id == "build"));
    }

    #[test]
    fn test_depends_on_cycle_detected() {
        let mut graph = graph_with(&["a", "b"]);
        graph.depends_on("b", "a").unwrap();
        let err = graph.depends_on("a", "b").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Edge from 'a' to 'b' would create a cycle"
        );
    }

    #[test]
    fn test_cycle_across_edge_kinds() {
        let mut graph = graph_with(&["a", "b", "c"]);
        graph.depends_on("b", "a").unwrap();
        graph.finalized_by("b", "c").unwrap();
        // c runs after b, which runs after a, so a cannot depend on c.
        let err = graph.depends_on("a", "c").unwrap_err();
        assert!(matches!(err, GraphError::Cycle { from, to } if from == "a" && to == "c"));
    }

    #[test]
    fn test_finalizer_implied_cycle_detected() {
        let mut graph = graph_with(&["create", "start", "remove"]);
        graph.finalized_by("create", "remove").unwrap();
        graph.depends_on("start", "create").unwrap();
        // remove must run after start (a dependent of create), so start
        // cannot also depend on remove.
        let err = graph.depends_on("start", "remove").unwrap_err();
        assert!(matches!(err, GraphError::Cycle { from, to } if from == "start" && to == "remove"));
    }

    #[test]
    fn test_resolve_schedule_pulls_dependencies() {
        let mut graph = graph_with(&["render", "build", "push"]);
        graph.depends_on("build", "render").unwrap();
        graph.depends_on("push", "build").unwrap();

        let schedule = graph.resolve_schedule(&["push".to_string()]).unwrap();
        assert_eq!(schedule, vec!["render", "build", "push"]);
    }

    #[test]
    fn test_runs_after_orders_but_never_pulls() {
        let mut graph = graph_with(&["stop", "start"]);
        graph.runs_after("start", "stop").unwrap();

        let schedule = graph.resolve_schedule(&["start".to_string()]).unwrap();
        assert_eq!(schedule, vec!["start"]);

        let schedule = graph
            .resolve_schedule(&["start".to_string(), "stop".to_string()])
            .unwrap();
        assert_eq!(schedule, vec!["stop", "start"]);
    }

    #[test]
    fn test_finalizer_scheduled_with_task() {
        let mut graph = graph_with(&["start", "remove", "stop"]);
        graph.finalized_by("start", "remove").unwrap();
        graph.depends_on("remove", "stop").unwrap();

        let schedule = graph.resolve_schedule(&["start".to_string()]).unwrap();
        assert_eq!(schedule.len(), 3);
        let position = |id: &str| schedule.iter().position(|entry| entry == id).unwrap();
        assert!(position("start") < position("remove"));
        assert!(position("stop") < position("remove"));
    }

    #[test]
    fn test_finalizer_ordered_after_dependents() {
        let mut graph = graph_with(&["create", "start", "remove"]);
        graph.depends_on("start", "create").unwrap();
        graph.finalized_by("create", "remove").unwrap();

        let schedule = graph.resolve_schedule(&["start".to_string()]).unwrap();
        assert_eq!(schedule, vec!["create", "start", "remove"]);
    }

    #[test]
    fn test_unknown_target_errors() {
        let graph = graph_with(&["build"]);
        let err = graph.resolve_schedule(&["deploy".to_string()]).unwrap_err();
        assert!(matches!(err, GraphError::UnknownTask(id) if id == "deploy"));
    }

    #[test]
    fn test_duplicate_edges_collapse() {
        let mut graph = graph_with(&["a", "b"]);
        graph.depends_on("b", "a").unwrap();
        graph.depends_on("b", "a").unwrap();
        assert_eq!(graph.dependencies_of("b"), ["a"]);
    }
}
