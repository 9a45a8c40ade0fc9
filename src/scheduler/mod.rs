// Copyright (c) 2025 Girder Contributors
// SPDX-License-Identifier: MIT

//! Dependency scheduler: DAG construction, concurrency-bounded execution,
//! failure propagation.
//!
//! Tasks are added dependencies-first; an edge may only reference a task that
//! is already in the graph. Because every edge therefore points at an earlier
//! node, the graph is acyclic by construction and execution can never
//! deadlock.
//!
//! The failure contract is strict: when a task fails, every transitive
//! dependent is withheld and reported as skipped with the failed task named
//! as the cause. Plugin side effects are not transactional; running a
//! dependent against a half-finished dependency's output would silently
//! corrupt the build, so "fire regardless of upstream error" semantics are
//! not acceptable here.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::errors::{DispatchError, ScheduleError};
use crate::observability::messages::{RunSummary, TaskFailed, TaskSkipped};
use crate::registry::{BackendRegistry, DispatchOutcome};
use crate::task::Task;

/// Default worker-pool size. Work is I/O- and RPC-bound, not CPU-bound, so
/// this is deliberately higher than a core count would suggest.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Terminal state of one task after a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    /// The backend ran and succeeded.
    Executed,
    /// The checksum gate skipped execution; prior outputs are fresh.
    UpToDate,
    Failed(String),
    /// Withheld because an upstream task failed.
    SkippedUpstream { failed_dependency: String },
}

impl TaskStatus {
    fn succeeded(&self) -> bool {
        matches!(self, TaskStatus::Executed | TaskStatus::UpToDate)
    }
}

/// Outcome of a whole run: one status per task, keyed by identity string.
#[derive(Debug, Default)]
pub struct RunReport {
    statuses: HashMap<String, TaskStatus>,
}

impl RunReport {
    pub fn status(&self, task: &str) -> Option<&TaskStatus> {
        self.statuses.get(task)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &TaskStatus)> {
        self.statuses.iter()
    }

    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }

    /// True if any task failed or was withheld. Drives the process exit code.
    pub fn failed(&self) -> bool {
        self.statuses.values().any(|status| !status.succeeded())
    }

    fn summary(&self) -> RunSummary {
        let mut summary = RunSummary {
            executed: 0,
            up_to_date: 0,
            failed: 0,
            skipped: 0,
        };
        for status in self.statuses.values() {
            match status {
                TaskStatus::Executed => summary.executed += 1,
                TaskStatus::UpToDate => summary.up_to_date += 1,
                TaskStatus::Failed(_) => summary.failed += 1,
                TaskStatus::SkippedUpstream { .. } => summary.skipped += 1,
            }
        }
        summary
    }
}

struct Node {
    task: Arc<Task>,
    deps: Vec<usize>,
    dependents: Vec<usize>,
}

/// Builds the task graph incrementally and executes it once.
pub struct Scheduler {
    registry: Arc<BackendRegistry>,
    max_concurrency: usize,
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
}

impl Scheduler {
    pub fn new(registry: Arc<BackendRegistry>, max_concurrency: usize) -> Self {
        Self {
            registry,
            max_concurrency: max_concurrency.max(1),
            nodes: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Adds a task with precedence edges to already-added tasks, referenced
    /// by identity string (`name:backend`). Dependencies must be added before
    /// their dependents; that is a build-order requirement on the caller, not
    /// a cycle check.
    pub fn add_task(&mut self, task: Task, depends_on: &[&str]) -> Result<(), ScheduleError> {
        let id = task.id().to_string();
        if self.index.contains_key(&id) {
            return Err(ScheduleError::DuplicateTask { task: id });
        }

        let mut deps = Vec::with_capacity(depends_on.len());
        for dependency in depends_on {
            let &dep_idx =
                self.index
                    .get(*dependency)
                    .ok_or_else(|| ScheduleError::UnknownDependency {
                        task: id.clone(),
                        dependency: (*dependency).to_string(),
                    })?;
            deps.push(dep_idx);
        }

        let idx = self.nodes.len();
        for &dep_idx in &deps {
            self.nodes[dep_idx].dependents.push(idx);
        }
        self.nodes.push(Node {
            task: Arc::new(task),
            deps,
            dependents: Vec::new(),
        });
        self.index.insert(id, idx);
        Ok(())
    }

    /// Executes the graph to completion with the bounded worker pool and
    /// returns once every node has either run or been withheld. Consumes the
    /// scheduler: a graph is executed once per run, never reused.
    pub async fn run(self) -> RunReport {
        let node_count = self.nodes.len();
        let mut statuses: Vec<Option<TaskStatus>> = Vec::new();
        statuses.resize_with(node_count, || None);

        let mut remaining_deps: Vec<usize> =
            self.nodes.iter().map(|node| node.deps.len()).collect();
        let mut ready: VecDeque<usize> = (0..node_count)
            .filter(|&idx| remaining_deps[idx] == 0)
            .collect();

        let (done_tx, mut done_rx) =
            mpsc::unbounded_channel::<(usize, Result<DispatchOutcome, DispatchError>)>();
        let mut active = 0usize;
        let mut completed = 0usize;

        while completed < node_count {
            // Launch everything that is ready, up to the concurrency bound.
            // Nodes whose upstream failed complete immediately as skipped,
            // which can make more nodes ready within this same loop.
            while active < self.max_concurrency {
                let Some(idx) = ready.pop_front() else { break };

                if let Some(failed_dependency) = self.upstream_failure(idx, &statuses) {
                    let id = self.nodes[idx].task.id().to_string();
                    warn!(
                        "{}",
                        TaskSkipped {
                            task: &id,
                            failed_dependency: &failed_dependency,
                        }
                    );
                    complete(
                        &self.nodes,
                        idx,
                        TaskStatus::SkippedUpstream { failed_dependency },
                        &mut statuses,
                        &mut remaining_deps,
                        &mut ready,
                        &mut completed,
                    );
                    continue;
                }

                let task = self.nodes[idx].task.clone();
                let registry = self.registry.clone();
                let done_tx = done_tx.clone();
                active += 1;
                tokio::spawn(async move {
                    let result = registry.dispatch(&task).await;
                    // The receiver lives for the whole run; send cannot fail
                    // while the run loop is alive.
                    let _ = done_tx.send((idx, result));
                });
            }

            if completed == node_count {
                break;
            }

            // Nothing ready and nothing running would mean an unsatisfiable
            // edge, which add_task's dependencies-first rule excludes.
            debug_assert!(active > 0 || !ready.is_empty() || completed == node_count);

            let Some((idx, result)) = done_rx.recv().await else {
                break;
            };
            active -= 1;

            let status = match result {
                Ok(DispatchOutcome::Executed) => TaskStatus::Executed,
                Ok(DispatchOutcome::UpToDate) => {
                    info!(task = %self.nodes[idx].task.id(), "up to date, skipping execution");
                    TaskStatus::UpToDate
                }
                Err(err) => {
                    let id = self.nodes[idx].task.id().to_string();
                    error!(
                        "{}",
                        TaskFailed {
                            task: &id,
                            error: &err,
                        }
                    );
                    TaskStatus::Failed(err.to_string())
                }
            };
            complete(
                &self.nodes,
                idx,
                status,
                &mut statuses,
                &mut remaining_deps,
                &mut ready,
                &mut completed,
            );
        }

        let mut report = RunReport::default();
        for (idx, node) in self.nodes.iter().enumerate() {
            if let Some(status) = statuses[idx].take() {
                report.statuses.insert(node.task.id().to_string(), status);
            }
        }
        info!("{}", report.summary());
        report
    }

    /// If any dependency of `idx` failed or was itself withheld, returns the
    /// name of the root failed task.
    fn upstream_failure(&self, idx: usize, statuses: &[Option<TaskStatus>]) -> Option<String> {
        for &dep_idx in &self.nodes[idx].deps {
            match &statuses[dep_idx] {
                Some(TaskStatus::Failed(_)) => {
                    return Some(self.nodes[dep_idx].task.id().to_string());
                }
                Some(TaskStatus::SkippedUpstream { failed_dependency }) => {
                    return Some(failed_dependency.clone());
                }
                _ => {}
            }
        }
        None
    }
}

#[allow(clippy::too_many_arguments)]
fn complete(
    nodes: &[Node],
    idx: usize,
    status: TaskStatus,
    statuses: &mut [Option<TaskStatus>],
    remaining_deps: &mut [usize],
    ready: &mut VecDeque<usize>,
    completed: &mut usize,
) {
    statuses[idx] = Some(status);
    *completed += 1;
    for &dependent in &nodes[idx].dependents {
        remaining_deps[dependent] -= 1;
        if remaining_deps[dependent] == 0 {
            ready.push_back(dependent);
        }
    }
}
