// Copyright (c) 2025 Girder Contributors
// SPDX-License-Identifier: MIT

//! Backend registry and checksum-gated dispatch.
//!
//! The registry maps composite backend names (`plugin:backend`, or a bare
//! name for in-process backends) to executable capability objects. Dispatch
//! is where the incremental-build skip logic lives: a task whose output
//! directory already exists and whose saved checksum matches the freshly
//! computed one is not executed at all.
//!
//! The name map is mutated only by plugin start/stop and read concurrently
//! by many scheduler workers, hence the read/write lock. Lookups clone the
//! `Arc` and drop the guard before awaiting the backend.

pub mod schema;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::errors::{DispatchError, ExecuteError, RegisterError};
use crate::task::Task;

/// A named capability that can execute tasks and declares the artifact names
/// it produces.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Artifact names this backend writes into a task's output directory.
    fn outputs(&self) -> Vec<String>;

    /// Declared parameter schema, if any. `None` accepts any parameters.
    fn params_schema(&self) -> Option<&serde_json::Value> {
        None
    }

    async fn execute(&self, task: &Task) -> Result<(), ExecuteError>;
}

/// How a dispatch concluded. `UpToDate` means the backend was never invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Executed,
    UpToDate,
}

/// Shared name -> backend mapping with checksum-gated dispatch.
#[derive(Default)]
pub struct BackendRegistry {
    backends: RwLock<HashMap<String, Arc<dyn Backend>>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `backend` under `name`; fails if the name is taken. The first
    /// registration always stays intact.
    pub fn register(
        &self,
        name: impl Into<String>,
        backend: Arc<dyn Backend>,
    ) -> Result<(), RegisterError> {
        let name = name.into();
        let mut backends = self.backends.write().expect("registry lock poisoned");
        if backends.contains_key(&name) {
            return Err(RegisterError::DuplicateBackend { name });
        }
        debug!(backend = %name, "registered backend");
        backends.insert(name, backend);
        Ok(())
    }

    /// Removes a mapping. Idempotent; unregistering an absent name is a no-op.
    pub fn unregister(&self, name: &str) {
        let mut backends = self.backends.write().expect("registry lock poisoned");
        if backends.remove(name).is_some() {
            debug!(backend = %name, "unregistered backend");
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.backends
            .read()
            .expect("registry lock poisoned")
            .contains_key(name)
    }

    fn lookup(&self, name: &str) -> Option<Arc<dyn Backend>> {
        self.backends
            .read()
            .expect("registry lock poisoned")
            .get(name)
            .cloned()
    }

    /// Executes `task` through its backend unless the checksum gate says the
    /// prior outputs are still fresh.
    ///
    /// The up-to-date check is deliberately gated on the output directory
    /// having pre-existed: a missing directory always forces re-execution
    /// even if a checksum file somehow survives elsewhere, so partial
    /// deletion of outputs can never be mistaken for freshness.
    pub async fn dispatch(&self, task: &Task) -> Result<DispatchOutcome, DispatchError> {
        let task_name = task.id().to_string();
        let backend_name = task.id().backend().to_string();

        let backend = self
            .lookup(&backend_name)
            .ok_or_else(|| DispatchError::UnknownBackend {
                name: backend_name.clone(),
            })?;

        let out_dir = task.output_dir();
        let pre_existed = out_dir.is_dir();
        if !pre_existed {
            tokio::fs::create_dir_all(&out_dir)
                .await
                .map_err(|source| DispatchError::Io {
                    path: out_dir.clone(),
                    source,
                })?;
        } else if task.is_up_to_date() {
            // Cache hit: no side effects, nothing to log as an execution.
            return Ok(DispatchOutcome::UpToDate);
        }

        backend
            .execute(task)
            .await
            .map_err(|source| DispatchError::Execution {
                backend: backend_name.clone(),
                task: task_name.clone(),
                source,
            })?;

        info!(task = %task_name, "task succeeded, saving checksum");
        if let Err(err) = task.save_checksum() {
            // The task has produced its outputs; a stale cache entry only
            // means the next run redoes the work.
            warn!(task = %task_name, error = %err, "failed to save checksum");
        }

        Ok(DispatchOutcome::Executed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct CountingBackend {
        runs: AtomicUsize,
    }

    impl CountingBackend {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                runs: AtomicUsize::new(0),
            })
        }

        fn runs(&self) -> usize {
            self.runs.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Backend for CountingBackend {
        fn outputs(&self) -> Vec<String> {
            vec!["out.txt".into()]
        }

        async fn execute(&self, task: &Task) -> Result<(), ExecuteError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            std::fs::write(task.output_dir().join("out.txt"), b"done")
                .map_err(|e| ExecuteError::Failed(e.to_string()))
        }
    }

    struct FailingBackend;

    #[async_trait]
    impl Backend for FailingBackend {
        fn outputs(&self) -> Vec<String> {
            vec![]
        }

        async fn execute(&self, _task: &Task) -> Result<(), ExecuteError> {
            Err(ExecuteError::Failed("boom".into()))
        }
    }

    fn task_in(dir: &TempDir) -> Task {
        Task::new(dir.path().join("state"), "t", "count", json!({"v": 1}), vec![])
    }

    #[tokio::test]
    async fn duplicate_registration_fails_and_keeps_first() {
        let registry = BackendRegistry::new();
        let first = CountingBackend::new();
        registry.register("count", first.clone()).unwrap();

        let second = CountingBackend::new();
        let err = registry.register("count", second.clone()).unwrap_err();
        assert!(matches!(err, RegisterError::DuplicateBackend { ref name } if name == "count"));

        // First registration intact: dispatch runs the first backend.
        let dir = TempDir::new().unwrap();
        registry.dispatch(&task_in(&dir)).await.unwrap();
        assert_eq!(first.runs(), 1);
        assert_eq!(second.runs(), 0);
    }

    #[test]
    fn unregister_is_idempotent() {
        let registry = BackendRegistry::new();
        registry.register("x", CountingBackend::new()).unwrap();
        registry.unregister("x");
        registry.unregister("x");
        assert!(!registry.contains("x"));
    }

    #[tokio::test]
    async fn dispatch_unknown_backend() {
        let dir = TempDir::new().unwrap();
        let registry = BackendRegistry::new();
        let err = registry.dispatch(&task_in(&dir)).await.unwrap_err();
        assert!(matches!(err, DispatchError::UnknownBackend { ref name } if name == "count"));
    }

    #[tokio::test]
    async fn dispatch_executes_once_then_hits_cache() {
        let dir = TempDir::new().unwrap();
        let registry = BackendRegistry::new();
        let backend = CountingBackend::new();
        registry.register("count", backend.clone()).unwrap();

        let outcome = registry.dispatch(&task_in(&dir)).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Executed);
        assert_eq!(backend.runs(), 1);

        // Fresh Task instance: same identity, inputs, and params.
        let outcome = registry.dispatch(&task_in(&dir)).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::UpToDate);
        assert_eq!(backend.runs(), 1);
    }

    #[tokio::test]
    async fn deleting_output_dir_forces_re_execution() {
        let dir = TempDir::new().unwrap();
        let registry = BackendRegistry::new();
        let backend = CountingBackend::new();
        registry.register("count", backend.clone()).unwrap();

        registry.dispatch(&task_in(&dir)).await.unwrap();
        std::fs::remove_dir_all(task_in(&dir).output_dir()).unwrap();

        let outcome = registry.dispatch(&task_in(&dir)).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Executed);
        assert_eq!(backend.runs(), 2);
    }

    #[tokio::test]
    async fn changed_params_force_re_execution() {
        let dir = TempDir::new().unwrap();
        let registry = BackendRegistry::new();
        let backend = CountingBackend::new();
        registry.register("count", backend.clone()).unwrap();

        registry.dispatch(&task_in(&dir)).await.unwrap();

        let changed = Task::new(
            dir.path().join("state"),
            "t",
            "count",
            json!({"v": 2}),
            vec![],
        );
        let outcome = registry.dispatch(&changed).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Executed);
        assert_eq!(backend.runs(), 2);
    }

    #[tokio::test]
    async fn execution_errors_carry_backend_and_task_names() {
        let dir = TempDir::new().unwrap();
        let registry = BackendRegistry::new();
        registry.register("fail", Arc::new(FailingBackend)).unwrap();

        let task = Task::new(dir.path().join("state"), "t", "fail", json!({}), vec![]);
        let err = registry.dispatch(&task).await.unwrap_err();
        match err {
            DispatchError::Execution { backend, task, .. } => {
                assert_eq!(backend, "fail");
                assert_eq!(task, "t:fail");
            }
            other => panic!("expected Execution error, got {other}"),
        }

        // No checksum saved for a failed task: it must run again next time.
        assert!(!Task::new(dir.path().join("state"), "t", "fail", json!({}), vec![]).is_up_to_date());
    }
}
