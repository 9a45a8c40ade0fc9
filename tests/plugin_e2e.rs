// Copyright (c) 2025 Girder Contributors
// SPDX-License-Identifier: MIT

//! End-to-end tests driving the real `echo-plugin` binary through the full
//! stack: subprocess spawn, handshake, configure, scheduling, dispatch over
//! RPC, and the checksum gate across two consecutive runs.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use girder::errors::{PluginStartError, TransportError};
use girder::plugin::PluginManager;
use girder::registry::BackendRegistry;
use girder::scheduler::{Scheduler, TaskStatus};
use girder::task::Task;
use serde_json::json;
use tempfile::TempDir;

fn echo_plugin() -> &'static Path {
    Path::new(env!("CARGO_BIN_EXE_echo-plugin"))
}

async fn started_manager() -> (Arc<BackendRegistry>, PluginManager) {
    let registry = Arc::new(BackendRegistry::new());
    let manager = PluginManager::new(registry.clone());
    manager
        .start_plugin(echo_plugin())
        .await
        .expect("echo-plugin should start");
    (registry, manager)
}

fn generate_task(state_root: &Path) -> Task {
    Task::new(
        state_root,
        "generate",
        "echo-plugin:echo",
        json!({"value": 3}),
        vec![],
    )
}

fn gather_task(state_root: &Path) -> Task {
    let generate_out: PathBuf = state_root.join("generate:echo-plugin:echo");
    Task::new(
        state_root,
        "gather",
        "echo-plugin:collect",
        json!({}),
        vec![generate_out],
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn discovers_backends_from_plugin() {
    let (_registry, manager) = started_manager().await;

    let mut backends = manager.registered_backends().await;
    backends.sort();
    assert_eq!(backends, vec!["echo-plugin:collect", "echo-plugin:echo"]);

    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn dependent_pipeline_runs_and_second_run_is_all_cached() {
    let dir = TempDir::new().unwrap();
    let state_root = dir.path().join("state");
    let (registry, manager) = started_manager().await;

    // First run: both tasks execute.
    let mut scheduler = Scheduler::new(registry.clone(), 4);
    scheduler.add_task(generate_task(&state_root), &[]).unwrap();
    scheduler
        .add_task(gather_task(&state_root), &["generate:echo-plugin:echo"])
        .unwrap();
    let report = scheduler.run().await;

    assert_eq!(
        report.status("generate:echo-plugin:echo"),
        Some(&TaskStatus::Executed)
    );
    assert_eq!(
        report.status("gather:echo-plugin:collect"),
        Some(&TaskStatus::Executed)
    );

    let echoed =
        std::fs::read_to_string(state_root.join("generate:echo-plugin:echo").join("echo.txt"))
            .unwrap();
    assert_eq!(echoed.trim(), "3");
    let collected = std::fs::read_to_string(
        state_root
            .join("gather:echo-plugin:collect")
            .join("collected.txt"),
    )
    .unwrap();
    assert!(collected.contains('3'));

    // Second run with identical declarations: nothing re-executes.
    let mut scheduler = Scheduler::new(registry.clone(), 4);
    scheduler.add_task(generate_task(&state_root), &[]).unwrap();
    scheduler
        .add_task(gather_task(&state_root), &["generate:echo-plugin:echo"])
        .unwrap();
    let report = scheduler.run().await;

    assert_eq!(
        report.status("generate:echo-plugin:echo"),
        Some(&TaskStatus::UpToDate)
    );
    assert_eq!(
        report.status("gather:echo-plugin:collect"),
        Some(&TaskStatus::UpToDate)
    );
    assert!(!report.failed());

    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn changed_params_invalidate_only_downstream_of_the_change() {
    let dir = TempDir::new().unwrap();
    let state_root = dir.path().join("state");
    let (registry, manager) = started_manager().await;

    let mut scheduler = Scheduler::new(registry.clone(), 4);
    scheduler.add_task(generate_task(&state_root), &[]).unwrap();
    let report = scheduler.run().await;
    assert!(!report.failed());

    // Same task name, different parameter: must re-execute.
    let mut scheduler = Scheduler::new(registry.clone(), 4);
    scheduler
        .add_task(
            Task::new(
                &state_root,
                "generate",
                "echo-plugin:echo",
                json!({"value": 7}),
                vec![],
            ),
            &[],
        )
        .unwrap();
    let report = scheduler.run().await;
    assert_eq!(
        report.status("generate:echo-plugin:echo"),
        Some(&TaskStatus::Executed)
    );
    let echoed =
        std::fs::read_to_string(state_root.join("generate:echo-plugin:echo").join("echo.txt"))
            .unwrap();
    assert_eq!(echoed.trim(), "7");

    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn schema_violation_fails_task_and_skips_dependents() {
    let dir = TempDir::new().unwrap();
    let state_root = dir.path().join("state");
    let (registry, manager) = started_manager().await;

    let mut scheduler = Scheduler::new(registry.clone(), 4);
    scheduler
        .add_task(
            Task::new(
                &state_root,
                "generate",
                "echo-plugin:echo",
                json!({"value": "not a number"}),
                vec![],
            ),
            &[],
        )
        .unwrap();
    scheduler
        .add_task(gather_task(&state_root), &["generate:echo-plugin:echo"])
        .unwrap();
    let report = scheduler.run().await;

    match report.status("generate:echo-plugin:echo") {
        Some(TaskStatus::Failed(message)) => {
            assert!(message.contains("value"), "unexpected message: {message}")
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(
        report.status("gather:echo-plugin:collect"),
        Some(&TaskStatus::SkippedUpstream {
            failed_dependency: "generate:echo-plugin:echo".into()
        })
    );

    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unknown_backend_fails_dispatch() {
    let dir = TempDir::new().unwrap();
    let state_root = dir.path().join("state");
    let (registry, manager) = started_manager().await;

    let mut scheduler = Scheduler::new(registry.clone(), 4);
    scheduler
        .add_task(
            Task::new(&state_root, "t", "echo-plugin:no-such", json!({}), vec![]),
            &[],
        )
        .unwrap();
    let report = scheduler.run().await;

    match report.status("t:echo-plugin:no-such") {
        Some(TaskStatus::Failed(message)) => {
            assert!(message.contains("echo-plugin:no-such"))
        }
        other => panic!("expected failure, got {other:?}"),
    }

    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn bad_plugin_does_not_block_good_plugin() {
    let registry = Arc::new(BackendRegistry::new());
    let manager = PluginManager::new(registry.clone());

    // `cat` never emits a handshake line; startup must time out cleanly.
    let err = manager
        .start_plugin(Path::new("/bin/cat"))
        .await
        .expect_err("cat is not a plugin");
    assert!(matches!(
        err,
        PluginStartError::Handshake {
            source: TransportError::Timeout(_),
            ..
        }
    ));

    manager
        .start_plugin(echo_plugin())
        .await
        .expect("real plugin still starts");
    assert_eq!(manager.registered_backends().await.len(), 2);

    manager.shutdown().await;
}
