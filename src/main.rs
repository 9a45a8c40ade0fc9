// Copyright (c) 2025 Girder Contributors
// SPDX-License-Identifier: MIT

use std::env;
use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use girder::config::Manifest;
use girder::observability::messages::PluginStartFailed;
use girder::plugin::PluginManager;
use girder::registry::BackendRegistry;
use girder::scheduler::{Scheduler, TaskStatus};
use girder::task::Task;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        eprintln!("Usage: {} <manifest.yaml>", args[0]);
        eprintln!("Example: {} girder.yaml", args[0]);
        std::process::exit(2);
    }

    let manifest = match Manifest::load(args[1].as_ref()) {
        Ok(manifest) => manifest,
        Err(err) => {
            error!(error = %err, "failed to load manifest");
            std::process::exit(2);
        }
    };

    let registry = Arc::new(BackendRegistry::new());
    let manager = PluginManager::new(registry.clone());

    // A plugin that fails to start is reported and skipped; tasks bound to
    // its backends will fail dispatch as UnknownBackend.
    for path in &manifest.plugins {
        if let Err(err) = manager.start_plugin(path).await {
            error!(
                "{}",
                PluginStartFailed {
                    path: path.as_path(),
                    error: &err,
                }
            );
        }
    }

    let mut scheduler = Scheduler::new(registry, manifest.max_concurrency);
    for spec in &manifest.tasks {
        let task = Task::new(
            &manifest.state_root,
            &spec.name,
            &spec.backend,
            spec.params.clone(),
            spec.inputs.clone(),
        );
        // Validation already resolved every name; missing lookups cannot
        // happen for a loaded manifest.
        let depends_on: Vec<String> = spec
            .depends_on
            .iter()
            .filter_map(|name| manifest.identity_of(name))
            .collect();
        let depends_on: Vec<&str> = depends_on.iter().map(String::as_str).collect();
        if let Err(err) = scheduler.add_task(task, &depends_on) {
            error!(error = %err, task = %spec.identity(), "failed to schedule task");
            manager.shutdown().await;
            std::process::exit(2);
        }
    }

    let started = Instant::now();
    let report = scheduler.run().await;
    info!(elapsed = ?started.elapsed(), tasks = report.len(), "run finished");

    let mut lines: Vec<(String, String)> = report
        .iter()
        .map(|(task, status)| {
            let status = match status {
                TaskStatus::Executed => "executed".to_string(),
                TaskStatus::UpToDate => "up to date".to_string(),
                TaskStatus::Failed(err) => format!("failed: {err}"),
                TaskStatus::SkippedUpstream { failed_dependency } => {
                    format!("skipped: upstream '{failed_dependency}' failed")
                }
            };
            (task.clone(), status)
        })
        .collect();
    lines.sort();
    for (task, status) in lines {
        println!("{task}\t{status}");
    }

    manager.shutdown().await;

    if report.failed() {
        std::process::exit(1);
    }
}
