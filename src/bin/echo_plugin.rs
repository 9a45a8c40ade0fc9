// Copyright (c) 2025 Girder Contributors
// SPDX-License-Identifier: MIT

//! Reference plugin hosting two backends.
//!
//! `echo` writes its numeric parameter to `echo.txt`; `collect` concatenates
//! its input files (directory inputs contribute their files in sorted order)
//! into `collected.txt`. Used by the end-to-end tests and as a template for
//! plugin authors.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::{json, Value};

use girder::api::{serve, TaskContext, TaskHandler};

struct EchoHandler;

#[async_trait]
impl TaskHandler for EchoHandler {
    fn outputs(&self) -> Vec<String> {
        vec!["echo.txt".into()]
    }

    fn params_schema(&self) -> Value {
        json!({"value": "number"})
    }

    async fn run(&self, params: Value, ctx: TaskContext) -> anyhow::Result<()> {
        let value = params
            .get("value")
            .and_then(Value::as_f64)
            .context("missing 'value' parameter")?;
        tracing::info!(value, "echoing value");
        tokio::fs::write(ctx.out_dir.join("echo.txt"), format!("{value}\n"))
            .await
            .context("writing echo.txt")?;
        Ok(())
    }
}

struct CollectHandler;

impl CollectHandler {
    fn gather(path: &Path, into: &mut Vec<u8>) -> anyhow::Result<()> {
        if path.is_dir() {
            let mut entries: Vec<_> = std::fs::read_dir(path)
                .with_context(|| format!("reading directory '{}'", path.display()))?
                .collect::<Result<_, _>>()?;
            entries.sort_by_key(|entry| entry.path());
            for entry in entries {
                // Skip bookkeeping files the orchestrator leaves in output
                // directories.
                if entry.file_name().to_string_lossy().starts_with('.') {
                    continue;
                }
                Self::gather(&entry.path(), into)?;
            }
        } else {
            let bytes = std::fs::read(path)
                .with_context(|| format!("reading input '{}'", path.display()))?;
            into.extend_from_slice(&bytes);
        }
        Ok(())
    }
}

#[async_trait]
impl TaskHandler for CollectHandler {
    fn outputs(&self) -> Vec<String> {
        vec!["collected.txt".into()]
    }

    async fn run(&self, _params: Value, ctx: TaskContext) -> anyhow::Result<()> {
        let mut collected = Vec::new();
        for input in &ctx.inputs {
            Self::gather(input, &mut collected)?;
        }
        tracing::info!(
            inputs = ctx.inputs.len(),
            bytes = collected.len(),
            "collected inputs"
        );
        tokio::fs::write(ctx.out_dir.join("collected.txt"), collected)
            .await
            .context("writing collected.txt")?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut backends: HashMap<String, Arc<dyn TaskHandler>> = HashMap::new();
    backends.insert("echo".into(), Arc::new(EchoHandler));
    backends.insert("collect".into(), Arc::new(CollectHandler));
    serve(backends).await
}
