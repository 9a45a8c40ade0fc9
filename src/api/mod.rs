// Copyright (c) 2025 Girder Contributors
// SPDX-License-Identifier: MIT

//! Plugin-author API.
//!
//! A plugin is an ordinary binary that calls [`serve`] from `main()` with the
//! backends it hosts. girder spawns it, reads the handshake line from its
//! stdout, and then drives it over length-delimited frames on stdin/stdout.
//! Everything a plugin logs through `tracing` goes to stderr, and is
//! additionally forwarded to the orchestrator while a streaming-log session
//! is open.
//!
//! ```no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use girder::api::{serve, TaskContext, TaskHandler};
//! use serde_json::{json, Value};
//!
//! struct Hello;
//!
//! #[async_trait]
//! impl TaskHandler for Hello {
//!     fn outputs(&self) -> Vec<String> {
//!         vec!["hello.txt".into()]
//!     }
//!
//!     fn params_schema(&self) -> Value {
//!         json!({"name": "string"})
//!     }
//!
//!     async fn run(&self, params: Value, ctx: TaskContext) -> anyhow::Result<()> {
//!         let name = params["name"].as_str().unwrap_or("world");
//!         tokio::fs::write(ctx.out_dir.join("hello.txt"), format!("hello {name}\n")).await?;
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut backends: HashMap<String, Arc<dyn TaskHandler>> = HashMap::new();
//!     backends.insert("hello".into(), Arc::new(Hello));
//!     serve(backends).await
//! }
//! ```

mod server;

pub use server::{serve, serve_connection, ForwardLayer, LogStreamHandle};

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;

/// Everything a backend needs to perform one task, besides its parameters.
#[derive(Debug, Clone)]
pub struct TaskContext {
    /// Input paths, in the order the task declared them.
    pub inputs: Vec<PathBuf>,
    /// Directory the backend must write its artifacts into. Already exists.
    pub out_dir: PathBuf,
}

/// One backend hosted by a plugin.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Artifact names this backend produces into the output directory.
    fn outputs(&self) -> Vec<String>;

    /// Expected parameter shape (see [`crate::registry::schema`]); `Null`
    /// accepts anything.
    fn params_schema(&self) -> Value {
        Value::Null
    }

    async fn run(&self, params: Value, ctx: TaskContext) -> anyhow::Result<()>;
}
