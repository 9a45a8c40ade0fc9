// Copyright (c) 2025 Girder Contributors
// SPDX-License-Identifier: MIT

//! Errors raised while loading and validating a build manifest.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read manifest '{path}'")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse manifest '{path}'")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// Two manifest entries share a task name. Names are the handles
    /// `depends_on` references, so they must be unique.
    #[error("manifest declares task '{name}' more than once")]
    DuplicateTask { name: String },

    #[error("task '{task}' depends on '{dependency}' which is not declared")]
    UnknownDependency { task: String, dependency: String },

    /// A task is listed before one of its dependencies. Manifest order is
    /// execution-graph build order.
    #[error("task '{task}' must be declared after its dependency '{dependency}'")]
    DependencyDeclaredLater { task: String, dependency: String },
}
