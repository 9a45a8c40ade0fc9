// Copyright (c) 2025 Girder Contributors
// SPDX-License-Identifier: MIT

//! Errors raised while building the task graph.
//!
//! These abort the whole run before execution begins: a malformed graph is a
//! caller bug, not a runtime condition to route around.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScheduleError {
    /// A dependency edge references a task that has not been added yet.
    /// Dependencies must be added before their dependents.
    #[error("task '{task}' depends on '{dependency}' which has not been added")]
    UnknownDependency { task: String, dependency: String },

    /// Two tasks were added under the same identity string.
    #[error("task '{task}' was added twice")]
    DuplicateTask { task: String },
}
