// Copyright (c) 2025 Girder Contributors
// SPDX-License-Identifier: MIT

//! Message types for run-level lifecycle events.

use std::fmt::{Display, Formatter};

/// A task failed; logged at `error!`.
pub struct TaskFailed<'a> {
    pub task: &'a str,
    pub error: &'a dyn std::error::Error,
}

impl Display for TaskFailed<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "task '{}' failed: {}", self.task, self.error)
    }
}

/// A task was skipped because something upstream of it failed; logged at
/// `warn!`. Skipped tasks always appear in the run report; they never
/// silently vanish.
pub struct TaskSkipped<'a> {
    pub task: &'a str,
    pub failed_dependency: &'a str,
}

impl Display for TaskSkipped<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "task '{}' skipped: upstream task '{}' failed",
            self.task, self.failed_dependency
        )
    }
}

/// End-of-run summary; logged at `info!`.
pub struct RunSummary {
    pub executed: usize,
    pub up_to_date: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl Display for RunSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "run complete: {} executed, {} up to date, {} failed, {} skipped",
            self.executed, self.up_to_date, self.failed, self.skipped
        )
    }
}

/// A plugin failed to start; logged at `error!`. Other plugins are
/// unaffected.
pub struct PluginStartFailed<'a> {
    pub path: &'a std::path::Path,
    pub error: &'a dyn std::error::Error,
}

impl Display for PluginStartFailed<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "plugin '{}' failed to start: {}",
            self.path.display(),
            self.error
        )
    }
}
