// Copyright (c) 2025 Girder Contributors
// SPDX-License-Identifier: MIT

//! Error types for every girder subsystem.
//!
//! Each subsystem owns its error enum; this module re-exports them so callers
//! can reach everything through `girder::errors`. Propagation rules live with
//! the code that makes the decision: checksum-file read failures are folded
//! into "not up to date" inside the task model and never surface here.

mod config;
mod registry;
mod rpc;
mod scheduler;
mod task;

pub use config::ConfigError;
pub use registry::{DispatchError, ExecuteError, RegisterError};
pub use rpc::{PluginStartError, TransportError};
pub use scheduler::ScheduleError;
pub use task::ChecksumError;
