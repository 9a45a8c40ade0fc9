// Copyright (c) 2025 Girder Contributors
// SPDX-License-Identifier: MIT

//! Errors for backend registration and checksum-gated dispatch.

use thiserror::Error;

use crate::errors::TransportError;

/// Registration collision: the composite key is already taken.
#[derive(Debug, Error)]
pub enum RegisterError {
    #[error("duplicate backend name: '{name}'")]
    DuplicateBackend { name: String },
}

/// A backend reported failure while executing a task.
///
/// Local backends produce `Failed` directly; plugin-backed ones map remote
/// error strings and transport losses into this type.
#[derive(Debug, Error)]
pub enum ExecuteError {
    /// The backend ran and reported an error.
    #[error("{0}")]
    Failed(String),

    /// Task parameters did not match the backend's declared schema. Detected
    /// locally, before any RPC round trip.
    #[error("parameters rejected by schema: {0}")]
    InvalidParams(String),

    /// The RPC channel to the hosting plugin was lost mid-call.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Errors surfaced by [`BackendRegistry::dispatch`](crate::registry::BackendRegistry::dispatch).
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The task names a backend nobody registered.
    #[error("backend '{name}' not found")]
    UnknownBackend { name: String },

    /// The task's output directory could not be created.
    #[error("failed to create output directory {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The backend failed; wrapped with backend and task names for context.
    #[error("backend '{backend}' failed executing task '{task}': {source}")]
    Execution {
        backend: String,
        task: String,
        #[source]
        source: ExecuteError,
    },
}
