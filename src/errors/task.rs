// Copyright (c) 2025 Girder Contributors
// SPDX-License-Identifier: MIT

//! Errors raised while computing or persisting task checksums.

use std::path::PathBuf;

use thiserror::Error;

/// Failure while digesting a task's inputs and parameters, or while writing
/// the checksum file after a successful run.
#[derive(Debug, Error)]
pub enum ChecksumError {
    /// An input file or the checksum file itself could not be read/written.
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Task parameters could not be serialized canonically.
    #[error("failed to serialize task parameters: {0}")]
    Encoding(#[from] serde_json::Error),
}
