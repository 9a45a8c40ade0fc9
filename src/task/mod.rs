// Copyright (c) 2025 Girder Contributors
// SPDX-License-Identifier: MIT

//! Task identity, output-path derivation, and the checksum gate.
//!
//! A [`Task`] is created by the caller before scheduling and is read-only to
//! the scheduler and registry except for checksum memoization. The checksum
//! digests the backend name, the byte contents of every input in list order
//! (directories contribute their files in sorted order), and the canonical
//! JSON form of the parameters; identical inputs always yield identical
//! digests across runs and across processes.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha2::{Digest, Sha256};

use crate::errors::ChecksumError;

/// Name of the per-task digest file inside the output directory.
const CHECKSUM_FILE: &str = ".checksum";

/// Immutable `(name, backend)` pair identifying a task.
///
/// Two tasks with the same pair are the same task; uniqueness of `name`
/// within a run is the caller's responsibility.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskId {
    name: String,
    backend: String,
}

impl TaskId {
    pub fn new(name: impl Into<String>, backend: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            backend: backend.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Composite backend key this task dispatches to, e.g. `myplugin:echo`.
    pub fn backend(&self) -> &str {
        &self.backend
    }

    /// Deterministic output directory under the state root.
    pub fn output_dir(&self, state_root: &Path) -> PathBuf {
        state_root.join(self.to_string())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.backend)
    }
}

/// A unit of work bound to one backend.
#[derive(Debug)]
pub struct Task {
    id: TaskId,
    inputs: Vec<PathBuf>,
    params: serde_json::Value,
    state_root: PathBuf,
    // Memoized digest. Written at most once; every writer computes the same
    // value from the same immutable fields, so racing on `set` is harmless.
    checksum: OnceLock<Vec<u8>>,
}

impl Task {
    pub fn new(
        state_root: impl Into<PathBuf>,
        name: impl Into<String>,
        backend: impl Into<String>,
        params: serde_json::Value,
        inputs: Vec<PathBuf>,
    ) -> Self {
        Self {
            id: TaskId::new(name, backend),
            inputs,
            params,
            state_root: state_root.into(),
            checksum: OnceLock::new(),
        }
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn inputs(&self) -> &[PathBuf] {
        &self.inputs
    }

    pub fn params(&self) -> &serde_json::Value {
        &self.params
    }

    pub fn output_dir(&self) -> PathBuf {
        self.id.output_dir(&self.state_root)
    }

    pub fn checksum_file(&self) -> PathBuf {
        self.output_dir().join(CHECKSUM_FILE)
    }

    /// Canonical serialized form of the parameters.
    ///
    /// serde_json's default map is ordered (BTreeMap), so equal values always
    /// serialize to equal bytes regardless of construction order.
    pub fn canonical_params(&self) -> Result<Vec<u8>, ChecksumError> {
        Ok(serde_json::to_vec(&self.params)?)
    }

    /// Returns the task's digest, computing and memoizing it on first call.
    ///
    /// Fails if any input file is unreadable or the parameters cannot be
    /// serialized. Once computed, the digest is immutable for the task's
    /// lifetime even if input files change on disk afterwards.
    pub fn checksum(&self) -> Result<&[u8], ChecksumError> {
        match self.checksum.get() {
            Some(digest) => Ok(digest),
            None => {
                let digest = self.compute_checksum()?;
                Ok(self.checksum.get_or_init(|| digest).as_slice())
            }
        }
    }

    fn compute_checksum(&self) -> Result<Vec<u8>, ChecksumError> {
        let mut hasher = Sha256::new();

        hasher.update(self.id.backend.as_bytes());

        for input in &self.inputs {
            hash_path(&mut hasher, input)?;
        }

        hasher.update(self.canonical_params()?);

        Ok(hasher.finalize().to_vec())
    }

    /// True iff the output directory exists, a saved checksum file exists,
    /// and its contents equal the freshly computed digest.
    ///
    /// Every failure path answers `false`, never an error: cache corruption
    /// must force a rebuild, not block one.
    pub fn is_up_to_date(&self) -> bool {
        if !self.output_dir().is_dir() {
            return false;
        }

        let saved = match fs::read_to_string(self.checksum_file()) {
            Ok(text) => text,
            Err(_) => return false,
        };
        let saved = match BASE64.decode(saved.trim()) {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };

        match self.checksum() {
            Ok(current) => saved == current,
            Err(_) => false,
        }
    }

    /// Persists the digest of this task. Must only be called after a
    /// successful execution; creates parent directories as needed.
    pub fn save_checksum(&self) -> Result<(), ChecksumError> {
        let digest = self.checksum()?.to_vec();

        let dir = self.output_dir();
        fs::create_dir_all(&dir).map_err(|source| ChecksumError::Io {
            path: dir,
            source,
        })?;

        let path = self.checksum_file();
        fs::write(&path, BASE64.encode(digest)).map_err(|source| ChecksumError::Io {
            path,
            source,
        })
    }
}

/// Hashes one input path. A file contributes its bytes; a directory
/// contributes the bytes of every regular file under it, walked in sorted
/// name order so the digest does not depend on readdir ordering. This lets a
/// task name another task's output directory as an input.
fn hash_path(hasher: &mut Sha256, path: &Path) -> Result<(), ChecksumError> {
    let io_err = |source: std::io::Error| ChecksumError::Io {
        path: path.to_path_buf(),
        source,
    };

    if path.is_dir() {
        let mut entries: Vec<PathBuf> = fs::read_dir(path)
            .map_err(io_err)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<Result<_, _>>()
            .map_err(io_err)?;
        entries.sort();
        for entry in entries {
            hash_path(hasher, &entry)?;
        }
    } else {
        let bytes = fs::read(path).map_err(io_err)?;
        hasher.update(&bytes);
    }
    Ok(())
}
