// Copyright (c) 2025 Girder Contributors
// SPDX-License-Identifier: MIT

//! Build manifest: the YAML file naming plugins to start and tasks to run.
//!
//! Validation happens at load time so a malformed manifest is rejected before
//! any plugin process is spawned. Manifest order matters: a task must be
//! declared after every task it depends on, which also makes the declared
//! graph acyclic.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::errors::ConfigError;

fn default_state_root() -> PathBuf {
    PathBuf::from(".girder")
}

fn default_max_concurrency() -> usize {
    crate::scheduler::DEFAULT_CONCURRENCY
}

fn default_params() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// One task entry in the manifest.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskSpec {
    /// Run-unique handle; `depends_on` entries reference these.
    pub name: String,
    /// Composite backend key, e.g. `echo-plugin:echo`.
    pub backend: String,
    #[serde(default)]
    pub inputs: Vec<PathBuf>,
    #[serde(default = "default_params")]
    pub params: serde_json::Value,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl TaskSpec {
    /// Identity string this entry schedules under.
    pub fn identity(&self) -> String {
        format!("{}:{}", self.name, self.backend)
    }
}

/// Root of the manifest file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    /// Directory holding per-task output directories and checksum files.
    #[serde(default = "default_state_root")]
    pub state_root: PathBuf,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Plugin executables to spawn before scheduling.
    #[serde(default)]
    pub plugins: Vec<PathBuf>,
    #[serde(default)]
    pub tasks: Vec<TaskSpec>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let manifest: Manifest =
            serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Checks name uniqueness and that every dependency names an
    /// earlier-declared task.
    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen: Vec<&str> = Vec::with_capacity(self.tasks.len());
        for spec in &self.tasks {
            if seen.contains(&spec.name.as_str()) {
                return Err(ConfigError::DuplicateTask {
                    name: spec.name.clone(),
                });
            }
            for dependency in &spec.depends_on {
                if !seen.contains(&dependency.as_str()) {
                    let declared_later = self
                        .tasks
                        .iter()
                        .any(|other| &other.name == dependency);
                    return Err(if declared_later {
                        ConfigError::DependencyDeclaredLater {
                            task: spec.name.clone(),
                            dependency: dependency.clone(),
                        }
                    } else {
                        ConfigError::UnknownDependency {
                            task: spec.name.clone(),
                            dependency: dependency.clone(),
                        }
                    });
                }
            }
            seen.push(&spec.name);
        }
        Ok(())
    }

    /// Maps a task name to the identity string it schedules under.
    ///
    /// Only valid for names `validate` has already accepted.
    pub fn identity_of(&self, name: &str) -> Option<String> {
        self.tasks
            .iter()
            .find(|spec| spec.name == name)
            .map(TaskSpec::identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn load(yaml: &str) -> Result<Manifest, ConfigError> {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("girder.yaml");
        std::fs::write(&path, yaml).unwrap();
        Manifest::load(&path)
    }

    #[test]
    fn minimal_manifest_gets_defaults() {
        let manifest = load("tasks: []\n").unwrap();
        assert_eq!(manifest.state_root, PathBuf::from(".girder"));
        assert_eq!(manifest.max_concurrency, 8);
        assert!(manifest.plugins.is_empty());
    }

    #[test]
    fn full_manifest_parses() {
        let manifest = load(
            r#"
state_root: /tmp/girder-state
max_concurrency: 2
plugins:
  - ./plugins/echo-plugin
tasks:
  - name: generate
    backend: echo-plugin:echo
    params:
      value: 3
  - name: gather
    backend: echo-plugin:collect
    inputs:
      - /tmp/girder-state/generate:echo-plugin:echo
    depends_on: [generate]
"#,
        )
        .unwrap();
        assert_eq!(manifest.max_concurrency, 2);
        assert_eq!(manifest.tasks.len(), 2);
        assert_eq!(manifest.tasks[0].identity(), "generate:echo-plugin:echo");
        assert_eq!(manifest.tasks[0].params["value"], 3);
        assert_eq!(
            manifest.identity_of("gather").as_deref(),
            Some("gather:echo-plugin:collect")
        );
    }

    #[test]
    fn duplicate_task_name_is_rejected() {
        let err = load(
            r#"
tasks:
  - name: a
    backend: p:b
  - name: a
    backend: p:c
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateTask { ref name } if name == "a"));
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let err = load(
            r#"
tasks:
  - name: a
    backend: p:b
    depends_on: [ghost]
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownDependency { .. }));
    }

    #[test]
    fn forward_reference_is_rejected_with_ordering_error() {
        let err = load(
            r#"
tasks:
  - name: a
    backend: p:b
    depends_on: [b]
  - name: b
    backend: p:b
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::DependencyDeclaredLater { .. }));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(load("task: []\n").is_err());
    }
}
