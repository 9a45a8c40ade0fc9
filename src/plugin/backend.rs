// Copyright (c) 2025 Girder Contributors
// SPDX-License-Identifier: MIT

//! The registry-facing wrapper around one remote backend.

use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::ExecuteError;
use crate::proto::PerformTaskRequest;
use crate::registry::{schema, Backend};
use crate::rpc::client::PluginClient;
use crate::task::Task;

/// A backend hosted by a plugin process. Holds the plugin-local backend name
/// (the registry key carries the `plugin:` prefix, the wire does not) and the
/// descriptor obtained once at configure time.
pub struct PluginBackend {
    name: String,
    outputs: Vec<String>,
    params_schema: Option<serde_json::Value>,
    client: Arc<PluginClient>,
}

impl PluginBackend {
    pub(crate) fn new(
        name: String,
        outputs: Vec<String>,
        params_schema: Option<serde_json::Value>,
        client: Arc<PluginClient>,
    ) -> Self {
        Self {
            name,
            outputs,
            params_schema,
            client,
        }
    }
}

#[async_trait]
impl Backend for PluginBackend {
    fn outputs(&self) -> Vec<String> {
        self.outputs.clone()
    }

    fn params_schema(&self) -> Option<&serde_json::Value> {
        self.params_schema.as_ref()
    }

    async fn execute(&self, task: &Task) -> Result<(), ExecuteError> {
        // Validate locally against the declared schema; a mismatch never
        // costs a round trip.
        if let Some(declared) = &self.params_schema {
            schema::validate(declared, task.params()).map_err(ExecuteError::InvalidParams)?;
        }

        let parameters = task
            .canonical_params()
            .map_err(|err| ExecuteError::InvalidParams(err.to_string()))?;

        let request = PerformTaskRequest {
            backend: self.name.clone(),
            inputs: task
                .inputs()
                .iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect(),
            parameters,
            out_directory: task.output_dir().to_string_lossy().into_owned(),
        };

        let response = self.client.perform_task(request).await?;
        match response.error {
            Some(message) => Err(ExecuteError::Failed(message)),
            None => Ok(()),
        }
    }
}
