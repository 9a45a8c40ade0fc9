// Copyright (c) 2025 Girder Contributors
// SPDX-License-Identifier: MIT

//! Plugin process lifecycle: spawn, handshake, capability discovery,
//! registration, teardown.
//!
//! The manager owns every started plugin explicitly; there is no ambient
//! client registry. One plugin's startup failure is reported and isolated:
//! it never prevents other plugins from starting. A task whose only provider
//! failed simply gets `UnknownBackend` at dispatch time.

mod backend;
mod logging;

pub use backend::PluginBackend;

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::errors::{PluginStartError, RegisterError, TransportError};
use crate::proto::{self, FeatureFlag, LogLevel};
use crate::registry::BackendRegistry;
use crate::rpc::client::{PluginClient, CONFIGURE_TIMEOUT};

/// One managed plugin process and the registry keys it contributed.
struct Plugin {
    name: String,
    child: Child,
    client: Arc<PluginClient>,
    backend_keys: Vec<String>,
}

/// Owns plugin subprocesses and installs their backends into the shared
/// registry under composite keys like `myplugin:echo` (plugin base name,
/// then the plugin-local backend name).
pub struct PluginManager {
    registry: Arc<BackendRegistry>,
    plugins: Mutex<Vec<Plugin>>,
    cancel: CancellationToken,
}

impl PluginManager {
    pub fn new(registry: Arc<BackendRegistry>) -> Self {
        Self {
            registry,
            plugins: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Spawns the plugin at `path`, performs the handshake + configure round
    /// trip, and registers every backend it hosts.
    ///
    /// On any failure the subprocess is killed immediately and the error
    /// surfaced; already-started plugins are unaffected.
    pub async fn start_plugin(&self, path: &Path) -> Result<(), PluginStartError> {
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());

        let mut child = Command::new(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| PluginStartError::Spawn {
                path: path.to_string_lossy().into_owned(),
                source,
            })?;

        // The pipes exist because we just asked for them; a missing handle
        // means the spawn itself is broken.
        let stdin = match child.stdin.take() {
            Some(stdin) => stdin,
            None => {
                let _ = child.kill().await;
                return Err(PluginStartError::Handshake {
                    name,
                    source: TransportError::Handshake("plugin stdin unavailable".into()),
                });
            }
        };
        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                let _ = child.kill().await;
                return Err(PluginStartError::Handshake {
                    name,
                    source: TransportError::Handshake("plugin stdout unavailable".into()),
                });
            }
        };

        // Handshake: one text line on stdout before any frame, within the
        // same bound as configure.
        let mut reader = BufReader::new(stdout);
        let mut line = String::new();
        let handshake = timeout(CONFIGURE_TIMEOUT, reader.read_line(&mut line)).await;
        let handshake_result = match handshake {
            Err(_) => Err(TransportError::Timeout(CONFIGURE_TIMEOUT)),
            Ok(Err(err)) => Err(TransportError::Io(err)),
            Ok(Ok(0)) => Err(TransportError::Handshake(
                "plugin exited before handshake".into(),
            )),
            Ok(Ok(_)) => proto::parse_handshake(&line)
                .map(|_| ())
                .map_err(TransportError::Handshake),
        };
        if let Err(source) = handshake_result {
            let _ = child.kill().await;
            return Err(PluginStartError::Handshake { name, source });
        }

        let client = Arc::new(PluginClient::new(
            reader,
            stdin,
            self.cancel.child_token(),
        ));

        let configured = match client.configure().await {
            Ok(configured) => configured,
            Err(source) => {
                client.shutdown();
                let _ = child.kill().await;
                return Err(PluginStartError::Configure { name, source });
            }
        };

        // Unknown feature values are ignored for forward compatibility.
        let streaming_logs = configured
            .features
            .iter()
            .any(|&flag| {
                FeatureFlag::try_from(flag)
                    .map(|flag| flag == FeatureFlag::StreamingLogs)
                    .unwrap_or(false)
            });
        if streaming_logs {
            match client.stream_logs(LogLevel::Info, false) {
                Ok(records) => {
                    tokio::spawn(logging::forward_plugin_logs(name.clone(), records));
                }
                Err(err) => {
                    warn!(plugin = %name, error = %err, "failed to open plugin log stream");
                }
            }
        }

        let mut backend_keys = Vec::with_capacity(configured.backends.len());
        for descriptor in configured.backends {
            let params_schema = if descriptor.params_schema.is_empty() {
                None
            } else {
                match serde_json::from_str(&descriptor.params_schema) {
                    Ok(schema) => Some(schema),
                    Err(source) => {
                        client.shutdown();
                        let _ = child.kill().await;
                        return Err(PluginStartError::MalformedSchema {
                            name,
                            backend: descriptor.name,
                            source,
                        });
                    }
                }
            };

            let key = format!("{}:{}", name, descriptor.name);
            let wrapped = PluginBackend::new(
                descriptor.name,
                descriptor.outputs,
                params_schema,
                client.clone(),
            );
            match self.registry.register(key.clone(), Arc::new(wrapped)) {
                Ok(()) => backend_keys.push(key),
                // First registration wins: keep the earlier backend, skip
                // this one, and keep the plugin running.
                Err(RegisterError::DuplicateBackend { name: taken }) => {
                    warn!(plugin = %name, backend = %taken, "backend name collision, keeping earlier registration");
                }
            }
        }

        info!(plugin = %name, backends = backend_keys.len(), "plugin started");
        self.plugins.lock().await.push(Plugin {
            name,
            child,
            client,
            backend_keys,
        });
        Ok(())
    }

    /// Names of the backends every started plugin has registered.
    pub async fn registered_backends(&self) -> Vec<String> {
        let plugins = self.plugins.lock().await;
        plugins
            .iter()
            .flat_map(|plugin| plugin.backend_keys.iter().cloned())
            .collect()
    }

    /// Unregisters every plugin-provided backend, terminates every
    /// subprocess, and releases all transports. Safe to call even if some
    /// plugins never finished starting, and safe to call twice.
    pub async fn shutdown(&self) {
        // Cancelling first lets open log streams and in-flight calls wind
        // down as a graceful close rather than an error.
        self.cancel.cancel();

        let mut plugins = self.plugins.lock().await;
        for mut plugin in plugins.drain(..) {
            for key in &plugin.backend_keys {
                self.registry.unregister(key);
            }
            plugin.client.shutdown();
            if let Err(err) = plugin.child.kill().await {
                warn!(plugin = %plugin.name, error = %err, "failed to kill plugin process");
            }
            info!(plugin = %plugin.name, "plugin stopped");
        }
    }
}
