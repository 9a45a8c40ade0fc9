// Copyright (c) 2025 Girder Contributors
// SPDX-License-Identifier: MIT

//! Plugin-side connection loop and streaming-log capture.
//!
//! [`serve_connection`] answers Configure with the hosted backend
//! descriptors, runs PerformTask requests concurrently, and opens/closes the
//! streaming-log session. Log capture is a `tracing` layer whose sink is set
//! for the duration of one session and cleared afterwards; the layer is
//! inert while no session is open, so there is no global logger swapping.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;

use crate::api::{TaskContext, TaskHandler};
use crate::errors::TransportError;
use crate::proto::{
    envelope, handshake_line, BackendDescriptor, ConfigureResponse, Envelope, FeatureFlag,
    LogLevel, LogRecord, PerformTaskRequest, PerformTaskResponse, StreamLogsEnd,
    StreamLogsRequest, PROTOCOL_VERSION,
};
use crate::registry::schema;
use crate::rpc::{read_frame, write_frame};

/// Serves the hosted backends over the process's stdin/stdout. Call this from
/// a plugin's `main()`; it returns when the orchestrator closes the channel.
pub async fn serve(backends: HashMap<String, Arc<dyn TaskHandler>>) -> anyhow::Result<()> {
    let logs = LogStreamHandle::new();

    // Human-readable logging goes to stderr; stdout belongs to the wire
    // protocol. The forward layer stays installed for the process lifetime
    // and only does work while a log session is open.
    let subscriber = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(ForwardLayer::new(logs.clone()));
    let _ = tracing::subscriber::set_global_default(subscriber);

    let mut stdout = tokio::io::stdout();
    stdout
        .write_all(format!("{}\n", handshake_line()).as_bytes())
        .await?;
    stdout.flush().await?;

    serve_connection(tokio::io::stdin(), stdout, backends, logs).await?;
    Ok(())
}

/// Connection loop over arbitrary I/O halves; [`serve`] wires this to
/// stdin/stdout. Exposed separately so hosts and tests can run a plugin
/// in-process over a duplex pipe.
pub async fn serve_connection<R, W>(
    mut reader: R,
    writer: W,
    backends: HashMap<String, Arc<dyn TaskHandler>>,
    logs: LogStreamHandle,
) -> Result<(), TransportError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (outgoing, outgoing_rx) = mpsc::unbounded_channel::<Envelope>();
    let writer_task = tokio::spawn(drain_outgoing(writer, outgoing_rx));

    while let Some(request) = read_frame(&mut reader).await? {
        let seq = request.seq;
        match request.body {
            Some(envelope::Body::ConfigureRequest(configure)) => {
                if configure.protocol_version != PROTOCOL_VERSION {
                    warn!(
                        host_version = configure.protocol_version,
                        plugin_version = PROTOCOL_VERSION,
                        "protocol version skew"
                    );
                }
                let response = ConfigureResponse {
                    backends: describe(&backends),
                    features: vec![FeatureFlag::StreamingLogs as i32],
                };
                let _ = outgoing.send(Envelope {
                    seq,
                    body: Some(envelope::Body::ConfigureResponse(response)),
                });
            }
            Some(envelope::Body::PerformTaskRequest(perform)) => {
                let handler = backends.get(&perform.backend).cloned();
                let outgoing = outgoing.clone();
                // Each task runs in its own async task: the orchestrator may
                // dispatch to several of this plugin's backends in parallel.
                tokio::spawn(async move {
                    let error = match handler {
                        Some(handler) => run_task(handler, perform).await.err().map(|e| format!("{e:#}")),
                        None => Some(format!(
                            "backend '{}' is not hosted by this plugin",
                            perform.backend
                        )),
                    };
                    let _ = outgoing.send(Envelope {
                        seq,
                        body: Some(envelope::Body::PerformTaskResponse(PerformTaskResponse {
                            error,
                        })),
                    });
                });
            }
            Some(envelope::Body::StreamLogsRequest(stream)) => {
                logs.open(seq, &stream, outgoing.clone());
            }
            // Unknown bodies come from a newer host; skip them.
            Some(_) | None => {}
        }
    }

    logs.close();
    drop(outgoing);
    let _ = writer_task.await;
    Ok(())
}

async fn drain_outgoing<W>(mut writer: W, mut outgoing: mpsc::UnboundedReceiver<Envelope>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(envelope) = outgoing.recv().await {
        if write_frame(&mut writer, &envelope).await.is_err() {
            break;
        }
    }
}

fn describe(backends: &HashMap<String, Arc<dyn TaskHandler>>) -> Vec<BackendDescriptor> {
    backends
        .iter()
        .map(|(name, handler)| {
            let schema = handler.params_schema();
            BackendDescriptor {
                name: name.clone(),
                outputs: handler.outputs(),
                params_schema: if schema.is_null() {
                    String::new()
                } else {
                    schema.to_string()
                },
            }
        })
        .collect()
}

async fn run_task(handler: Arc<dyn TaskHandler>, request: PerformTaskRequest) -> anyhow::Result<()> {
    let params: Value = if request.parameters.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&request.parameters)?
    };

    // The host validated against the descriptor it saw at configure time;
    // validating again here protects against host/plugin version skew.
    let declared = handler.params_schema();
    if !declared.is_null() {
        schema::validate(&declared, &params)
            .map_err(|msg| anyhow::anyhow!("parameters rejected by schema: {msg}"))?;
    }

    info!(backend = %request.backend, out_dir = %request.out_directory, "performing task");

    let ctx = TaskContext {
        inputs: request.inputs.iter().map(Into::into).collect(),
        out_dir: request.out_directory.clone().into(),
    };
    handler.run(params, ctx).await
}

/// Shared handle to the (at most one) active streaming-log session.
#[derive(Clone, Default)]
pub struct LogStreamHandle {
    inner: Arc<Mutex<Option<ActiveStream>>>,
}

struct ActiveStream {
    seq: u64,
    min_level: i32,
    include_source: bool,
    outgoing: mpsc::UnboundedSender<Envelope>,
}

impl LogStreamHandle {
    pub fn new() -> Self {
        Self::default()
    }

    fn open(&self, seq: u64, request: &StreamLogsRequest, outgoing: mpsc::UnboundedSender<Envelope>) {
        let mut inner = self.inner.lock().expect("log stream lock poisoned");
        *inner = Some(ActiveStream {
            seq,
            min_level: request.min_level,
            include_source: request.include_source,
            outgoing,
        });
    }

    fn close(&self) {
        let mut inner = self.inner.lock().expect("log stream lock poisoned");
        if let Some(stream) = inner.take() {
            let _ = stream.outgoing.send(Envelope {
                seq: stream.seq,
                body: Some(envelope::Body::StreamLogsEnd(StreamLogsEnd {})),
            });
        }
    }

    fn capture(&self, event: &tracing::Event<'_>) {
        let inner = self.inner.lock().expect("log stream lock poisoned");
        let Some(stream) = inner.as_ref() else {
            return;
        };

        let level = LogLevel::from(*event.metadata().level());
        if (level as i32) < stream.min_level {
            return;
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let target = if stream.include_source {
            match (event.metadata().file(), event.metadata().line()) {
                (Some(file), Some(line)) => format!("{file}:{line}"),
                _ => event.metadata().target().to_string(),
            }
        } else {
            String::new()
        };

        let unix_millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);

        let record = LogRecord {
            unix_millis,
            level: level as i32,
            message: visitor.message,
            target,
            attrs: visitor.attrs,
        };

        let _ = stream.outgoing.send(Envelope {
            seq: stream.seq,
            body: Some(envelope::Body::LogRecord(record)),
        });
    }
}

/// `tracing` layer that forwards events into the active log session, if any.
pub struct ForwardLayer {
    handle: LogStreamHandle,
}

impl ForwardLayer {
    pub fn new(handle: LogStreamHandle) -> Self {
        Self { handle }
    }
}

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for ForwardLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        self.handle.capture(event);
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: String,
    attrs: HashMap<String, String>,
}

impl tracing::field::Visit for FieldVisitor {
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.attrs.insert(field.name().to_string(), value.to_string());
        }
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.attrs
                .insert(field.name().to_string(), format!("{value:?}"));
        }
    }
}
