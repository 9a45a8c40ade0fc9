// Copyright (c) 2025 Girder Contributors
// SPDX-License-Identifier: MIT

//! Multiplexing RPC client for one plugin process.
//!
//! A [`PluginClient`] owns two background tasks: a writer draining an
//! outgoing queue into the child's stdin, and a reader dispatching incoming
//! frames. Responses are correlated to callers through a pending map keyed by
//! sequence number; log records are routed to the streaming-log receiver when
//! a session is open. Cancelling the client's token tears both loops down,
//! which resolves every in-flight call to [`TransportError::Closed`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::TransportError;
use crate::proto::{
    envelope, ConfigureRequest, ConfigureResponse, Envelope, LogLevel, LogRecord,
    PerformTaskRequest, PerformTaskResponse, StreamLogsRequest, PROTOCOL_VERSION,
};
use crate::rpc::{read_frame, write_frame};

/// Bound on the handshake + configure round trip at plugin startup.
pub const CONFIGURE_TIMEOUT: Duration = Duration::from_secs(1);

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<envelope::Body>>>>;
type LogSink = Arc<Mutex<Option<mpsc::UnboundedSender<LogRecord>>>>;

pub struct PluginClient {
    outgoing: mpsc::UnboundedSender<Envelope>,
    pending: PendingMap,
    log_sink: LogSink,
    seq: AtomicU64,
    cancel: CancellationToken,
}

impl PluginClient {
    /// Builds a client over an already-handshaken channel and spawns its
    /// reader/writer loops. `cancel` should be a child of the orchestrator's
    /// root token so shutdown propagates here.
    pub fn new<R, W>(reader: R, writer: W, cancel: CancellationToken) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let log_sink: LogSink = Arc::new(Mutex::new(None));

        tokio::spawn(write_loop(writer, outgoing_rx, cancel.clone()));
        tokio::spawn(read_loop(
            reader,
            pending.clone(),
            log_sink.clone(),
            cancel.clone(),
        ));

        Self {
            outgoing,
            pending,
            log_sink,
            seq: AtomicU64::new(1),
            cancel,
        }
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Sends a request and awaits the response body with the same sequence
    /// number.
    async fn call(&self, body: envelope::Body) -> Result<envelope::Body, TransportError> {
        if self.cancel.is_cancelled() {
            return Err(TransportError::Closed);
        }

        let seq = self.next_seq();
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("pending map lock poisoned")
            .insert(seq, tx);

        let envelope = Envelope {
            seq,
            body: Some(body),
        };
        if self.outgoing.send(envelope).is_err() {
            self.pending
                .lock()
                .expect("pending map lock poisoned")
                .remove(&seq);
            return Err(TransportError::Closed);
        }

        // Await under cancellation: the read loop may tear down (clearing the
        // pending map) between the insert above and here, in which case no
        // response will ever arrive for this waiter.
        tokio::select! {
            _ = self.cancel.cancelled() => {
                self.pending
                    .lock()
                    .expect("pending map lock poisoned")
                    .remove(&seq);
                Err(TransportError::Closed)
            }
            response = rx => response.map_err(|_| TransportError::Closed),
        }
    }

    /// Capability discovery. Called exactly once per plugin, right after the
    /// handshake, with a short bounded timeout.
    pub async fn configure(&self) -> Result<ConfigureResponse, TransportError> {
        let request = envelope::Body::ConfigureRequest(ConfigureRequest {
            protocol_version: PROTOCOL_VERSION,
        });

        let body = timeout(CONFIGURE_TIMEOUT, self.call(request))
            .await
            .map_err(|_| TransportError::Timeout(CONFIGURE_TIMEOUT))??;

        match body {
            envelope::Body::ConfigureResponse(response) => Ok(response),
            other => Err(TransportError::UnexpectedResponse(format!(
                "expected ConfigureResponse, got {}",
                body_name(&other)
            ))),
        }
    }

    /// Runs one task remotely. Deliberately unbounded: a backend may run
    /// arbitrarily long, and the calling scheduler worker blocks for the full
    /// duration.
    pub async fn perform_task(
        &self,
        request: PerformTaskRequest,
    ) -> Result<PerformTaskResponse, TransportError> {
        let body = self
            .call(envelope::Body::PerformTaskRequest(request))
            .await?;

        match body {
            envelope::Body::PerformTaskResponse(response) => Ok(response),
            other => Err(TransportError::UnexpectedResponse(format!(
                "expected PerformTaskResponse, got {}",
                body_name(&other)
            ))),
        }
    }

    /// Opens the streaming-log session and returns the record receiver.
    ///
    /// The receiver ends when the plugin closes the stream, the transport
    /// drops, or the client shuts down; all three read as a normal end of
    /// stream, never an error.
    pub fn stream_logs(
        &self,
        min_level: LogLevel,
        include_source: bool,
    ) -> Result<mpsc::UnboundedReceiver<LogRecord>, TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.log_sink.lock().expect("log sink lock poisoned") = Some(tx);

        let envelope = Envelope {
            seq: self.next_seq(),
            body: Some(envelope::Body::StreamLogsRequest(StreamLogsRequest {
                min_level: min_level as i32,
                include_source,
            })),
        };
        self.outgoing
            .send(envelope)
            .map_err(|_| TransportError::Closed)?;

        Ok(rx)
    }

    /// Requests teardown of both background loops. In-flight calls resolve to
    /// [`TransportError::Closed`]; an open log stream ends gracefully.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

async fn write_loop<W>(
    mut writer: W,
    mut outgoing: mpsc::UnboundedReceiver<Envelope>,
    cancel: CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            next = outgoing.recv() => match next {
                Some(envelope) => {
                    if let Err(err) = write_frame(&mut writer, &envelope).await {
                        if !cancel.is_cancelled() {
                            warn!(error = %err, "plugin channel write failed");
                        }
                        break;
                    }
                }
                None => break,
            },
        }
    }
    cancel.cancel();
}

async fn read_loop<R>(mut reader: R, pending: PendingMap, log_sink: LogSink, cancel: CancellationToken)
where
    R: AsyncRead + Unpin,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            frame = read_frame(&mut reader) => match frame {
                Ok(Some(envelope)) => dispatch(envelope, &pending, &log_sink),
                Ok(None) => {
                    debug!("plugin channel closed");
                    break;
                }
                Err(err) => {
                    if !cancel.is_cancelled() {
                        warn!(error = %err, "plugin channel read failed");
                    }
                    break;
                }
            },
        }
    }

    // Resolve every waiter and end the log stream, then take the writer down
    // with us.
    pending.lock().expect("pending map lock poisoned").clear();
    *log_sink.lock().expect("log sink lock poisoned") = None;
    cancel.cancel();
}

fn dispatch(envelope: Envelope, pending: &PendingMap, log_sink: &LogSink) {
    let seq = envelope.seq;
    let Some(body) = envelope.body else {
        // Empty envelope from a newer peer; ignore.
        return;
    };

    match body {
        envelope::Body::ConfigureResponse(_) | envelope::Body::PerformTaskResponse(_) => {
            let waiter = pending
                .lock()
                .expect("pending map lock poisoned")
                .remove(&seq);
            match waiter {
                // Caller may have timed out and gone away; that is fine.
                Some(tx) => {
                    let _ = tx.send(body);
                }
                None => debug!(seq, "dropping response with no waiter"),
            }
        }
        envelope::Body::LogRecord(record) => {
            let mut sink = log_sink.lock().expect("log sink lock poisoned");
            if let Some(tx) = sink.as_ref() {
                if tx.send(record).is_err() {
                    *sink = None;
                }
            }
        }
        envelope::Body::StreamLogsEnd(_) => {
            *log_sink.lock().expect("log sink lock poisoned") = None;
        }
        // Requests only flow host -> plugin; anything else is a newer
        // protocol speaking past us.
        _ => debug!(seq, "ignoring unexpected frame"),
    }
}

fn body_name(body: &envelope::Body) -> &'static str {
    match body {
        envelope::Body::ConfigureRequest(_) => "ConfigureRequest",
        envelope::Body::ConfigureResponse(_) => "ConfigureResponse",
        envelope::Body::PerformTaskRequest(_) => "PerformTaskRequest",
        envelope::Body::PerformTaskResponse(_) => "PerformTaskResponse",
        envelope::Body::StreamLogsRequest(_) => "StreamLogsRequest",
        envelope::Body::LogRecord(_) => "LogRecord",
        envelope::Body::StreamLogsEnd(_) => "StreamLogsEnd",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn never_answered_request() -> PerformTaskRequest {
        PerformTaskRequest {
            backend: "slow".into(),
            inputs: vec![],
            parameters: vec![],
            out_directory: String::new(),
        }
    }

    #[tokio::test]
    async fn in_flight_call_resolves_when_client_shuts_down() {
        // The peer end stays open but never answers.
        let (host_side, _peer) = tokio::io::duplex(1024);
        let (read, write) = tokio::io::split(host_side);
        let client = Arc::new(PluginClient::new(read, write, CancellationToken::new()));

        let in_flight = {
            let client = client.clone();
            tokio::spawn(async move { client.perform_task(never_answered_request()).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        client.shutdown();

        let result = tokio::time::timeout(Duration::from_secs(1), in_flight)
            .await
            .expect("call must resolve once the client shuts down")
            .unwrap();
        assert!(matches!(result, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn in_flight_call_resolves_when_peer_closes_the_channel() {
        let (host_side, peer) = tokio::io::duplex(1024);
        let (read, write) = tokio::io::split(host_side);
        let client = Arc::new(PluginClient::new(read, write, CancellationToken::new()));

        let in_flight = {
            let client = client.clone();
            tokio::spawn(async move { client.perform_task(never_answered_request()).await })
        };

        // Dropping the peer reads as EOF on the host side; the read loop
        // tears down and the waiting call must not hang.
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(peer);

        let result = tokio::time::timeout(Duration::from_secs(1), in_flight)
            .await
            .expect("call must resolve once the channel closes")
            .unwrap();
        assert!(matches!(result, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn call_after_shutdown_fails_immediately() {
        let (host_side, _peer) = tokio::io::duplex(1024);
        let (read, write) = tokio::io::split(host_side);
        let client = PluginClient::new(read, write, CancellationToken::new());

        client.shutdown();
        let result = client.perform_task(never_answered_request()).await;
        assert!(matches!(result, Err(TransportError::Closed)));
    }
}
