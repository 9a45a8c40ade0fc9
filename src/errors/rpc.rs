// Copyright (c) 2025 Girder Contributors
// SPDX-License-Identifier: MIT

//! Transport and plugin-startup errors.

use thiserror::Error;

/// Failure on the RPC channel between orchestrator and plugin process.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The plugin's first line of output was not a valid handshake.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Reading or writing the stdio channel failed.
    #[error("transport i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame arrived that could not be decoded as a protocol envelope.
    #[error("failed to decode protocol frame: {0}")]
    Decode(#[from] prost::DecodeError),

    /// A frame, outgoing or incoming, exceeds the protocol's size bound.
    #[error("frame length {len} exceeds maximum {max}")]
    FrameTooLarge { len: u64, max: u32 },

    /// The channel shut down while a call was in flight. Normal once
    /// orchestrator shutdown has been requested.
    #[error("rpc channel closed")]
    Closed,

    /// A bounded call (handshake, configure) did not answer in time.
    #[error("rpc call timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The peer answered a request with the wrong response type.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

/// Why a single plugin failed to start. One plugin's failure never aborts the
/// run; the manager reports it and moves on to the next plugin.
#[derive(Debug, Error)]
pub enum PluginStartError {
    #[error("failed to spawn plugin process '{path}': {source}")]
    Spawn {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("plugin '{name}' handshake failed: {source}")]
    Handshake {
        name: String,
        #[source]
        source: TransportError,
    },

    #[error("plugin '{name}' configure failed: {source}")]
    Configure {
        name: String,
        #[source]
        source: TransportError,
    },

    /// A backend descriptor carried a schema that is not valid JSON.
    #[error("plugin '{name}' backend '{backend}' declared a malformed schema: {source}")]
    MalformedSchema {
        name: String,
        backend: String,
        #[source]
        source: serde_json::Error,
    },
}
