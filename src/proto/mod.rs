// Copyright (c) 2025 Girder Contributors
// SPDX-License-Identifier: MIT

//! Wire messages for the orchestrator <-> plugin protocol.
//!
//! The protocol speaks length-delimited protobuf frames over the managed
//! subprocess's stdin/stdout. Messages are declared directly with prost
//! derives; there is no protoc/codegen step, the annotated structs here are
//! the schema of record. See [`crate::rpc`] for framing and the handshake.

#[path = "plugin.v1.rs"]
pub mod plugin_v1;

pub use plugin_v1::{
    envelope, BackendDescriptor, ConfigureRequest, ConfigureResponse, Envelope, FeatureFlag,
    LogLevel, LogRecord, PerformTaskRequest, PerformTaskResponse, StreamLogsEnd,
    StreamLogsRequest,
};

/// First line a plugin must print on stdout before any protobuf frame.
pub const HANDSHAKE_MAGIC: &str = "GIRDER_PLUGIN";

/// Version of the wire protocol described by this module.
pub const PROTOCOL_VERSION: u32 = 1;

/// Renders the handshake line (without the trailing newline).
pub fn handshake_line() -> String {
    format!("{HANDSHAKE_MAGIC}|{PROTOCOL_VERSION}")
}

/// Parses and verifies a handshake line, returning the peer's protocol
/// version.
pub fn parse_handshake(line: &str) -> Result<u32, String> {
    let mut parts = line.trim().splitn(2, '|');
    let magic = parts.next().unwrap_or_default();
    if magic != HANDSHAKE_MAGIC {
        return Err(format!("bad magic value '{magic}'"));
    }
    let version: u32 = parts
        .next()
        .unwrap_or_default()
        .parse()
        .map_err(|_| "missing or non-numeric protocol version".to_string())?;
    if version != PROTOCOL_VERSION {
        return Err(format!(
            "protocol version mismatch: peer speaks {version}, host speaks {PROTOCOL_VERSION}"
        ));
    }
    Ok(version)
}
