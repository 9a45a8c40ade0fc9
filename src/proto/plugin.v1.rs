// Copyright (c) 2025 Girder Contributors
// SPDX-License-Identifier: MIT

//! Protocol messages, plugin.v1.
//!
//! Field numbers are frozen; add fields, never renumber. Unknown feature
//! flags and unknown envelope bodies must be ignored by both sides so that
//! older peers keep working against newer ones.

use std::collections::HashMap;

/// Every frame on the wire is one `Envelope`.
///
/// `seq` correlates requests with responses: a response echoes the `seq` of
/// the request it answers. Log records carry the `seq` of the StreamLogs
/// request that opened the session.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Envelope {
    #[prost(uint64, tag = "1")]
    pub seq: u64,
    #[prost(oneof = "envelope::Body", tags = "2, 3, 4, 5, 6, 7, 8")]
    pub body: ::core::option::Option<envelope::Body>,
}

pub mod envelope {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Body {
        #[prost(message, tag = "2")]
        ConfigureRequest(super::ConfigureRequest),
        #[prost(message, tag = "3")]
        ConfigureResponse(super::ConfigureResponse),
        #[prost(message, tag = "4")]
        PerformTaskRequest(super::PerformTaskRequest),
        #[prost(message, tag = "5")]
        PerformTaskResponse(super::PerformTaskResponse),
        #[prost(message, tag = "6")]
        StreamLogsRequest(super::StreamLogsRequest),
        #[prost(message, tag = "7")]
        LogRecord(super::LogRecord),
        #[prost(message, tag = "8")]
        StreamLogsEnd(super::StreamLogsEnd),
    }
}

/// Sent exactly once per plugin, immediately after the handshake.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ConfigureRequest {
    #[prost(uint32, tag = "1")]
    pub protocol_version: u32,
}

/// The plugin's capability manifest.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ConfigureResponse {
    #[prost(message, repeated, tag = "1")]
    pub backends: Vec<BackendDescriptor>,
    /// Values of [`FeatureFlag`]; unknown values are ignored by the host.
    #[prost(enumeration = "FeatureFlag", repeated, tag = "2")]
    pub features: Vec<i32>,
}

/// One backend hosted by a plugin.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BackendDescriptor {
    #[prost(string, tag = "1")]
    pub name: String,
    /// Artifact names the backend produces into the task's output directory.
    #[prost(string, repeated, tag = "2")]
    pub outputs: Vec<String>,
    /// JSON text describing the expected parameter shape. Empty means the
    /// backend accepts anything.
    #[prost(string, tag = "3")]
    pub params_schema: String,
}

/// Ask a plugin to run one task on one of its backends.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PerformTaskRequest {
    #[prost(string, tag = "1")]
    pub backend: String,
    #[prost(string, repeated, tag = "2")]
    pub inputs: Vec<String>,
    /// Canonical JSON bytes of the task parameters, already validated against
    /// the backend's declared schema on the host side.
    #[prost(bytes = "vec", tag = "3")]
    pub parameters: Vec<u8>,
    #[prost(string, tag = "4")]
    pub out_directory: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PerformTaskResponse {
    /// Present iff the backend failed.
    #[prost(string, optional, tag = "1")]
    pub error: ::core::option::Option<String>,
}

/// Opens the streaming-log session (only if the plugin negotiated the
/// `StreamingLogs` feature).
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StreamLogsRequest {
    /// Minimum severity, a [`LogLevel`] value.
    #[prost(enumeration = "LogLevel", tag = "1")]
    pub min_level: i32,
    #[prost(bool, tag = "2")]
    pub include_source: bool,
}

/// One log record emitted by the plugin while the session is open.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LogRecord {
    #[prost(int64, tag = "1")]
    pub unix_millis: i64,
    #[prost(enumeration = "LogLevel", tag = "2")]
    pub level: i32,
    #[prost(string, tag = "3")]
    pub message: String,
    /// Module path / source target, populated when `include_source` was set.
    #[prost(string, tag = "4")]
    pub target: String,
    #[prost(map = "string, string", tag = "5")]
    pub attrs: HashMap<String, String>,
}

/// Plugin-initiated close of the log session.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StreamLogsEnd {}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum FeatureFlag {
    Unspecified = 0,
    /// The plugin can forward its log records over a StreamLogs session.
    StreamingLogs = 1,
}

/// Severity levels, ordered least to most severe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum LogLevel {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
}

impl From<tracing::Level> for LogLevel {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE => LogLevel::Trace,
            tracing::Level::DEBUG => LogLevel::Debug,
            tracing::Level::INFO => LogLevel::Info,
            tracing::Level::WARN => LogLevel::Warn,
            tracing::Level::ERROR => LogLevel::Error,
        }
    }
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}
