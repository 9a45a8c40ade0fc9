// Copyright (c) 2025 Girder Contributors
// SPDX-License-Identifier: MIT

//! Forwards a plugin's streamed log records into the orchestrator's own
//! logging output, tagged with the plugin's name.
//!
//! The forwarding task is one independent lifeline per plugin; it never
//! blocks a scheduler worker. Any kind of stream termination (explicit close,
//! transport loss, orchestrator shutdown) ends the loop quietly.

use tokio::sync::mpsc;
use tracing::debug;

use crate::proto::{LogLevel, LogRecord};

pub(crate) async fn forward_plugin_logs(plugin: String, mut records: mpsc::UnboundedReceiver<LogRecord>) {
    while let Some(record) = records.recv().await {
        emit(&plugin, &record);
    }
    debug!(plugin = %plugin, "plugin log stream ended");
}

fn emit(plugin: &str, record: &LogRecord) {
    let level = LogLevel::try_from(record.level).unwrap_or(LogLevel::Info);

    // tracing macros need a static level, so fan out here.
    macro_rules! forward {
        ($macro:ident) => {
            tracing::$macro!(
                plugin = %plugin,
                source = %record.target,
                attrs = ?record.attrs,
                "{}",
                record.message
            )
        };
    }

    match level {
        LogLevel::Trace => forward!(trace),
        LogLevel::Debug => forward!(debug),
        LogLevel::Info => forward!(info),
        LogLevel::Warn => forward!(warn),
        LogLevel::Error => forward!(error),
    }
}
