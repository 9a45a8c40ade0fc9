// Copyright (c) 2025 Girder Contributors
// SPDX-License-Identifier: MIT

//! Girder: a pluggable build orchestrator.
//!
//! Backends that know how to perform one kind of build step live in plugin
//! subprocesses and are discovered at startup over a framed RPC protocol on
//! the plugin's stdio. The orchestrator assembles declared tasks into a
//! dependency graph, skips tasks whose recorded input checksum is unchanged,
//! and executes the rest with bounded concurrency, withholding everything
//! downstream of a failure.
//!
//! The main pieces:
//! - [`task`]: task identity, output paths, and the checksum gate
//! - [`registry`]: backend trait and the dispatch table
//! - [`plugin`]: plugin process lifecycle and the client-side backend adapter
//! - [`rpc`] / [`proto`]: framed transport and message definitions
//! - [`scheduler`]: DAG construction and concurrency-bounded execution
//! - [`api`]: what a plugin binary implements, plus [`api::serve`]
//! - [`config`]: the YAML build manifest

pub mod api;
pub mod config;
pub mod errors;
pub mod observability;
pub mod plugin;
pub mod proto;
pub mod registry;
pub mod rpc;
pub mod scheduler;
pub mod task;
