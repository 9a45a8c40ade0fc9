// Copyright (c) 2025 Girder Contributors
// SPDX-License-Identifier: MIT

//! Centralized message types for operational logging.
//!
//! Lifecycle events that appear in user-facing output are structs with a
//! `Display` impl rather than format strings scattered through the code, so
//! the wording lives in one place and tests can assert on it.

pub mod messages;
