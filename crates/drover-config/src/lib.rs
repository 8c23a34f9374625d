// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod schema;

pub use schema::{BackendConfig, MemoryConfig, RuntimeConfig};
