// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use serde_json::{Map, Value};

use drover_model::StreamCallback;

use crate::cancel::{CancellationToken, CancelledError};
use crate::state::StateStore;

/// Per-call carrier threaded through the cycle runner, tool contexts, and the
/// model client.  All fields are cheap to clone; `metadata` is the only part
/// callers extend after construction.
#[derive(Clone, Default)]
pub struct ExecutionContext {
    pub cancellation: Option<CancellationToken>,
    pub stream: Option<StreamCallback>,
    pub state_store: Option<Arc<dyn StateStore>>,
    pub metadata: Map<String, Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn with_stream(mut self, stream: StreamCallback) -> Self {
        self.stream = Some(stream);
        self
    }

    pub fn with_state_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.state_store = Some(store);
        self
    }

    pub fn check_cancelled(&self) -> Result<(), CancelledError> {
        match &self.cancellation {
            Some(token) => token.check(),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("cancellation", &self.cancellation.is_some())
            .field("stream", &self.stream.is_some())
            .field("state_store", &self.state_store.is_some())
            .field("metadata", &self.metadata)
            .finish()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
