// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;

use crate::{LlmResponse, Message, ToolSchema};

/// Incremental text sink for streamed responses.
///
/// Invoked with content deltas in wire order, inline on the completing task
/// before `complete` returns.  No backpressure exists — callers must not
/// block inside the callback.
pub type StreamCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Contract every model transport implements.
///
/// A streaming implementation must deliver content deltas through `stream`
/// (when provided) in the order they arrive on the wire; a non-streaming
/// implementation may invoke it once with the full text, or not at all.
/// Transport failures propagate as errors and are mapped by the engine to a
/// failed run.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(
        &self,
        model: &str,
        messages: &[Message],
        tools: &[ToolSchema],
        stream: Option<&StreamCallback>,
    ) -> anyhow::Result<LlmResponse>;
}
