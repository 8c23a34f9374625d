// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::{LlmClient, LlmResponse, Message, StreamCallback, ToolCall, ToolSchema};

/// One scripted completion: a canned response or a closure over the request.
pub enum ScriptStep {
    Respond(LlmResponse),
    With(Box<dyn Fn(&str, &[Message]) -> LlmResponse + Send + Sync>),
    Fail(String),
}

/// Deterministic test client.  Each `complete` call pops the next step from
/// the front of the queue, so scenarios — including multi-cycle tool-call
/// exchanges — run without network access.
pub struct ScriptedLlm {
    steps: Mutex<VecDeque<ScriptStep>>,
    /// Artificial delay applied before every completion; used by cancellation
    /// tests to widen the window between request start and token trip.
    latency: Option<Duration>,
    /// The last `(model, messages, tool names)` seen, for test inspection.
    pub last_request: Arc<Mutex<Option<(String, Vec<Message>, Vec<String>)>>>,
}

impl ScriptedLlm {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            latency: None,
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Convenience: client that answers every call with the same text.
    pub fn always_text(reply: impl Into<String>) -> Self {
        let reply = reply.into();
        Self::new(vec![ScriptStep::With(Box::new(move |_, _| {
            LlmResponse::text(reply.clone())
        }))])
    }

    /// Convenience: one tool call, then a text reply on the next cycle.
    pub fn tool_then_text(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: Value,
        final_text: impl Into<String>,
    ) -> Self {
        Self::new(vec![
            ScriptStep::Respond(LlmResponse::tool_calls(vec![ToolCall::new(
                call_id, tool_name, arguments,
            )])),
            ScriptStep::Respond(LlmResponse::text(final_text)),
        ])
    }

    pub fn remaining_steps(&self) -> usize {
        self.steps.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(
        &self,
        model: &str,
        messages: &[Message],
        tools: &[ToolSchema],
        stream: Option<&StreamCallback>,
    ) -> anyhow::Result<LlmResponse> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        *self.last_request.lock().unwrap() = Some((
            model.to_string(),
            messages.to_vec(),
            tools.iter().map(|t| t.name.clone()).collect(),
        ));

        let step = self.steps.lock().unwrap().pop_front();
        let response = match step {
            None => anyhow::bail!("no scripted steps left"),
            Some(ScriptStep::Fail(msg)) => anyhow::bail!("{msg}"),
            Some(ScriptStep::Respond(resp)) => resp,
            Some(ScriptStep::With(f)) => f(model, messages),
        };

        // Non-streaming client: deliver the full text as a single chunk.
        if let Some(cb) = stream {
            if !response.content.is_empty() {
                cb(&response.content);
            }
        }

        Ok(response)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
