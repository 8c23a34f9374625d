// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use serde_json::{Map, Value};

use drover_model::{LlmResponse, Message, ToolCall};

use crate::tools::ToolExecutionResult;
use crate::types::AgentTask;

// ─── Hook events ──────────────────────────────────────────────────────────────

pub struct BeforeLlmEvent<'a> {
    pub task: &'a AgentTask,
    pub cycle_index: u32,
    pub messages: &'a [Message],
    pub tools: &'a [String],
}

pub struct AfterLlmEvent<'a> {
    pub task: &'a AgentTask,
    pub cycle_index: u32,
    pub response: &'a LlmResponse,
}

pub struct BeforeToolEvent<'a> {
    pub task: &'a AgentTask,
    pub cycle_index: u32,
    pub call: &'a ToolCall,
    pub arguments: &'a Map<String, Value>,
}

pub struct AfterToolEvent<'a> {
    pub task: &'a AgentTask,
    pub cycle_index: u32,
    pub call: &'a ToolCall,
    pub result: &'a ToolExecutionResult,
}

pub struct BeforeCompactEvent<'a> {
    pub task: &'a AgentTask,
    pub cycle_index: u32,
    pub messages: &'a [Message],
}

// ─── Hook decisions ───────────────────────────────────────────────────────────

/// Outcome of one `before_llm` hook.  Each hook returns exactly one variant;
/// the manager folds them left in registration order.
pub enum LlmHookDecision {
    Continue,
    /// Replace the run's working transcript for this cycle onward.
    PatchMessages(Vec<Message>),
    /// Override the planned tool-name list for this cycle.
    PatchTools(Vec<String>),
    /// Short-circuit the cycle and fail the run with this error.
    Abort(String),
}

/// Outcome of one `before_tool_call` hook.
pub enum ToolHookDecision {
    Continue,
    /// Rewrite the call's arguments before dispatch.
    PatchArgs(Map<String, Value>),
    /// Skip the handler entirely and use this result instead.
    ShortCircuit(ToolExecutionResult),
}

/// Merged outcome of the before-LLM fold.
pub struct BeforeLlmOutcome {
    pub messages: Option<Vec<Message>>,
    pub tools: Option<Vec<String>>,
    pub abort: Option<String>,
}

/// Merged outcome of the before-tool fold.
pub struct BeforeToolOutcome {
    pub arguments: Option<Map<String, Value>>,
    pub short_circuit: Option<ToolExecutionResult>,
}

// ─── Hook trait & manager ─────────────────────────────────────────────────────

/// Ordered pre/post interceptor around the cycle runner.  Implement any
/// subset; the defaults are no-ops.
pub trait RuntimeHook: Send + Sync {
    fn before_llm(&self, _event: &BeforeLlmEvent<'_>) -> LlmHookDecision {
        LlmHookDecision::Continue
    }

    fn after_llm(&self, _event: &AfterLlmEvent<'_>) {}

    fn before_tool_call(&self, _event: &BeforeToolEvent<'_>) -> ToolHookDecision {
        ToolHookDecision::Continue
    }

    fn after_tool_call(&self, _event: &AfterToolEvent<'_>) {}

    fn before_memory_compact(&self, _event: &BeforeCompactEvent<'_>) {}
}

/// Holds hooks in registration order and folds their decisions.
#[derive(Clone, Default)]
pub struct HookManager {
    hooks: Vec<Arc<dyn RuntimeHook>>,
}

impl HookManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, hook: Arc<dyn RuntimeHook>) {
        self.hooks.push(hook);
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Manager extended with per-run hooks appended after the base set.
    pub fn extended(&self, extra: &[Arc<dyn RuntimeHook>]) -> HookManager {
        let mut hooks = self.hooks.clone();
        hooks.extend(extra.iter().cloned());
        HookManager { hooks }
    }

    /// Fold `before_llm` over all hooks.  Later patches replace earlier ones
    /// of the same kind; each hook sees the transcript/tools as patched so
    /// far.  An abort stops the fold immediately.
    pub fn before_llm(
        &self,
        task: &AgentTask,
        cycle_index: u32,
        messages: &[Message],
        tools: &[String],
    ) -> BeforeLlmOutcome {
        let mut outcome = BeforeLlmOutcome {
            messages: None,
            tools: None,
            abort: None,
        };
        for hook in &self.hooks {
            let event = BeforeLlmEvent {
                task,
                cycle_index,
                messages: outcome.messages.as_deref().unwrap_or(messages),
                tools: outcome.tools.as_deref().unwrap_or(tools),
            };
            match hook.before_llm(&event) {
                LlmHookDecision::Continue => {}
                LlmHookDecision::PatchMessages(patched) => outcome.messages = Some(patched),
                LlmHookDecision::PatchTools(patched) => outcome.tools = Some(patched),
                LlmHookDecision::Abort(error) => {
                    outcome.abort = Some(error);
                    return outcome;
                }
            }
        }
        outcome
    }

    pub fn after_llm(&self, task: &AgentTask, cycle_index: u32, response: &LlmResponse) {
        for hook in &self.hooks {
            hook.after_llm(&AfterLlmEvent {
                task,
                cycle_index,
                response,
            });
        }
    }

    /// Fold `before_tool_call`.  A short-circuit stops the fold and skips the
    /// handler; argument patches accumulate left to right.
    pub fn before_tool_call(
        &self,
        task: &AgentTask,
        cycle_index: u32,
        call: &ToolCall,
        arguments: &Map<String, Value>,
    ) -> BeforeToolOutcome {
        let mut outcome = BeforeToolOutcome {
            arguments: None,
            short_circuit: None,
        };
        for hook in &self.hooks {
            let event = BeforeToolEvent {
                task,
                cycle_index,
                call,
                arguments: outcome.arguments.as_ref().unwrap_or(arguments),
            };
            match hook.before_tool_call(&event) {
                ToolHookDecision::Continue => {}
                ToolHookDecision::PatchArgs(patched) => outcome.arguments = Some(patched),
                ToolHookDecision::ShortCircuit(result) => {
                    outcome.short_circuit = Some(result);
                    return outcome;
                }
            }
        }
        outcome
    }

    pub fn after_tool_call(
        &self,
        task: &AgentTask,
        cycle_index: u32,
        call: &ToolCall,
        result: &ToolExecutionResult,
    ) {
        for hook in &self.hooks {
            hook.after_tool_call(&AfterToolEvent {
                task,
                cycle_index,
                call,
                result,
            });
        }
    }

    pub fn before_memory_compact(&self, task: &AgentTask, cycle_index: u32, messages: &[Message]) {
        for hook in &self.hooks {
            hook.before_memory_compact(&BeforeCompactEvent {
                task,
                cycle_index,
                messages,
            });
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
