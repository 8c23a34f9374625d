// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use drover_model::{LlmResponse, Message, TokenUsage, ToolCall};

use crate::tools::ToolExecutionResult;

// ─── Task ─────────────────────────────────────────────────────────────────────

/// Everything the engine needs to drive one run.  Immutable once the run
/// starts; capability flags feed the tool planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTask {
    pub task_id: String,
    pub model: String,
    pub system_prompt: String,
    pub user_prompt: String,
    #[serde(default = "default_max_cycles")]
    pub max_cycles: u32,
    #[serde(default = "default_true")]
    pub allow_interruption: bool,
    #[serde(default = "default_true")]
    pub use_workspace: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,
    #[serde(default)]
    pub sub_agents_enabled: bool,
    #[serde(default)]
    pub native_multimodal: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_tool_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_threshold_percentage: Option<u8>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

fn default_max_cycles() -> u32 {
    drover_config::RuntimeConfig::default().default_max_cycles
}

fn default_true() -> bool {
    true
}

impl AgentTask {
    pub fn new(
        task_id: impl Into<String>,
        model: impl Into<String>,
        system_prompt: impl Into<String>,
        user_prompt: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            model: model.into(),
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
            max_cycles: default_max_cycles(),
            allow_interruption: true,
            use_workspace: true,
            agent_type: None,
            sub_agents_enabled: false,
            native_multimodal: false,
            extra_tool_names: Vec::new(),
            exclude_tools: Vec::new(),
            memory_threshold_percentage: None,
            metadata: Map::new(),
        }
    }

    pub fn with_max_cycles(mut self, max_cycles: u32) -> Self {
        self.max_cycles = max_cycles;
        self
    }

    pub fn with_agent_type(mut self, agent_type: impl Into<String>) -> Self {
        self.agent_type = Some(agent_type.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

// ─── Status & result ──────────────────────────────────────────────────────────

/// Terminal states plus the WAIT_USER suspend state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentStatus {
    Completed,
    WaitUser,
    Failed,
    MaxCycles,
    Cancelled,
}

impl AgentStatus {
    /// WAIT_USER is a suspend state; everything else ends the run for good.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AgentStatus::WaitUser)
    }
}

/// The outcome of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub status: AgentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub messages: Vec<Message>,
    pub cycles: Vec<CycleRecord>,
    #[serde(default)]
    pub shared_state: Map<String, Value>,
    #[serde(default)]
    pub token_usage: TokenUsage,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub todo_list: Vec<TodoItem>,
}

impl AgentResult {
    /// Assemble a result from the run's final state.  Token usage is summed
    /// from the recorded cycles; the todo list is read out of shared state.
    pub fn from_state(
        status: AgentStatus,
        messages: Vec<Message>,
        cycles: Vec<CycleRecord>,
        shared_state: &SharedState,
    ) -> Self {
        let token_usage = summarize_token_usage(&cycles);
        let todo_list = shared_state.todo_list();
        Self {
            status,
            final_answer: None,
            wait_reason: None,
            error: None,
            messages,
            cycles,
            shared_state: shared_state.snapshot(),
            token_usage,
            todo_list,
        }
    }

    pub fn with_final_answer(mut self, answer: impl Into<String>) -> Self {
        self.final_answer = Some(answer.into());
        self
    }

    pub fn with_wait_reason(mut self, reason: impl Into<String>) -> Self {
        self.wait_reason = Some(reason.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Sum per-cycle usage into a run total.
pub fn summarize_token_usage(cycles: &[CycleRecord]) -> TokenUsage {
    let mut total = TokenUsage::default();
    for cycle in cycles {
        total.add(&cycle.token_usage);
    }
    total
}

// ─── Cycle record ─────────────────────────────────────────────────────────────

/// Immutable record of one cycle: what the model said, which tools ran, and
/// what they produced.  Appended during a run, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleRecord {
    pub index: u32,
    pub llm_response: LlmResponse,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub tool_results: Vec<ToolExecutionResult>,
    #[serde(default)]
    pub token_usage: TokenUsage,
    #[serde(default)]
    pub elapsed_ms: u64,
    #[serde(default)]
    pub events: Vec<String>,
}

// ─── Shared state ─────────────────────────────────────────────────────────────

/// Well-known shared-state keys.  Anything else is opaque to the engine.
pub const KEY_TODO_LIST: &str = "todo_list";
pub const KEY_MEMORY_NOTES: &str = "memory_notes";

/// Per-run mutable key/value map threaded through every tool context and hook
/// of one run.  Created by the runtime, discarded at run end unless
/// checkpointed.  Only the run's own task mutates it; the handle is still
/// `Send` so sub-task plumbing can move it across awaits.
#[derive(Clone, Default)]
pub struct SharedState {
    inner: Arc<Mutex<Map<String, Value>>>,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: Map<String, Value>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(map)),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.lock().insert(key.into(), value);
    }

    /// Run `f` against the underlying map under the lock.
    pub fn with<R>(&self, f: impl FnOnce(&mut Map<String, Value>) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn snapshot(&self) -> Map<String, Value> {
        self.lock().clone()
    }

    /// Deserialize the todo list, tolerating items written by hand (a missing
    /// `status` defaults to pending).  A missing or garbled list reads as
    /// empty.
    pub fn todo_list(&self) -> Vec<TodoItem> {
        match self.get(KEY_TODO_LIST) {
            Some(value) => serde_json::from_value(value).unwrap_or_default(),
            None => Vec::new(),
        }
    }

    pub fn set_todo_list(&self, items: &[TodoItem]) {
        let value = serde_json::to_value(items).unwrap_or(Value::Array(Vec::new()));
        self.set(KEY_TODO_LIST, value);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Map<String, Value>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for SharedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SharedState({} keys)", self.lock().len())
    }
}

// ─── Todo items ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

/// One entry in the run's todo list, stored under [`KEY_TODO_LIST`].
///
/// `done` is a derived convenience flag kept in the serialized form so that
/// externally written items (`{"title": ..., "done": false}`) gate
/// `task_finish` the same way tool-written ones do.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoItem {
    pub title: String,
    #[serde(default)]
    pub status: TodoStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(default)]
    pub done: bool,
}

impl TodoItem {
    pub fn new(title: impl Into<String>, status: TodoStatus) -> Self {
        Self {
            title: title.into(),
            status,
            priority: None,
            done: matches!(status, TodoStatus::Completed | TodoStatus::Cancelled),
        }
    }

    pub fn is_done(&self) -> bool {
        self.done || matches!(self.status, TodoStatus::Completed | TodoStatus::Cancelled)
    }
}

// ─── Sub-tasks ────────────────────────────────────────────────────────────────

/// A child run requested from inside a cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubTaskRequest {
    pub title: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cycles: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,
}

/// What came back from a child run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubTaskOutcome {
    pub task_id: String,
    pub status: AgentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Runs child tasks on behalf of the sub-task tools.  Each child gets its own
/// `SharedState`; the batch form joins outcomes in input order.
#[async_trait]
pub trait SubTaskRunner: Send + Sync {
    async fn run_sub_task(&self, request: SubTaskRequest) -> SubTaskOutcome;
    async fn run_batch(&self, requests: Vec<SubTaskRequest>) -> Vec<SubTaskOutcome>;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
