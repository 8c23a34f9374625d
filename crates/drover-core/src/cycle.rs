// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use drover_model::{LlmClient, Message};

use crate::backend::{CycleStep, RunState};
use crate::compact::MemoryCompactor;
use crate::context::ExecutionContext;
use crate::events::{event_names, EventSink};
use crate::hooks::HookManager;
use crate::planner::plan_tool_names;
use crate::state::Checkpoint;
use crate::tools::{
    dispatch_tool_call, ToolContext, ToolDirective, ToolExecutionResult, ToolRegistry,
};
use crate::types::{AgentResult, AgentStatus, AgentTask, CycleRecord, SubTaskRunner};
use crate::workspace::WorkspaceBackend;

/// Characters of model output quoted in `cycle_llm_response` payloads.
const CONTENT_PREVIEW_CHARS: usize = 120;

/// Executes single cycles: plan → model call → parse → dispatch → record.
///
/// One instance serves one run; the backend drives it once per cycle and owns
/// the loop.
pub(crate) struct CycleRunner {
    pub llm: Arc<dyn LlmClient>,
    pub registry: Arc<ToolRegistry>,
    pub hooks: HookManager,
    pub compactor: MemoryCompactor,
    pub sink: EventSink,
    pub task: AgentTask,
    pub workspace: PathBuf,
    pub ws_backend: Arc<dyn WorkspaceBackend>,
    pub sub_tasks: Option<Arc<dyn SubTaskRunner>>,
    pub strict_checkpoints: bool,
}

/// Per-cycle event log: forwards to the sink and keeps the names for the
/// cycle record.
struct CycleEvents<'a> {
    sink: &'a EventSink,
    names: Vec<String>,
}

impl<'a> CycleEvents<'a> {
    fn new(sink: &'a EventSink) -> Self {
        Self {
            sink,
            names: Vec::new(),
        }
    }

    fn emit(&mut self, name: &str, payload: Value) {
        self.sink.emit(name, payload);
        self.names.push(name.to_string());
    }
}

impl CycleRunner {
    fn payload(&self, cycle_index: u32, mut extra: serde_json::Map<String, Value>) -> Value {
        extra.insert("task_id".into(), json!(self.task.task_id.clone()));
        extra.insert("cycle_index".into(), json!(cycle_index));
        if let Some(session_id) = self.task.metadata.get("session_id") {
            extra.insert("session_id".into(), session_id.clone());
        }
        Value::Object(extra)
    }

    fn check_cancelled(&self, ctx: &ExecutionContext) -> anyhow::Result<()> {
        ctx.check_cancelled()?;
        Ok(())
    }

    fn tool_context(&self, state: &RunState, cycle_index: u32, ctx: &ExecutionContext) -> ToolContext {
        ToolContext {
            workspace: self.workspace.clone(),
            shared_state: state.shared_state.clone(),
            cycle_index,
            backend: Arc::clone(&self.ws_backend),
            exec: ctx.clone(),
            sub_tasks: self.sub_tasks.clone(),
        }
    }

    /// Best-effort checkpoint at a cycle boundary.  An in-flight boundary is
    /// recorded as WAIT_USER (the resumable state); a failing store is fatal
    /// only under strict checkpointing.
    fn persist_checkpoint(
        &self,
        ctx: &ExecutionContext,
        state: &RunState,
        cycle_index: u32,
        status: AgentStatus,
    ) -> anyhow::Result<()> {
        let Some(store) = &ctx.state_store else {
            return Ok(());
        };
        let checkpoint = Checkpoint {
            task_id: self.task.task_id.clone(),
            cycle_index,
            status,
            messages: state.messages.clone(),
            cycles: state.cycles.clone(),
            shared_state: state.shared_state.snapshot(),
        };
        match store.save_checkpoint(&checkpoint) {
            Ok(()) => Ok(()),
            Err(err) if self.strict_checkpoints => {
                Err(err).context("checkpoint persistence failed")
            }
            Err(err) => {
                warn!(task_id = %self.task.task_id, cycle_index, "checkpoint store failed: {err}");
                Ok(())
            }
        }
    }

    fn finish_cycle(
        &self,
        ctx: &ExecutionContext,
        state: &mut RunState,
        record: CycleRecord,
        events: &mut CycleEvents<'_>,
        elapsed_ms: u64,
        terminal: Option<&AgentStatus>,
    ) -> anyhow::Result<()> {
        let cycle_index = record.index;
        events.emit(
            event_names::CYCLE_COMPLETED,
            self.payload(
                cycle_index,
                serde_json::Map::from_iter([("duration_ms".to_string(), json!(elapsed_ms))]),
            ),
        );
        let mut record = record;
        record.events = events.names.clone();
        state.cycles.push(record);
        let status = terminal.copied().unwrap_or(AgentStatus::WaitUser);
        self.persist_checkpoint(ctx, state, cycle_index, status)
    }
}

#[async_trait]
impl CycleStep for CycleRunner {
    async fn step(
        &self,
        cycle_index: u32,
        state: &mut RunState,
        ctx: &ExecutionContext,
    ) -> anyhow::Result<Option<AgentResult>> {
        let task = &self.task;
        let started = Instant::now();
        let mut events = CycleEvents::new(&self.sink);

        self.check_cancelled(ctx)?;

        // Pre-LLM hooks run against the planner's proposal; a tools patch
        // overrides it, a messages patch rewrites the working transcript, an
        // abort fails the run.
        let usage = self.compactor.usage_percentage(&state.messages);
        let planned = plan_tool_names(task, Some(usage));
        let hook_outcome = self.hooks.before_llm(task, cycle_index, &state.messages, &planned);
        if let Some(error) = hook_outcome.abort {
            events.emit(
                event_names::CYCLE_FAILED,
                self.payload(
                    cycle_index,
                    serde_json::Map::from_iter([("error".to_string(), json!(error.clone()))]),
                ),
            );
            return Ok(Some(
                AgentResult::from_state(
                    AgentStatus::Failed,
                    state.messages.clone(),
                    state.cycles.clone(),
                    &state.shared_state,
                )
                .with_error(error),
            ));
        }
        if let Some(patched) = hook_outcome.messages {
            state.messages = patched;
        }
        let tool_names = hook_outcome.tools.unwrap_or(planned);

        self.hooks.before_memory_compact(task, cycle_index, &state.messages);
        let before_len = state.messages.len();
        let (compacted, did_compact) = self.compactor.compact(&state.messages);
        state.messages = compacted;
        if did_compact {
            events.emit(
                event_names::MEMORY_COMPACTED,
                self.payload(
                    cycle_index,
                    serde_json::Map::from_iter([
                        ("messages_before".to_string(), json!(before_len)),
                        ("messages_after".to_string(), json!(state.messages.len())),
                    ]),
                ),
            );
        }

        events.emit(
            event_names::CYCLE_STARTED,
            self.payload(cycle_index, serde_json::Map::new()),
        );

        let available: Vec<String> = tool_names
            .into_iter()
            .filter(|name| self.registry.has_tool(name) && self.registry.has_schema(name))
            .collect();
        let schemas = self.registry.schemas_for(&available);

        self.check_cancelled(ctx)?;
        let response = match self
            .llm
            .complete(&task.model, &state.messages, &schemas, ctx.stream.as_ref())
            .await
        {
            Ok(response) => response,
            Err(err) => {
                events.emit(
                    event_names::CYCLE_FAILED,
                    self.payload(
                        cycle_index,
                        serde_json::Map::from_iter([
                            ("error".to_string(), json!(err.to_string())),
                        ]),
                    ),
                );
                return Err(err).context("model completion failed");
            }
        };
        self.check_cancelled(ctx)?;

        self.hooks.after_llm(task, cycle_index, &response);
        let preview: String = response.content.chars().take(CONTENT_PREVIEW_CHARS).collect();
        events.emit(
            event_names::CYCLE_LLM_RESPONSE,
            self.payload(
                cycle_index,
                serde_json::Map::from_iter([
                    ("content_preview".to_string(), json!(preview)),
                    ("tool_call_count".to_string(), json!(response.tool_calls.len())),
                ]),
            ),
        );

        state.messages.push(Message::assistant_with_tool_calls(
            response.content.clone(),
            response.tool_calls.clone(),
        ));

        let token_usage = response.token_usage.unwrap_or_default();

        // Text-only response: the content is the final answer.
        if response.tool_calls.is_empty() {
            let elapsed_ms = started.elapsed().as_millis() as u64;
            let record = CycleRecord {
                index: cycle_index,
                llm_response: response.clone(),
                tool_calls: Vec::new(),
                tool_results: Vec::new(),
                token_usage,
                elapsed_ms,
                events: Vec::new(),
            };
            self.finish_cycle(
                ctx,
                state,
                record,
                &mut events,
                elapsed_ms,
                Some(&AgentStatus::Completed),
            )?;
            return Ok(Some(
                AgentResult::from_state(
                    AgentStatus::Completed,
                    state.messages.clone(),
                    state.cycles.clone(),
                    &state.shared_state,
                )
                .with_final_answer(response.content),
            ));
        }

        // Tool dispatch follows the model's emitted order so result ids pair
        // deterministically with the assistant's tool_calls entry.
        let tool_ctx = self.tool_context(state, cycle_index, ctx);
        let mut tool_results: Vec<ToolExecutionResult> = Vec::with_capacity(response.tool_calls.len());
        let mut finish_result: Option<ToolExecutionResult> = None;
        let mut wait_result: Option<ToolExecutionResult> = None;

        for call in &response.tool_calls {
            self.check_cancelled(ctx)?;
            events.emit(
                event_names::TOOL_CALLED,
                self.payload(
                    cycle_index,
                    serde_json::Map::from_iter([
                        ("tool_name".to_string(), json!(call.name.clone())),
                        ("tool_call_id".to_string(), json!(call.id.clone())),
                    ]),
                ),
            );

            let hook_args = call.arguments.as_object().cloned().unwrap_or_default();
            let tool_outcome = self.hooks.before_tool_call(task, cycle_index, call, &hook_args);
            let dispatch_started = Instant::now();
            let result = match tool_outcome.short_circuit {
                Some(mut result) => {
                    if result.tool_call_id.is_empty() {
                        result.tool_call_id = call.id.clone();
                    }
                    result
                }
                None => {
                    let mut effective = call.clone();
                    if let Some(patched) = tool_outcome.arguments {
                        effective.arguments = Value::Object(patched);
                    }
                    dispatch_tool_call(&self.registry, &tool_ctx, &effective).await
                }
            };
            self.hooks.after_tool_call(task, cycle_index, call, &result);

            events.emit(
                event_names::TOOL_RESULT,
                self.payload(
                    cycle_index,
                    serde_json::Map::from_iter([
                        ("tool_name".to_string(), json!(call.name.clone())),
                        ("tool_call_id".to_string(), json!(result.tool_call_id.clone())),
                        ("status_code".to_string(), json!(result.status_code)),
                        (
                            "duration_ms".to_string(),
                            json!(dispatch_started.elapsed().as_millis() as u64),
                        ),
                    ]),
                ),
            );

            // A suspending tool's answer is not final yet: its transcript
            // message is synthesized by the session when the user replies.
            if result.directive != ToolDirective::WaitUser {
                state.messages.push(Message::tool_result(
                    result.tool_call_id.clone(),
                    result.content.clone(),
                ));
            }

            match result.directive {
                ToolDirective::Finish => {
                    if finish_result.is_none() {
                        finish_result = Some(result.clone());
                    }
                }
                ToolDirective::WaitUser => {
                    if wait_result.is_none() {
                        wait_result = Some(result.clone());
                    }
                }
                ToolDirective::None => {}
            }
            tool_results.push(result);
            self.check_cancelled(ctx)?;
        }

        debug!(
            cycle_index,
            tools = tool_results.len(),
            "cycle tool dispatch complete"
        );

        let elapsed_ms = started.elapsed().as_millis() as u64;
        // FINISH outranks WAIT_USER when one batch carries both.
        let terminal_status = if finish_result.is_some() {
            Some(AgentStatus::Completed)
        } else if wait_result.is_some() {
            Some(AgentStatus::WaitUser)
        } else {
            None
        };
        let record = CycleRecord {
            index: cycle_index,
            llm_response: response.clone(),
            tool_calls: response.tool_calls.clone(),
            tool_results,
            token_usage,
            elapsed_ms,
            events: Vec::new(),
        };
        self.finish_cycle(
            ctx,
            state,
            record,
            &mut events,
            elapsed_ms,
            terminal_status.as_ref(),
        )?;

        if let Some(finish) = finish_result {
            let answer = finish
                .metadata
                .get("message")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| finish.content.clone());
            return Ok(Some(
                AgentResult::from_state(
                    AgentStatus::Completed,
                    state.messages.clone(),
                    state.cycles.clone(),
                    &state.shared_state,
                )
                .with_final_answer(answer),
            ));
        }
        if let Some(wait) = wait_result {
            let reason = wait
                .metadata
                .get("question")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| wait.content.clone());
            return Ok(Some(
                AgentResult::from_state(
                    AgentStatus::WaitUser,
                    state.messages.clone(),
                    state.cycles.clone(),
                    &state.shared_state,
                )
                .with_wait_reason(reason),
            ));
        }

        Ok(None)
    }
}

