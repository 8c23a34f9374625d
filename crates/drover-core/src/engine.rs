// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use drover_config::RuntimeConfig;
use drover_model::{LlmClient, Message};

use crate::backend::{ExecutionBackend, InlineBackend, RunState};
use crate::cancel::CancellationToken;
use crate::compact::MemoryCompactor;
use crate::context::ExecutionContext;
use crate::cycle::CycleRunner;
use crate::events::{event_names, EventSink, LogHandler};
use crate::hooks::{HookManager, RuntimeHook};
use crate::tools::ToolRegistry;
use crate::types::{
    AgentResult, AgentStatus, AgentTask, SharedState, SubTaskOutcome, SubTaskRequest,
    SubTaskRunner,
};
use crate::workspace::{LocalWorkspaceBackend, WorkspaceBackend};

/// Per-run knobs threaded by the session layer: a resumed transcript, extra
/// hooks, extra event subscribers, and the sub-task nesting depth.
#[derive(Default)]
pub struct RunOptions {
    pub initial_messages: Option<Vec<Message>>,
    pub extra_hooks: Vec<Arc<dyn RuntimeHook>>,
    pub extra_log_handlers: Vec<LogHandler>,
    pub sub_task_depth: usize,
}

/// Assembles the execution context, tool plumbing, and backend around a task
/// and drives runs to a terminal [`AgentResult`].
pub struct AgentRuntime {
    llm: Arc<dyn LlmClient>,
    registry: Arc<ToolRegistry>,
    backend: Arc<dyn ExecutionBackend>,
    hooks: HookManager,
    workspace: PathBuf,
    ws_backend: Arc<dyn WorkspaceBackend>,
    log: Option<LogHandler>,
    config: RuntimeConfig,
}

impl AgentRuntime {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        registry: ToolRegistry,
        workspace: impl Into<PathBuf>,
    ) -> Self {
        let workspace = workspace.into();
        Self {
            llm,
            registry: Arc::new(registry),
            backend: Arc::new(InlineBackend),
            hooks: HookManager::new(),
            ws_backend: Arc::new(LocalWorkspaceBackend::new(workspace.clone())),
            workspace,
            log: None,
            config: RuntimeConfig::default(),
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn ExecutionBackend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_workspace_backend(mut self, backend: Arc<dyn WorkspaceBackend>) -> Self {
        self.ws_backend = backend;
        self
    }

    /// Single-subscriber event log.  The handler is called synchronously on
    /// the run's task and must not panic.
    pub fn with_log_handler(mut self, handler: LogHandler) -> Self {
        self.log = Some(handler);
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn RuntimeHook>) -> Self {
        self.hooks.add(hook);
        self
    }

    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn backend(&self) -> &Arc<dyn ExecutionBackend> {
        &self.backend
    }

    /// Run a task to a terminal result.  Engine-fatal failures come back as
    /// a FAILED result rather than an error; the transcript and cycle records
    /// accumulated so far are always preserved in the result.
    pub async fn run(self: &Arc<Self>, task: AgentTask, ctx: ExecutionContext) -> AgentResult {
        self.run_with(task, ctx, RunOptions::default()).await
    }

    pub async fn run_with(
        self: &Arc<Self>,
        task: AgentTask,
        ctx: ExecutionContext,
        options: RunOptions,
    ) -> AgentResult {
        let mut sink = EventSink::new();
        if let Some(log) = &self.log {
            sink.push(log.clone());
        }
        for handler in &options.extra_log_handlers {
            sink.push(handler.clone());
        }

        let initial_messages = options.initial_messages.unwrap_or_else(|| {
            vec![
                Message::system(&task.system_prompt),
                Message::user(&task.user_prompt),
            ]
        });
        let mut state = RunState::new(initial_messages, SharedState::new());

        let sub_tasks: Option<Arc<dyn SubTaskRunner>> = if task.sub_agents_enabled {
            Some(Arc::new(RuntimeSubTasks {
                runtime: Arc::clone(self),
                parent: task.clone(),
                depth: options.sub_task_depth,
                cancellation: ctx.cancellation.clone(),
            }))
        } else {
            None
        };

        let runner = CycleRunner {
            llm: Arc::clone(&self.llm),
            registry: Arc::clone(&self.registry),
            hooks: self.hooks.extended(&options.extra_hooks),
            compactor: MemoryCompactor::from_config(&self.config.memory),
            sink: sink.clone(),
            task: task.clone(),
            workspace: self.workspace.clone(),
            ws_backend: Arc::clone(&self.ws_backend),
            sub_tasks,
            strict_checkpoints: self.config.strict_checkpoints,
        };

        let mut run_payload = serde_json::Map::new();
        run_payload.insert("task_id".into(), json!(task.task_id.clone()));
        run_payload.insert("model".into(), json!(task.model.clone()));
        run_payload.insert("max_cycles".into(), json!(task.max_cycles));
        if let Some(session_id) = task.metadata.get("session_id") {
            run_payload.insert("session_id".into(), session_id.clone());
        }
        sink.emit(
            event_names::RUN_STARTED,
            serde_json::Value::Object(run_payload.clone()),
        );

        let result = self
            .backend
            .execute(&task, &mut state, &runner, &ctx, task.max_cycles)
            .await;

        debug!(task_id = %task.task_id, status = ?result.status, cycles = result.cycles.len(), "run finished");

        let mut end_payload = run_payload;
        end_payload.insert("status".into(), json!(result.status));
        end_payload.insert("cycle_count".into(), json!(result.cycles.len()));
        let terminal_event = match result.status {
            AgentStatus::Completed | AgentStatus::Failed => {
                if let Some(answer) = &result.final_answer {
                    end_payload.insert("final_answer".into(), json!(answer.clone()));
                }
                if let Some(error) = &result.error {
                    end_payload.insert("error".into(), json!(error.clone()));
                }
                event_names::RUN_COMPLETED
            }
            AgentStatus::WaitUser => {
                if let Some(reason) = &result.wait_reason {
                    end_payload.insert("wait_reason".into(), json!(reason.clone()));
                }
                event_names::RUN_WAIT_USER
            }
            AgentStatus::MaxCycles => event_names::RUN_MAX_CYCLES,
            AgentStatus::Cancelled => event_names::RUN_CANCELLED,
        };
        sink.emit(terminal_event, serde_json::Value::Object(end_payload));

        // Terminal checkpoint so a store holds the finished run's outcome.
        if let Some(store) = &ctx.state_store {
            let checkpoint = crate::state::Checkpoint {
                task_id: task.task_id.clone(),
                cycle_index: result.cycles.len() as u32,
                status: result.status,
                messages: result.messages.clone(),
                cycles: result.cycles.clone(),
                shared_state: result.shared_state.clone(),
            };
            if let Err(err) = store.save_checkpoint(&checkpoint) {
                warn!(task_id = %task.task_id, "terminal checkpoint store failed: {err}");
            }
        }

        result
    }
}

// ─── Sub-task fan-out ─────────────────────────────────────────────────────────

/// [`SubTaskRunner`] backed by the runtime itself.  Children run with a fresh
/// `SharedState`, a cancellation token derived from the parent's, and no
/// interruption capability (a sub-task has no user to ask).
#[derive(Clone)]
struct RuntimeSubTasks {
    runtime: Arc<AgentRuntime>,
    parent: AgentTask,
    depth: usize,
    cancellation: Option<CancellationToken>,
}

impl RuntimeSubTasks {
    fn child_task(&self, request: &SubTaskRequest) -> AgentTask {
        let task_id = format!("sub_{}", Uuid::new_v4().simple());
        let mut task = AgentTask::new(
            task_id,
            request
                .model
                .clone()
                .unwrap_or_else(|| self.parent.model.clone()),
            format!(
                "You are a focused sub-agent working on one delegated task: {}. \
                 Complete it and finish with your result.",
                request.title
            ),
            request.prompt.clone(),
        );
        task.max_cycles = request.max_cycles.unwrap_or(self.parent.max_cycles);
        task.allow_interruption = false;
        task.use_workspace = self.parent.use_workspace;
        task.agent_type = request
            .agent_type
            .clone()
            .or_else(|| self.parent.agent_type.clone());
        task.sub_agents_enabled = self.parent.sub_agents_enabled;
        task
    }

    fn child_context(&self) -> ExecutionContext {
        let mut ctx = ExecutionContext::new();
        if let Some(token) = &self.cancellation {
            ctx.cancellation = Some(token.child());
        }
        ctx
    }
}

#[async_trait]
impl SubTaskRunner for RuntimeSubTasks {
    async fn run_sub_task(&self, request: SubTaskRequest) -> SubTaskOutcome {
        let max_depth = self.runtime.config.backend.max_sub_task_depth;
        if self.depth + 1 >= max_depth {
            return SubTaskOutcome {
                task_id: String::new(),
                status: AgentStatus::Failed,
                final_answer: None,
                error: Some(format!("maximum sub-task depth ({max_depth}) reached")),
            };
        }

        let task = self.child_task(&request);
        let task_id = task.task_id.clone();
        debug!(task_id = %task_id, title = %request.title, depth = self.depth + 1, "spawning sub-task");
        let result = self
            .runtime
            .run_with(
                task,
                self.child_context(),
                RunOptions {
                    sub_task_depth: self.depth + 1,
                    ..RunOptions::default()
                },
            )
            .await;
        SubTaskOutcome {
            task_id,
            status: result.status,
            final_answer: result.final_answer,
            error: result.error,
        }
    }

    async fn run_batch(&self, requests: Vec<SubTaskRequest>) -> Vec<SubTaskOutcome> {
        let jobs: Vec<BoxFuture<'static, SubTaskOutcome>> = requests
            .into_iter()
            .map(|request| {
                let runner = self.clone();
                async move { runner.run_sub_task(request).await }.boxed()
            })
            .collect();
        self.runtime.backend.parallel_map(jobs).await
    }
}
