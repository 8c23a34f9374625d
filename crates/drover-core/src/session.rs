// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use drover_model::{Message, Role, StreamCallback};

use crate::cancel::CancellationToken;
use crate::context::ExecutionContext;
use crate::engine::{AgentRuntime, RunOptions};
use crate::events::{event_names, LogHandler};
use crate::hooks::{BeforeLlmEvent, LlmHookDecision, RuntimeHook};
use crate::prompt::{build_system_prompt, PromptOptions};
use crate::state::StateStore;
use crate::types::{AgentResult, AgentStatus, AgentTask};

/// Per-session agent shape: the stable half of every task the session builds.
#[derive(Debug, Clone)]
pub struct AgentDefinition {
    /// Agent persona and instructions; becomes the `<Agent Definition>`
    /// section of the composed system prompt.
    pub description: String,
    pub model: String,
    pub max_cycles: u32,
    pub allow_interruption: bool,
    pub use_workspace: bool,
    pub enable_todo_management: bool,
    pub agent_type: Option<String>,
    pub sub_agents_enabled: bool,
    pub native_multimodal: bool,
}

impl AgentDefinition {
    pub fn new(description: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            model: model.into(),
            max_cycles: drover_config::RuntimeConfig::default().default_max_cycles,
            allow_interruption: true,
            use_workspace: true,
            enable_todo_management: true,
            agent_type: None,
            sub_agents_enabled: false,
            native_multimodal: false,
        }
    }
}

/// One completed (or suspended) run within a session.
#[derive(Debug, Clone, Serialize)]
pub struct AgentRun {
    pub session_id: String,
    pub task_id: String,
    pub result: AgentResult,
}

struct LastRun {
    status: Option<AgentStatus>,
    result: Option<AgentResult>,
}

struct SessionInner {
    id: String,
    runtime: Arc<AgentRuntime>,
    definition: AgentDefinition,
    transcript: Mutex<Vec<Message>>,
    steer_queue: Arc<Mutex<VecDeque<String>>>,
    follow_up_queue: Mutex<VecDeque<String>>,
    subscribers: Arc<Mutex<Vec<LogHandler>>>,
    last: Mutex<LastRun>,
    active_cancel: Mutex<Option<CancellationToken>>,
    running: AtomicBool,
    stream: Mutex<Option<StreamCallback>>,
    state_store: Mutex<Option<Arc<dyn StateStore>>>,
}

/// A durable, steerable conversation over the runtime.
///
/// The session owns the message transcript across runs.  `steer` enqueues
/// mid-run user redirections (consumed at the top of the next cycle, before
/// its model call); `follow_up` enqueues prompts that run automatically after
/// a completed run.  Producers may call either from any thread while a run is
/// in flight.  Cloning is cheap and shares the session.
#[derive(Clone)]
pub struct AgentSession {
    inner: Arc<SessionInner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Drains queued steers into the transcript right before each model call.
struct SteerInjector {
    queue: Arc<Mutex<VecDeque<String>>>,
}

impl RuntimeHook for SteerInjector {
    fn before_llm(&self, event: &BeforeLlmEvent<'_>) -> LlmHookDecision {
        let drained: Vec<String> = lock(&self.queue).drain(..).collect();
        if drained.is_empty() {
            return LlmHookDecision::Continue;
        }
        let mut messages = event.messages.to_vec();
        messages.extend(drained.into_iter().map(Message::user));
        LlmHookDecision::PatchMessages(messages)
    }
}

impl AgentSession {
    pub fn new(runtime: Arc<AgentRuntime>, definition: AgentDefinition) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id: format!("session_{}", Uuid::new_v4().simple()),
                runtime,
                definition,
                transcript: Mutex::new(Vec::new()),
                steer_queue: Arc::new(Mutex::new(VecDeque::new())),
                follow_up_queue: Mutex::new(VecDeque::new()),
                subscribers: Arc::new(Mutex::new(Vec::new())),
                last: Mutex::new(LastRun {
                    status: None,
                    result: None,
                }),
                active_cancel: Mutex::new(None),
                running: AtomicBool::new(false),
                stream: Mutex::new(None),
                state_store: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Streaming sink applied to every subsequent run.
    pub fn set_stream_callback(&self, stream: StreamCallback) {
        *lock(&self.inner.stream) = Some(stream);
    }

    /// Checkpoint store applied to every subsequent run.
    pub fn set_state_store(&self, store: Arc<dyn StateStore>) {
        *lock(&self.inner.state_store) = Some(store);
    }

    /// Subscribe to every event the runtime emits during this session's
    /// prompts, plus the session_* lifecycle events.  Handlers run
    /// synchronously in subscription order and must not panic.
    pub fn subscribe(&self, handler: LogHandler) {
        lock(&self.inner.subscribers).push(handler);
    }

    /// Enqueue a user-role redirection for the in-flight (or next) run.
    pub fn steer(&self, text: impl Into<String>) {
        let text = text.into();
        lock(&self.inner.steer_queue).push_back(text.clone());
        self.emit_session(
            event_names::SESSION_STEER_QUEUED,
            json!({"session_id": self.inner.id.clone(), "text": text}),
        );
    }

    /// Enqueue a prompt that runs automatically after the current run
    /// completes successfully.
    pub fn follow_up(&self, text: impl Into<String>) {
        let text = text.into();
        lock(&self.inner.follow_up_queue).push_back(text.clone());
        self.emit_session(
            event_names::SESSION_FOLLOW_UP_QUEUED,
            json!({"session_id": self.inner.id.clone(), "text": text}),
        );
    }

    /// Trip the active run's cancellation token.  A no-op when idle.
    pub fn cancel(&self) {
        if let Some(token) = lock(&self.inner.active_cancel).as_ref() {
            token.cancel();
        }
    }

    pub fn last_status(&self) -> Option<AgentStatus> {
        lock(&self.inner.last).status
    }

    pub fn last_result(&self) -> Option<AgentResult> {
        lock(&self.inner.last).result.clone()
    }

    pub fn transcript(&self) -> Vec<Message> {
        lock(&self.inner.transcript).clone()
    }

    /// Run one prompt (plus queued steers) to completion.  On a COMPLETED
    /// run with `auto_follow_up`, queued follow-ups run afterwards in FIFO
    /// order against the same transcript; the returned run is the one for
    /// `text` itself.
    pub async fn prompt(
        &self,
        text: impl Into<String>,
        auto_follow_up: bool,
    ) -> anyhow::Result<AgentRun> {
        let _guard = self.begin()?;
        let first = self.run_once(&text.into()).await;

        if auto_follow_up {
            let mut status = first.result.status;
            while status == AgentStatus::Completed {
                let Some(next) = lock(&self.inner.follow_up_queue).pop_front() else {
                    break;
                };
                debug!(session_id = %self.inner.id, "running queued follow-up");
                status = self.run_once(&next).await.result.status;
            }
        }
        Ok(first)
    }

    /// Run a prompt off the caller task.  The session stays steerable and
    /// cancellable from the caller while the run executes.
    pub fn prompt_async(
        &self,
        text: impl Into<String>,
    ) -> tokio::task::JoinHandle<anyhow::Result<AgentRun>> {
        let session = self.clone();
        let text = text.into();
        tokio::spawn(async move { session.prompt(text, true).await })
    }

    /// Resume after WAIT_USER: synthesize the pending tool answer(s) from the
    /// user's reply, append the reply as a user message, and run again.
    pub async fn continue_run(&self, reply: impl Into<String>) -> anyhow::Result<AgentRun> {
        let reply = reply.into();
        anyhow::ensure!(
            self.last_status() == Some(AgentStatus::WaitUser),
            "continue_run is only valid while the session is waiting for the user"
        );

        {
            let mut transcript = lock(&self.inner.transcript);
            let Some(pos) = transcript
                .iter()
                .rposition(|m| m.role == Role::Assistant && !m.tool_calls.is_empty())
            else {
                anyhow::bail!("no pending tool call found to answer");
            };
            let calls = transcript[pos].tool_calls.clone();
            let tail = &transcript[pos + 1..];
            let unanswered: Vec<_> = calls
                .iter()
                .filter(|call| {
                    !tail.iter().any(|m| {
                        m.role == Role::Tool && m.tool_call_id.as_deref() == Some(&call.id)
                    })
                })
                .cloned()
                .collect();
            // Every unanswered id belongs to the suspending tool: the run
            // dispatched the whole batch and only withheld the waiting
            // result(s).
            for call in unanswered {
                transcript.push(Message::tool_result(
                    call.id,
                    json!({"user_reply": reply.clone()}).to_string(),
                ));
            }
        }
        lock(&self.inner.last).status = None;

        self.prompt(reply, true).await
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    fn begin(&self) -> anyhow::Result<RunGuard<'_>> {
        if self
            .inner
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            anyhow::bail!("a run is already in progress on this session");
        }
        Ok(RunGuard { flag: &self.inner.running })
    }

    async fn run_once(&self, text: &str) -> AgentRun {
        let inner = &self.inner;
        let definition = &inner.definition;
        let task_id = format!("{}_{}", inner.id, &Uuid::new_v4().simple().to_string()[..8]);

        let system_prompt = build_system_prompt(
            &definition.description,
            &PromptOptions {
                allow_interruption: definition.allow_interruption,
                use_workspace: definition.use_workspace,
                enable_todo_management: definition.enable_todo_management,
                agent_type: definition.agent_type.clone(),
                current_time_utc: None,
            },
        );

        let mut task = AgentTask::new(
            task_id.clone(),
            definition.model.clone(),
            system_prompt.clone(),
            text,
        );
        task.max_cycles = definition.max_cycles;
        task.allow_interruption = definition.allow_interruption;
        task.use_workspace = definition.use_workspace;
        task.agent_type = definition.agent_type.clone();
        task.sub_agents_enabled = definition.sub_agents_enabled;
        task.native_multimodal = definition.native_multimodal;
        task.metadata
            .insert("session_id".into(), json!(inner.id.clone()));

        let mut messages = lock(&inner.transcript).clone();
        if messages.is_empty() {
            messages.push(Message::system(&system_prompt));
        }
        messages.push(Message::user(text));

        let token = CancellationToken::new();
        *lock(&inner.active_cancel) = Some(token.clone());
        let mut ctx = ExecutionContext::new().with_cancellation(token);
        if let Some(stream) = lock(&inner.stream).clone() {
            ctx.stream = Some(stream);
        }
        if let Some(store) = lock(&inner.state_store).clone() {
            ctx.state_store = Some(store);
        }

        let subscribers = Arc::clone(&inner.subscribers);
        let forward: LogHandler = Arc::new(move |name, payload| {
            let handlers = lock(&subscribers).clone();
            for handler in handlers {
                handler(name, payload);
            }
        });

        self.emit_session(
            event_names::SESSION_RUN_START,
            json!({"session_id": inner.id.clone(), "task_id": task_id.clone()}),
        );

        let result = inner
            .runtime
            .run_with(
                task,
                ctx,
                RunOptions {
                    initial_messages: Some(messages),
                    extra_hooks: vec![Arc::new(SteerInjector {
                        queue: Arc::clone(&inner.steer_queue),
                    })],
                    extra_log_handlers: vec![forward],
                    sub_task_depth: 0,
                },
            )
            .await;

        *lock(&inner.active_cancel) = None;
        *lock(&inner.transcript) = result.messages.clone();
        {
            let mut last = lock(&inner.last);
            last.status = Some(result.status);
            last.result = Some(result.clone());
        }

        self.emit_session(
            event_names::SESSION_RUN_END,
            json!({
                "session_id": inner.id.clone(),
                "task_id": task_id.clone(),
                "status": result.status,
            }),
        );

        AgentRun {
            session_id: inner.id.clone(),
            task_id,
            result,
        }
    }

    fn emit_session(&self, name: &str, payload: serde_json::Value) {
        let handlers = lock(&self.inner.subscribers).clone();
        for handler in handlers {
            handler(name, &payload);
        }
    }
}

struct RunGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use drover_model::ScriptedLlm;

    use crate::tools::builtin::register_defaults;
    use crate::tools::ToolRegistry;

    use super::*;

    fn session_with(llm: ScriptedLlm) -> AgentSession {
        let mut registry = ToolRegistry::new();
        register_defaults(&mut registry).unwrap();
        let runtime = Arc::new(AgentRuntime::new(
            Arc::new(llm),
            registry,
            std::env::temp_dir(),
        ));
        AgentSession::new(runtime, AgentDefinition::new("test agent", "scripted"))
    }

    #[test]
    fn queue_events_fire_synchronously() {
        let session = session_with(ScriptedLlm::always_text("ok"));
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        session.subscribe(Arc::new(move |name, _: &Value| {
            sink.lock().unwrap().push(name.to_string())
        }));
        session.steer("left");
        session.follow_up("then this");
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["session_steer_queued", "session_follow_up_queued"]
        );
    }

    #[test]
    fn cancel_without_active_run_is_a_noop() {
        let session = session_with(ScriptedLlm::always_text("ok"));
        session.cancel();
        assert!(session.last_status().is_none());
    }

    #[tokio::test]
    async fn continue_run_requires_wait_user() {
        let session = session_with(ScriptedLlm::always_text("ok"));
        let err = session.continue_run("hello").await.unwrap_err();
        assert!(err.to_string().contains("waiting for the user"));
    }

    #[tokio::test]
    async fn concurrent_prompt_is_rejected() {
        let session = session_with(ScriptedLlm::always_text("ok"));
        let _guard = session.begin().unwrap();
        let err = session.prompt("hi", true).await.unwrap_err();
        assert!(err.to_string().contains("already in progress"));
    }

    #[test]
    fn sessions_have_unique_ids() {
        let a = session_with(ScriptedLlm::always_text("x"));
        let b = session_with(ScriptedLlm::always_text("x"));
        assert_ne!(a.id(), b.id());
    }
}
