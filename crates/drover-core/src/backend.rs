// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::StreamExt;
use tokio::task::JoinHandle;

use drover_model::Message;

use crate::cancel::CancelledError;
use crate::context::ExecutionContext;
use crate::types::{AgentResult, AgentStatus, AgentTask, CycleRecord, SharedState, SubTaskOutcome};

/// Final answer reported when the cycle budget runs out without a finish
/// signal.
const MAX_CYCLES_ANSWER: &str = "Reached max cycles without finish signal.";

/// Mutable state of one run, owned by the driving task.
pub struct RunState {
    pub messages: Vec<Message>,
    pub cycles: Vec<CycleRecord>,
    pub shared_state: SharedState,
}

impl RunState {
    pub fn new(messages: Vec<Message>, shared_state: SharedState) -> Self {
        Self {
            messages,
            cycles: Vec::new(),
            shared_state,
        }
    }

    fn result(&self, status: AgentStatus) -> AgentResult {
        AgentResult::from_state(
            status,
            self.messages.clone(),
            self.cycles.clone(),
            &self.shared_state,
        )
    }
}

/// Advances a run by one cycle.
///
/// `Ok(None)` means "keep going"; `Ok(Some(result))` is a terminal outcome;
/// `Err` is an engine-fatal failure (the backend maps a [`CancelledError`]
/// to CANCELLED and anything else to FAILED).
#[async_trait]
pub trait CycleStep: Send + Sync {
    async fn step(
        &self,
        cycle_index: u32,
        state: &mut RunState,
        ctx: &ExecutionContext,
    ) -> anyhow::Result<Option<AgentResult>>;
}

/// Drives the cycle loop and fans sub-tasks out.
///
/// Backends never interpret tool results themselves; everything inside a
/// cycle belongs to the injected [`CycleStep`].  Cycles within one run are
/// sequential in every backend — parallelism exists only in `parallel_map`
/// and in spawning whole runs off the caller task.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    async fn execute(
        &self,
        task: &AgentTask,
        state: &mut RunState,
        runner: &dyn CycleStep,
        ctx: &ExecutionContext,
        max_cycles: u32,
    ) -> AgentResult;

    /// Run independent sub-task jobs and join their outcomes in input order.
    async fn parallel_map(
        &self,
        jobs: Vec<BoxFuture<'static, SubTaskOutcome>>,
    ) -> Vec<SubTaskOutcome>;
}

/// Shared cycle loop: cancellation check, step, terminal classification.
async fn drive_cycles(
    state: &mut RunState,
    runner: &dyn CycleStep,
    ctx: &ExecutionContext,
    max_cycles: u32,
) -> AgentResult {
    for cycle_index in 1..=max_cycles {
        if ctx.check_cancelled().is_err() {
            return state
                .result(AgentStatus::Cancelled)
                .with_error(CancelledError.to_string());
        }

        match runner.step(cycle_index, state, ctx).await {
            Ok(Some(result)) => return result,
            Ok(None) => {}
            Err(err) => {
                if err.downcast_ref::<CancelledError>().is_some() {
                    return state
                        .result(AgentStatus::Cancelled)
                        .with_error(CancelledError.to_string());
                }
                return state
                    .result(AgentStatus::Failed)
                    .with_error(format!("{err:#}"));
            }
        }
    }

    state
        .result(AgentStatus::MaxCycles)
        .with_final_answer(MAX_CYCLES_ANSWER)
}

// ─── Inline backend ───────────────────────────────────────────────────────────

/// Default backend: runs the loop on the calling task and maps sub-tasks
/// serially.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineBackend;

#[async_trait]
impl ExecutionBackend for InlineBackend {
    async fn execute(
        &self,
        _task: &AgentTask,
        state: &mut RunState,
        runner: &dyn CycleStep,
        ctx: &ExecutionContext,
        max_cycles: u32,
    ) -> AgentResult {
        drive_cycles(state, runner, ctx, max_cycles).await
    }

    async fn parallel_map(
        &self,
        jobs: Vec<BoxFuture<'static, SubTaskOutcome>>,
    ) -> Vec<SubTaskOutcome> {
        let mut outcomes = Vec::with_capacity(jobs.len());
        for job in jobs {
            outcomes.push(job.await);
        }
        outcomes
    }
}

// ─── Pooled backend ───────────────────────────────────────────────────────────

/// Backend with bounded sub-task concurrency.  The cycle loop itself stays
/// sequential; `parallel_map` polls up to `workers` jobs at once and still
/// yields outcomes in input order.
#[derive(Debug, Clone, Copy)]
pub struct PooledBackend {
    workers: usize,
}

impl Default for PooledBackend {
    fn default() -> Self {
        Self {
            workers: drover_config::BackendConfig::default().workers,
        }
    }
}

impl PooledBackend {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    /// Spawn an entire future (typically a whole run) off the caller task.
    pub fn submit<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: std::future::Future + Send + 'static,
        F::Output: Send + 'static,
    {
        tokio::spawn(future)
    }
}

#[async_trait]
impl ExecutionBackend for PooledBackend {
    async fn execute(
        &self,
        _task: &AgentTask,
        state: &mut RunState,
        runner: &dyn CycleStep,
        ctx: &ExecutionContext,
        max_cycles: u32,
    ) -> AgentResult {
        drive_cycles(state, runner, ctx, max_cycles).await
    }

    async fn parallel_map(
        &self,
        jobs: Vec<BoxFuture<'static, SubTaskOutcome>>,
    ) -> Vec<SubTaskOutcome> {
        futures::stream::iter(jobs)
            .buffered(self.workers)
            .collect()
            .await
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
