// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::tools::{error_codes, names, Tool, ToolContext, ToolExecutionResult};
use crate::types::SubTaskRequest;

fn parse_request(raw: &Value) -> Option<SubTaskRequest> {
    let obj = raw.as_object()?;
    let prompt = obj.get("prompt").and_then(|v| v.as_str())?.to_string();
    Some(SubTaskRequest {
        title: obj
            .get("title")
            .and_then(|v| v.as_str())
            .unwrap_or("sub-task")
            .to_string(),
        prompt,
        model: obj.get("model").and_then(|v| v.as_str()).map(str::to_string),
        max_cycles: obj
            .get("max_cycles")
            .and_then(|v| v.as_u64())
            .map(|n| n as u32),
        agent_type: obj
            .get("agent_type")
            .and_then(|v| v.as_str())
            .map(str::to_string),
    })
}

fn runner_missing() -> ToolExecutionResult {
    ToolExecutionResult::error(
        "sub-task execution is not available in this run",
        error_codes::TOOL_EXECUTION_FAILED,
    )
}

/// Delegates one focused task to a child run and returns its final answer.
pub struct CreateSubTaskTool;

#[async_trait]
impl Tool for CreateSubTaskTool {
    fn name(&self) -> &str {
        names::CREATE_SUB_TASK
    }

    fn description(&self) -> &str {
        "Spawn a sub-task with its own context and return its final answer. \
         Use for isolated pieces of work that do not need this conversation."
    }

    fn schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "title": {"type": "string"},
                "prompt": {"type": "string", "description": "Task description for the sub-agent"},
                "model": {"type": "string"},
                "max_cycles": {"type": "integer"}
            },
            "required": ["prompt"]
        }))
    }

    async fn execute(
        &self,
        ctx: &ToolContext,
        args: &Map<String, Value>,
    ) -> anyhow::Result<ToolExecutionResult> {
        let Some(runner) = ctx.sub_tasks.as_ref() else {
            return Ok(runner_missing());
        };
        let Some(request) = parse_request(&Value::Object(args.clone())) else {
            return Ok(ToolExecutionResult::error(
                "missing required parameter 'prompt'",
                error_codes::TOOL_EXECUTION_FAILED,
            ));
        };

        debug!(title = %request.title, "create_sub_task");
        let outcome = runner.run_sub_task(request).await;
        Ok(ToolExecutionResult::success_json(json!({
            "task_id": outcome.task_id,
            "status": outcome.status,
            "final_answer": outcome.final_answer,
            "error": outcome.error,
        })))
    }
}

/// Fans a list of independent sub-tasks out through the execution backend and
/// reports every outcome in input order.
pub struct BatchSubTasksTool;

#[async_trait]
impl Tool for BatchSubTasksTool {
    fn name(&self) -> &str {
        names::BATCH_SUB_TASKS
    }

    fn description(&self) -> &str {
        "Run several independent sub-tasks and collect their results. \
         Outcomes are reported in the same order as the input list."
    }

    fn schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "tasks": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "title": {"type": "string"},
                            "prompt": {"type": "string"},
                            "model": {"type": "string"},
                            "max_cycles": {"type": "integer"}
                        },
                        "required": ["prompt"]
                    }
                }
            },
            "required": ["tasks"]
        }))
    }

    async fn execute(
        &self,
        ctx: &ToolContext,
        args: &Map<String, Value>,
    ) -> anyhow::Result<ToolExecutionResult> {
        let Some(runner) = ctx.sub_tasks.as_ref() else {
            return Ok(runner_missing());
        };
        let requests: Vec<SubTaskRequest> = args
            .get("tasks")
            .and_then(|v| v.as_array())
            .map(|list| list.iter().filter_map(parse_request).collect())
            .unwrap_or_default();
        if requests.is_empty() {
            return Ok(ToolExecutionResult::error(
                "`tasks` must contain at least one entry with a prompt",
                error_codes::TOOL_EXECUTION_FAILED,
            ));
        }

        debug!(count = requests.len(), "batch_sub_tasks");
        let outcomes = runner.run_batch(requests).await;
        let count = outcomes.len();
        Ok(ToolExecutionResult::success_json(json!({
            "outcomes": outcomes,
            "count": count,
        })))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::context::ExecutionContext;
    use crate::tools::ToolStatus;
    use crate::types::{AgentStatus, SharedState, SubTaskOutcome, SubTaskRunner};
    use crate::workspace::MemoryWorkspaceBackend;

    use super::*;

    struct FakeRunner;

    #[async_trait]
    impl SubTaskRunner for FakeRunner {
        async fn run_sub_task(&self, request: SubTaskRequest) -> SubTaskOutcome {
            SubTaskOutcome {
                task_id: format!("sub_{}", request.title),
                status: AgentStatus::Completed,
                final_answer: Some(format!("answer:{}", request.prompt)),
                error: None,
            }
        }

        async fn run_batch(&self, requests: Vec<SubTaskRequest>) -> Vec<SubTaskOutcome> {
            let mut outcomes = Vec::new();
            for request in requests {
                outcomes.push(self.run_sub_task(request).await);
            }
            outcomes
        }
    }

    fn context(with_runner: bool) -> ToolContext {
        ToolContext {
            workspace: std::env::temp_dir(),
            shared_state: SharedState::new(),
            cycle_index: 1,
            backend: Arc::new(MemoryWorkspaceBackend::new()),
            exec: ExecutionContext::new(),
            sub_tasks: with_runner.then(|| Arc::new(FakeRunner) as Arc<dyn SubTaskRunner>),
        }
    }

    #[tokio::test]
    async fn create_runs_child_and_reports_answer() {
        let ctx = context(true);
        let mut args = Map::new();
        args.insert("title".into(), json!("t"));
        args.insert("prompt".into(), json!("do it"));
        let result = CreateSubTaskTool.execute(&ctx, &args).await.unwrap();
        let body: Value = serde_json::from_str(&result.content).unwrap();
        assert_eq!(body["status"], "COMPLETED");
        assert_eq!(body["final_answer"], "answer:do it");
    }

    #[tokio::test]
    async fn create_without_runner_is_an_error() {
        let ctx = context(false);
        let mut args = Map::new();
        args.insert("prompt".into(), json!("x"));
        let result = CreateSubTaskTool.execute(&ctx, &args).await.unwrap();
        assert_eq!(result.status, ToolStatus::Error);
    }

    #[tokio::test]
    async fn create_requires_prompt() {
        let ctx = context(true);
        let result = CreateSubTaskTool.execute(&ctx, &Map::new()).await.unwrap();
        assert_eq!(result.status, ToolStatus::Error);
        assert!(result.content.contains("prompt"));
    }

    #[tokio::test]
    async fn batch_preserves_input_order() {
        let ctx = context(true);
        let mut args = Map::new();
        args.insert(
            "tasks".into(),
            json!([
                {"title": "one", "prompt": "p1"},
                {"title": "two", "prompt": "p2"},
            ]),
        );
        let result = BatchSubTasksTool.execute(&ctx, &args).await.unwrap();
        let body: Value = serde_json::from_str(&result.content).unwrap();
        assert_eq!(body["count"], 2);
        assert_eq!(body["outcomes"][0]["task_id"], "sub_one");
        assert_eq!(body["outcomes"][1]["task_id"], "sub_two");
    }

    #[tokio::test]
    async fn batch_rejects_empty_task_list() {
        let ctx = context(true);
        let mut args = Map::new();
        args.insert("tasks".into(), json!([]));
        let result = BatchSubTasksTool.execute(&ctx, &args).await.unwrap();
        assert_eq!(result.status, ToolStatus::Error);
    }
}
