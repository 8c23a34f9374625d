// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::tools::{
    error_codes, names, Tool, ToolContext, ToolDirective, ToolExecutionResult,
};

/// Signals run completion.  Refuses to finish while any todo item is still
/// open so the model is pushed back to complete pending work first.
pub struct TaskFinishTool;

#[async_trait]
impl Tool for TaskFinishTool {
    fn name(&self) -> &str {
        names::TASK_FINISH
    }

    fn description(&self) -> &str {
        "Declare the task complete and provide the final answer. \
         All todo items must be done before calling this."
    }

    fn schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "Final answer delivered to the user"
                }
            },
            "required": ["message"]
        }))
    }

    async fn execute(
        &self,
        ctx: &ToolContext,
        args: &Map<String, Value>,
    ) -> anyhow::Result<ToolExecutionResult> {
        let open: Vec<String> = ctx
            .shared_state
            .todo_list()
            .iter()
            .filter(|item| !item.is_done())
            .map(|item| item.title.clone())
            .collect();
        if !open.is_empty() {
            return Ok(ToolExecutionResult::error(
                format!("Cannot finish: {} todo item(s) still open", open.len()),
                error_codes::TODO_INCOMPLETE,
            )
            .with_metadata("open_items", json!(open)));
        }

        let message = args
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        Ok(
            ToolExecutionResult::success_json(json!({"ok": true, "message": message.clone()}))
                .with_directive(ToolDirective::Finish)
                .with_metadata("message", json!(message)),
        )
    }
}

/// Suspends the run until the user answers.  Optional structured selection:
/// an `options` list (deduplicated, order preserved), a `selection_type`, and
/// an `allow_custom_options` flag are echoed back for the caller's UI.
pub struct AskUserTool;

#[async_trait]
impl Tool for AskUserTool {
    fn name(&self) -> &str {
        names::ASK_USER
    }

    fn description(&self) -> &str {
        "Ask the user a question and wait for their reply before continuing."
    }

    fn schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "question": {
                    "type": "string",
                    "description": "The question shown to the user"
                },
                "options": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Optional preset answers"
                },
                "selection_type": {
                    "type": "string",
                    "enum": ["single", "multi"],
                    "description": "How many options may be picked"
                },
                "allow_custom_options": {
                    "type": "boolean",
                    "description": "Whether a free-form answer is accepted"
                }
            },
            "required": ["question"]
        }))
    }

    async fn execute(
        &self,
        _ctx: &ToolContext,
        args: &Map<String, Value>,
    ) -> anyhow::Result<ToolExecutionResult> {
        let question = args
            .get("question")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();

        let mut options: Vec<String> = Vec::new();
        if let Some(raw) = args.get("options").and_then(|v| v.as_array()) {
            for entry in raw {
                if let Some(text) = entry.as_str() {
                    if !options.iter().any(|o| o == text) {
                        options.push(text.to_string());
                    }
                }
            }
        }
        let selection_type = args
            .get("selection_type")
            .and_then(|v| v.as_str())
            .unwrap_or("single");
        let allow_custom = args
            .get("allow_custom_options")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);

        let payload = json!({
            "question": question.clone(),
            "options": options,
            "selection_type": selection_type,
            "allow_custom_options": allow_custom,
        });

        Ok(ToolExecutionResult::success(payload.to_string())
            .with_directive(ToolDirective::WaitUser)
            .with_metadata("question", json!(question)))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::context::ExecutionContext;
    use crate::tools::{ToolResultStatus, ToolStatus};
    use crate::types::{SharedState, TodoItem, TodoStatus};
    use crate::workspace::MemoryWorkspaceBackend;

    use super::*;

    fn context_with(shared_state: SharedState) -> ToolContext {
        ToolContext {
            workspace: std::env::temp_dir(),
            shared_state,
            cycle_index: 1,
            backend: Arc::new(MemoryWorkspaceBackend::new()),
            exec: ExecutionContext::new(),
            sub_tasks: None,
        }
    }

    #[tokio::test]
    async fn task_finish_succeeds_with_empty_todo_list() {
        let ctx = context_with(SharedState::new());
        let mut args = Map::new();
        args.insert("message".into(), json!("all done"));
        let result = TaskFinishTool.execute(&ctx, &args).await.unwrap();
        assert_eq!(result.status, ToolStatus::Success);
        assert_eq!(result.directive, ToolDirective::Finish);
        assert_eq!(result.metadata["message"], "all done");
    }

    #[tokio::test]
    async fn task_finish_blocked_by_open_todo() {
        let state = SharedState::new();
        state.set_todo_list(&[TodoItem::new("step1", TodoStatus::Pending)]);
        let ctx = context_with(state);
        let mut args = Map::new();
        args.insert("message".into(), json!("done"));
        let result = TaskFinishTool.execute(&ctx, &args).await.unwrap();
        assert_eq!(result.status, ToolStatus::Error);
        assert_eq!(result.error_code.as_deref(), Some("todo_incomplete"));
        assert_eq!(result.directive, ToolDirective::None);
    }

    #[tokio::test]
    async fn task_finish_allows_completed_and_cancelled_items() {
        let state = SharedState::new();
        state.set_todo_list(&[
            TodoItem::new("a", TodoStatus::Completed),
            TodoItem::new("b", TodoStatus::Cancelled),
        ]);
        let ctx = context_with(state);
        let mut args = Map::new();
        args.insert("message".into(), json!("ok"));
        let result = TaskFinishTool.execute(&ctx, &args).await.unwrap();
        assert_eq!(result.status, ToolStatus::Success);
    }

    #[tokio::test]
    async fn ask_user_sets_wait_directive_and_question() {
        let ctx = context_with(SharedState::new());
        let mut args = Map::new();
        args.insert("question".into(), json!("Which style?"));
        let result = AskUserTool.execute(&ctx, &args).await.unwrap();
        assert_eq!(result.directive, ToolDirective::WaitUser);
        assert_eq!(result.metadata["question"], "Which style?");
        // The dispatcher performs the WAIT_RESPONSE coercion, not the tool.
        assert_eq!(result.status_code, ToolResultStatus::Success);
    }

    #[tokio::test]
    async fn ask_user_deduplicates_options_preserving_order() {
        let ctx = context_with(SharedState::new());
        let mut args = Map::new();
        args.insert("question".into(), json!("Choose"));
        args.insert("options".into(), json!(["A", "B", "B"]));
        args.insert("selection_type".into(), json!("multi"));
        args.insert("allow_custom_options".into(), json!(true));
        let result = AskUserTool.execute(&ctx, &args).await.unwrap();
        let payload: Value = serde_json::from_str(&result.content).unwrap();
        assert_eq!(payload["options"], json!(["A", "B"]));
        assert_eq!(payload["selection_type"], "multi");
        assert_eq!(payload["allow_custom_options"], true);
    }
}
