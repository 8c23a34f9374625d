// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::tools::{error_codes, names, Tool, ToolContext, ToolExecutionResult};
use crate::types::{TodoItem, TodoStatus};

fn parse_status(raw: &str) -> Option<TodoStatus> {
    match raw {
        "pending" => Some(TodoStatus::Pending),
        "in_progress" => Some(TodoStatus::InProgress),
        "completed" => Some(TodoStatus::Completed),
        "cancelled" => Some(TodoStatus::Cancelled),
        _ => None,
    }
}

/// Replaces the run's todo list.  At most one item may be `in_progress`.
pub struct TodoWriteTool;

#[async_trait]
impl Tool for TodoWriteTool {
    fn name(&self) -> &str {
        names::TODO_WRITE
    }

    fn description(&self) -> &str {
        "Replace the todo list for this task. Items: {title, status, priority?}. \
         Statuses: pending | in_progress | completed | cancelled; only one item \
         may be in_progress at a time."
    }

    fn schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "todos": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "title": {"type": "string"},
                            "status": {
                                "type": "string",
                                "enum": ["pending", "in_progress", "completed", "cancelled"]
                            },
                            "priority": {
                                "type": "string",
                                "enum": ["high", "medium", "low"]
                            }
                        },
                        "required": ["title", "status"]
                    }
                }
            },
            "required": ["todos"]
        }))
    }

    async fn execute(
        &self,
        ctx: &ToolContext,
        args: &Map<String, Value>,
    ) -> anyhow::Result<ToolExecutionResult> {
        let raw_items = args
            .get("todos")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let mut items: Vec<TodoItem> = Vec::new();
        for raw in &raw_items {
            let Some(obj) = raw.as_object() else { continue };
            let title = obj
                .get("title")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .trim()
                .to_string();
            if title.is_empty() {
                continue;
            }
            let status = obj
                .get("status")
                .and_then(|v| v.as_str())
                .and_then(parse_status)
                .unwrap_or_default();
            let mut item = TodoItem::new(title, status);
            item.priority = obj
                .get("priority")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            items.push(item);
        }

        let in_progress = items
            .iter()
            .filter(|item| item.status == TodoStatus::InProgress)
            .count();
        if in_progress > 1 {
            return Ok(ToolExecutionResult::error(
                format!("{in_progress} items marked in_progress; at most one is allowed"),
                error_codes::MULTIPLE_IN_PROGRESS_TODOS,
            ));
        }

        ctx.shared_state.set_todo_list(&items);
        Ok(ToolExecutionResult::success_json(json!({
            "ok": true,
            "count": items.len(),
        })))
    }
}

/// Returns the current todo list.
pub struct TodoReadTool;

#[async_trait]
impl Tool for TodoReadTool {
    fn name(&self) -> &str {
        names::TODO_READ
    }

    fn description(&self) -> &str {
        "Read the current todo list."
    }

    fn schema(&self) -> Option<Value> {
        Some(json!({"type": "object", "properties": {}}))
    }

    async fn execute(
        &self,
        ctx: &ToolContext,
        _args: &Map<String, Value>,
    ) -> anyhow::Result<ToolExecutionResult> {
        let items = ctx.shared_state.todo_list();
        Ok(ToolExecutionResult::success_json(json!({
            "todos": items,
        })))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::context::ExecutionContext;
    use crate::tools::ToolStatus;
    use crate::types::SharedState;
    use crate::workspace::MemoryWorkspaceBackend;

    use super::*;

    fn context() -> ToolContext {
        ToolContext {
            workspace: std::env::temp_dir(),
            shared_state: SharedState::new(),
            cycle_index: 1,
            backend: Arc::new(MemoryWorkspaceBackend::new()),
            exec: ExecutionContext::new(),
            sub_tasks: None,
        }
    }

    fn args_with_todos(todos: Value) -> Map<String, Value> {
        let mut args = Map::new();
        args.insert("todos".into(), todos);
        args
    }

    #[tokio::test]
    async fn write_stores_normalized_items() {
        let ctx = context();
        let args = args_with_todos(json!([
            {"title": "analyse", "status": "in_progress", "priority": "high"},
            {"title": "implement", "status": "pending"},
        ]));
        let result = TodoWriteTool.execute(&ctx, &args).await.unwrap();
        assert_eq!(result.status, ToolStatus::Success);
        let todos = ctx.shared_state.todo_list();
        assert_eq!(todos.len(), 2);
        assert_eq!(todos[0].status, TodoStatus::InProgress);
        assert_eq!(todos[0].priority.as_deref(), Some("high"));
        assert!(!todos[0].is_done());
    }

    #[tokio::test]
    async fn write_enforces_single_in_progress() {
        let ctx = context();
        let args = args_with_todos(json!([
            {"title": "a", "status": "in_progress", "priority": "high"},
            {"title": "b", "status": "in_progress", "priority": "medium"},
        ]));
        let result = TodoWriteTool.execute(&ctx, &args).await.unwrap();
        assert_eq!(result.status, ToolStatus::Error);
        assert_eq!(
            result.error_code.as_deref(),
            Some("multiple_in_progress_todos")
        );
        // Nothing was stored.
        assert!(ctx.shared_state.todo_list().is_empty());
    }

    #[tokio::test]
    async fn write_skips_untitled_and_malformed_entries() {
        let ctx = context();
        let args = args_with_todos(json!([
            {"title": "  ", "status": "pending"},
            "not an object",
            {"title": "real", "status": "completed"},
        ]));
        let result = TodoWriteTool.execute(&ctx, &args).await.unwrap();
        assert_eq!(result.status, ToolStatus::Success);
        let todos = ctx.shared_state.todo_list();
        assert_eq!(todos.len(), 1);
        assert!(todos[0].is_done());
    }

    #[tokio::test]
    async fn unknown_status_defaults_to_pending() {
        let ctx = context();
        let args = args_with_todos(json!([{"title": "x", "status": "someday"}]));
        TodoWriteTool.execute(&ctx, &args).await.unwrap();
        assert_eq!(ctx.shared_state.todo_list()[0].status, TodoStatus::Pending);
    }

    #[tokio::test]
    async fn read_returns_written_list() {
        let ctx = context();
        let args = args_with_todos(json!([{"title": "only", "status": "pending"}]));
        TodoWriteTool.execute(&ctx, &args).await.unwrap();
        let result = TodoReadTool.execute(&ctx, &Map::new()).await.unwrap();
        let body: Value = serde_json::from_str(&result.content).unwrap();
        assert_eq!(body["todos"][0]["title"], "only");
    }
}
