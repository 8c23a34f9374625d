// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::tools::{error_codes, names, Tool, ToolContext, ToolExecutionResult};

fn require_path<'a>(args: &'a Map<String, Value>) -> Result<&'a str, ToolExecutionResult> {
    match args.get("path").and_then(|v| v.as_str()) {
        Some(path) if !path.trim().is_empty() => Ok(path),
        _ => Err(ToolExecutionResult::error(
            "missing required parameter 'path'",
            error_codes::TOOL_EXECUTION_FAILED,
        )),
    }
}

/// Reads a text file from the workspace.
pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        names::READ_FILE
    }

    fn description(&self) -> &str {
        "Read a UTF-8 text file from the workspace."
    }

    fn schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Workspace-relative path"}
            },
            "required": ["path"]
        }))
    }

    async fn execute(
        &self,
        ctx: &ToolContext,
        args: &Map<String, Value>,
    ) -> anyhow::Result<ToolExecutionResult> {
        let path = match require_path(args) {
            Ok(path) => path,
            Err(err) => return Ok(err),
        };
        debug!(path, "read_file");
        let content = ctx.backend.read_text(path)?;
        Ok(ToolExecutionResult::success(content).with_metadata("path", json!(path)))
    }
}

/// Writes (or appends to) a text file in the workspace.
pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        names::WRITE_FILE
    }

    fn description(&self) -> &str {
        "Write a UTF-8 text file into the workspace, creating parent \
         directories as needed. Set append=true to extend an existing file."
    }

    fn schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Workspace-relative path"},
                "content": {"type": "string"},
                "append": {"type": "boolean", "description": "Append instead of overwrite"}
            },
            "required": ["path", "content"]
        }))
    }

    async fn execute(
        &self,
        ctx: &ToolContext,
        args: &Map<String, Value>,
    ) -> anyhow::Result<ToolExecutionResult> {
        let path = match require_path(args) {
            Ok(path) => path,
            Err(err) => return Ok(err),
        };
        let content = args.get("content").and_then(|v| v.as_str()).unwrap_or("");
        let append = args
            .get("append")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        debug!(path, bytes = content.len(), append, "write_file");
        let written = ctx.backend.write_text(path, content, append)?;
        Ok(ToolExecutionResult::success_json(json!({
            "ok": true,
            "path": path,
            "bytes_written": written,
        })))
    }
}

/// Lists files under a workspace directory.
pub struct ListFilesTool;

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        names::LIST_FILES
    }

    fn description(&self) -> &str {
        "List workspace files under a directory (recursive, sorted)."
    }

    fn schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Directory to list; default is the root"}
            }
        }))
    }

    async fn execute(
        &self,
        ctx: &ToolContext,
        args: &Map<String, Value>,
    ) -> anyhow::Result<ToolExecutionResult> {
        let base = args.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let files = ctx.backend.list_files(base)?;
        let count = files.len();
        Ok(ToolExecutionResult::success_json(json!({
            "files": files,
            "count": count,
        })))
    }
}

/// Deletes a file (or directory subtree) from the workspace.
pub struct DeleteFileTool;

#[async_trait]
impl Tool for DeleteFileTool {
    fn name(&self) -> &str {
        names::DELETE_FILE
    }

    fn description(&self) -> &str {
        "Delete a workspace file or directory subtree."
    }

    fn schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Workspace-relative path"}
            },
            "required": ["path"]
        }))
    }

    async fn execute(
        &self,
        ctx: &ToolContext,
        args: &Map<String, Value>,
    ) -> anyhow::Result<ToolExecutionResult> {
        let path = match require_path(args) {
            Ok(path) => path,
            Err(err) => return Ok(err),
        };
        ctx.backend.delete(path)?;
        Ok(ToolExecutionResult::success_json(json!({"ok": true, "path": path})))
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

    fn args(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn write_then_read_round_trip() {
        let ctx = context();
        let result = WriteFileTool
            .execute(
                &ctx,
                &args(&[("path", json!("a.txt")), ("content", json!("hi"))]),
            )
            .await
            .unwrap();
        assert_eq!(result.status, ToolStatus::Success);

        let read = ReadFileTool
            .execute(&ctx, &args(&[("path", json!("a.txt"))]))
            .await
            .unwrap();
        assert_eq!(read.content, "hi");
    }

    #[tokio::test]
    async fn read_missing_file_propagates_as_handler_error() {
        let ctx = context();
        let err = ReadFileTool
            .execute(&ctx, &args(&[("path", json!("nope.txt"))]))
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn missing_path_parameter_is_reported() {
        let ctx = context();
        let result = ReadFileTool.execute(&ctx, &Map::new()).await.unwrap();
        assert_eq!(result.status, ToolStatus::Error);
        assert!(result.content.contains("path"));
    }

    #[tokio::test]
    async fn append_mode_extends_file() {
        let ctx = context();
        let write = |content: &str, append: bool| {
            args(&[
                ("path", json!("log.txt")),
                ("content", json!(content)),
                ("append", json!(append)),
            ])
        };
        WriteFileTool.execute(&ctx, &write("a", false)).await.unwrap();
        WriteFileTool.execute(&ctx, &write("b", true)).await.unwrap();
        let read = ReadFileTool
            .execute(&ctx, &args(&[("path", json!("log.txt"))]))
            .await
            .unwrap();
        assert_eq!(read.content, "ab");
    }

    #[tokio::test]
    async fn list_reports_written_files() {
        let ctx = context();
        for name in ["b.txt", "a.txt"] {
            WriteFileTool
                .execute(&ctx, &args(&[("path", json!(name)), ("content", json!(""))]))
                .await
                .unwrap();
        }
        let result = ListFilesTool.execute(&ctx, &Map::new()).await.unwrap();
        let body: Value = serde_json::from_str(&result.content).unwrap();
        assert_eq!(body["count"], 2);
        assert_eq!(body["files"], json!(["a.txt", "b.txt"]));
    }

    #[tokio::test]
    async fn delete_removes_file() {
        let ctx = context();
        WriteFileTool
            .execute(&ctx, &args(&[("path", json!("x.txt")), ("content", json!("x"))]))
            .await
            .unwrap();
        DeleteFileTool
            .execute(&ctx, &args(&[("path", json!("x.txt"))]))
            .await
            .unwrap();
        assert!(!ctx.backend.exists("x.txt").unwrap());
    }
}
