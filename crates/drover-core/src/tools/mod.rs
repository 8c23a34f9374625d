// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod builtin;
mod dispatcher;
pub mod names;
mod registry;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::cancel::CancelledError;
use crate::context::ExecutionContext;
use crate::types::{SharedState, SubTaskRunner};
use crate::workspace::{resolve_under, WorkspaceBackend};

pub use dispatcher::dispatch_tool_call;
pub use registry::ToolRegistry;

// ─── Error codes ──────────────────────────────────────────────────────────────

/// Stable error-code strings surfaced at the tool boundary.
pub mod error_codes {
    pub const INVALID_ARGUMENTS_JSON: &str = "invalid_arguments_json";
    pub const INVALID_ARGUMENTS_PAYLOAD: &str = "invalid_arguments_payload";
    pub const INVALID_ARGUMENTS_TYPE: &str = "invalid_arguments_type";
    pub const TOOL_NOT_FOUND: &str = "tool_not_found";
    pub const TOOL_EXECUTION_FAILED: &str = "tool_execution_failed";
    pub const TODO_INCOMPLETE: &str = "todo_incomplete";
    pub const DANGEROUS_COMMAND: &str = "dangerous_command";
    pub const SESSION_ID_REQUIRED: &str = "session_id_required";
    pub const BACKGROUND_COMMAND_FAILED: &str = "background_command_failed";
    pub const CORE_INFORMATION_REQUIRED: &str = "core_information_required";
    pub const UNSUPPORTED_IMAGE_FORMAT: &str = "unsupported_image_format";
    pub const MULTIPLE_IN_PROGRESS_TODOS: &str = "multiple_in_progress_todos";
}

// ─── Result types ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ToolResultStatus {
    Success,
    Error,
    Running,
    WaitResponse,
}

/// A signal from a tool result that alters engine control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ToolDirective {
    #[default]
    None,
    Finish,
    WaitUser,
}

/// What a tool handler hands back to the dispatcher.
///
/// Handlers may leave `tool_call_id` empty; the dispatcher stamps the call id
/// during post-processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolExecutionResult {
    #[serde(default)]
    pub tool_call_id: String,
    pub status: ToolStatus,
    pub status_code: ToolResultStatus,
    #[serde(default)]
    pub directive: ToolDirective,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    pub content: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
}

impl ToolExecutionResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            tool_call_id: String::new(),
            status: ToolStatus::Success,
            status_code: ToolResultStatus::Success,
            directive: ToolDirective::None,
            error_code: None,
            content: content.into(),
            metadata: Map::new(),
            image_url: None,
            image_path: None,
        }
    }

    /// Successful result whose content is the JSON encoding of `payload`.
    pub fn success_json(payload: Value) -> Self {
        Self::success(payload.to_string())
    }

    /// Error result with the conventional `{"ok": false, ...}` body.
    pub fn error(message: impl Into<String>, error_code: &str) -> Self {
        let message = message.into();
        let body = serde_json::json!({
            "ok": false,
            "error": message,
            "error_code": error_code,
        });
        Self {
            tool_call_id: String::new(),
            status: ToolStatus::Error,
            status_code: ToolResultStatus::Error,
            directive: ToolDirective::None,
            error_code: Some(error_code.to_string()),
            content: body.to_string(),
            metadata: Map::new(),
            image_url: None,
            image_path: None,
        }
    }

    pub fn with_directive(mut self, directive: ToolDirective) -> Self {
        self.directive = directive;
        self
    }

    pub fn with_status_code(mut self, status_code: ToolResultStatus) -> Self {
        self.status_code = status_code;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn is_error(&self) -> bool {
        self.status == ToolStatus::Error
    }
}

// ─── Tool trait & context ─────────────────────────────────────────────────────

/// A named, schema-declared capability with a side-effecting handler.
///
/// Handlers should be idempotent when possible and must not retain the
/// [`ToolContext`] beyond the call.  A handler error is trapped by the
/// dispatcher and surfaced as a `tool_execution_failed` result, so the cycle
/// continues and the model can observe and recover.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema of the parameters object.  Tools without a schema are
    /// registered but never offered to the model.
    fn schema(&self) -> Option<Value>;
    async fn execute(
        &self,
        ctx: &ToolContext,
        args: &Map<String, Value>,
    ) -> anyhow::Result<ToolExecutionResult>;
}

/// Per-dispatch view handed to tool handlers.
#[derive(Clone)]
pub struct ToolContext {
    pub workspace: PathBuf,
    pub shared_state: SharedState,
    pub cycle_index: u32,
    pub backend: Arc<dyn WorkspaceBackend>,
    pub exec: ExecutionContext,
    pub sub_tasks: Option<Arc<dyn SubTaskRunner>>,
}

impl ToolContext {
    /// Resolve a raw path against the workspace root, rejecting escapes.
    pub fn resolve_workspace_path(&self, raw: &str) -> anyhow::Result<PathBuf> {
        resolve_under(&self.workspace, raw)
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace
    }

    pub fn check_cancelled(&self) -> Result<(), CancelledError> {
        self.exec.check_cancelled()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
