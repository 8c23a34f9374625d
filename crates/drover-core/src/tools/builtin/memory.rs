// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::tools::{error_codes, names, Tool, ToolContext, ToolExecutionResult};
use crate::types::KEY_MEMORY_NOTES;

/// Lets the model bank the essentials before a compaction pass trims the
/// transcript.  Notes accumulate under `shared_state.memory_notes`.
pub struct CompressMemoryTool;

#[async_trait]
impl Tool for CompressMemoryTool {
    fn name(&self) -> &str {
        names::COMPRESS_MEMORY
    }

    fn description(&self) -> &str {
        "Save the core information that must survive transcript compaction. \
         Call this when the context is close to its memory threshold."
    }

    fn schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "core_information": {
                    "type": "string",
                    "description": "Dense summary of facts, decisions, and open work"
                }
            },
            "required": ["core_information"]
        }))
    }

    async fn execute(
        &self,
        ctx: &ToolContext,
        args: &Map<String, Value>,
    ) -> anyhow::Result<ToolExecutionResult> {
        let core_information = args
            .get("core_information")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim()
            .to_string();
        if core_information.is_empty() {
            return Ok(ToolExecutionResult::error(
                "`core_information` is required",
                error_codes::CORE_INFORMATION_REQUIRED,
            ));
        }

        let saved = ctx.shared_state.with(|state| {
            let notes = state
                .entry(KEY_MEMORY_NOTES.to_string())
                .or_insert_with(|| Value::Array(Vec::new()));
            if !notes.is_array() {
                *notes = Value::Array(Vec::new());
            }
            let list = notes.as_array_mut().expect("just coerced to array");
            list.push(json!({
                "cycle_index": ctx.cycle_index,
                "core_information": core_information,
            }));
            list.len()
        });

        Ok(
            ToolExecutionResult::success_json(json!({"ok": true, "saved_notes": saved}))
                .with_metadata("saved_notes", json!(saved)),
        )
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
