// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde_json::{Map, Value};
use tracing::debug;

use drover_model::ToolCall;

use crate::tools::{
    error_codes, ToolContext, ToolDirective, ToolExecutionResult, ToolRegistry, ToolResultStatus,
};

/// Normalize raw call arguments to an object map.
///
/// `null` becomes `{}`; a string is JSON-decoded and must decode to an
/// object; any other type is rejected.  Failures come back as a synthetic
/// error result tagged with the matching stable error code.
fn parse_arguments(
    tool_call_id: &str,
    raw: &Value,
) -> Result<Map<String, Value>, ToolExecutionResult> {
    match raw {
        Value::Null => Ok(Map::new()),
        Value::Object(map) => Ok(map.clone()),
        Value::String(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return Ok(Map::new());
            }
            let parsed: Value = match serde_json::from_str(trimmed) {
                Ok(v) => v,
                Err(err) => {
                    return Err(stamp(
                        tool_call_id,
                        ToolExecutionResult::error(
                            format!("Invalid tool arguments JSON: {err}"),
                            error_codes::INVALID_ARGUMENTS_JSON,
                        ),
                    ))
                }
            };
            match parsed {
                Value::Object(map) => Ok(map),
                _ => Err(stamp(
                    tool_call_id,
                    ToolExecutionResult::error(
                        "Tool arguments must decode to an object",
                        error_codes::INVALID_ARGUMENTS_PAYLOAD,
                    ),
                )),
            }
        }
        other => Err(stamp(
            tool_call_id,
            ToolExecutionResult::error(
                format!("Unsupported tool argument type: {}", type_name(other)),
                error_codes::INVALID_ARGUMENTS_TYPE,
            ),
        )),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn stamp(tool_call_id: &str, mut result: ToolExecutionResult) -> ToolExecutionResult {
    result.tool_call_id = tool_call_id.to_string();
    result
}

/// Run one tool call through the full dispatch pipeline: argument
/// normalization, lookup, handler invocation, and result post-processing.
///
/// Infrastructural failures (unknown tool, bad JSON, handler error) are
/// converted into error results rather than propagated, so the cycle
/// continues and the model can observe and recover.
pub async fn dispatch_tool_call(
    registry: &ToolRegistry,
    context: &ToolContext,
    call: &ToolCall,
) -> ToolExecutionResult {
    let arguments = match parse_arguments(&call.id, &call.arguments) {
        Ok(args) => args,
        Err(error_result) => return error_result,
    };

    let tool = match registry.get(&call.name) {
        Some(tool) => tool,
        None => {
            return stamp(
                &call.id,
                ToolExecutionResult::error(
                    format!("Unknown tool: {}", call.name),
                    error_codes::TOOL_NOT_FOUND,
                ),
            )
        }
    };

    debug!(tool = %call.name, tool_call_id = %call.id, "dispatching tool call");

    let mut result = match tool.execute(context, &arguments).await {
        Ok(result) => result,
        Err(err) => stamp(
            &call.id,
            ToolExecutionResult::error(
                format!("Tool execution failed ({}): {err}", call.name),
                error_codes::TOOL_EXECUTION_FAILED,
            ),
        ),
    };

    if result.tool_call_id.is_empty() || result.tool_call_id == "pending" {
        result.tool_call_id = call.id.clone();
    }
    if result.directive == ToolDirective::WaitUser
        && result.status_code == ToolResultStatus::Success
    {
        result.status_code = ToolResultStatus::WaitResponse;
    }

    result
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
