// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use drover_model::ToolSchema;

use crate::tools::{names, ToolRegistry};
use crate::types::AgentTask;

/// Deterministically derive the ordered tool-name list for one cycle from the
/// task's capability flags and the current memory pressure.
///
/// The finish tool always leads; `exclude_tools` can remove anything else but
/// never `task_finish`, so a run always has a way to terminate.  Planning the
/// same task twice yields the same sequence.
pub fn plan_tool_names(task: &AgentTask, memory_usage_percentage: Option<u8>) -> Vec<String> {
    let mut tool_names: Vec<&str> = vec![names::TASK_FINISH];

    if task.allow_interruption {
        tool_names.push(names::ASK_USER);
    }
    if task.use_workspace {
        tool_names.extend_from_slice(names::WORKSPACE_TOOLS);
    }
    if task.agent_type.as_deref() == Some("computer") {
        tool_names.extend_from_slice(names::SHELL_TOOLS);
    }
    if task.sub_agents_enabled {
        tool_names.extend_from_slice(names::SUB_TASK_TOOLS);
    }
    if task
        .metadata
        .get("available_skills")
        .and_then(|v| v.as_array())
        .map(|skills| !skills.is_empty())
        .unwrap_or(false)
    {
        tool_names.push(names::ACTIVATE_SKILL);
    }
    if task.native_multimodal {
        tool_names.push(names::READ_IMAGE);
    }
    if let (Some(usage), Some(threshold)) =
        (memory_usage_percentage, task.memory_threshold_percentage)
    {
        if usage >= threshold {
            tool_names.push(names::COMPRESS_MEMORY);
        }
    }

    let mut planned: Vec<String> = tool_names.iter().map(|n| n.to_string()).collect();
    planned.extend(task.extra_tool_names.iter().cloned());

    if !task.exclude_tools.is_empty() {
        planned.retain(|name| name == names::TASK_FINISH || !task.exclude_tools.contains(name));
    }

    let mut deduped: Vec<String> = Vec::with_capacity(planned.len());
    for name in planned {
        if !deduped.contains(&name) {
            deduped.push(name);
        }
    }
    deduped
}

/// Resolve planned names to model-facing schemas.  Names that are not
/// registered, or whose tool declares no schema, are silently excluded —
/// planning never fails.
pub fn plan_tool_schemas(
    registry: &ToolRegistry,
    task: &AgentTask,
    memory_usage_percentage: Option<u8>,
) -> Vec<ToolSchema> {
    let names = plan_tool_names(task, memory_usage_percentage);
    let available: Vec<String> = names
        .into_iter()
        .filter(|name| registry.has_tool(name) && registry.has_schema(name))
        .collect();
    registry.schemas_for(&available)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::tools::builtin::register_defaults;

    use super::*;

    fn task() -> AgentTask {
        AgentTask::new("task_planner", "dummy", "sys", "user")
    }

    #[test]
    fn default_capabilities_lead_with_task_finish() {
        let names = plan_tool_names(&task(), None);
        assert_eq!(names[0], "task_finish");
        assert!(names.contains(&"ask_user".to_string()));
        for name in names::WORKSPACE_TOOLS {
            assert!(names.contains(&name.to_string()), "missing {name}");
        }
    }

    #[test]
    fn bare_task_plans_only_task_finish() {
        let mut t = task();
        t.allow_interruption = false;
        t.use_workspace = false;
        assert_eq!(plan_tool_names(&t, None), vec!["task_finish"]);
    }

    #[test]
    fn computer_agent_gets_shell_tools() {
        let t = task().with_agent_type("computer");
        let names = plan_tool_names(&t, None);
        assert!(names.contains(&"bash".to_string()));
        assert!(names.contains(&"check_background_command".to_string()));
    }

    #[test]
    fn sub_agents_flag_adds_sub_task_tools() {
        let mut t = task();
        t.sub_agents_enabled = true;
        let names = plan_tool_names(&t, None);
        assert!(names.contains(&"create_sub_task".to_string()));
        assert!(names.contains(&"batch_sub_tasks".to_string()));
    }

    #[test]
    fn available_skills_adds_activation_tool() {
        let t = task().with_metadata("available_skills", json!(["writer"]));
        assert!(plan_tool_names(&t, None).contains(&"activate_skill".to_string()));
        let empty = task().with_metadata("available_skills", json!([]));
        assert!(!plan_tool_names(&empty, None).contains(&"activate_skill".to_string()));
    }

    #[test]
    fn multimodal_flag_adds_read_image() {
        let mut t = task();
        t.native_multimodal = true;
        assert!(plan_tool_names(&t, None).contains(&"read_image".to_string()));
    }

    #[test]
    fn compress_memory_appears_at_threshold() {
        let mut t = task();
        t.memory_threshold_percentage = Some(80);
        assert!(plan_tool_names(&t, Some(95)).contains(&"compress_memory".to_string()));
        assert!(plan_tool_names(&t, Some(80)).contains(&"compress_memory".to_string()));
        assert!(!plan_tool_names(&t, Some(79)).contains(&"compress_memory".to_string()));
        assert!(!plan_tool_names(&t, None).contains(&"compress_memory".to_string()));
    }

    #[test]
    fn compress_memory_requires_task_threshold() {
        // No per-task threshold configured: memory pressure alone is not enough.
        assert!(!plan_tool_names(&task(), Some(99)).contains(&"compress_memory".to_string()));
    }

    #[test]
    fn extra_tools_are_appended_and_deduped() {
        let mut t = task();
        t.extra_tool_names = vec!["custom_tool".into(), "ask_user".into()];
        let names = plan_tool_names(&t, None);
        assert!(names.contains(&"custom_tool".to_string()));
        assert_eq!(
            names.iter().filter(|n| n.as_str() == "ask_user").count(),
            1
        );
    }

    #[test]
    fn exclude_wins_over_extra() {
        let mut t = task();
        t.extra_tool_names = vec!["custom_tool".into()];
        t.exclude_tools = vec!["custom_tool".into(), "ask_user".into()];
        let names = plan_tool_names(&t, None);
        assert!(!names.contains(&"custom_tool".to_string()));
        assert!(!names.contains(&"ask_user".to_string()));
    }

    #[test]
    fn task_finish_is_not_excludable() {
        let mut t = task();
        t.exclude_tools = vec!["task_finish".into()];
        let names = plan_tool_names(&t, None);
        assert_eq!(names[0], "task_finish");
        assert_eq!(
            names.iter().filter(|n| n.as_str() == "task_finish").count(),
            1
        );
    }

    #[test]
    fn planning_is_deterministic() {
        let mut t = task();
        t.sub_agents_enabled = true;
        t.extra_tool_names = vec!["x".into(), "y".into()];
        assert_eq!(plan_tool_names(&t, Some(50)), plan_tool_names(&t, Some(50)));
    }

    #[test]
    fn schemas_skip_unregistered_names() {
        let mut registry = ToolRegistry::new();
        register_defaults(&mut registry).unwrap();
        let mut t = task();
        t.memory_threshold_percentage = Some(10);
        t.agent_type = Some("computer".into());
        // bash / check_background_command are planned but not registered.
        let schemas = plan_tool_schemas(&registry, &t, Some(95));
        let names: Vec<&str> = schemas.iter().map(|s| s.name.as_str()).collect();
        assert!(names.contains(&"task_finish"));
        assert!(names.contains(&"compress_memory"));
        assert!(!names.contains(&"bash"));
    }

    #[test]
    fn schemas_keep_plan_order() {
        let mut registry = ToolRegistry::new();
        register_defaults(&mut registry).unwrap();
        let schemas = plan_tool_schemas(&registry, &task(), None);
        assert_eq!(schemas[0].name, "task_finish");
    }
}
