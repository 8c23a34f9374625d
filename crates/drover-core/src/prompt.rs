// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, SecondsFormat, Utc};

use crate::tools::names;

/// Capability flags shaping the composed system prompt.
#[derive(Debug, Clone)]
pub struct PromptOptions {
    pub allow_interruption: bool,
    pub use_workspace: bool,
    pub enable_todo_management: bool,
    pub agent_type: Option<String>,
    /// Pinned timestamp for deterministic output; `None` uses the current
    /// UTC time.
    pub current_time_utc: Option<DateTime<Utc>>,
}

impl Default for PromptOptions {
    fn default() -> Self {
        Self {
            allow_interruption: true,
            use_workspace: true,
            enable_todo_management: true,
            agent_type: None,
            current_time_utc: None,
        }
    }
}

/// Compose the full system prompt from the agent definition and capability
/// flags.  Sections are only emitted for capabilities the task actually has,
/// so the prompt never advertises tools the planner will not offer.
pub fn build_system_prompt(agent_definition: &str, options: &PromptOptions) -> String {
    let mut sections: Vec<String> = vec![format!(
        "<Agent Definition>\n{agent_definition}\n</Agent Definition>"
    )];

    if options.agent_type.as_deref() == Some("computer") {
        sections.push(
            "<Environment>\nYou operate a sandboxed computer. Shell commands run in the \
             workspace directory; long-running commands continue in the background and \
             can be polled later.\n</Environment>"
                .to_string(),
        );
    }

    let mut tool_lines: Vec<String> = Vec::new();
    if options.allow_interruption {
        tool_lines.push(format!(
            "When you are missing information only the user can provide, call `{}` \
             and wait for the reply instead of guessing.",
            names::ASK_USER
        ));
    }
    if options.use_workspace {
        tool_lines.push(format!(
            "Files live in your workspace: read with `{}`, write with `{}`, explore \
             with `{}`. Prefer workspace tools over restating file contents from memory.",
            names::READ_FILE,
            names::WRITE_FILE,
            names::LIST_FILES
        ));
    }
    if options.enable_todo_management {
        tool_lines.push(format!(
            "Track multi-step work with `{}` and keep exactly one item in_progress; \
             every item must be done before you finish.",
            names::TODO_WRITE
        ));
    }
    tool_lines.push(format!(
        "Call `{}` with your final answer when the task is complete. Do not stop \
         responding without calling it.",
        names::TASK_FINISH
    ));
    sections.push(format!("<Tools>\n{}\n</Tools>", tool_lines.join("\n\n")));

    let now = options.current_time_utc.unwrap_or_else(Utc::now);
    sections.push(format!(
        "<Current Time>\nCurrent UTC time:\n{}\n</Current Time>",
        now.to_rfc3339_opts(SecondsFormat::Secs, true)
    ));

    sections.join("\n\n")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn pinned() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn definition_section_always_present() {
        let prompt = build_system_prompt("You are a test agent.", &PromptOptions::default());
        assert!(prompt.starts_with("<Agent Definition>\nYou are a test agent.\n</Agent Definition>"));
    }

    #[test]
    fn default_options_mention_core_tools() {
        let prompt = build_system_prompt("agent", &PromptOptions::default());
        assert!(prompt.contains("`ask_user`"));
        assert!(prompt.contains("`read_file`"));
        assert!(prompt.contains("`todo_write`"));
        assert!(prompt.contains("`task_finish`"));
    }

    #[test]
    fn disabled_capabilities_are_omitted() {
        let options = PromptOptions {
            allow_interruption: false,
            use_workspace: false,
            enable_todo_management: false,
            ..PromptOptions::default()
        };
        let prompt = build_system_prompt("agent", &options);
        assert!(!prompt.contains("ask_user"));
        assert!(!prompt.contains("read_file"));
        assert!(!prompt.contains("todo_write"));
        // The finish instruction is never optional.
        assert!(prompt.contains("task_finish"));
    }

    #[test]
    fn computer_agent_gets_environment_section() {
        let options = PromptOptions {
            agent_type: Some("computer".into()),
            ..PromptOptions::default()
        };
        let prompt = build_system_prompt("agent", &options);
        assert!(prompt.contains("<Environment>"));
        let plain = build_system_prompt("agent", &PromptOptions::default());
        assert!(!plain.contains("<Environment>"));
    }

    #[test]
    fn pinned_time_renders_deterministically() {
        let options = PromptOptions {
            current_time_utc: Some(pinned()),
            ..PromptOptions::default()
        };
        let prompt = build_system_prompt("agent", &options);
        assert!(prompt.contains("<Current Time>"));
        assert!(prompt.contains("2026-03-01T12:00:00Z"));
    }

    #[test]
    fn sections_are_separated_by_blank_lines() {
        let options = PromptOptions {
            current_time_utc: Some(pinned()),
            ..PromptOptions::default()
        };
        let prompt = build_system_prompt("agent", &options);
        assert!(prompt.contains("</Agent Definition>\n\n<Tools>"));
        assert!(prompt.contains("</Tools>\n\n<Current Time>"));
    }
}
