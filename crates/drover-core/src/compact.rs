// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use drover_model::{Message, Role};

/// Name tag on the synthetic summary message, used to find and replace the
/// previous summary on the next compaction pass.
pub const MEMORY_SUMMARY_NAME: &str = "memory_summary";

/// Number of middle messages quoted in the summary body before the rest is
/// collapsed into a single "omitted" line.
const SUMMARY_LINE_LIMIT: usize = 40;

/// Maximum characters quoted per summarized message.
const SUMMARY_TEXT_LIMIT: usize = 120;

/// Online transcript summarizer.
///
/// When the transcript's total content size crosses `threshold_chars`, the
/// middle of the history is replaced with one synthetic system message while
/// the head (system prompt) and the most recent messages survive verbatim.
#[derive(Debug, Clone)]
pub struct MemoryCompactor {
    pub threshold_chars: usize,
    pub keep_recent_messages: usize,
}

impl Default for MemoryCompactor {
    fn default() -> Self {
        let cfg = drover_config::MemoryConfig::default();
        Self {
            threshold_chars: cfg.threshold_chars,
            keep_recent_messages: cfg.keep_recent_messages,
        }
    }
}

impl MemoryCompactor {
    pub fn new(threshold_chars: usize, keep_recent_messages: usize) -> Self {
        Self {
            threshold_chars,
            keep_recent_messages,
        }
    }

    pub fn from_config(cfg: &drover_config::MemoryConfig) -> Self {
        Self::new(cfg.threshold_chars, cfg.keep_recent_messages)
    }

    /// Memory pressure relative to the compaction threshold, as a saturating
    /// percentage.  Feeds the tool planner's `compress_memory` decision.
    pub fn usage_percentage(&self, messages: &[Message]) -> u8 {
        if self.threshold_chars == 0 {
            return 100;
        }
        let total: usize = messages.iter().map(|m| m.content.len()).sum();
        ((total * 100) / self.threshold_chars).min(100) as u8
    }

    /// Compact `messages` if they exceed the threshold.
    ///
    /// Returns the (possibly rewritten) transcript and whether a compaction
    /// took place.  A transcript at or under the threshold comes back
    /// unchanged apart from dropping any stale summary message.
    pub fn compact(&self, messages: &[Message]) -> (Vec<Message>, bool) {
        if messages.is_empty() {
            return (Vec::new(), false);
        }

        // Drop the previous summary so repeated compactions do not stack.
        let cleaned: Vec<Message> = messages
            .iter()
            .filter(|m| {
                !(m.role == Role::System && m.name.as_deref() == Some(MEMORY_SUMMARY_NAME))
            })
            .cloned()
            .collect();

        let total_chars: usize = cleaned.iter().map(|m| m.content.len()).sum();
        if total_chars <= self.threshold_chars {
            return (cleaned, false);
        }
        if cleaned.len() < self.keep_recent_messages + 2 {
            // Not enough material to compact safely.
            return (cleaned, false);
        }

        let head = cleaned[0].clone();
        let mut recent_start = cleaned.len().saturating_sub(self.keep_recent_messages).max(1);
        // A history must never resume on a dangling tool result: pull the
        // boundary back until the first kept message is not tool-role, so the
        // assistant message carrying the matching tool_calls stays paired
        // with it.
        while recent_start > 1 && cleaned[recent_start].role == Role::Tool {
            recent_start -= 1;
        }

        let middle = &cleaned[1..recent_start];
        let mut summary_lines: Vec<String> = Vec::with_capacity(SUMMARY_LINE_LIMIT + 1);
        for (idx, msg) in middle.iter().take(SUMMARY_LINE_LIMIT).enumerate() {
            let mut text = msg.content.replace('\n', " ").trim().to_string();
            if text.len() > SUMMARY_TEXT_LIMIT {
                text = format!("{}...", truncate_at_boundary(&text, SUMMARY_TEXT_LIMIT - 3));
            }
            summary_lines.push(format!("{:02}. {}: {}", idx + 1, role_name(msg.role), text));
        }
        if middle.len() > SUMMARY_LINE_LIMIT {
            summary_lines.push(format!(
                "... {} more messages omitted ...",
                middle.len() - SUMMARY_LINE_LIMIT
            ));
        }

        let summary = Message::system(format!(
            "Compressed memory summary:\n{}",
            summary_lines.join("\n")
        ))
        .with_name(MEMORY_SUMMARY_NAME);

        let mut compacted = Vec::with_capacity(2 + cleaned.len() - recent_start);
        compacted.push(head);
        compacted.push(summary);
        compacted.extend_from_slice(&cleaned[recent_start..]);
        (compacted, true)
    }
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

/// Cut at `limit` without splitting a UTF-8 code point.
fn truncate_at_boundary(text: &str, limit: usize) -> &str {
    if text.len() <= limit {
        return text;
    }
    let mut end = limit;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn filler(role: Role, chars: usize) -> Message {
        let content = "x".repeat(chars);
        match role {
            Role::System => Message::system(content),
            Role::User => Message::user(content),
            Role::Assistant => Message::assistant(content),
            Role::Tool => Message::tool_result("call-x", content),
        }
    }

    /// 30 messages, ~30 000 chars: system head, then alternating
    /// assistant/user filler.
    fn big_transcript() -> Vec<Message> {
        let mut messages = vec![Message::system("system prompt")];
        for i in 0..29 {
            let role = if i % 2 == 0 { Role::Assistant } else { Role::User };
            messages.push(filler(role, 1_035));
        }
        messages
    }

    #[test]
    fn under_threshold_is_a_no_op() {
        let compactor = MemoryCompactor::default();
        let messages = vec![
            Message::system("sys"),
            Message::user("hello"),
            Message::assistant("world"),
        ];
        let (out, compacted) = compactor.compact(&messages);
        assert!(!compacted);
        assert_eq!(out.len(), 3);
        assert_eq!(out[1].content, "hello");
    }

    #[test]
    fn empty_transcript_is_a_no_op() {
        let (out, compacted) = MemoryCompactor::default().compact(&[]);
        assert!(!compacted);
        assert!(out.is_empty());
    }

    #[test]
    fn too_few_messages_are_left_alone_even_over_threshold() {
        let compactor = MemoryCompactor::new(100, 10);
        let messages = vec![
            Message::system("sys"),
            filler(Role::User, 500),
            filler(Role::Assistant, 500),
        ];
        let (out, compacted) = compactor.compact(&messages);
        assert!(!compacted);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn over_threshold_produces_summary_after_head() {
        let compactor = MemoryCompactor::default();
        let (out, compacted) = compactor.compact(&big_transcript());
        assert!(compacted);
        assert_eq!(out[0].content, "system prompt");
        assert_eq!(out[1].role, Role::System);
        assert_eq!(out[1].name.as_deref(), Some("memory_summary"));
        assert!(out[1].content.starts_with("Compressed memory summary:\n"));
        // head + summary + kept tail
        assert_eq!(out.len(), 2 + compactor.keep_recent_messages);
    }

    #[test]
    fn recent_tail_survives_verbatim() {
        let compactor = MemoryCompactor::default();
        let messages = big_transcript();
        let tail: Vec<String> = messages[messages.len() - 10..]
            .iter()
            .map(|m| m.content.clone())
            .collect();
        let (out, _) = compactor.compact(&messages);
        let kept: Vec<String> = out[out.len() - 10..]
            .iter()
            .map(|m| m.content.clone())
            .collect();
        assert_eq!(kept, tail);
    }

    #[test]
    fn boundary_fixup_never_leads_with_tool_message() {
        let compactor = MemoryCompactor::default();
        let mut messages = big_transcript();
        // Place a tool result exactly where the kept tail would begin.
        let boundary = messages.len() - 10;
        messages[boundary - 1] = Message::assistant("calling a tool");
        messages[boundary] = filler(Role::Tool, 1_035);
        let (out, compacted) = compactor.compact(&messages);
        assert!(compacted);
        assert_ne!(out[2].role, Role::Tool, "message after summary must not be tool-role");
        assert_eq!(out[2].content, "calling a tool");
    }

    #[test]
    fn stale_summary_is_replaced_not_stacked() {
        let compactor = MemoryCompactor::default();
        let (first, _) = compactor.compact(&big_transcript());
        // Grow the transcript again past the threshold.
        let mut grown = first.clone();
        for _ in 0..20 {
            grown.push(filler(Role::User, 2_000));
        }
        let (second, compacted) = compactor.compact(&grown);
        assert!(compacted);
        let summaries = second
            .iter()
            .filter(|m| m.name.as_deref() == Some("memory_summary"))
            .count();
        assert_eq!(summaries, 1);
    }

    #[test]
    fn summary_lines_are_truncated_and_flattened() {
        let compactor = MemoryCompactor::new(100, 2);
        let mut messages = vec![Message::system("sys")];
        messages.push(Message::user(format!("line one\nline two {}", "y".repeat(300))));
        for _ in 0..4 {
            messages.push(filler(Role::Assistant, 50));
        }
        let (out, compacted) = compactor.compact(&messages);
        assert!(compacted);
        let summary = &out[1].content;
        assert!(summary.contains("01. user:"));
        let quoted = summary.lines().nth(1).unwrap();
        assert!(quoted.contains("line one line two"), "newlines must be flattened: {quoted}");
        assert!(quoted.len() <= "01. user: ".len() + 120);
        assert!(quoted.ends_with("..."));
    }

    #[test]
    fn long_middle_collapses_with_omitted_line() {
        let compactor = MemoryCompactor::new(100, 2);
        let mut messages = vec![Message::system("sys")];
        for _ in 0..50 {
            messages.push(filler(Role::User, 40));
        }
        let (out, compacted) = compactor.compact(&messages);
        assert!(compacted);
        assert!(out[1].content.contains("more messages omitted"));
    }

    #[test]
    fn usage_percentage_saturates_at_100() {
        let compactor = MemoryCompactor::new(1_000, 10);
        let small = vec![filler(Role::User, 500)];
        assert_eq!(compactor.usage_percentage(&small), 50);
        let big = vec![filler(Role::User, 5_000)];
        assert_eq!(compactor.usage_percentage(&big), 100);
        assert_eq!(compactor.usage_percentage(&[]), 0);
    }

    #[test]
    fn compacting_twice_is_stable_when_under_threshold() {
        let compactor = MemoryCompactor::default();
        let (once, compacted) = compactor.compact(&big_transcript());
        assert!(compacted);
        let (twice, again) = compactor.compact(&once);
        assert!(!again);
        // The stale summary is dropped, then the list is back under threshold.
        assert_eq!(twice.len(), once.len() - 1);
    }
}
