// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

fn default_max_cycles() -> u32 {
    20
}

fn default_threshold_chars() -> usize {
    24_000
}

fn default_keep_recent() -> usize {
    10
}

fn default_workers() -> usize {
    4
}

fn default_sub_task_depth() -> usize {
    3
}

/// Top-level runtime configuration.
///
/// These are the process-local knobs of the engine itself.  Model endpoints,
/// credentials, and workspace roots are supplied by the embedding application
/// at construction time, not through this struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Cycle budget applied when a task does not carry its own `max_cycles`.
    #[serde(default = "default_max_cycles")]
    pub default_max_cycles: u32,
    /// When `true`, a failing checkpoint store aborts the run instead of
    /// logging a warning and continuing.
    #[serde(default)]
    pub strict_checkpoints: bool,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub backend: BackendConfig,
}

/// Transcript compaction parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Total transcript size (content characters) above which the compactor
    /// replaces the middle of the history with a summary message.
    #[serde(default = "default_threshold_chars")]
    pub threshold_chars: usize,
    /// Number of trailing messages preserved verbatim through a compaction.
    #[serde(default = "default_keep_recent")]
    pub keep_recent_messages: usize,
}

/// Pooled-backend parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Concurrency limit for sub-task fan-out.  Cycles within one run are
    /// always sequential regardless of this value.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Maximum nesting depth for sub-tasks spawned from within a run.
    #[serde(default = "default_sub_task_depth")]
    pub max_sub_task_depth: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_max_cycles: default_max_cycles(),
            strict_checkpoints: false,
            memory: MemoryConfig::default(),
            backend: BackendConfig::default(),
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            threshold_chars: default_threshold_chars(),
            keep_recent_messages: default_keep_recent(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_sub_task_depth: default_sub_task_depth(),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.default_max_cycles, 20);
        assert!(!cfg.strict_checkpoints);
        assert_eq!(cfg.memory.threshold_chars, 24_000);
        assert_eq!(cfg.memory.keep_recent_messages, 10);
        assert_eq!(cfg.backend.workers, 4);
        assert_eq!(cfg.backend.max_sub_task_depth, 3);
    }

    #[test]
    fn empty_json_deserialises_to_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.default_max_cycles, 20);
        assert_eq!(cfg.memory.threshold_chars, 24_000);
    }

    #[test]
    fn partial_json_overrides_only_named_fields() {
        let cfg: RuntimeConfig =
            serde_json::from_str(r#"{"memory": {"keep_recent_messages": 4}}"#).unwrap();
        assert_eq!(cfg.memory.keep_recent_messages, 4);
        assert_eq!(cfg.memory.threshold_chars, 24_000);
        assert_eq!(cfg.default_max_cycles, 20);
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        let cfg: RuntimeConfig =
            serde_json::from_str(r#"{"future_knob": true, "strict_checkpoints": true}"#).unwrap();
        assert!(cfg.strict_checkpoints);
    }

    #[test]
    fn round_trips_through_json() {
        let cfg = RuntimeConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.backend.workers, cfg.backend.workers);
        assert_eq!(back.memory.threshold_chars, cfg.memory.threshold_chars);
    }
}
