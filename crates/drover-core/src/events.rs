// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use serde_json::Value;

/// Event callback: `(event_name, payload)`.
///
/// Handlers are invoked synchronously on the emitting task, in subscription
/// order, and must not panic or block; there is no backpressure.
pub type LogHandler = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// Lifecycle event names emitted by the runtime and session layers.
pub mod event_names {
    pub const RUN_STARTED: &str = "run_started";
    pub const CYCLE_STARTED: &str = "cycle_started";
    pub const CYCLE_LLM_RESPONSE: &str = "cycle_llm_response";
    pub const TOOL_CALLED: &str = "tool_called";
    pub const TOOL_RESULT: &str = "tool_result";
    pub const MEMORY_COMPACTED: &str = "memory_compacted";
    pub const CYCLE_COMPLETED: &str = "cycle_completed";
    pub const CYCLE_FAILED: &str = "cycle_failed";
    pub const RUN_COMPLETED: &str = "run_completed";
    pub const RUN_WAIT_USER: &str = "run_wait_user";
    pub const RUN_MAX_CYCLES: &str = "run_max_cycles";
    pub const RUN_CANCELLED: &str = "run_cancelled";

    pub const SESSION_RUN_START: &str = "session_run_start";
    pub const SESSION_RUN_END: &str = "session_run_end";
    pub const SESSION_STEER_QUEUED: &str = "session_steer_queued";
    pub const SESSION_FOLLOW_UP_QUEUED: &str = "session_follow_up_queued";
}

/// Fan-out point for lifecycle events.  Cloning shares the handler list as it
/// was at clone time; the sink is assembled once per run.
#[derive(Clone, Default)]
pub struct EventSink {
    handlers: Vec<LogHandler>,
}

impl EventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handler(mut self, handler: LogHandler) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn push(&mut self, handler: LogHandler) {
        self.handlers.push(handler);
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn emit(&self, name: &str, payload: Value) {
        for handler in &self.handlers {
            handler(name, &payload);
        }
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EventSink({} handlers)", self.handlers.len())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;

    #[test]
    fn emit_reaches_all_handlers_in_order() {
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let mut sink = EventSink::new();
        for tag in ["a", "b"] {
            let seen = Arc::clone(&seen);
            sink.push(Arc::new(move |name, _| {
                seen.lock().unwrap().push(format!("{tag}:{name}"))
            }));
        }
        sink.emit(event_names::RUN_STARTED, json!({}));
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["a:run_started", "b:run_started"]
        );
    }

    #[test]
    fn empty_sink_emits_nowhere() {
        let sink = EventSink::new();
        assert!(sink.is_empty());
        sink.emit("anything", json!({"x": 1}));
    }

    #[test]
    fn payload_is_passed_through() {
        let captured: Arc<Mutex<Option<Value>>> = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&captured);
        let sink = EventSink::new()
            .with_handler(Arc::new(move |_, payload| {
                *slot.lock().unwrap() = Some(payload.clone())
            }));
        sink.emit(event_names::TOOL_CALLED, json!({"tool_name": "read_file"}));
        assert_eq!(
            captured.lock().unwrap().as_ref().unwrap()["tool_name"],
            "read_file"
        );
    }
}
