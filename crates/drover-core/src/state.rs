// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use drover_model::Message;

use crate::types::{AgentStatus, CycleRecord};

/// Key prefix for checkpoints stored through a key-value backend.
const KEY_PREFIX: &str = "v_agent:checkpoint:";

/// A serializable snapshot sufficient to resume a run at a cycle boundary.
///
/// Enums serialize as their string names; unknown fields are tolerated on
/// load so older checkpoints keep working across upgrades.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub task_id: String,
    pub cycle_index: u32,
    pub status: AgentStatus,
    pub messages: Vec<Message>,
    pub cycles: Vec<CycleRecord>,
    #[serde(default)]
    pub shared_state: Map<String, Value>,
}

/// Maps `task_id` → checkpoint.  Persistence is best-effort at every cycle
/// boundary; a failing store only aborts the run when the runtime is
/// configured strict.
pub trait StateStore: Send + Sync {
    fn save_checkpoint(&self, checkpoint: &Checkpoint) -> anyhow::Result<()>;
    fn load_checkpoint(&self, task_id: &str) -> anyhow::Result<Option<Checkpoint>>;
    fn delete_checkpoint(&self, task_id: &str) -> anyhow::Result<()>;
    fn list_checkpoints(&self) -> anyhow::Result<Vec<String>>;
}

/// Simple in-memory store for testing and single-process use.
#[derive(Default)]
pub struct InMemoryStateStore {
    store: Mutex<HashMap<String, Checkpoint>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for InMemoryStateStore {
    fn save_checkpoint(&self, checkpoint: &Checkpoint) -> anyhow::Result<()> {
        self.store
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(checkpoint.task_id.clone(), checkpoint.clone());
        Ok(())
    }

    fn load_checkpoint(&self, task_id: &str) -> anyhow::Result<Option<Checkpoint>> {
        Ok(self
            .store
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(task_id)
            .cloned())
    }

    fn delete_checkpoint(&self, task_id: &str) -> anyhow::Result<()> {
        self.store
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(task_id);
        Ok(())
    }

    fn list_checkpoints(&self) -> anyhow::Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .store
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .keys()
            .cloned()
            .collect();
        ids.sort();
        Ok(ids)
    }
}

// ─── Key-value adapter ────────────────────────────────────────────────────────

/// Minimal string key-value surface a durable store has to offer.  Concrete
/// durable backends (Redis and friends) live outside this crate; tests use
/// [`MemoryKvBackend`].
pub trait KvBackend: Send + Sync {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> anyhow::Result<()>;
    fn delete(&self, key: &str) -> anyhow::Result<()>;
    /// All stored keys beginning with `prefix`.
    fn scan(&self, prefix: &str) -> anyhow::Result<Vec<String>>;
}

/// Checkpoint store over any [`KvBackend`], serializing each checkpoint as a
/// JSON blob under `v_agent:checkpoint:{task_id}`.
pub struct KvStateStore<B: KvBackend> {
    backend: B,
}

impl<B: KvBackend> KvStateStore<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    fn key(task_id: &str) -> String {
        format!("{KEY_PREFIX}{task_id}")
    }
}

impl<B: KvBackend> StateStore for KvStateStore<B> {
    fn save_checkpoint(&self, checkpoint: &Checkpoint) -> anyhow::Result<()> {
        let payload = serde_json::to_string(checkpoint)?;
        self.backend.set(&Self::key(&checkpoint.task_id), &payload)
    }

    fn load_checkpoint(&self, task_id: &str) -> anyhow::Result<Option<Checkpoint>> {
        match self.backend.get(&Self::key(task_id))? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn delete_checkpoint(&self, task_id: &str) -> anyhow::Result<()> {
        self.backend.delete(&Self::key(task_id))
    }

    fn list_checkpoints(&self) -> anyhow::Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .backend
            .scan(KEY_PREFIX)?
            .into_iter()
            .filter_map(|key| key.strip_prefix(KEY_PREFIX).map(str::to_string))
            .collect();
        ids.sort();
        Ok(ids)
    }
}

/// In-process [`KvBackend`] used in tests and examples.
#[derive(Default)]
pub struct MemoryKvBackend {
    map: Mutex<HashMap<String, String>>,
}

impl MemoryKvBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvBackend for MemoryKvBackend {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self
            .map
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(key)
            .cloned())
    }

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.map
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.map
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(key);
        Ok(())
    }

    fn scan(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        Ok(self
            .map
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use drover_model::{LlmResponse, TokenUsage};
    use serde_json::json;

    use super::*;

    fn sample_checkpoint(task_id: &str) -> Checkpoint {
        let mut shared_state = Map::new();
        shared_state.insert("todo_list".into(), json!([{"title": "x", "done": true}]));
        Checkpoint {
            task_id: task_id.to_string(),
            cycle_index: 2,
            status: AgentStatus::Completed,
            messages: vec![Message::system("sys"), Message::user("hi")],
            cycles: vec![CycleRecord {
                index: 1,
                llm_response: LlmResponse::text("pong"),
                tool_calls: Vec::new(),
                tool_results: Vec::new(),
                token_usage: TokenUsage {
                    prompt_tokens: 3,
                    completion_tokens: 2,
                    total_tokens: 5,
                },
                elapsed_ms: 12,
                events: vec!["cycle_started".into()],
            }],
            shared_state,
        }
    }

    #[test]
    fn in_memory_save_load_round_trip() {
        let store = InMemoryStateStore::new();
        store.save_checkpoint(&sample_checkpoint("t1")).unwrap();
        let loaded = store.load_checkpoint("t1").unwrap().unwrap();
        assert_eq!(loaded.cycle_index, 2);
        assert_eq!(loaded.status, AgentStatus::Completed);
        assert_eq!(loaded.messages.len(), 2);
        assert_eq!(loaded.cycles.len(), 1);
        assert_eq!(loaded.shared_state["todo_list"][0]["done"], true);
    }

    #[test]
    fn in_memory_load_missing_is_none() {
        let store = InMemoryStateStore::new();
        assert!(store.load_checkpoint("nope").unwrap().is_none());
    }

    #[test]
    fn in_memory_delete_removes() {
        let store = InMemoryStateStore::new();
        store.save_checkpoint(&sample_checkpoint("t1")).unwrap();
        store.delete_checkpoint("t1").unwrap();
        assert!(store.load_checkpoint("t1").unwrap().is_none());
    }

    #[test]
    fn in_memory_list_is_sorted() {
        let store = InMemoryStateStore::new();
        store.save_checkpoint(&sample_checkpoint("beta")).unwrap();
        store.save_checkpoint(&sample_checkpoint("alpha")).unwrap();
        assert_eq!(store.list_checkpoints().unwrap(), vec!["alpha", "beta"]);
    }

    #[test]
    fn kv_store_uses_prefixed_keys() {
        let store = KvStateStore::new(MemoryKvBackend::new());
        store.save_checkpoint(&sample_checkpoint("task-9")).unwrap();
        let raw = store
            .backend
            .get("v_agent:checkpoint:task-9")
            .unwrap()
            .expect("stored under prefixed key");
        assert!(raw.contains("\"COMPLETED\""));
    }

    #[test]
    fn kv_store_round_trip_preserves_fields() {
        let store = KvStateStore::new(MemoryKvBackend::new());
        let original = sample_checkpoint("t2");
        store.save_checkpoint(&original).unwrap();
        let loaded = store.load_checkpoint("t2").unwrap().unwrap();
        assert_eq!(loaded.task_id, original.task_id);
        assert_eq!(loaded.cycle_index, original.cycle_index);
        assert_eq!(loaded.status, original.status);
        assert_eq!(loaded.messages.len(), original.messages.len());
        assert_eq!(loaded.cycles[0].token_usage, original.cycles[0].token_usage);
        assert_eq!(loaded.shared_state, original.shared_state);
    }

    #[test]
    fn kv_store_list_strips_prefix_and_sorts() {
        let store = KvStateStore::new(MemoryKvBackend::new());
        store.save_checkpoint(&sample_checkpoint("zz")).unwrap();
        store.save_checkpoint(&sample_checkpoint("aa")).unwrap();
        assert_eq!(store.list_checkpoints().unwrap(), vec!["aa", "zz"]);
    }

    #[test]
    fn checkpoint_load_tolerates_unknown_fields() {
        let raw = serde_json::to_value(sample_checkpoint("t3")).unwrap();
        let mut obj = raw.as_object().unwrap().clone();
        obj.insert("added_in_future_version".into(), json!(1));
        let loaded: Checkpoint = serde_json::from_value(Value::Object(obj)).unwrap();
        assert_eq!(loaded.task_id, "t3");
    }
}
