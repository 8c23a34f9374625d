// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use anyhow::bail;

use drover_model::ToolSchema;

use crate::tools::Tool;

/// Central registry holding all available tools.  Read-only after
/// construction; lookups are O(1).
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool.  Duplicate names are rejected.
    pub fn register(&mut self, tool: impl Tool + 'static) -> anyhow::Result<()> {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> anyhow::Result<()> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            bail!("Tool already registered: {name}");
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn has_schema(&self, name: &str) -> bool {
        self.tools
            .get(name)
            .map(|t| t.schema().is_some())
            .unwrap_or(false)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Model-facing schemas for the given names, preserving input order.
    /// Names without a registered, schema-bearing tool are skipped.
    pub fn schemas_for(&self, names: &[String]) -> Vec<ToolSchema> {
        names
            .iter()
            .filter_map(|name| {
                let tool = self.tools.get(name)?;
                let parameters = tool.schema()?;
                Some(ToolSchema {
                    name: tool.name().to_string(),
                    description: tool.description().to_string(),
                    parameters,
                })
            })
            .collect()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
