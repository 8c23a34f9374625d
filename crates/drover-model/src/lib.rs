// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod client;
mod scripted;
mod types;

pub use client::{LlmClient, StreamCallback};
pub use scripted::{ScriptStep, ScriptedLlm};
pub use types::{LlmResponse, Message, Role, TokenUsage, ToolCall, ToolSchema};
