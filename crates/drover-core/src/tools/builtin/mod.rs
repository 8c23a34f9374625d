// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod control;
mod fs;
mod memory;
mod subtask;
mod todo;

pub use control::{AskUserTool, TaskFinishTool};
pub use fs::{DeleteFileTool, ListFilesTool, ReadFileTool, WriteFileTool};
pub use memory::CompressMemoryTool;
pub use subtask::{BatchSubTasksTool, CreateSubTaskTool};
pub use todo::{TodoReadTool, TodoWriteTool};

use crate::tools::ToolRegistry;

/// Register the built-in tool set.  Shell, image, and skill tools are the
/// embedding application's to supply; the planner still knows their names.
pub fn register_defaults(registry: &mut ToolRegistry) -> anyhow::Result<()> {
    registry.register(TaskFinishTool)?;
    registry.register(AskUserTool)?;
    registry.register(TodoWriteTool)?;
    registry.register(TodoReadTool)?;
    registry.register(CompressMemoryTool)?;
    registry.register(ReadFileTool)?;
    registry.register(WriteFileTool)?;
    registry.register(ListFilesTool)?;
    registry.register(DeleteFileTool)?;
    registry.register(CreateSubTaskTool)?;
    registry.register(BatchSubTasksTool)?;
    Ok(())
}
