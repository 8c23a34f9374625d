// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Canonical tool names.  The planner assembles per-task tool lists from
//! these; handlers for the shell, image, and skill groups are supplied by the
//! embedding application.

pub const TASK_FINISH: &str = "task_finish";
pub const ASK_USER: &str = "ask_user";

pub const READ_FILE: &str = "read_file";
pub const WRITE_FILE: &str = "write_file";
pub const LIST_FILES: &str = "list_files";
pub const DELETE_FILE: &str = "delete_file";

pub const BASH: &str = "bash";
pub const CHECK_BACKGROUND_COMMAND: &str = "check_background_command";

pub const CREATE_SUB_TASK: &str = "create_sub_task";
pub const BATCH_SUB_TASKS: &str = "batch_sub_tasks";

pub const COMPRESS_MEMORY: &str = "compress_memory";
pub const TODO_WRITE: &str = "todo_write";
pub const TODO_READ: &str = "todo_read";

pub const READ_IMAGE: &str = "read_image";
pub const ACTIVATE_SKILL: &str = "activate_skill";

/// The workspace tool group appended when a task enables the workspace.
pub const WORKSPACE_TOOLS: &[&str] = &[READ_FILE, WRITE_FILE, LIST_FILES, DELETE_FILE];

/// Shell tool group for `agent_type == "computer"`.
pub const SHELL_TOOLS: &[&str] = &[BASH, CHECK_BACKGROUND_COMMAND];

/// Sub-task tool group.
pub const SUB_TASK_TOOLS: &[&str] = &[CREATE_SUB_TASK, BATCH_SUB_TASKS];
