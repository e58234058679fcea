// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use cmux_config::Mode;

/// A structured todo item managed by the todo_write tool.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TodoItem {
    pub id: String,
    pub content: String,
    /// One of: "pending", "in_progress", "completed", "cancelled"
    pub status: String,
}

/// Events emitted by tools to communicate state changes back to the agent
/// loop. `StreamManager` translates these into stream events (spec §5).
#[derive(Debug)]
pub enum ToolEvent {
    TodoUpdate(Vec<TodoItem>),
    ModeChanged(Mode),
    /// `compact` tool was invoked: `StreamManager` should summarize and
    /// truncate the session's `HistoryStore` entries (spec §4.3/§4.6).
    CompactRequested,
    /// `propose_plan` tool was invoked with the given markdown plan body.
    PlanProposed(String),
}
