// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Request a history compaction (spec §4.8). The actual summarization and
//! truncation happens in `StreamManager` against the session's `HistoryStore`
//! — this tool only signals the request via a [`ToolEvent`]; it carries no
//! summarization logic of its own.
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::debug;

use cmux_config::Mode;

use crate::command_approval::ApprovalPolicy;
use crate::events::ToolEvent;
use crate::tool::{Tool, ToolCall, ToolOutput};

pub struct CompactTool {
    event_tx: mpsc::Sender<ToolEvent>,
}

impl CompactTool {
    pub fn new(event_tx: mpsc::Sender<ToolEvent>) -> Self {
        Self { event_tx }
    }
}

#[async_trait]
impl Tool for CompactTool {
    fn name(&self) -> &str {
        "compact"
    }

    fn description(&self) -> &str {
        "Summarize the conversation so far and replace the older history with the summary.\n\n\
         Use this when the conversation has grown long and you're at risk of losing context \
         on the original task. The summary replaces older messages; recent messages are kept \
         verbatim."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {},
            "additionalProperties": false
        })
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }

    fn modes(&self) -> &[Mode] {
        &[Mode::Exec]
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        debug!("compact tool");
        let _ = self.event_tx.send(ToolEvent::CompactRequested).await;
        ToolOutput::ok(&call.id, "compaction requested")
    }
}
