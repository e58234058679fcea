// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Submit a plan for user review while in plan mode (spec §4.8). Disabled
//! under the exec-mode canonical policy — plan mode is where a plan gets
//! proposed, not executed.
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::debug;

use cmux_config::Mode;

use crate::command_approval::ApprovalPolicy;
use crate::events::ToolEvent;
use crate::tool::{Tool, ToolCall, ToolOutput};

pub struct ProposePlanTool {
    event_tx: mpsc::Sender<ToolEvent>,
}

impl ProposePlanTool {
    pub fn new(event_tx: mpsc::Sender<ToolEvent>) -> Self {
        Self { event_tx }
    }
}

#[async_trait]
impl Tool for ProposePlanTool {
    fn name(&self) -> &str {
        "propose_plan"
    }

    fn description(&self) -> &str {
        "Present a structured implementation plan to the user for approval.\n\n\
         Use this once you've finished designing an approach in plan mode. The plan is shown \
         to the user verbatim (markdown); it is not executed. Switching to exec mode \
         afterward requires an explicit user request."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "plan": {
                    "type": "string",
                    "description": "The plan, formatted as markdown"
                }
            },
            "required": ["plan"],
            "additionalProperties": false
        })
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }

    fn modes(&self) -> &[Mode] {
        &[Mode::Plan]
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let plan = match call.args.get("plan").and_then(|v| v.as_str()) {
            Some(p) => p.to_string(),
            None => return ToolOutput::err(&call.id, "missing 'plan'"),
        };

        debug!(len = plan.len(), "propose_plan tool");

        let _ = self.event_tx.send(ToolEvent::PlanProposed(plan.clone())).await;
        ToolOutput::ok(&call.id, plan)
    }
}
