// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Wire shapes for the control API (spec §6): a flat request/response pair
//! carried over `POST /ipc/<channel>`, and the subscribe/unsubscribe frames
//! that drive the `workspace:chat` / `workspace:metadata` WebSocket
//! channels. Tagged results are serialized at this boundary only — callers
//! inside the crate still use `Result<T, E>` (SPEC_FULL.md §A.1).
//!
//! ```text
//! client                              bridge
//!   | --- POST /ipc/workspace.create -->  |
//!   | <-- { success, data | error } ----  |
//!   | --- { type: "subscribe", ... } -->  |  (WS)
//!   | <-- { type: "chat", event } ------  |
//!   | <-- { type: "metadata", event } --  |
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use cmux_core::StreamEvent;
use cmux_workspace::WorkspaceManagerEvent;

/// Body of `POST /ipc/<channel>` (spec §6 "`{ args: [...] }`").
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IpcRequest {
    #[serde(default)]
    pub args: Vec<Value>,
}

/// Response of `POST /ipc/<channel>` (spec §6 "`{success,data}|{success:false,error}`").
#[derive(Debug, Clone, Serialize)]
pub struct IpcResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IpcResponse {
    pub fn ok(data: Value) -> Self {
        Self { success: true, data: Some(data), error: None }
    }

    pub fn ok_empty() -> Self {
        Self { success: true, data: None, error: None }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self { success: false, data: None, error: Some(message.into()) }
    }
}

/// Known subscription channel names (spec §6).
pub const CHANNEL_CHAT: &str = "workspace:chat";
pub const CHANNEL_METADATA: &str = "workspace:metadata";

/// Inbound WS control frame: subscribe to or leave a channel.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SubscribeFrame {
    Subscribe {
        channel: String,
        #[serde(rename = "workspaceId", default)]
        workspace_id: Option<String>,
    },
    Unsubscribe {
        channel: String,
        #[serde(rename = "workspaceId", default)]
        workspace_id: Option<String>,
    },
}

/// Outbound WS event envelope. `channel` lets a client demultiplex several
/// subscriptions over one socket.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OutboundEvent {
    Chat {
        #[serde(rename = "workspaceId")]
        workspace_id: String,
        event: WireStreamEvent,
    },
    Metadata {
        event: WireWorkspaceEvent,
    },
    /// A subscriber's broadcast receiver lagged and dropped events before it
    /// could read them (spec §5 "subscriber-lagged").
    SubscriberLagged {
        channel: String,
        skipped: u64,
    },
    Error {
        code: u16,
        message: String,
    },
}

/// Serializable projection of [`cmux_core::StreamEvent`] (spec §7). Kept
/// distinct from the internal enum so the wire shape doesn't shift every
/// time an internal field is added.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WireStreamEvent {
    StreamStart { message_id: String, history_sequence: i64 },
    StreamDelta { message_id: String, text: String },
    ReasoningDelta { message_id: String, text: String },
    ToolCallStart { message_id: String, tool_call_id: String, tool_name: String, args: Value },
    ToolCallDelta { message_id: String, tool_call_id: String, delta: String },
    ToolCallEnd { message_id: String, tool_call_id: String, output: String, is_error: bool },
    ReasoningEnd { message_id: String },
    StreamEnd { message_id: String, message: Value },
    StreamAbort { message_id: String },
    StreamError { message_id: String, error_type: &'static str, retryable: bool, message: String },
    CaughtUp,
}

impl From<StreamEvent> for WireStreamEvent {
    fn from(ev: StreamEvent) -> Self {
        match ev {
            StreamEvent::StreamStart { message_id, history_sequence } => {
                WireStreamEvent::StreamStart { message_id, history_sequence }
            }
            StreamEvent::StreamDelta { message_id, text } => WireStreamEvent::StreamDelta { message_id, text },
            StreamEvent::ReasoningDelta { message_id, text } => WireStreamEvent::ReasoningDelta { message_id, text },
            StreamEvent::ToolCallStart { message_id, tool_call_id, tool_name, args } => {
                WireStreamEvent::ToolCallStart { message_id, tool_call_id, tool_name, args }
            }
            StreamEvent::ToolCallDelta { message_id, tool_call_id, delta } => {
                WireStreamEvent::ToolCallDelta { message_id, tool_call_id, delta }
            }
            StreamEvent::ToolCallEnd { message_id, tool_call_id, output, is_error } => {
                WireStreamEvent::ToolCallEnd { message_id, tool_call_id, output, is_error }
            }
            StreamEvent::ReasoningEnd { message_id } => WireStreamEvent::ReasoningEnd { message_id },
            StreamEvent::StreamEnd { message_id, message } => {
                let message = serde_json::to_value(*message).unwrap_or(Value::Null);
                WireStreamEvent::StreamEnd { message_id, message }
            }
            StreamEvent::StreamAbort { message_id } => WireStreamEvent::StreamAbort { message_id },
            StreamEvent::StreamError { message_id, error_type, message } => WireStreamEvent::StreamError {
                message_id,
                error_type: error_type.kind(),
                retryable: error_type.is_retryable(),
                message,
            },
            StreamEvent::CaughtUp => WireStreamEvent::CaughtUp,
        }
    }
}

/// Serializable projection of [`cmux_workspace::WorkspaceManagerEvent`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WireWorkspaceEvent {
    Created { workspace: Value },
    Renamed { old_id: String, workspace: Value },
    Forked { source_id: String, workspace: Value },
    Removed { workspace_id: String },
}

impl From<WorkspaceManagerEvent> for WireWorkspaceEvent {
    fn from(ev: WorkspaceManagerEvent) -> Self {
        match ev {
            WorkspaceManagerEvent::Created(ws) => {
                WireWorkspaceEvent::Created { workspace: serde_json::to_value(ws).unwrap_or(Value::Null) }
            }
            WorkspaceManagerEvent::Renamed { old_id, workspace } => WireWorkspaceEvent::Renamed {
                old_id,
                workspace: serde_json::to_value(workspace).unwrap_or(Value::Null),
            },
            WorkspaceManagerEvent::Forked { source_id, workspace } => WireWorkspaceEvent::Forked {
                source_id,
                workspace: serde_json::to_value(workspace).unwrap_or(Value::Null),
            },
            WorkspaceManagerEvent::Removed { workspace_id } => WireWorkspaceEvent::Removed { workspace_id },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipc_response_ok_round_trips_through_json() {
        let resp = IpcResponse::ok(serde_json::json!({"a": 1}));
        let text = serde_json::to_string(&resp).unwrap();
        assert!(text.contains("\"success\":true"));
        assert!(!text.contains("error"));
    }

    #[test]
    fn ipc_response_err_omits_data() {
        let resp = IpcResponse::err("boom");
        let text = serde_json::to_string(&resp).unwrap();
        assert!(text.contains("\"success\":false"));
        assert!(text.contains("\"error\":\"boom\""));
        assert!(!text.contains("\"data\""));
    }

    #[test]
    fn subscribe_frame_parses_workspace_id() {
        let frame: SubscribeFrame =
            serde_json::from_str(r#"{"type":"subscribe","channel":"workspace:chat","workspaceId":"ws1"}"#).unwrap();
        match frame {
            SubscribeFrame::Subscribe { channel, workspace_id } => {
                assert_eq!(channel, CHANNEL_CHAT);
                assert_eq!(workspace_id.as_deref(), Some("ws1"));
            }
            _ => panic!("expected Subscribe"),
        }
    }
}
