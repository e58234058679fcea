// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The canonical message shape (spec §3 "Message"): what `HistoryStore` and
//! `PartialStore` persist, what `ConsumerCalculator` walks, and what a
//! `ModelProvider` is handed to translate into its own wire format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Usage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Lifecycle state of a `tool` part (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolPartState {
    InputStreaming,
    InputAvailable,
    OutputAvailable,
    Errored,
}

/// Lifecycle state of a `text` part. Optional — most persisted text parts
/// have none; a part still being streamed carries `Streaming`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TextPartState {
    Streaming,
    Done,
}

/// One element of `Message::parts` (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePart {
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        state: Option<TextPartState>,
    },
    Reasoning {
        text: String,
    },
    Tool {
        tool_call_id: String,
        tool_name: String,
        input: serde_json::Value,
        state: ToolPartState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<serde_json::Value>,
    },
    File {
        url: String,
        media_type: String,
    },
}

impl MessagePart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into(), state: None }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessagePart::Text { text, .. } => Some(text),
            _ => None,
        }
    }

    /// Approximate character length used by the default tokenizer fallback
    /// (`ceil(len/4)`, SPEC_FULL.md §B.1) and by `ConsumerCalculator`.
    pub fn approx_len(&self) -> usize {
        match self {
            MessagePart::Text { text, .. } => text.len(),
            MessagePart::Reasoning { text } => text.len(),
            MessagePart::Tool { input, output, tool_name, .. } => {
                tool_name.len()
                    + input.to_string().len()
                    + output.as_ref().map(|o| o.to_string().len()).unwrap_or(0)
            }
            MessagePart::File { url, media_type } => url.len() + media_type.len(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageMetadata {
    pub timestamp: Option<DateTime<Utc>>,
    /// Monotonic, unique per workspace (spec §3 History invariant 1/2).
    pub history_sequence: i64,
    pub model: Option<String>,
    pub usage: Option<Usage>,
    pub provider_metadata: Option<serde_json::Value>,
    /// `true` while this message is the in-progress partial (spec §3 Partial).
    pub partial: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub parts: Vec<MessagePart>,
    pub metadata: MessageMetadata,
}

impl Message {
    pub fn user(id: impl Into<String>, history_sequence: i64, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::User,
            parts: vec![MessagePart::text(text)],
            metadata: MessageMetadata { history_sequence, timestamp: Some(Utc::now()), ..Default::default() },
        }
    }

    pub fn assistant(id: impl Into<String>, history_sequence: i64) -> Self {
        Self {
            id: id.into(),
            role: Role::Assistant,
            parts: Vec::new(),
            metadata: MessageMetadata { history_sequence, timestamp: Some(Utc::now()), ..Default::default() },
        }
    }

    /// Concatenation of all `text` parts, in order. `None` if there are none.
    pub fn as_text(&self) -> Option<String> {
        let joined: String =
            self.parts.iter().filter_map(MessagePart::as_text).collect::<Vec<_>>().join("");
        if joined.is_empty() && !self.parts.iter().any(|p| matches!(p, MessagePart::Text { .. })) {
            None
        } else {
            Some(joined)
        }
    }

    pub fn is_partial(&self) -> bool {
        self.metadata.partial.unwrap_or(false)
    }

    pub fn approx_char_len(&self) -> usize {
        self.parts.iter().map(MessagePart::approx_len).sum()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
