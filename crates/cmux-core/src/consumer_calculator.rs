// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Attribute a workspace's token usage to named consumers (spec §4.10):
//! `User`, `Assistant`, `Assistant (reasoning)`, and one entry per tool
//! name actually used in the history.

use cmux_model::{Message, MessagePart, Role, ToolSchema};

use crate::tokenizer::Tokenizer;

pub const USER_CONSUMER: &str = "User";
pub const ASSISTANT_CONSUMER: &str = "Assistant";
pub const ASSISTANT_REASONING_CONSUMER: &str = "Assistant (reasoning)";

#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerUsage {
    pub name: String,
    pub tokens: usize,
    /// Schema-definition overhead, counted once per tool regardless of call count.
    pub fixed_tokens: Option<usize>,
    /// Serialized input + output tokens summed across every call.
    pub variable_tokens: Option<usize>,
    pub percentage: f64,
}

/// Walk `messages`, attributing tokens to consumers, sorted by total tokens
/// descending. `tool_schemas` supplies the fixed per-tool definition
/// overhead for any tool actually called in `messages`.
pub fn calculate(messages: &[Message], tool_schemas: &[ToolSchema], tokenizer: &dyn Tokenizer) -> Vec<ConsumerUsage> {
    let mut user_tokens = 0usize;
    let mut assistant_tokens = 0usize;
    let mut reasoning_tokens = 0usize;
    let mut tool_variable: std::collections::BTreeMap<String, usize> = std::collections::BTreeMap::new();

    for message in messages {
        for part in &message.parts {
            match part {
                MessagePart::Text { text, .. } => {
                    let count = tokenizer.count(text);
                    match message.role {
                        Role::User => user_tokens += count,
                        Role::Assistant => assistant_tokens += count,
                    }
                }
                MessagePart::Reasoning { text } => {
                    reasoning_tokens += tokenizer.count(text);
                }
                MessagePart::Tool { tool_name, input, output, .. } => {
                    let mut count = tokenizer.count(&input.to_string());
                    if let Some(output) = output {
                        count += tokenizer.count(&output.to_string());
                    }
                    *tool_variable.entry(tool_name.clone()).or_insert(0) += count;
                }
                MessagePart::File { url, media_type } => {
                    let count = tokenizer.count(url) + tokenizer.count(media_type);
                    match message.role {
                        Role::User => user_tokens += count,
                        Role::Assistant => assistant_tokens += count,
                    }
                }
            }
        }
    }

    let mut entries = vec![
        ConsumerUsage { name: USER_CONSUMER.to_string(), tokens: user_tokens, fixed_tokens: None, variable_tokens: None, percentage: 0.0 },
        ConsumerUsage { name: ASSISTANT_CONSUMER.to_string(), tokens: assistant_tokens, fixed_tokens: None, variable_tokens: None, percentage: 0.0 },
        ConsumerUsage {
            name: ASSISTANT_REASONING_CONSUMER.to_string(),
            tokens: reasoning_tokens,
            fixed_tokens: None,
            variable_tokens: None,
            percentage: 0.0,
        },
    ];

    for (tool_name, variable) in tool_variable {
        let fixed = tool_schemas
            .iter()
            .find(|s| s.name == tool_name)
            .map(|s| tokenizer.count(&s.description))
            .unwrap_or(0);
        entries.push(ConsumerUsage {
            name: tool_name,
            tokens: fixed + variable,
            fixed_tokens: Some(fixed),
            variable_tokens: Some(variable),
            percentage: 0.0,
        });
    }

    let total: usize = entries.iter().map(|e| e.tokens).sum();
    for entry in &mut entries {
        entry.percentage = if total == 0 { 0.0 } else { (entry.tokens as f64 / total as f64) * 100.0 };
    }

    entries.sort_by(|a, b| b.tokens.cmp(&a.tokens).then_with(|| a.name.cmp(&b.name)));
    entries
}
