// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The per-workspace agent runtime (spec §4.3-§4.10): durable history and
//! partial stores, the streaming state machine, tool-call dispatch, context
//! compaction, and token accounting — everything a `cmux-bridge` control API
//! dispatches a workspace's operations into via `AgentSession`.

mod agent_session;
mod compaction;
mod consumer_calculator;
mod extension_metadata;
mod history;
mod keyed_mutex;
mod partial;
mod stream_manager;
mod tokenizer;

pub use agent_session::{AgentSession, AgentSessionError, ChatEvent, SendMessageOptions};
pub use compaction::{build_compaction_request, smart_truncate, CompactionStrategy};
pub use consumer_calculator::{
    calculate as calculate_consumer_usage, ConsumerUsage, ASSISTANT_CONSUMER, ASSISTANT_REASONING_CONSUMER, USER_CONSUMER,
};
pub use extension_metadata::{ExtensionMetadataEntry, ExtensionMetadataError, ExtensionMetadataStore, WorkspaceExtensionMetadata};
pub use history::{HistoryError, HistoryStore};
pub use keyed_mutex::KeyedMutex;
pub use partial::{PartialError, PartialFlushThrottle, PartialStore};
pub use stream_manager::{StreamErrorType, StreamEvent, StreamManager, StreamManagerError};
pub use tokenizer::{ApproxTokenizer, Tokenizer};
