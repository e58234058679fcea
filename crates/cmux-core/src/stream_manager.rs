// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Runs one LLM streaming exchange for a workspace (spec §4.6, "core of the
//! core"): `idle -> starting -> streaming -> committing -> idle`, with
//! `aborted`/`errored` branches off `streaming`. Owns the workspace's single
//! stream slot, drives the provider, dispatches tool calls, and keeps the
//! `PartialStore` up to date while the turn is in flight.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use cmux_model::{CompletionRequest, Message, MessagePart, ModelProvider, ResponseEvent, TextPartState, ToolPartState, Usage};
use cmux_tools::{ToolCall, ToolRegistry};
use futures::StreamExt;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex as AsyncMutex, Notify};
use tracing::warn;
use uuid::Uuid;

use crate::history::HistoryStore;
use crate::partial::{PartialFlushThrottle, PartialStore};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Stable stream error kinds (spec §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamErrorType {
    Authentication,
    Quota,
    ModelNotFound,
    ContextExceeded,
    Aborted,
    Network,
    Unknown,
}

impl StreamErrorType {
    pub fn kind(&self) -> &'static str {
        match self {
            StreamErrorType::Authentication => "authentication",
            StreamErrorType::Quota => "quota",
            StreamErrorType::ModelNotFound => "model_not_found",
            StreamErrorType::ContextExceeded => "context_exceeded",
            StreamErrorType::Aborted => "aborted",
            StreamErrorType::Network => "network",
            StreamErrorType::Unknown => "unknown",
        }
    }

    /// Spec §7 auto-retry predicate: eligible kinds are anything NOT in
    /// `{authentication, quota, model_not_found, context_exceeded, aborted}`.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            StreamErrorType::Authentication
                | StreamErrorType::Quota
                | StreamErrorType::ModelNotFound
                | StreamErrorType::ContextExceeded
                | StreamErrorType::Aborted
        )
    }

    /// Best-effort classification from a provider error message. Real
    /// providers would carry a structured error code; the abstract
    /// `ModelProvider` contract (cmux-model §1 non-goal) only gives text.
    fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("auth") || lower.contains("api key") || lower.contains("unauthorized") {
            StreamErrorType::Authentication
        } else if lower.contains("quota") || lower.contains("rate limit") {
            StreamErrorType::Quota
        } else if lower.contains("model") && lower.contains("not found") {
            StreamErrorType::ModelNotFound
        } else if lower.contains("context") && (lower.contains("exceed") || lower.contains("too long") || lower.contains("too large")) {
            StreamErrorType::ContextExceeded
        } else if lower.contains("network") || lower.contains("connection") || lower.contains("timed out") {
            StreamErrorType::Network
        } else {
            StreamErrorType::Unknown
        }
    }
}

#[derive(Debug, Clone)]
pub enum StreamEvent {
    StreamStart { message_id: String, history_sequence: i64 },
    StreamDelta { message_id: String, text: String },
    ReasoningDelta { message_id: String, text: String },
    ToolCallStart { message_id: String, tool_call_id: String, tool_name: String, args: Value },
    ToolCallDelta { message_id: String, tool_call_id: String, delta: String },
    ToolCallEnd { message_id: String, tool_call_id: String, output: String, is_error: bool },
    ReasoningEnd { message_id: String },
    StreamEnd { message_id: String, message: Box<Message> },
    StreamAbort { message_id: String },
    StreamError { message_id: String, error_type: StreamErrorType, message: String },
    CaughtUp,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StreamManagerError {
    #[error("a stream is already active for this workspace")]
    AlreadyStreaming,
}

struct ActiveStream {
    message_id: String,
    cancel: Arc<AtomicBool>,
    /// Wakes `drive`'s in-flight provider read or tool call the instant
    /// `interrupt` is called, rather than waiting for the next loop
    /// iteration to poll `cancel` (spec §5 "cancels the active provider read
    /// and any in-flight operation"). `cancel` stays the source of truth —
    /// `Notify::notify_waiters` only wakes whoever is waiting *right now*,
    /// so a lone notify with no level-triggered flag behind it can be missed
    /// by a task that hasn't started waiting yet.
    cancel_notify: Arc<Notify>,
    /// Events emitted so far for the current message, for `replayStream`.
    buffered: Arc<StdMutex<Vec<StreamEvent>>>,
}

/// Resolves once `cancel` is set, waking promptly via `notify` instead of
/// only being observed on the next poll. Checks `cancel` both before and
/// after subscribing to `notify` to close the gap between a `notify_waiters`
/// call landing and this task registering as a waiter.
async fn wait_cancelled(cancel: &AtomicBool, notify: &Notify) {
    loop {
        if cancel.load(Ordering::SeqCst) {
            return;
        }
        let notified = notify.notified();
        tokio::pin!(notified);
        if cancel.load(Ordering::SeqCst) {
            return;
        }
        notified.await;
    }
}

/// Per-workspace stream driver. One instance per workspace, held by its
/// `AgentSession` (spec §4.7).
pub struct StreamManager {
    workspace_id: String,
    history: Arc<HistoryStore>,
    partial: Arc<PartialStore>,
    tools: Arc<ToolRegistry>,
    slot: AsyncMutex<Option<ActiveStream>>,
    events_tx: broadcast::Sender<StreamEvent>,
}

impl StreamManager {
    pub fn new(workspace_id: impl Into<String>, history: Arc<HistoryStore>, partial: Arc<PartialStore>, tools: Arc<ToolRegistry>) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { workspace_id: workspace_id.into(), history, partial, tools, slot: AsyncMutex::new(None), events_tx }
    }

    /// Subscribe to this workspace's live stream events. Slow subscribers
    /// that fall behind the bounded channel see a `RecvError::Lagged` on
    /// their next `recv()` (spec §5 "subscriber-lagged"); the stream itself
    /// is never blocked by them.
    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.events_tx.subscribe()
    }

    pub async fn is_streaming(&self) -> bool {
        self.slot.lock().await.is_some()
    }

    /// Re-emit the active stream's buffered events from the start of the
    /// current message (spec §4.6 "Replay"). Empty if no stream is active.
    pub async fn replay_active(&self) -> Vec<StreamEvent> {
        match self.slot.lock().await.as_ref() {
            Some(active) => active.buffered.lock().expect("stream buffer poisoned").clone(),
            None => Vec::new(),
        }
    }

    /// Request an abort of the active stream. Idempotent; a no-op if idle
    /// (spec §5 "`interruptStream` is idempotent").
    pub async fn interrupt(&self) -> bool {
        match self.slot.lock().await.as_ref() {
            Some(active) => {
                active.cancel.store(true, Ordering::SeqCst);
                active.cancel_notify.notify_waiters();
                true
            }
            None => false,
        }
    }

    /// Begin a stream for `request` against `provider`, tagging the
    /// committed message with `model_name`. Returns the new message's id.
    /// Fails `AlreadyStreaming` if a stream is already active for this
    /// workspace (spec §4.6 "starting": at-most-one active stream).
    pub async fn start_stream(
        self: &Arc<Self>,
        provider: Arc<dyn ModelProvider>,
        request: CompletionRequest,
        model_name: String,
    ) -> Result<String, StreamManagerError> {
        let mut slot = self.slot.lock().await;
        if slot.is_some() {
            return Err(StreamManagerError::AlreadyStreaming);
        }

        let existing = self.history.get(&self.workspace_id).await.unwrap_or_default();
        let history_sequence = existing.iter().map(|m| m.metadata.history_sequence).max().unwrap_or(0) + 1;
        let message_id = Uuid::new_v4().to_string();

        let cancel = Arc::new(AtomicBool::new(false));
        let cancel_notify = Arc::new(Notify::new());
        let buffered = Arc::new(StdMutex::new(Vec::new()));
        *slot = Some(ActiveStream {
            message_id: message_id.clone(),
            cancel: cancel.clone(),
            cancel_notify: cancel_notify.clone(),
            buffered: buffered.clone(),
        });
        drop(slot);

        self.emit(&buffered, StreamEvent::StreamStart { message_id: message_id.clone(), history_sequence });

        let this = Arc::clone(self);
        let mid = message_id.clone();
        tokio::spawn(async move {
            this.drive(provider, request, model_name, mid, history_sequence, cancel, cancel_notify, buffered).await;
            *this.slot.lock().await = None;
        });

        Ok(message_id)
    }

    fn emit(&self, buffered: &Arc<StdMutex<Vec<StreamEvent>>>, event: StreamEvent) {
        buffered.lock().expect("stream buffer poisoned").push(event.clone());
        let _ = self.events_tx.send(event);
    }

    async fn drive(
        &self,
        provider: Arc<dyn ModelProvider>,
        request: CompletionRequest,
        model_name: String,
        message_id: String,
        history_sequence: i64,
        cancel: Arc<AtomicBool>,
        cancel_notify: Arc<Notify>,
        buffered: Arc<StdMutex<Vec<StreamEvent>>>,
    ) {
        let mut partial = Message::assistant(message_id.clone(), history_sequence);
        partial.metadata.model = Some(model_name.clone());
        partial.metadata.partial = Some(true);

        let mut stream = match provider.complete(request).await {
            Ok(s) => s,
            Err(e) => {
                self.finish_errored(&buffered, &message_id, &partial, StreamErrorType::classify(&e.to_string()), e.to_string()).await;
                return;
            }
        };

        let mut throttle = PartialFlushThrottle::new();
        let mut tool_calls_started: HashMap<String, bool> = HashMap::new();
        let mut usage: Option<Usage> = None;

        loop {
            let event = tokio::select! {
                _ = wait_cancelled(&cancel, &cancel_notify) => {
                    self.finish_aborted(&buffered, &message_id, &partial).await;
                    return;
                }
                next = stream.next() => match next {
                    Some(event) => event,
                    None => break,
                },
            };

            match event {
                Ok(ResponseEvent::TextDelta(text)) => {
                    append_text(&mut partial, &text);
                    self.emit(&buffered, StreamEvent::StreamDelta { message_id: message_id.clone(), text });
                    self.flush_partial(&self.workspace_id, &partial, &mut throttle, false).await;
                }
                Ok(ResponseEvent::ThinkingDelta(text)) => {
                    append_reasoning(&mut partial, &text);
                    self.emit(&buffered, StreamEvent::ReasoningDelta { message_id: message_id.clone(), text });
                    self.flush_partial(&self.workspace_id, &partial, &mut throttle, false).await;
                }
                Ok(ResponseEvent::ToolCall { id, name, arguments, .. }) => {
                    let parsed: Option<Value> = serde_json::from_str(&arguments).ok();
                    let started = *tool_calls_started.entry(id.clone()).or_insert(false);

                    if !started {
                        tool_calls_started.insert(id.clone(), true);
                        upsert_tool_part(&mut partial, &id, &name, parsed.clone().unwrap_or_else(|| Value::Object(Default::default())), ToolPartState::InputStreaming, None);
                        self.emit(&buffered, StreamEvent::ToolCallStart { message_id: message_id.clone(), tool_call_id: id.clone(), tool_name: name.clone(), args: parsed.clone().unwrap_or_else(|| Value::Object(Default::default())) });
                    } else if parsed.is_none() {
                        self.emit(&buffered, StreamEvent::ToolCallDelta { message_id: message_id.clone(), tool_call_id: id.clone(), delta: arguments.clone() });
                    }

                    if let Some(args) = parsed {
                        upsert_tool_part(&mut partial, &id, &name, args.clone(), ToolPartState::InputAvailable, None);
                        self.flush_partial(&self.workspace_id, &partial, &mut throttle, true).await;

                        let call = ToolCall { id: id.clone(), name: name.clone(), args };
                        let output = tokio::select! {
                            _ = wait_cancelled(&cancel, &cancel_notify) => {
                                self.finish_aborted(&buffered, &message_id, &partial).await;
                                return;
                            }
                            output = self.tools.execute(&call) => output,
                        };
                        upsert_tool_part(
                            &mut partial,
                            &id,
                            &name,
                            call.args.clone(),
                            if output.is_error { ToolPartState::Errored } else { ToolPartState::OutputAvailable },
                            Some(Value::String(output.content.clone())),
                        );
                        self.emit(&buffered, StreamEvent::ToolCallEnd {
                            message_id: message_id.clone(),
                            tool_call_id: id.clone(),
                            output: output.content.clone(),
                            is_error: output.is_error,
                        });
                        self.flush_partial(&self.workspace_id, &partial, &mut throttle, true).await;
                        tool_calls_started.remove(&id);
                    }
                }
                Ok(ResponseEvent::Usage { input_tokens, output_tokens, cache_read_tokens, cache_write_tokens }) => {
                    usage = Some(Usage { input_tokens, output_tokens, cache_read_tokens, cache_write_tokens });
                }
                Ok(ResponseEvent::Error(message)) => {
                    self.finish_errored(&buffered, &message_id, &partial, StreamErrorType::classify(&message), message).await;
                    return;
                }
                Ok(ResponseEvent::Done) => break,
                Err(e) => {
                    self.finish_errored(&buffered, &message_id, &partial, StreamErrorType::classify(&e.to_string()), e.to_string()).await;
                    return;
                }
            }
        }

        if has_reasoning(&partial) {
            self.emit(&buffered, StreamEvent::ReasoningEnd { message_id: message_id.clone() });
        }

        partial.metadata.usage = usage;
        mark_text_parts_done(&mut partial);
        partial.metadata.partial = None;

        match self.history.append(&self.workspace_id, partial.clone()).await {
            Ok(committed) => {
                let _ = self.partial.clear(&self.workspace_id).await;
                self.emit(&buffered, StreamEvent::StreamEnd { message_id: message_id.clone(), message: Box::new(committed) });
            }
            Err(e) => {
                warn!(error = %e, "failed to commit stream to history");
                self.emit(&buffered, StreamEvent::StreamError {
                    message_id: message_id.clone(),
                    error_type: StreamErrorType::Unknown,
                    message: e.to_string(),
                });
            }
        }
    }

    async fn flush_partial(&self, workspace_id: &str, partial: &Message, throttle: &mut PartialFlushThrottle, force: bool) {
        if throttle.should_flush(force) {
            if let Err(e) = self.partial.write_partial(workspace_id, partial).await {
                warn!(error = %e, "failed to flush partial");
            }
        }
    }

    async fn finish_aborted(&self, buffered: &Arc<StdMutex<Vec<StreamEvent>>>, message_id: &str, partial: &Message) {
        let mut partial = partial.clone();
        partial.metadata.partial = Some(true);
        if let Err(e) = self.partial.write_partial(&self.workspace_id, &partial).await {
            warn!(error = %e, "failed to persist aborted partial");
        }
        self.emit(buffered, StreamEvent::StreamAbort { message_id: message_id.to_string() });
    }

    async fn finish_errored(
        &self,
        buffered: &Arc<StdMutex<Vec<StreamEvent>>>,
        message_id: &str,
        partial: &Message,
        error_type: StreamErrorType,
        message: String,
    ) {
        let mut partial = partial.clone();
        partial.metadata.partial = Some(true);
        if !partial.parts.is_empty() {
            if let Err(e) = self.partial.write_partial(&self.workspace_id, &partial).await {
                warn!(error = %e, "failed to persist errored partial");
            }
        }
        self.emit(buffered, StreamEvent::StreamError { message_id: message_id.to_string(), error_type, message });
    }
}

fn append_text(message: &mut Message, delta: &str) {
    if let Some(MessagePart::Text { text, state }) = message.parts.last_mut() {
        text.push_str(delta);
        *state = Some(TextPartState::Streaming);
        return;
    }
    message.parts.push(MessagePart::Text { text: delta.to_string(), state: Some(TextPartState::Streaming) });
}

fn append_reasoning(message: &mut Message, delta: &str) {
    if let Some(MessagePart::Reasoning { text }) = message.parts.last_mut() {
        text.push_str(delta);
        return;
    }
    message.parts.push(MessagePart::Reasoning { text: delta.to_string() });
}

fn has_reasoning(message: &Message) -> bool {
    message.parts.iter().any(|p| matches!(p, MessagePart::Reasoning { .. }))
}

fn mark_text_parts_done(message: &mut Message) {
    for part in &mut message.parts {
        if let MessagePart::Text { state, .. } = part {
            *state = Some(TextPartState::Done);
        }
    }
}

fn upsert_tool_part(message: &mut Message, tool_call_id: &str, tool_name: &str, input: Value, state: ToolPartState, output: Option<Value>) {
    for part in &mut message.parts {
        if let MessagePart::Tool { tool_call_id: id, input: existing_input, state: existing_state, output: existing_output, .. } = part {
            if id == tool_call_id {
                *existing_input = input;
                *existing_state = state;
                if output.is_some() {
                    *existing_output = output;
                }
                return;
            }
        }
    }
    message.parts.push(MessagePart::Tool {
        tool_call_id: tool_call_id.to_string(),
        tool_name: tool_name.to_string(),
        input,
        state,
        output,
    });
}
