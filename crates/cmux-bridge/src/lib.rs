// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The transport layer that exposes `WorkspaceManager`/`AgentSession` over
//! HTTP + WebSocket (spec §6 "Control API"), plus the slash-command parser
//! and registry relocated out of the teacher's TUI so the same resolution
//! logic runs regardless of which transport a client is using.

pub mod commands;
pub mod http;
pub mod ipc;
pub mod protocol;
pub mod state;

pub use http::{router, serve};
pub use state::{BridgeError, BridgeState, ProviderStatus};
