// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The abstract provider contract (spec §1, §4.9) plus the message shape
//! every other component (`HistoryStore`, `PartialStore`, `ConsumerCalculator`)
//! walks. Wire formats for concrete providers are out of scope (spec §1
//! "provider SDK wire formats"); this crate ships the trait, a static model
//! catalog, a thinking-level policy, and a `MockProvider`/`ScriptedMockProvider`
//! pair every higher-level test drives against instead of the network.

pub mod catalog;
mod message;
mod provider;
mod registry;
pub mod sanitize;
mod thinking;
mod types;

mod mock;

pub use catalog::{InputModality, ModelCatalogEntry};
pub use message::{Message, MessageMetadata, MessagePart, Role, TextPartState, ToolPartState};
pub use mock::{MockProvider, ScriptedMockProvider};
pub use provider::{ModelProvider, ResponseStream};
pub use registry::{get_driver, list_drivers, DriverMeta};
pub use thinking::{ThinkingLevel, ThinkingPolicy};
pub use types::{CompletionRequest, ResponseEvent, ToolSchema, Usage};

use thiserror::Error;

/// Stable `sendMessage` error kinds (spec §7).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SendMessageError {
    #[error("no API key configured for provider")]
    ApiKeyNotFound,
    #[error("provider is not supported by this build")]
    ProviderNotSupported,
    #[error("model string is malformed, expected \"provider:model\"")]
    InvalidModelString,
    #[error("unknown error constructing provider")]
    Unknown,
}

impl SendMessageError {
    pub fn kind(&self) -> &'static str {
        match self {
            SendMessageError::ApiKeyNotFound => "api_key_not_found",
            SendMessageError::ProviderNotSupported => "provider_not_supported",
            SendMessageError::InvalidModelString => "invalid_model_string",
            SendMessageError::Unknown => "unknown",
        }
    }
}

/// Resolve a `"provider:model"` string into a boxed [`ModelProvider`].
///
/// Only the `mock` driver is concretely implemented (spec §1: provider wire
/// formats beyond the abstract contract are out of scope). Known real
/// drivers (§`registry`) are recognized for configuration/validation
/// purposes but return [`SendMessageError::ApiKeyNotFound`] when no secret is
/// on file and [`SendMessageError::ProviderNotSupported`] otherwise —
/// callers that need a live provider must supply one out-of-band (e.g. a
/// test-injected [`ScriptedMockProvider`]).
pub fn resolve_provider(
    model_spec: &str,
    has_secret: impl Fn(&str) -> bool,
) -> Result<Box<dyn ModelProvider>, SendMessageError> {
    let (provider_id, model_name) =
        model_spec.split_once(':').ok_or(SendMessageError::InvalidModelString)?;
    if provider_id.is_empty() || model_name.is_empty() {
        return Err(SendMessageError::InvalidModelString);
    }

    if provider_id == "mock" {
        return Ok(Box::new(MockProvider::named(model_name)));
    }

    let driver = get_driver(provider_id).ok_or(SendMessageError::ProviderNotSupported)?;
    if driver.requires_api_key && !has_secret(provider_id) {
        return Err(SendMessageError::ApiKeyNotFound);
    }
    Err(SendMessageError::ProviderNotSupported)
}
