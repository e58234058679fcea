// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Resolves the `<home>/.cmux` directory every on-disk store in this crate
//! (and `cmux-core`'s history/partial/extension-metadata stores) is rooted
//! under, honoring the `CMUX_TEST_ROOT` override (spec §6) so tests never
//! touch a developer's real home directory.

use std::path::PathBuf;

/// Root directory for all cmux state: `$CMUX_TEST_ROOT/.cmux` when the
/// override is set, otherwise `<home>/.cmux`.
pub fn cmux_dir() -> PathBuf {
    if let Ok(root) = std::env::var("CMUX_TEST_ROOT") {
        return PathBuf::from(root).join(".cmux");
    }
    dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".cmux")
}

pub fn config_path() -> PathBuf {
    cmux_dir().join("config.json")
}

pub fn secrets_path() -> PathBuf {
    cmux_dir().join("secrets.json")
}

pub fn history_dir() -> PathBuf {
    cmux_dir().join("history")
}

pub fn partial_dir() -> PathBuf {
    cmux_dir().join("partial")
}

pub fn extension_metadata_path() -> PathBuf {
    cmux_dir().join("extensionMetadata.json")
}
