// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Per-tool human-approval configuration. Distinct from `cmux-tools`'s
//! mode-based `ToolPolicy` (spec §4.8, which tool *names* are offered to the
//! model): this gates whether an *enabled* tool's invocation runs
//! automatically or needs a human nod, keyed by glob pattern over the
//! command string a tool is about to run.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_auto_approve")]
    pub auto_approve_patterns: Vec<String>,
    #[serde(default)]
    pub deny_patterns: Vec<String>,
}

fn default_auto_approve() -> Vec<String> {
    vec!["cat *".into(), "ls*".into(), "ls".into(), "pwd".into(), "git status".into(), "git diff*".into()]
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self { auto_approve_patterns: default_auto_approve(), deny_patterns: Vec::new() }
    }
}
