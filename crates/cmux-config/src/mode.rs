// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The two canonical agent modes (spec §4.8): `plan` disables file edits and
//! `compact`, enabling `propose_plan`; `exec` disables `propose_plan`,
//! enabling file edits. `ToolPolicy::canonical_for` (`cmux-tools`) maps each
//! variant to its rule set.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Read-only exploration and planning. File edits and `compact` are
    /// disabled; `propose_plan` is enabled.
    Plan,
    /// Full tool access. `propose_plan` is disabled; file edits are enabled.
    Exec,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Plan => write!(f, "plan"),
            Mode::Exec => write!(f, "exec"),
        }
    }
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Exec
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_wire_name() {
        assert_eq!(Mode::Plan.to_string(), "plan");
        assert_eq!(Mode::Exec.to_string(), "exec");
    }

    #[test]
    fn serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Mode::Plan).unwrap(), "\"plan\"");
    }

    #[test]
    fn default_is_exec() {
        assert_eq!(Mode::default(), Mode::Exec);
    }
}
