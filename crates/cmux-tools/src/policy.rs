// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Tool-set policy (spec §4.8): decides which tool *names* are offered to the
//! model for a turn. An ordered list of `{pattern, action}` rules is applied
//! to the registry's full tool-name set; the last matching rule per tool
//! wins, and unmatched tools are enabled.

use cmux_config::Mode;
use regex::Regex;
use thiserror::Error;

/// Pattern used by the canonical policies to recognize file-editing tools.
const FILE_EDIT_TOOLS: &str = "^(edit_file|write|delete_file)$";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleAction {
    Enable,
    Disable,
    /// If exactly one tool resolves to `Require`, the tool set collapses to
    /// that single tool.
    Require,
}

#[derive(Debug, Clone)]
pub struct ToolRule {
    pattern: Regex,
    action: RuleAction,
}

impl ToolRule {
    pub fn new(pattern: &str, action: RuleAction) -> Result<Self, regex::Error> {
        Ok(Self { pattern: Regex::new(pattern)?, action })
    }

    pub fn enable(pattern: &str) -> Result<Self, regex::Error> {
        Self::new(pattern, RuleAction::Enable)
    }

    pub fn disable(pattern: &str) -> Result<Self, regex::Error> {
        Self::new(pattern, RuleAction::Disable)
    }

    pub fn require(pattern: &str) -> Result<Self, regex::Error> {
        Self::new(pattern, RuleAction::Require)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("multiple tools matched a require rule: {0:?}")]
    MultipleRequired(Vec<String>),
}

/// An ordered rule list applied to a tool-name set (spec §4.8).
#[derive(Debug, Clone, Default)]
pub struct ToolPolicy {
    rules: Vec<ToolRule>,
}

impl ToolPolicy {
    pub fn new(rules: Vec<ToolRule>) -> Self {
        Self { rules }
    }

    /// The canonical policy for a mode (spec §4.8): *plan* disables file
    /// edits and `compact`, enabling `propose_plan`; *exec* disables
    /// `propose_plan`, enabling file edits.
    pub fn canonical_for(mode: Mode) -> Self {
        match mode {
            Mode::Plan => Self::new(vec![
                ToolRule::disable(FILE_EDIT_TOOLS).expect("valid pattern"),
                ToolRule::disable("^compact$").expect("valid pattern"),
                ToolRule::enable("^propose_plan$").expect("valid pattern"),
            ]),
            Mode::Exec => Self::new(vec![
                ToolRule::disable("^propose_plan$").expect("valid pattern"),
                ToolRule::enable(FILE_EDIT_TOOLS).expect("valid pattern"),
            ]),
        }
    }

    /// Resolve `tool_names` against this policy's rules, returning the final
    /// enabled tool-name set.
    pub fn apply(&self, tool_names: &[String]) -> Result<Vec<String>, PolicyError> {
        let resolved: Vec<(&String, RuleAction)> = tool_names
            .iter()
            .map(|name| {
                let mut action = RuleAction::Enable;
                for rule in &self.rules {
                    if rule.pattern.is_match(name) {
                        action = rule.action;
                    }
                }
                (name, action)
            })
            .collect();

        let required: Vec<String> = resolved
            .iter()
            .filter(|(_, action)| *action == RuleAction::Require)
            .map(|(name, _)| (*name).clone())
            .collect();

        if required.len() > 1 {
            return Err(PolicyError::MultipleRequired(required));
        }
        if required.len() == 1 {
            return Ok(required);
        }

        Ok(resolved
            .into_iter()
            .filter(|(_, action)| *action == RuleAction::Enable)
            .map(|(name, _)| name.clone())
            .collect())
    }
}
