// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Per-model thinking/reasoning-effort policy (spec §4.9).
//!
//! A [`ThinkingPolicy`] is either `fixed` (a model that only ever runs at one
//! reasoning level, e.g. a dedicated reasoning model that requires `high`) or
//! `selectable` (an allowed set plus a default). [`ThinkingPolicy::enforce`]
//! clamps a caller's requested level to whatever the model actually permits.

use serde::{Deserialize, Serialize};

/// A single reasoning-effort level, plus `Off` for models that think only
/// when explicitly asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingLevel {
    Off,
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ThinkingPolicy {
    /// The model permits exactly one level, regardless of what's requested.
    Fixed { level: ThinkingLevel },
    /// The model permits any of `allowed`; an unrecognized request falls back
    /// to the nearest allowed level, then to `default`.
    Selectable { allowed: Vec<ThinkingLevel>, default: ThinkingLevel },
}

impl ThinkingPolicy {
    pub fn fixed(level: ThinkingLevel) -> Self {
        ThinkingPolicy::Fixed { level }
    }

    pub fn selectable(allowed: Vec<ThinkingLevel>, default: ThinkingLevel) -> Self {
        ThinkingPolicy::Selectable { allowed, default }
    }

    /// Clamp `requested` to a level this policy actually permits.
    ///
    /// - `fixed(level)`: always returns `level`, regardless of `requested`.
    /// - `selectable(allowed, default)`: `Off` always passes through
    ///   unchanged (every model can simply not think); otherwise a level in
    ///   `allowed` passes through as-is, a level not in `allowed` clamps to
    ///   the nearest allowed level (by ordinal distance), falling back to
    ///   `default` if `allowed` is empty.
    pub fn enforce(&self, requested: ThinkingLevel) -> ThinkingLevel {
        match self {
            ThinkingPolicy::Fixed { level } => *level,
            ThinkingPolicy::Selectable { allowed, default } => {
                if requested == ThinkingLevel::Off {
                    return ThinkingLevel::Off;
                }
                if allowed.contains(&requested) {
                    return requested;
                }
                nearest(allowed, requested).unwrap_or(*default)
            }
        }
    }
}

fn ordinal(level: ThinkingLevel) -> i32 {
    match level {
        ThinkingLevel::Off => 0,
        ThinkingLevel::Low => 1,
        ThinkingLevel::Medium => 2,
        ThinkingLevel::High => 3,
    }
}

fn nearest(allowed: &[ThinkingLevel], requested: ThinkingLevel) -> Option<ThinkingLevel> {
    allowed.iter().copied().min_by_key(|lvl| (ordinal(*lvl) - ordinal(requested)).abs())
}
