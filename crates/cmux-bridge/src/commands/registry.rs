// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Slash-command registry (spec §6 `{key, description, children?, handler?,
//! suggestions?, appendSpace?}`). Each leaf carries a `channel`: the
//! control-API operation it dispatches to, so resolving a command produces
//! exactly the same `(channel, args)` pair a client could have sent straight
//! to `POST /ipc/<channel>`.

use serde_json::Value;

use super::parser::{parse, remainder_after, tokenize, ParsedCommand};

/// One entry in the command tree (spec §6). `children` lets a top-level
/// command like `/mode` fan out into `/mode plan` / `/mode exec` without a
/// free-text argument.
#[derive(Debug, Clone)]
pub struct CommandDef {
    pub key: String,
    pub description: String,
    pub children: Vec<CommandDef>,
    /// Static completions offered for this command's next argument, when
    /// known ahead of time (e.g. mode names). `None` means free text.
    pub suggestions: Option<Vec<String>>,
    /// Whether accepting a suggestion should append a trailing space so the
    /// caller can immediately start the next token.
    pub append_space: bool,
    /// Control-API channel this command dispatches to once its arguments
    /// are complete.
    pub channel: &'static str,
}

impl CommandDef {
    fn leaf(key: &str, description: &str, channel: &'static str) -> Self {
        Self { key: key.to_string(), description: description.to_string(), children: Vec::new(), suggestions: None, append_space: true, channel }
    }

    fn with_suggestions(mut self, suggestions: Vec<&str>) -> Self {
        self.suggestions = Some(suggestions.into_iter().map(str::to_string).collect());
        self
    }
}

pub struct CommandRegistry {
    commands: Vec<CommandDef>,
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl CommandRegistry {
    pub fn empty() -> Self {
        Self { commands: Vec::new() }
    }

    /// The commands every workspace chat surface offers (spec §4.7/§4.11
    /// operations exposed as `/`-prefixed shorthand).
    pub fn with_builtins() -> Self {
        Self {
            commands: vec![
                CommandDef::leaf("model", "Switch the active model for this workspace", "workspace.resumeStream"),
                CommandDef::leaf("mode", "Switch between plan and exec tool policy", "workspace.sendMessage")
                    .with_suggestions(vec!["plan", "exec"]),
                CommandDef::leaf("abort", "Interrupt the active stream", "workspace.interruptStream"),
                CommandDef::leaf("rename", "Rename this workspace", "workspace.rename"),
                CommandDef::leaf("fork", "Fork this workspace from its current commit", "workspace.fork"),
                CommandDef::leaf("bash", "Run a shell command directly, bypassing the model", "workspace.executeBash"),
            ],
        }
    }

    pub fn register(&mut self, command: CommandDef) {
        if let Some(slot) = self.commands.iter_mut().find(|c| c.key == command.key) {
            *slot = command;
        } else {
            self.commands.push(command);
        }
    }

    pub fn get(&self, key: &str) -> Option<&CommandDef> {
        self.commands.iter().find(|c| c.key == key)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.commands.iter().map(|c| c.key.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Resolve one input string (spec §6 "parser contract"). `workspace_id`
    /// is the workspace the command applies to (every built-in channel
    /// requires it as its first positional argument); `cursor` is the byte
    /// offset to parse up to, with `input.len()` parsing the whole string.
    pub fn resolve(&self, workspace_id: &str, input: &str, cursor: usize) -> ResolvedCommand {
        let truncated = &input[..cursor.min(input.len())];
        match parse(truncated) {
            ParsedCommand::NotCommand => ResolvedCommand::NotCommand,
            ParsedCommand::PartialCommand { partial } => {
                let candidates = self.names().into_iter().filter(|n| n.starts_with(&partial)).map(str::to_string).collect();
                ResolvedCommand::Suggest { candidates }
            }
            ParsedCommand::CompletingArgs { command, partial, .. } => match self.get(&command) {
                Some(def) => {
                    let candidates = def
                        .suggestions
                        .as_ref()
                        .map(|s| s.iter().filter(|c| c.starts_with(&partial)).cloned().collect())
                        .unwrap_or_default();
                    ResolvedCommand::Suggest { candidates }
                }
                None => ResolvedCommand::Unknown { command, subcommand: None },
            },
            ParsedCommand::Complete { command, args } => {
                let body = truncated.strip_prefix('/').unwrap_or(truncated);
                match self.get(&command) {
                    Some(def) => {
                        let subcommand = args.first().cloned();
                        if !def.children.is_empty() {
                            match subcommand.as_deref().and_then(|s| def.children.iter().find(|c| c.key == s)) {
                                Some(child) => ResolvedCommand::Dispatch {
                                    channel: child.channel.to_string(),
                                    args: build_args(&child.key, workspace_id, body, &args[1..]),
                                },
                                None => ResolvedCommand::Unknown { command, subcommand },
                            }
                        } else {
                            ResolvedCommand::Dispatch { channel: def.channel.to_string(), args: build_args(&command, workspace_id, body, &args) }
                        }
                    }
                    None => ResolvedCommand::Unknown { command, subcommand: args.first().cloned() },
                }
            }
        }
    }

    /// Resolve a fully-submitted input (cursor ignored, trailing whitespace
    /// irrelevant) — used once a caller presses "enter" rather than while
    /// live-typing.
    pub fn resolve_submitted(&self, workspace_id: &str, input: &str) -> ResolvedCommand {
        let Some(body) = input.strip_prefix('/') else {
            return ResolvedCommand::NotCommand;
        };
        let tokens = tokenize(body);
        let Some((command, args)) = tokens.split_first() else {
            return ResolvedCommand::Unknown { command: String::new(), subcommand: None };
        };
        self.resolve_complete(workspace_id, command, args, body)
    }

    fn resolve_complete(&self, workspace_id: &str, command: &str, args: &[String], body: &str) -> ResolvedCommand {
        match self.get(command) {
            Some(def) => {
                if !def.children.is_empty() {
                    match args.first().and_then(|s| def.children.iter().find(|c| &c.key == s)) {
                        Some(child) => ResolvedCommand::Dispatch {
                            channel: child.channel.to_string(),
                            args: build_args(&child.key, workspace_id, body, &args[1..]),
                        },
                        None => ResolvedCommand::Unknown { command: command.to_string(), subcommand: args.first().cloned() },
                    }
                } else {
                    ResolvedCommand::Dispatch { channel: def.channel.to_string(), args: build_args(command, workspace_id, body, args) }
                }
            }
            None => ResolvedCommand::Unknown { command: command.to_string(), subcommand: args.first().cloned() },
        }
    }
}

/// Maps a resolved command's own typed arguments onto the positional shape
/// its target channel actually expects (`ipc::run`'s `match channel` — each
/// channel has its own argument layout, so the registry can't forward
/// tokens through unchanged). `body` is the full input with the leading `/`
/// stripped, used to recover a command's tail verbatim (a shell command
/// line, a chat message) rather than re-tokenized, since re-tokenizing would
/// collapse the argument's own internal spacing/quoting.
fn build_args(command: &str, workspace_id: &str, body: &str, tokens: &[String]) -> Vec<Value> {
    let workspace_id = Value::String(workspace_id.to_string());
    match command {
        // workspace.interruptStream(workspaceId)
        "abort" => vec![workspace_id],
        // workspace.rename(workspaceId, newName) / workspace.fork(workspaceId, newName)
        "rename" | "fork" => {
            let mut out = vec![workspace_id];
            out.extend(tokens.iter().cloned().map(Value::String));
            out
        }
        // workspace.resumeStream(workspaceId, model, mode)
        "model" => {
            let model = tokens.first().cloned().unwrap_or_default();
            let mode = tokens.get(1).cloned().unwrap_or_else(|| "exec".to_string());
            vec![workspace_id, Value::String(model), Value::String(mode)]
        }
        // workspace.sendMessage(workspaceId, text, {mode}) — the mode is the
        // command's own argument; everything after it is the chat message,
        // kept verbatim instead of re-tokenized.
        "mode" => {
            let mode = tokens.first().cloned().unwrap_or_default();
            let text = remainder_after(body, 2);
            vec![workspace_id, Value::String(text), serde_json::json!({ "mode": mode })]
        }
        // workspace.executeBash(workspaceId, command) — the remainder is a
        // shell command line; argv-splitting it is the shell's job, not ours.
        "bash" => {
            let command_line = remainder_after(body, 1);
            vec![workspace_id, Value::String(command_line)]
        }
        _ => {
            let mut out = vec![workspace_id];
            out.extend(tokens.iter().cloned().map(Value::String));
            out
        }
    }
}

/// Outcome of resolving one input against the registry (spec §6).
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedCommand {
    NotCommand,
    Suggest { candidates: Vec<String> },
    /// `{type: "unknown-command", command, subcommand?}` (spec §6).
    Unknown { command: String, subcommand: Option<String> },
    Dispatch { channel: String, args: Vec<Value> },
}
