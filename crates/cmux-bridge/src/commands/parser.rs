// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Slash-command tokenizer (spec §6 "parser contract"). Relocated from the
//! teacher's TUI input layer into this transport-agnostic crate: nothing
//! here reads a terminal or a cursor widget, only a string and an index.

/// Result of parsing one input string against the `/command arg1 arg2`
/// grammar (spec §6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedCommand {
    /// Doesn't start with `/` — not a command at all.
    NotCommand,
    /// `/par` — still typing the command name itself.
    PartialCommand { partial: String },
    /// `/model gp` — command name is complete, `arg_index`'th argument is
    /// still being typed.
    CompletingArgs { command: String, arg_index: usize, partial: String },
    /// `/model gpt-4o` — command and all its arguments are fully tokenized.
    Complete { command: String, args: Vec<String> },
}

/// Parse `input` as a slash command. `input` is the full text up to the
/// cursor — trailing whitespace signals "the caller just finished a token
/// and is about to start the next one" (spec §6 "driven by cursor
/// position").
pub fn parse(input: &str) -> ParsedCommand {
    let Some(body) = input.strip_prefix('/') else {
        return ParsedCommand::NotCommand;
    };
    let ends_with_space = body.ends_with([' ', '\t']);
    let tokens = tokenize(body);

    if tokens.is_empty() {
        return ParsedCommand::PartialCommand { partial: String::new() };
    }

    let command = tokens[0].clone();
    let rest = &tokens[1..];

    if rest.is_empty() && !ends_with_space {
        return ParsedCommand::PartialCommand { partial: command };
    }

    if ends_with_space {
        return ParsedCommand::CompletingArgs { command, arg_index: rest.len(), partial: String::new() };
    }

    let (completed, partial) = rest.split_at(rest.len() - 1);
    ParsedCommand::CompletingArgs { command, arg_index: completed.len(), partial: partial[0].clone() }
}

/// Split `s` on whitespace, honoring double-quoted segments (spec §6
/// "tokenized respecting double-quotes"). Quotes are stripped from the
/// resulting tokens; an unterminated quote runs to the end of the string.
pub fn tokenize(s: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_token = false;

    for ch in s.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                has_token = true;
            }
            ' ' | '\t' if !in_quotes => {
                if has_token {
                    tokens.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            _ => {
                current.push(ch);
                has_token = true;
            }
        }
    }
    if has_token {
        tokens.push(current);
    }
    tokens
}

/// The substring of `body` starting right after its `n`-th whitespace/quote
/// token (same quoting rules as [`tokenize`]), with the separating
/// whitespace trimmed but the remainder's own content untouched. Used for
/// arguments that must be passed on verbatim rather than re-tokenized — a
/// shell command line, a chat message — where a later argument may itself
/// contain spaces or quotes that aren't argument separators.
pub fn remainder_after(body: &str, n: usize) -> String {
    let mut tokens_seen = 0usize;
    let mut in_quotes = false;
    let mut in_token = false;

    for (i, ch) in body.char_indices() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                in_token = true;
            }
            ' ' | '\t' if !in_quotes => {
                if in_token {
                    tokens_seen += 1;
                    in_token = false;
                    if tokens_seen == n {
                        return body[i..].trim_start_matches([' ', '\t']).to_string();
                    }
                }
            }
            _ => in_token = true,
        }
    }
    String::new()
}

/// Full tokens once a command's name and all complete arguments are known —
/// used by [`Complete`](ParsedCommand::Complete).
pub fn complete(input: &str) -> Option<ParsedCommand> {
    let body = input.strip_prefix('/')?;
    if body.ends_with([' ', '\t']) {
        return None;
    }
    let tokens = tokenize(body);
    let (command, args) = tokens.split_first()?;
    Some(ParsedCommand::Complete { command: command.clone(), args: args.to_vec() })
}
