// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Control-API dispatch (spec §6): maps a `(channel, args)` pair — the same
//! shape whether it arrived over `POST /ipc/<channel>` or a resolved slash
//! command — onto `WorkspaceManager`/`AgentSession` operations.

use cmux_config::Mode;
use cmux_core::SendMessageOptions;
use cmux_runtime::RuntimeConfig;
use cmux_workspace::RemoveWorkspaceOptions;
use serde_json::Value;

use crate::commands::ResolvedCommand;
use crate::protocol::IpcResponse;
use crate::state::{BridgeError, BridgeState};

/// Project a [`ResolvedCommand`] onto the same tagged-JSON shape the spec's
/// slash-command contract describes (`{type: "unknown-command", ...}` etc.).
fn resolved_to_value(resolved: ResolvedCommand) -> Value {
    match resolved {
        ResolvedCommand::NotCommand => serde_json::json!({ "type": "not-command" }),
        ResolvedCommand::Suggest { candidates } => serde_json::json!({ "type": "suggest", "candidates": candidates }),
        ResolvedCommand::Unknown { command, subcommand } => {
            serde_json::json!({ "type": "unknown-command", "command": command, "subcommand": subcommand })
        }
        ResolvedCommand::Dispatch { channel, args } => serde_json::json!({ "type": "dispatch", "channel": channel, "args": args }),
    }
}

fn arg(args: &[Value], i: usize) -> Result<&Value, BridgeError> {
    args.get(i).ok_or_else(|| BridgeError::BadRequest(format!("missing argument {i}")))
}

fn arg_str<'a>(args: &'a [Value], i: usize) -> Result<&'a str, BridgeError> {
    arg(args, i)?.as_str().ok_or_else(|| BridgeError::BadRequest(format!("argument {i} must be a string")))
}

fn arg_mode(args: &[Value], i: usize) -> Result<Mode, BridgeError> {
    match arg_str(args, i)? {
        "plan" => Ok(Mode::Plan),
        "exec" => Ok(Mode::Exec),
        other => Err(BridgeError::BadRequest(format!("unknown mode {other:?}"))),
    }
}

fn resolver(secrets: cmux_config::Secrets) -> impl Fn(&str) -> Result<Box<dyn cmux_model::ModelProvider>, cmux_model::SendMessageError> {
    move |model_spec: &str| cmux_model::resolve_provider(model_spec, |provider| secrets.get(provider).is_some())
}

/// Dispatch one control-API call (spec §6 channel names).
pub async fn dispatch(state: &BridgeState, channel: &str, args: Vec<Value>) -> IpcResponse {
    match run(state, channel, args).await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(channel, kind = e.kind(), error = %e, "control API call failed");
            IpcResponse::err(e.to_string())
        }
    }
}

async fn run(state: &BridgeState, channel: &str, args: Vec<Value>) -> Result<IpcResponse, BridgeError> {
    match channel {
        "projects.create" => {
            let entry = state.workspaces.add_project(arg_str(&args, 0)?).await?;
            Ok(IpcResponse::ok(serde_json::to_value(entry).unwrap()))
        }
        "projects.remove" => {
            state.workspaces.remove_project(arg_str(&args, 0)?).await?;
            Ok(IpcResponse::ok_empty())
        }
        "projects.list" => {
            let projects = state.workspaces.list_projects().await;
            Ok(IpcResponse::ok(serde_json::to_value(projects).unwrap()))
        }
        "projects.listBranches" => {
            let branches = state.workspaces.list_branches(arg_str(&args, 0)?).await?;
            Ok(IpcResponse::ok(serde_json::json!({
                "branches": branches.branches,
                "recommendedTrunk": branches.recommended_trunk,
            })))
        }
        "workspace.create" => {
            let project_path = arg_str(&args, 0)?;
            let name = arg_str(&args, 1)?;
            let trunk_branch = arg_str(&args, 2)?;
            let runtime_config = match args.get(3) {
                Some(Value::Null) | None => None,
                Some(v) => Some(serde_json::from_value::<RuntimeConfig>(v.clone()).map_err(|e| BridgeError::BadRequest(e.to_string()))?),
            };
            let workspace = state.workspaces.create_workspace(project_path, name, trunk_branch, runtime_config).await?;
            Ok(IpcResponse::ok(serde_json::to_value(workspace).unwrap()))
        }
        "workspace.remove" => {
            let workspace_id = arg_str(&args, 0)?;
            let delete_history = args.get(1).and_then(|v| v.get("deleteHistory")).and_then(Value::as_bool).unwrap_or(false);
            state.workspaces.remove_workspace(workspace_id, RemoveWorkspaceOptions { delete_history }).await?;
            state.drop_session(workspace_id).await;
            Ok(IpcResponse::ok_empty())
        }
        "workspace.rename" => {
            let workspace = state.workspaces.rename_workspace(arg_str(&args, 0)?, arg_str(&args, 1)?).await?;
            state.drop_session(arg_str(&args, 0)?).await;
            Ok(IpcResponse::ok(serde_json::to_value(workspace).unwrap()))
        }
        "workspace.fork" => {
            let workspace = state.workspaces.fork_workspace(arg_str(&args, 0)?, arg_str(&args, 1)?).await?;
            Ok(IpcResponse::ok(serde_json::to_value(workspace).unwrap()))
        }
        "workspace.list" => {
            let workspaces = state.workspaces.list_workspaces(arg_str(&args, 0)?).await;
            Ok(IpcResponse::ok(serde_json::to_value(workspaces).unwrap()))
        }
        "workspace.getInfo" => {
            let workspace_id = arg_str(&args, 0)?;
            let workspace = state.workspaces.get_workspace(workspace_id).await.ok_or_else(|| BridgeError::WorkspaceNotFound(workspace_id.to_string()))?;
            Ok(IpcResponse::ok(serde_json::to_value(workspace).unwrap()))
        }
        "workspace.sendMessage" => {
            let workspace_id = arg_str(&args, 0)?;
            let text = arg_str(&args, 1)?;
            let opts = arg(&args, 2)?;
            let model = opts.get("model").and_then(Value::as_str).unwrap_or_default().to_string();
            let mode = match opts.get("mode").and_then(Value::as_str) {
                Some("plan") => Mode::Plan,
                _ => Mode::Exec,
            };
            let edit_message_id = opts.get("editMessageId").and_then(Value::as_str).map(str::to_string);

            let session = state.session_for(workspace_id).await?;
            let secrets = state.secrets_snapshot().await;
            let message_id = session
                .send_message(text, SendMessageOptions { model, mode, edit_message_id }, resolver(secrets))
                .await?;
            session.ensure_metadata(None).await?;
            Ok(IpcResponse::ok(serde_json::json!({ "messageId": message_id })))
        }
        "workspace.resumeStream" => {
            let workspace_id = arg_str(&args, 0)?;
            let model = arg_str(&args, 1)?;
            let mode = arg_mode(&args, 2)?;
            let session = state.session_for(workspace_id).await?;
            let secrets = state.secrets_snapshot().await;
            let message_id = session.resume_stream(model, mode, resolver(secrets)).await?;
            Ok(IpcResponse::ok(serde_json::json!({ "messageId": message_id })))
        }
        "workspace.interruptStream" => {
            let session = state.session_for(arg_str(&args, 0)?).await?;
            let interrupted = session.interrupt_stream().await;
            Ok(IpcResponse::ok(serde_json::json!({ "interrupted": interrupted })))
        }
        "workspace.executeBash" => {
            let result = state.execute_bash(arg_str(&args, 0)?, arg_str(&args, 1)?).await?;
            Ok(IpcResponse::ok(serde_json::json!({
                "stdout": String::from_utf8_lossy(&result.stdout),
                "stderr": String::from_utf8_lossy(&result.stderr),
                "exitCode": result.exit_code,
            })))
        }
        "workspace.truncateHistory" => {
            state.truncate_history(arg_str(&args, 0)?, arg_str(&args, 1)?).await?;
            Ok(IpcResponse::ok_empty())
        }
        "providers.setConfig" => {
            state.set_secret(arg_str(&args, 0)?, arg_str(&args, 1)?).await?;
            Ok(IpcResponse::ok_empty())
        }
        "providers.list" => Ok(IpcResponse::ok(serde_json::to_value(state.list_providers().await).unwrap())),
        "commands.list" => Ok(IpcResponse::ok(serde_json::to_value(state.commands.names()).unwrap())),
        "commands.resolve" => {
            let workspace_id = arg_str(&args, 0)?;
            let input = arg_str(&args, 1)?;
            let cursor = args.get(2).and_then(Value::as_u64).map(|n| n as usize).unwrap_or(input.len());
            let resolved = state.commands.resolve(workspace_id, input, cursor);
            Ok(IpcResponse::ok(resolved_to_value(resolved)))
        }
        "commands.submit" => {
            let workspace_id = arg_str(&args, 0)?;
            let resolved = state.commands.resolve_submitted(workspace_id, arg_str(&args, 1)?);
            Ok(IpcResponse::ok(resolved_to_value(resolved)))
        }
        other => Err(BridgeError::BadRequest(format!("unknown channel: {other}"))),
    }
}
