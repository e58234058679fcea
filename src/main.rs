// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands, ProjectCommands};
use cmux_bridge::BridgeState;
use cmux_config::Config;
use cmux_workspace::WorkspaceManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        None => serve(None, None).await,
        Some(Commands::Serve { host, port }) => serve(host, port).await,
        Some(Commands::Projects { command }) => run_projects_command(command).await,
        Some(Commands::ShowConfig) => show_config().await,
        Some(Commands::Completions { shell }) => {
            cli::print_completions(shell);
            Ok(())
        }
    }
}

async fn serve(host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    if let Some(host) = host {
        std::env::set_var("HOST", host);
    }
    if let Some(port) = port {
        std::env::set_var("PORT", port.to_string());
    }

    let state = Arc::new(BridgeState::new().await.context("initializing bridge state")?);
    cmux_bridge::serve(state).await
}

async fn run_projects_command(command: ProjectCommands) -> anyhow::Result<()> {
    let workspaces = WorkspaceManager::new().await.context("loading workspace registry")?;

    match command {
        ProjectCommands::Add { path } => {
            let path = path.to_string_lossy().to_string();
            let entry = workspaces.add_project(&path).await.with_context(|| format!("registering project {path}"))?;
            println!("Registered project: {}", entry.path);
        }
        ProjectCommands::Remove { path } => {
            let path = path.to_string_lossy().to_string();
            workspaces.remove_project(&path).await.with_context(|| format!("removing project {path}"))?;
            println!("Removed project: {path}");
        }
        ProjectCommands::List => {
            let projects = workspaces.list_projects().await;
            if projects.is_empty() {
                println!("No registered projects.");
                return Ok(());
            }
            for project in &projects {
                println!("{}  ({} workspace(s))", project.path, project.workspaces.len());
                for workspace in &project.workspaces {
                    println!("  {}  {}", workspace.workspace_id, workspace.name);
                }
            }
        }
    }
    Ok(())
}

async fn show_config() -> anyhow::Result<()> {
    let config = Config::load().await.context("loading config")?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::registry().with(fmt::layer().with_target(false).with_writer(std::io::stderr)).with(filter).try_init();
}
