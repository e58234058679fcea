// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};

#[derive(Subcommand, Debug)]
pub enum ProjectCommands {
    /// Register a project directory (spec §6 `projects.create`).
    Add {
        /// Absolute path to the project's git repository.
        path: PathBuf,
    },
    /// Unregister a project (spec §6 `projects.remove`).
    Remove {
        path: PathBuf,
    },
    /// List registered projects and their workspaces.
    List,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the control-API server (HTTP `/ipc/<channel>` + `/ws`).
    Serve {
        /// Bind address (overrides `HOST`).
        #[arg(long)]
        host: Option<String>,
        /// Bind port (overrides `PORT`).
        #[arg(long)]
        port: Option<u16>,
    },
    /// Manage registered projects.
    Projects {
        #[command(subcommand)]
        command: ProjectCommands,
    },
    /// Print the effective `<home>/.cmux/config.json` and exit.
    ShowConfig,
    /// Generate a shell completion script.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Parser, Debug)]
#[command(
    name = "cmux",
    about = "Multi-workspace AI coding agent host",
    version,
    long_about = None,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Increase verbosity (-v = debug, -vv = trace).
    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,
}

pub fn print_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "cmux", &mut std::io::stdout());
}
