// CLI argument parsing and definitions

use clap::{Parser, Subcommand};
use hangar_orchestrator::BuildTransition;
use std::path::PathBuf;

pub const DEFAULT_URL: &str = "http://127.0.0.1:3131";

#[derive(Debug, Clone, Parser)]
#[command(name = "hangar")]
#[command(about = "Drive workspace builds and their state on a hangar server")]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Base URL of the hangar API
    #[arg(long, global = true, env = "HANGAR_URL", default_value = DEFAULT_URL)]
    pub url: String,

    /// User to act as (defaults to $USER)
    #[arg(long, global = true, env = "HANGAR_USER")]
    pub user: Option<String>,

    /// Comma-separated roles sent with every request
    #[arg(long, global = true, env = "HANGAR_ROLES")]
    pub roles: Option<String>,

    /// Enable debug output
    #[arg(short, long, global = true)]
    pub debug: bool,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Read or replace the state of a workspace
    State {
        #[command(subcommand)]
        command: StateSubcommand,
    },
    /// Create and inspect builds
    Build {
        #[command(subcommand)]
        command: BuildSubcommand,
    },
    /// Create and inspect workspaces
    Workspace {
        #[command(subcommand)]
        command: WorkspaceSubcommand,
    },
}

#[derive(Debug, Clone, Subcommand)]
pub enum StateSubcommand {
    /// Write the workspace's state to a file, or to stdout
    Pull {
        /// Workspace as `name` or `owner/name`
        workspace: String,
        /// Destination file (stdout when omitted)
        file: Option<PathBuf>,
        /// Pull the state of this build number instead of the latest
        #[arg(long)]
        build: Option<i64>,
    },
    /// Create a new build carrying the given state
    Push {
        /// Workspace as `name` or `owner/name`
        workspace: String,
        /// Source file, or `-` for stdin
        file: String,
        /// Build number the new build is expected to get
        #[arg(long)]
        build: Option<i64>,
    },
}

#[derive(Debug, Clone, Subcommand)]
pub enum BuildSubcommand {
    /// Queue a build of a workspace
    Create {
        /// Workspace as `name` or `owner/name`
        workspace: String,
        /// start, stop or delete
        #[arg(short, long, default_value = "start")]
        transition: BuildTransition,
        /// Template version to build (defaults to the workspace's)
        #[arg(long)]
        template_version: Option<String>,
        /// Build parameter as KEY=VALUE (repeatable)
        #[arg(short, long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,
        /// Wait up to this many seconds for the build to finish
        #[arg(long, value_name = "SECS")]
        wait: Option<u64>,
    },
    /// List the builds of a workspace, newest first
    List {
        /// Workspace as `name` or `owner/name`
        workspace: String,
    },
    /// Show one build
    Show {
        build_id: String,
    },
    /// Wait for a build to finish
    Wait {
        build_id: String,
        /// Give up after this many seconds
        #[arg(long, default_value_t = 600)]
        timeout: u64,
    },
    /// Cancel a pending or running build
    Cancel {
        build_id: String,
    },
    /// Print the progress logs of a build
    Logs {
        build_id: String,
    },
}

#[derive(Debug, Clone, Subcommand)]
pub enum WorkspaceSubcommand {
    /// Create a workspace and queue its first build
    Create {
        name: String,
        /// Template version the workspace is built from
        #[arg(long)]
        template_version: String,
        /// Organization (defaults to the server's default organization)
        #[arg(long)]
        organization: Option<String>,
        /// Required worker tag (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Create the workspace without an initial build
        #[arg(long)]
        no_build: bool,
    },
    /// List workspaces visible to the user
    List {
        /// Only workspaces of this owner
        #[arg(long)]
        owner: Option<String>,
    },
    /// Show one workspace
    Show {
        /// Workspace as `name` or `owner/name`
        workspace: String,
    },
}
