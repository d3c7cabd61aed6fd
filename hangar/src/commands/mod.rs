// Command handlers

use crate::cli::{Args, BuildSubcommand, Command, StateSubcommand, WorkspaceSubcommand};
use crate::client::HangarClient;
use anyhow::{Context, Result};
use hangar_orchestrator::Workspace;
use std::time::Duration;
use tracing::debug;

pub mod build;
pub mod state;
pub mod workspace;

/// Main command dispatcher
pub async fn execute_command(args: Args) -> Result<()> {
    let user = args
        .user
        .clone()
        .or_else(|| std::env::var("USER").ok())
        .context("No user given; pass --user or set HANGAR_USER")?;
    let client = HangarClient::new(&args.url, &user, args.roles.as_deref());

    match args.command {
        Command::State { command } => match command {
            StateSubcommand::Pull {
                workspace,
                file,
                build,
            } => {
                debug!("Handling state pull");
                state::pull(&client, &workspace, build, file.as_deref()).await?;
            }
            StateSubcommand::Push {
                workspace,
                file,
                build,
            } => {
                debug!("Handling state push");
                let created = state::push(&client, &workspace, &file, build).await?;
                println!(
                    "Pushed state as build #{} ({})",
                    created.build_number, created.id
                );
            }
        },
        Command::Build { command } => match command {
            BuildSubcommand::Create {
                workspace,
                transition,
                template_version,
                params,
                wait,
            } => {
                let created = build::create(
                    &client,
                    &workspace,
                    transition,
                    template_version,
                    &params,
                )
                .await?;
                println!("{}", build::describe(&created));
                if let Some(secs) = wait {
                    let finished = build::wait(&client, &created.id, Duration::from_secs(secs)).await?;
                    println!("{}", build::describe(&finished));
                }
            }
            BuildSubcommand::List { workspace } => {
                for b in build::list(&client, &workspace).await? {
                    println!("{}", build::describe(&b));
                }
            }
            BuildSubcommand::Show { build_id } => {
                let b = client.get_build(&build_id).await?;
                println!("{}", build::describe(&b));
            }
            BuildSubcommand::Wait { build_id, timeout } => {
                let finished = build::wait(&client, &build_id, Duration::from_secs(timeout)).await?;
                println!("{}", build::describe(&finished));
            }
            BuildSubcommand::Cancel { build_id } => {
                let b = client.cancel_build(&build_id).await?;
                println!("{}", build::describe(&b));
            }
            BuildSubcommand::Logs { build_id } => {
                for log in build::logs(&client, &build_id).await? {
                    println!("[{}] {}", log.stage, log.output);
                }
            }
        },
        Command::Workspace { command } => match command {
            WorkspaceSubcommand::Create {
                name,
                template_version,
                organization,
                tags,
                no_build,
            } => {
                let created = workspace::create(
                    &client,
                    &name,
                    &template_version,
                    organization,
                    tags,
                    !no_build,
                )
                .await?;
                println!("{}", workspace::describe(&created.workspace));
                if let Some(b) = &created.build {
                    println!("  {}", build::describe(b));
                }
            }
            WorkspaceSubcommand::List { owner } => {
                for ws in client.list_workspaces(owner.as_deref()).await? {
                    println!("{}", workspace::describe(&ws));
                }
            }
            WorkspaceSubcommand::Show { workspace } => {
                let ws = resolve_workspace(&client, &workspace).await?;
                println!("{}", workspace::describe(&ws));
            }
        },
    }

    Ok(())
}

/// Split `owner/name`; a bare name belongs to `default_owner`.
pub fn parse_workspace_ref<'a>(reference: &'a str, default_owner: &'a str) -> (&'a str, &'a str) {
    match reference.split_once('/') {
        Some((owner, name)) if !owner.is_empty() => (owner, name),
        Some((_, name)) => (default_owner, name),
        None => (default_owner, reference),
    }
}

/// Look up a workspace given as `name` or `owner/name`.
pub async fn resolve_workspace(client: &HangarClient, reference: &str) -> Result<Workspace> {
    let (owner, name) = parse_workspace_ref(reference, client.user());
    client
        .get_workspace_by_name(owner, name)
        .await
        .with_context(|| format!("Failed to look up workspace {}/{}", owner, name))
}
