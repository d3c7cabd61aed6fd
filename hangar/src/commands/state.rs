//! `hangar state pull` and `hangar state push`.

use super::resolve_workspace;
use crate::client::HangarClient;
use anyhow::{Context, Result};
use hangar_orchestrator::WorkspaceBuild;
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::info;

/// Write a workspace's state verbatim to `output`, or to stdout.
/// Returns the number of bytes written.
pub async fn pull(
    client: &HangarClient,
    workspace: &str,
    build: Option<i64>,
    output: Option<&Path>,
) -> Result<usize> {
    let ws = resolve_workspace(client, workspace).await?;
    let state = client
        .pull_state(&ws.id, build)
        .await
        .with_context(|| format!("Failed to pull state of {}/{}", ws.owner, ws.name))?;

    match output {
        Some(path) => {
            tokio::fs::write(path, &state)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!(bytes = state.len(), path = %path.display(), "state written");
        }
        None => {
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&state).await?;
            stdout.flush().await?;
        }
    }

    Ok(state.len())
}

/// Create a build of the workspace carrying the state read from `input`
/// (`-` reads stdin). `build` is the build number the new build must get.
pub async fn push(
    client: &HangarClient,
    workspace: &str,
    input: &str,
    build: Option<i64>,
) -> Result<WorkspaceBuild> {
    let state = read_input(input).await?;
    let ws = resolve_workspace(client, workspace).await?;

    client
        .push_state(&ws.id, state, build)
        .await
        .with_context(|| format!("Failed to push state to {}/{}", ws.owner, ws.name))
}

async fn read_input(input: &str) -> Result<Vec<u8>> {
    if input == "-" {
        let mut buf = Vec::new();
        tokio::io::stdin()
            .read_to_end(&mut buf)
            .await
            .context("Failed to read state from stdin")?;
        Ok(buf)
    } else {
        tokio::fs::read(input)
            .await
            .with_context(|| format!("Failed to read {}", input))
    }
}
