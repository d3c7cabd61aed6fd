use super::resolve_workspace;
use crate::client::HangarClient;
use anyhow::{anyhow, bail, Result};
use hangar_orchestrator::{BuildTransition, CreateBuildRequest, JobLog, JobStatus, WorkspaceBuild};
use std::time::Duration;

pub async fn create(
    client: &HangarClient,
    workspace: &str,
    transition: BuildTransition,
    template_version: Option<String>,
    params: &[String],
) -> Result<WorkspaceBuild> {
    let ws = resolve_workspace(client, workspace).await?;

    let mut req = CreateBuildRequest::new(transition);
    req.template_version_id = template_version;
    for param in params {
        let (key, value) = param
            .split_once('=')
            .ok_or_else(|| anyhow!("Invalid parameter '{}', expected KEY=VALUE", param))?;
        req.parameters.insert(key.to_string(), value.to_string());
    }

    client.create_build(&ws.id, &req).await
}

pub async fn list(client: &HangarClient, workspace: &str) -> Result<Vec<WorkspaceBuild>> {
    let ws = resolve_workspace(client, workspace).await?;
    client.list_builds(&ws.id).await
}

/// Wait for the build's job to finish. A failed build is an error.
pub async fn wait(client: &HangarClient, build_id: &str, timeout: Duration) -> Result<WorkspaceBuild> {
    let build = client.get_build(build_id).await?;

    if let Some(job_id) = &build.job_id {
        let job = client.wait_job(job_id, timeout).await?;
        if job.status == JobStatus::Failed {
            bail!(
                "Build #{} failed: {}",
                build.build_number,
                job.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    client.get_build(build_id).await
}

pub async fn logs(client: &HangarClient, build_id: &str) -> Result<Vec<JobLog>> {
    let build = client.get_build(build_id).await?;
    match &build.job_id {
        Some(job_id) => client.job_logs(job_id).await,
        None => Ok(Vec::new()),
    }
}

pub fn describe(build: &WorkspaceBuild) -> String {
    format!(
        "#{} {} {} by {} ({})",
        build.build_number, build.transition, build.status, build.initiator, build.id
    )
}
