use crate::client::HangarClient;
use anyhow::Result;
use hangar_orchestrator::{CreateWorkspaceRequest, CreatedWorkspace, Workspace};

pub async fn create(
    client: &HangarClient,
    name: &str,
    template_version: &str,
    organization: Option<String>,
    tags: Vec<String>,
    initial_build: bool,
) -> Result<CreatedWorkspace> {
    let mut req = CreateWorkspaceRequest::new(name, template_version);
    req.organization_id = organization;
    req.tags = tags;
    req.initial_build = initial_build;

    client.create_workspace(&req).await
}

pub fn describe(ws: &Workspace) -> String {
    format!(
        "{}/{} [{}] template {} ({})",
        ws.owner, ws.name, ws.organization_id, ws.template_version_id, ws.id
    )
}
