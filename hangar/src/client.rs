//! Thin HTTP client for the hangar API.

use anyhow::{Context, Result};
use hangar_orchestrator::{
    CreateBuildRequest, CreateWorkspaceRequest, CreatedWorkspace, JobLog, ProvisionerJob,
    Workspace, WorkspaceBuild,
};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use std::time::Duration;
use tracing::debug;

/// A non-success answer from the server.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ApiFailure {
    pub status: StatusCode,
    /// Error kind reported by the server, e.g. `no_state`.
    pub code: String,
    pub message: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    code: String,
}

#[derive(Clone, Debug)]
pub struct HangarClient {
    http: Client,
    base_url: String,
    user: String,
    roles: Option<String>,
}

impl HangarClient {
    pub fn new(base_url: &str, user: &str, roles: Option<&str>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            user: user.to_string(),
            roles: roles.map(str::to_string),
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        debug!(%method, %url, "request");

        let builder = self.http.request(method, url).header("x-user", &self.user);
        match &self.roles {
            Some(roles) => builder.header("x-user-roles", roles),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let response = builder
            .send()
            .await
            .with_context(|| format!("Failed to reach hangar server at {}", self.base_url))?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let failure = match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => ApiFailure {
                status,
                code: body.code,
                message: body.error,
            },
            Err(_) => ApiFailure {
                status,
                code: String::new(),
                message: if text.is_empty() {
                    format!("server answered {}", status)
                } else {
                    format!("server answered {}: {}", status, text)
                },
            },
        };
        Err(failure.into())
    }

    async fn json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        self.send(builder)
            .await?
            .json()
            .await
            .context("Failed to parse response")
    }

    pub async fn create_workspace(&self, req: &CreateWorkspaceRequest) -> Result<CreatedWorkspace> {
        self.json(self.request(reqwest::Method::POST, "/api/v1/workspaces").json(req))
            .await
    }

    pub async fn list_workspaces(&self, owner: Option<&str>) -> Result<Vec<Workspace>> {
        let mut builder = self.request(reqwest::Method::GET, "/api/v1/workspaces");
        if let Some(owner) = owner {
            builder = builder.query(&[("owner", owner)]);
        }
        self.json(builder).await
    }

    pub async fn get_workspace_by_name(&self, owner: &str, name: &str) -> Result<Workspace> {
        self.json(self.request(
            reqwest::Method::GET,
            &format!("/api/v1/users/{}/workspaces/{}", owner, name),
        ))
        .await
    }

    pub async fn create_build(
        &self,
        workspace_id: &str,
        req: &CreateBuildRequest,
    ) -> Result<WorkspaceBuild> {
        self.json(
            self.request(
                reqwest::Method::POST,
                &format!("/api/v1/workspaces/{}/builds", workspace_id),
            )
            .json(req),
        )
        .await
    }

    pub async fn list_builds(&self, workspace_id: &str) -> Result<Vec<WorkspaceBuild>> {
        self.json(self.request(
            reqwest::Method::GET,
            &format!("/api/v1/workspaces/{}/builds", workspace_id),
        ))
        .await
    }

    pub async fn get_build(&self, build_id: &str) -> Result<WorkspaceBuild> {
        self.json(self.request(reqwest::Method::GET, &format!("/api/v1/builds/{}", build_id)))
            .await
    }

    pub async fn cancel_build(&self, build_id: &str) -> Result<WorkspaceBuild> {
        self.json(self.request(
            reqwest::Method::POST,
            &format!("/api/v1/builds/{}/cancel", build_id),
        ))
        .await
    }

    pub async fn get_job(&self, job_id: &str) -> Result<ProvisionerJob> {
        self.json(self.request(reqwest::Method::GET, &format!("/api/v1/jobs/{}", job_id)))
            .await
    }

    pub async fn job_logs(&self, job_id: &str) -> Result<Vec<JobLog>> {
        self.json(self.request(
            reqwest::Method::GET,
            &format!("/api/v1/jobs/{}/logs", job_id),
        ))
        .await
    }

    /// Block until the job is terminal. The server answers 408 at the deadline.
    pub async fn wait_job(&self, job_id: &str, timeout: Duration) -> Result<ProvisionerJob> {
        self.json(
            self.request(reqwest::Method::GET, &format!("/api/v1/jobs/{}/wait", job_id))
                .query(&[("timeout_secs", timeout.as_secs())]),
        )
        .await
    }

    pub async fn pull_state(&self, workspace_id: &str, build: Option<i64>) -> Result<Vec<u8>> {
        let mut builder = self.request(
            reqwest::Method::GET,
            &format!("/api/v1/workspaces/{}/state", workspace_id),
        );
        if let Some(build) = build {
            builder = builder.query(&[("build", build)]);
        }

        let bytes = self
            .send(builder)
            .await?
            .bytes()
            .await
            .context("Failed to read state")?;
        Ok(bytes.to_vec())
    }

    pub async fn push_state(
        &self,
        workspace_id: &str,
        state: Vec<u8>,
        build: Option<i64>,
    ) -> Result<WorkspaceBuild> {
        let mut builder = self
            .request(
                reqwest::Method::PUT,
                &format!("/api/v1/workspaces/{}/state", workspace_id),
            )
            .header("content-type", "application/octet-stream")
            .body(state);
        if let Some(build) = build {
            builder = builder.query(&[("build", build)]);
        }
        self.json(builder).await
    }
}

/// Error kind of a failed API call, if the failure came from the server.
pub fn failure_code(err: &anyhow::Error) -> Option<&str> {
    err.downcast_ref::<ApiFailure>().map(|f| f.code.as_str())
}
