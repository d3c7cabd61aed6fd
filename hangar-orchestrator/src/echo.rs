use crate::daemon::{ProgressSink, Provisioner};
use crate::job::JobType;
use crate::protocol::AcquiredJob;
use async_trait::async_trait;
use std::time::Duration;

/// Provisioner that runs nothing.
///
/// Apply jobs produce the canned state if one was set, otherwise the job's
/// input as JSON. Destroy jobs produce empty state.
#[derive(Debug, Clone, Default)]
pub struct EchoProvisioner {
    state: Option<Vec<u8>>,
    logs: Vec<(String, String)>,
    failure: Option<String>,
    delay: Duration,
    hang: bool,
}

impl EchoProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(mut self, state: impl Into<Vec<u8>>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn with_log(mut self, stage: &str, output: &str) -> Self {
        self.logs.push((stage.to_string(), output.to_string()));
        self
    }

    pub fn failing(mut self, error: &str) -> Self {
        self.failure = Some(error.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Never finish on its own; only cancellation or shutdown ends the job.
    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }
}

#[async_trait]
impl Provisioner for EchoProvisioner {
    async fn provision(&self, job: &AcquiredJob, progress: &ProgressSink) -> anyhow::Result<Vec<u8>> {
        for (stage, output) in &self.logs {
            progress.send(stage, output).await?;
        }

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.hang {
            std::future::pending::<()>().await;
        }
        if let Some(error) = &self.failure {
            anyhow::bail!("{}", error);
        }

        match job.job.job_type {
            JobType::Destroy => Ok(Vec::new()),
            JobType::Apply | JobType::Import => match &self.state {
                Some(state) => Ok(state.clone()),
                None => Ok(serde_json::to_vec(&job.job.input)?),
            },
        }
    }
}
