use std::time::Duration;

/// Tuning knobs for the orchestration engine.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Runs allowed per job before worker loss marks it failed.
    pub max_job_attempts: i64,
    /// How often blocked workers and waiters re-check the database for
    /// changes made by other engine processes.
    pub poll_interval: Duration,
    /// Running jobs without a heartbeat for this long count as worker-lost.
    pub stale_job_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_job_attempts: 3,
            poll_interval: Duration::from_secs(1),
            stale_job_timeout: Duration::from_secs(300),
        }
    }
}

impl OrchestratorConfig {
    pub fn with_max_job_attempts(mut self, attempts: i64) -> Self {
        self.max_job_attempts = attempts.max(1);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_stale_job_timeout(mut self, timeout: Duration) -> Self {
        self.stale_job_timeout = timeout;
        self
    }
}
