use hangar_orchestrator::OrchestratorConfig;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_reaper_interval")]
    pub reaper_interval_secs: u64,

    #[serde(default = "default_stale_job_timeout")]
    pub stale_job_timeout_secs: u64,

    #[serde(default = "default_max_job_attempts")]
    pub max_job_attempts: i64,

    #[serde(default = "default_acquire_poll_ms")]
    pub acquire_poll_ms: u64,

    /// In-process echo workers to start alongside the service.
    #[serde(default = "default_echo_provisioners")]
    pub echo_provisioners: usize,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn default_bind_addr() -> String {
    std::env::var("HANGAR_API_BIND").unwrap_or_else(|_| "0.0.0.0:3131".to_string())
}

fn default_db_path() -> PathBuf {
    if let Ok(path) = std::env::var("HANGAR_API_DB_PATH") {
        return PathBuf::from(path);
    }

    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".hangar")
        .join("api")
        .join("hangar.db")
}

fn default_reaper_interval() -> u64 {
    env_or("HANGAR_API_REAPER_INTERVAL", 30)
}

fn default_stale_job_timeout() -> u64 {
    env_or("HANGAR_API_STALE_JOB_TIMEOUT", 300) // 5 minutes
}

fn default_max_job_attempts() -> i64 {
    env_or("HANGAR_MAX_JOB_ATTEMPTS", 3)
}

fn default_acquire_poll_ms() -> u64 {
    env_or("HANGAR_ACQUIRE_POLL_MS", 1000)
}

fn default_echo_provisioners() -> usize {
    env_or("HANGAR_API_ECHO_PROVISIONERS", 0)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            db_path: default_db_path(),
            reaper_interval_secs: default_reaper_interval(),
            stale_job_timeout_secs: default_stale_job_timeout(),
            max_job_attempts: default_max_job_attempts(),
            acquire_poll_ms: default_acquire_poll_ms(),
            echo_provisioners: default_echo_provisioners(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::default()
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig::default()
            .with_max_job_attempts(self.max_job_attempts)
            .with_poll_interval(Duration::from_millis(self.acquire_poll_ms.max(1)))
            .with_stale_job_timeout(Duration::from_secs(self.stale_job_timeout_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orchestrator_config_conversion() {
        let config = Config {
            bind_addr: "127.0.0.1:0".to_string(),
            db_path: PathBuf::from("/tmp/hangar-test.db"),
            reaper_interval_secs: 5,
            stale_job_timeout_secs: 60,
            max_job_attempts: 0,
            acquire_poll_ms: 250,
            echo_provisioners: 0,
        };

        let orchestrator = config.orchestrator_config();

        assert_eq!(orchestrator.max_job_attempts, 1);
        assert_eq!(orchestrator.poll_interval, Duration::from_millis(250));
        assert_eq!(orchestrator.stale_job_timeout, Duration::from_secs(60));
    }
}
