use hangar_orchestrator::Scheduler;
use tokio::time::{interval, Duration};
use tracing::{error, info};

/// Periodically heartbeat local sessions and recover jobs whose worker
/// vanished, including workers of engine processes that crashed.
pub async fn start_reaper_task(scheduler: Scheduler, interval_secs: u64) {
    let mut interval = interval(Duration::from_secs(interval_secs.max(1)));

    info!(
        "Reaper task running (checks every {} seconds)",
        interval_secs
    );

    loop {
        interval.tick().await;

        match scheduler.reap().await {
            Ok(report) if report.requeued + report.failed + report.canceled > 0 => {
                info!(
                    requeued = report.requeued,
                    failed = report.failed,
                    canceled = report.canceled,
                    "Reaper recovered stale jobs"
                );
            }
            Ok(_) => {}
            Err(e) => error!("Reaper pass failed: {}", e),
        }
    }
}
