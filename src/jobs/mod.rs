//! Background job scheduling

use std::sync::Arc;

use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use crate::db::Database;
use crate::services::ScanOrchestrator;

/// Initialize and start the job scheduler. Scheduled re-scans walk every
/// registered library; persisted-complete items are skipped through the
/// lookup cache, so a quiet library costs no provider calls.
pub async fn start_scheduler(
    schedule: &str,
    orchestrator: Arc<ScanOrchestrator>,
    db: Database,
) -> anyhow::Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    let rescan_job = Job::new_async(schedule, move |_uuid, _l| {
        let orchestrator = orchestrator.clone();
        let db = db.clone();
        Box::pin(async move {
            info!("Running scheduled library re-scan");
            if let Err(e) = rescan_all(orchestrator, db).await {
                error!("Scheduled re-scan error: {}", e);
            }
        })
    })?;
    scheduler.add(rescan_job).await?;

    scheduler.start().await?;

    info!(schedule = schedule, "Job scheduler started");
    Ok(scheduler)
}

/// Re-scan every registered library in sequence; one failed library does not
/// stop the others
pub async fn rescan_all(orchestrator: Arc<ScanOrchestrator>, db: Database) -> anyhow::Result<()> {
    let libraries = db.libraries().list().await?;
    for library in libraries {
        match orchestrator.scan_library(&library, false).await {
            Ok(summary) => {
                info!(
                    library = %library.name,
                    saved = summary.saved,
                    failed = summary.failed,
                    "Scheduled re-scan finished"
                );
            }
            Err(e) => {
                error!(library = %library.name, error = %e, "Scheduled re-scan failed");
            }
        }
    }
    Ok(())
}
