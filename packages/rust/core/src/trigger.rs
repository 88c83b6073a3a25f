//! Export trigger stage: queue one CRM export per catalog report.

use std::time::{Duration, Instant};

use tracing::{info, instrument, warn};

use reportharvest_crm::CrmClient;
use reportharvest_shared::{ReportEntry, Result, SessionCredentials};

use crate::catalog::PayloadCatalog;
use crate::outcome::{BatchSummary, ItemOutcome, ProgressReporter};

/// Stage name used in summaries and progress output.
pub const STAGE: &str = "trigger";

/// Trigger every catalog report in catalog order.
///
/// Fails up front if a report has no payload. Individual request failures
/// are recorded and the batch continues; `delay` is slept between
/// consecutive requests.
#[instrument(skip_all, fields(reports = reports.len()))]
pub async fn trigger_exports(
    crm: &CrmClient,
    portal_id: &str,
    catalog: &PayloadCatalog,
    reports: &[ReportEntry],
    session: &SessionCredentials,
    delay: Duration,
    progress: &dyn ProgressReporter,
) -> Result<BatchSummary> {
    let plan = catalog.plan(reports)?;
    let start = Instant::now();
    let total = plan.len();
    let mut summary = BatchSummary::new(STAGE);

    progress.stage(STAGE, total);

    for (i, (report, payload)) in plan.into_iter().enumerate() {
        if i > 0 && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let outcome = match crm.trigger_export(portal_id, payload, session).await {
            Ok(()) => {
                info!(report = %report.name, "export queued");
                ItemOutcome::done("export queued")
            }
            Err(e) => {
                warn!(report = %report.name, error = %e, "export trigger failed");
                ItemOutcome::failed("export", e)
            }
        };

        progress.item(&report.name, &outcome, i + 1, total);
        summary.push(report.name.clone(), outcome);
    }

    summary.elapsed = start.elapsed();
    info!(
        succeeded = summary.succeeded(),
        failed = summary.failed(),
        "trigger stage finished"
    );
    progress.done(&summary);
    Ok(summary)
}
