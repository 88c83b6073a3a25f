//! Materializer stage: turn each hand-off record into a written sheet.
//!
//! A record walks `Discovered -> LinkExtracted -> FileIdResolved ->
//! Downloaded -> TableSelected -> Uploaded -> MarkedProcessed`. Any error
//! stops that record at the stage it was trying to reach. The processed
//! label is applied only after the sheet write succeeded.

use std::time::Instant;

use secrecy::SecretString;
use tracing::{debug, info, instrument, warn};

use reportharvest_crm::CrmClient;
use reportharvest_mailbox::MailboxClient;
use reportharvest_sheets::SheetsClient;
use reportharvest_shared::{Handoff, HarvestError, NotificationRecord};

use crate::outcome::{BatchSummary, ItemOutcome, ProgressReporter, RecordStage};
use crate::table::extract_table;

/// Stage name used in summaries and progress output.
pub const STAGE: &str = "materialize";

/// The external services a materializer run talks to.
pub struct Materializer<'a> {
    pub crm: &'a CrmClient,
    /// Application token for the files API.
    pub crm_token: &'a SecretString,
    pub sheets: &'a SheetsClient,
    pub mailbox: &'a MailboxClient,
    /// Cells cleared on every destination before writing (e.g. `A:ZZ`).
    pub clear_range: &'a str,
}

impl Materializer<'_> {
    /// Process every record in hand-off order. Records are independent.
    #[instrument(skip_all, fields(records = handoff.reports.len()))]
    pub async fn run(&self, handoff: &Handoff, progress: &dyn ProgressReporter) -> BatchSummary {
        let start = Instant::now();
        let total = handoff.reports.len();
        let mut summary = BatchSummary::new(STAGE);

        progress.stage(STAGE, total);

        for (i, (report, record)) in handoff.reports.iter().enumerate() {
            let outcome = match self.materialize(report, record).await {
                Ok(rows) => ItemOutcome::done(format!("{rows} rows -> {}", record.destination)),
                Err((stage, e)) => {
                    warn!(report = %report, %stage, error = %e, "record failed");
                    ItemOutcome::failed(stage, e)
                }
            };

            progress.item(report, &outcome, i + 1, total);
            summary.push(report.clone(), outcome);
        }

        summary.elapsed = start.elapsed();
        info!(
            succeeded = summary.succeeded(),
            failed = summary.failed(),
            "materialize stage finished"
        );
        progress.done(&summary);
        summary
    }

    /// Run one record through every state. Returns the written row count.
    async fn materialize(
        &self,
        report: &str,
        record: &NotificationRecord,
    ) -> Result<usize, (RecordStage, HarvestError)> {
        let link = record.redirect_link.trim();
        if link.is_empty() {
            return Err((
                RecordStage::LinkExtracted,
                HarvestError::extraction("record has no redirect link"),
            ));
        }

        let file_id = self
            .crm
            .resolve_file_id(link)
            .await
            .map_err(|e| (RecordStage::FileIdResolved, e))?;
        debug!(report, %file_id, "file id resolved");

        let archive = self
            .fetch_archive(&file_id)
            .await
            .map_err(|e| (RecordStage::Downloaded, e))?;

        let (entry, table) = extract_table(&archive, record.use_summary)
            .map_err(|e| (RecordStage::TableSelected, e))?;
        debug!(report, %entry, rows = table.rows.len(), "table selected");

        let written = self
            .sheets
            .replace_contents(&record.destination, self.clear_range, &table.to_values())
            .await
            .map_err(|e| (RecordStage::Uploaded, e))?;
        if written != table.total_rows() {
            warn!(report, written, expected = table.total_rows(), "row count mismatch after write");
        }

        self.mailbox
            .add_label(&record.message_id, &record.label_id)
            .await
            .map_err(|e| (RecordStage::MarkedProcessed, e))?;

        for older in &record.superseded {
            if let Err(e) = self.mailbox.add_label(older, &record.label_id).await {
                warn!(report, message_id = %older, error = %e, "could not label superseded notification");
            }
        }

        info!(report, destination = %record.destination, rows = written, "record materialized");
        Ok(written)
    }

    async fn fetch_archive(&self, file_id: &str) -> reportharvest_shared::Result<Vec<u8>> {
        let url = self.crm.signed_url(file_id, self.crm_token).await?;
        self.crm.download(&url).await
    }
}
