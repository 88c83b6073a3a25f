//! Stage entry points wired from [`AppConfig`]: credentials are resolved
//! and clients built before any item is processed, so configuration errors
//! abort a stage before the first network call.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use tracing::{info, instrument};

use reportharvest_crm::{CrmClient, CtaMatcher};
use reportharvest_mailbox::MailboxClient;
use reportharvest_sheets::SheetsClient;
use reportharvest_shared::{
    AppConfig, GoogleTokenBundle, Handoff, Result, crm_access_token, google_token_bundle,
    session_credentials,
};

use crate::auth::access_token;
use crate::catalog::PayloadCatalog;
use crate::handoff::load_handoff;
use crate::materialize::{self, Materializer};
use crate::outcome::{BatchSummary, ProgressReporter};
use crate::resolve::{ResolveOptions, resolve_notifications};
use crate::trigger::trigger_exports;

/// Queue exports for every catalog report.
#[instrument(skip_all)]
pub async fn run_trigger(config: &AppConfig, progress: &dyn ProgressReporter) -> Result<BatchSummary> {
    config.validate_catalog()?;
    let portal_id = config.require_portal_id()?;
    let session = session_credentials(config)?;
    let catalog = PayloadCatalog::load(&config.paths.payloads)?;
    let crm = CrmClient::new(&config.crm)?;

    trigger_exports(
        &crm,
        portal_id,
        &catalog,
        &config.reports,
        &session,
        Duration::from_millis(config.crm.request_delay_ms),
        progress,
    )
    .await
}

/// Locate notifications and write the hand-off file.
#[instrument(skip(config, progress))]
pub async fn run_resolve(
    config: &AppConfig,
    include_processed: bool,
    progress: &dyn ProgressReporter,
) -> Result<BatchSummary> {
    config.validate_catalog()?;
    let mailbox = mailbox_client(config).await?;
    let matcher = CtaMatcher::new(&config.crm.app_base_url)?;
    let options = ResolveOptions::from_config(&config.mailbox, include_processed);

    let result = resolve_notifications(
        &mailbox,
        &matcher,
        &config.reports,
        &options,
        &config.paths.handoff,
        progress,
    )
    .await?;

    Ok(result.summary)
}

/// Materialize every record in the hand-off file.
#[instrument(skip_all)]
pub async fn run_materialize(config: &AppConfig, progress: &dyn ProgressReporter) -> Result<BatchSummary> {
    let handoff = load_handoff(&config.paths.handoff)?;
    if handoff.reports.is_empty() {
        info!("hand-off has no records; nothing to materialize");
        let summary = BatchSummary::new(materialize::STAGE);
        progress.stage(materialize::STAGE, 0);
        progress.done(&summary);
        return Ok(summary);
    }

    let crm_token = crm_access_token(config)?;
    let bundle = google_token_bundle(config)?;

    materialize_handoff(config, &handoff, &crm_token, &bundle, progress).await
}

/// Build the clients from already-resolved credentials and run the
/// materializer. The portal id is only needed to trigger exports.
async fn materialize_handoff(
    config: &AppConfig,
    handoff: &Handoff,
    crm_token: &SecretString,
    bundle: &GoogleTokenBundle,
    progress: &dyn ProgressReporter,
) -> Result<BatchSummary> {
    let spreadsheet_id = config.require_spreadsheet_id()?;
    let google_token = access_token(bundle, Duration::from_secs(config.mailbox.timeout_secs)).await?;

    let crm = CrmClient::new(&config.crm)?;
    let sheets = SheetsClient::new(
        &config.sheets,
        spreadsheet_id,
        SecretString::from(google_token.expose_secret()),
    )?;
    let mailbox = MailboxClient::new(&config.mailbox, google_token)?;

    let materializer = Materializer {
        crm: &crm,
        crm_token,
        sheets: &sheets,
        mailbox: &mailbox,
        clear_range: &config.sheets.clear_range,
    };

    Ok(materializer.run(handoff, progress).await)
}

async fn mailbox_client(config: &AppConfig) -> Result<MailboxClient> {
    let bundle = google_token_bundle(config)?;
    let token = access_token(&bundle, Duration::from_secs(config.mailbox.timeout_secs)).await?;
    MailboxClient::new(&config.mailbox, token)
}
