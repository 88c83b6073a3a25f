//! Notification resolver stage: find each report's newest unprocessed
//! delivery notification and write the hand-off document.

use std::path::Path;
use std::time::Instant;

use tracing::{debug, info, instrument, warn};

use reportharvest_crm::CtaMatcher;
use reportharvest_mailbox::{MailboxClient, NotificationQuery, notification_subject};
use reportharvest_shared::{
    Handoff, HarvestError, MailboxConfig, NotificationRecord, ReportEntry, Result,
};

use crate::handoff::save_handoff;
use crate::outcome::{BatchSummary, ItemOutcome, ProgressReporter};

/// Stage name used in summaries and progress output.
pub const STAGE: &str = "resolve";

/// Search settings for one resolver run.
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    /// Name of the label marking consumed notifications.
    pub processed_label: String,
    /// Subject template with a `{report}` placeholder.
    pub subject_template: String,
    /// Recency window in mailbox query syntax (`1d`).
    pub newer_than: String,
    /// Matches requested per report, newest first.
    pub search_limit: u32,
    /// Re-discover notifications that already carry the processed label.
    pub include_processed: bool,
}

impl ResolveOptions {
    pub fn from_config(config: &MailboxConfig, include_processed: bool) -> Self {
        Self {
            processed_label: config.processed_label.clone(),
            subject_template: config.subject_template.clone(),
            newer_than: config.newer_than.clone(),
            search_limit: config.search_limit,
            include_processed,
        }
    }

    fn query_for(&self, report: &str) -> NotificationQuery {
        NotificationQuery {
            subject: notification_subject(&self.subject_template, report),
            exclude_label: (!self.include_processed).then(|| self.processed_label.clone()),
            newer_than: self.newer_than.clone(),
        }
    }
}

/// Output of a resolver run.
#[derive(Debug)]
pub struct ResolveResult {
    pub handoff: Handoff,
    pub summary: BatchSummary,
}

/// Locate notifications for every catalog report and write the hand-off.
///
/// The processed label is ensured first; failing to do so aborts the stage.
/// The hand-off file is replaced even when nothing was found.
#[instrument(skip_all, fields(reports = reports.len(), include_processed = options.include_processed))]
pub async fn resolve_notifications(
    mailbox: &MailboxClient,
    matcher: &CtaMatcher,
    reports: &[ReportEntry],
    options: &ResolveOptions,
    handoff_path: &Path,
    progress: &dyn ProgressReporter,
) -> Result<ResolveResult> {
    let start = Instant::now();
    let label_id = mailbox.ensure_label(&options.processed_label).await?;

    let total = reports.len();
    let mut handoff = Handoff::new();
    let mut summary = BatchSummary::new(STAGE);

    progress.stage(STAGE, total);

    for (i, report) in reports.iter().enumerate() {
        let outcome = match locate(mailbox, matcher, report, options, &label_id).await {
            Ok(Located::Found(record)) => {
                let detail = format!("message {}", record.message_id);
                handoff.reports.insert(report.name.clone(), record);
                ItemOutcome::done(detail)
            }
            Ok(Located::Missing(reason)) => {
                info!(report = %report.name, reason, "notification not found");
                ItemOutcome::missing(reason)
            }
            Err((stage, e)) => {
                warn!(report = %report.name, stage, error = %e, "notification lookup failed");
                ItemOutcome::failed(stage, e)
            }
        };

        progress.item(&report.name, &outcome, i + 1, total);
        summary.push(report.name.clone(), outcome);
    }

    save_handoff(handoff_path, &handoff)?;

    summary.elapsed = start.elapsed();
    info!(
        found = summary.succeeded(),
        missing = summary.missing(),
        failed = summary.failed(),
        path = %handoff_path.display(),
        "resolve stage finished"
    );
    progress.done(&summary);

    Ok(ResolveResult { handoff, summary })
}

enum Located {
    Found(NotificationRecord),
    Missing(&'static str),
}

async fn locate(
    mailbox: &MailboxClient,
    matcher: &CtaMatcher,
    report: &ReportEntry,
    options: &ResolveOptions,
    label_id: &str,
) -> std::result::Result<Located, (&'static str, HarvestError)> {
    let query = options.query_for(&report.name);
    debug!(report = %report.name, %query, "searching mailbox");

    let ids = mailbox
        .search(&query, options.search_limit)
        .await
        .map_err(|e| ("search", e))?;

    let Some((newest, older)) = ids.split_first() else {
        return Ok(Located::Missing("no notification within window"));
    };

    let message = mailbox
        .get_message(newest)
        .await
        .map_err(|e| ("fetch", e))?;

    let Some(body) = message.body_text() else {
        return Ok(Located::Missing("notification has no decodable body"));
    };

    let Some(link) = matcher.extract_link(&body) else {
        return Ok(Located::Missing("no CTA link in notification"));
    };

    if !older.is_empty() {
        warn!(
            report = %report.name,
            superseded = older.len(),
            "older unprocessed notifications will be superseded by the newest"
        );
    }

    Ok(Located::Found(NotificationRecord {
        destination: report.destination.clone(),
        message_id: message.id,
        redirect_link: link,
        label_id: label_id.to_string(),
        use_summary: report.use_summary,
        superseded: older.to_vec(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handoff::load_handoff;
    use crate::outcome::SilentProgress;
    use base64::Engine as _;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use secrecy::SecretString;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    const TEMPLATE: &str = r#"Your Report export "{report}" has been delivered"#;

    /// Matches when the search query `q` contains `needle`.
    fn query_has(needle: &'static str) -> impl Fn(&Request) -> bool + Send + Sync {
        move |req: &Request| {
            req.url
                .query_pairs()
                .any(|(k, v)| k == "q" && v.contains(needle))
        }
    }

    fn mailbox_for(server: &MockServer) -> MailboxClient {
        let config = MailboxConfig {
            base_url: format!("{}/gmail/v1/users/me", server.uri()),
            ..MailboxConfig::default()
        };
        MailboxClient::new(&config, SecretString::from("ya29.test")).unwrap()
    }

    fn options(include_processed: bool) -> ResolveOptions {
        ResolveOptions {
            processed_label: "Automation/HubSpot-Processed".into(),
            subject_template: TEMPLATE.into(),
            newer_than: "1d".into(),
            search_limit: 5,
            include_processed,
        }
    }

    fn report(name: &str, destination: &str, use_summary: bool) -> ReportEntry {
        ReportEntry {
            name: name.into(),
            destination: destination.into(),
            use_summary,
        }
    }

    fn html_message(id: &str, html: &str) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "labelIds": ["INBOX"],
            "payload": {
                "mimeType": "multipart/alternative",
                "body": {},
                "parts": [
                    { "mimeType": "text/plain", "body": { "data": URL_SAFE_NO_PAD.encode("plain") } },
                    { "mimeType": "text/html", "body": { "data": URL_SAFE_NO_PAD.encode(html) } }
                ]
            }
        })
    }

    async fn mount_label(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/labels"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "labels": [{ "id": "Label_42", "name": "Automation/HubSpot-Processed" }]
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn resolves_found_and_missing_reports() {
        let server = MockServer::start().await;
        mount_label(&server).await;

        let cta = format!(
            "{}/api/notification-station/general/v1/notifications/cta/abc?token=1&amp;portalId=2",
            server.uri()
        );
        let html = format!(r#"<p>Ready</p><a href="{cta}">Download</a>"#);

        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages"))
            .and(query_has("Won Sales - Inbound Scorecard"))
            .and(query_has("-label:Automation/HubSpot-Processed"))
            .and(query_param("maxResults", "5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "messages": [{ "id": "m-new" }, { "id": "m-old" }]
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages"))
            .and(query_has("NBM"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "resultSizeEstimate": 0
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages/m-new"))
            .respond_with(ResponseTemplate::new(200).set_body_json(html_message("m-new", &html)))
            .expect(1)
            .mount(&server)
            .await;

        let config = reportharvest_shared::CrmConfig {
            app_base_url: server.uri(),
            ..reportharvest_shared::CrmConfig::default()
        };
        let matcher = CtaMatcher::new(&config.app_base_url).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let handoff_path = dir.path().join("download_links.json");

        let reports = vec![
            report("Won Sales - Inbound Scorecard", "Won Sales", true),
            report("NBM", "NBM", true),
        ];

        let result = resolve_notifications(
            &mailbox_for(&server),
            &matcher,
            &reports,
            &options(false),
            &handoff_path,
            &SilentProgress,
        )
        .await
        .unwrap();

        assert_eq!(result.summary.succeeded(), 1);
        assert_eq!(result.summary.missing(), 1);
        assert!(result.summary.is_success());

        let saved = load_handoff(&handoff_path).unwrap();
        let record = &saved.reports["Won Sales - Inbound Scorecard"];
        assert_eq!(record.destination, "Won Sales");
        assert_eq!(record.message_id, "m-new");
        assert_eq!(record.label_id, "Label_42");
        assert!(record.redirect_link.ends_with("cta/abc?token=1&portalId=2"));
        assert_eq!(record.superseded, vec!["m-old".to_string()]);
        assert!(!saved.reports.contains_key("NBM"));
    }

    #[tokio::test]
    async fn message_without_link_counts_as_missing() {
        let server = MockServer::start().await;
        mount_label(&server).await;

        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "messages": [{ "id": "m1" }]
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages/m1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(html_message("m1", "<p>no link here</p>")),
            )
            .mount(&server)
            .await;

        let matcher = CtaMatcher::new(&server.uri()).unwrap();
        let dir = tempfile::tempdir().unwrap();

        let result = resolve_notifications(
            &mailbox_for(&server),
            &matcher,
            &[report("A", "a", true)],
            &options(false),
            &dir.path().join("h.json"),
            &SilentProgress,
        )
        .await
        .unwrap();

        assert_eq!(result.summary.missing(), 1);
        assert!(result.handoff.reports.is_empty());
    }

    #[tokio::test]
    async fn include_processed_drops_label_exclusion() {
        let server = MockServer::start().await;
        mount_label(&server).await;

        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let matcher = CtaMatcher::new(&server.uri()).unwrap();
        let dir = tempfile::tempdir().unwrap();

        resolve_notifications(
            &mailbox_for(&server),
            &matcher,
            &[report("A", "a", true)],
            &options(true),
            &dir.path().join("h.json"),
            &SilentProgress,
        )
        .await
        .unwrap();

        let requests = server.received_requests().await.unwrap();
        let search = requests
            .iter()
            .find(|r| r.url.path() == "/gmail/v1/users/me/messages")
            .expect("search request");
        let q = search
            .url
            .query_pairs()
            .find(|(k, _)| k == "q")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        assert!(!q.contains("-label:"));
    }

    #[tokio::test]
    async fn search_failure_is_recorded_and_batch_continues() {
        let server = MockServer::start().await;
        mount_label(&server).await;

        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages"))
            .and(query_has("Bad"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let matcher = CtaMatcher::new(&server.uri()).unwrap();
        let dir = tempfile::tempdir().unwrap();

        let result = resolve_notifications(
            &mailbox_for(&server),
            &matcher,
            &[report("Bad", "bad", true), report("Good", "good", true)],
            &options(false),
            &dir.path().join("h.json"),
            &SilentProgress,
        )
        .await
        .unwrap();

        assert_eq!(result.summary.failed(), 1);
        assert_eq!(result.summary.missing(), 1);
        assert!(!result.summary.is_success());
    }
}
