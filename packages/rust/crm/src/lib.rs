//! CRM reporting-platform client.
//!
//! Covers the CRM-side calls of the harvest workflow:
//! - queueing a report export with session credentials
//! - following a notification CTA link to the exported file id
//! - exchanging a file id for a short-lived signed download URL
//! - downloading the export archive into memory

mod cta;

use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, COOKIE, HeaderValue, LOCATION};
use reqwest::{Client, Request, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;

use reportharvest_shared::{CrmConfig, HarvestError, Result, SessionCredentials};

pub use cta::{CtaMatcher, redirect_target};

/// User-Agent string for CRM requests.
const USER_AGENT: &str = concat!("ReportHarvest/", env!("CARGO_PKG_VERSION"));

/// Export endpoint path, relative to the app base.
const EXPORT_PATH: &str = "/api/reporting-platform/v1/report-definition/export";

/// Client-side timeout hint the export endpoint expects, in ms.
const CLIENT_TIMEOUT_HINT: &str = "30000";

/// Header carrying the anti-forgery token.
const CSRF_HEADER: &str = "x-hubspot-csrf-hubspotapi";

/// Maximum body characters kept in error context.
const ERROR_SNIPPET_LEN: usize = 100;

/// Signed URL response from the files API.
#[derive(Debug, Deserialize)]
struct SignedUrlResponse {
    #[serde(default)]
    url: Option<String>,
}

// ---------------------------------------------------------------------------
// CrmClient
// ---------------------------------------------------------------------------

/// HTTP client for the CRM app and files API.
pub struct CrmClient {
    client: Client,
    /// Redirects are inspected by hand when resolving CTA links.
    no_redirect: Client,
    app_base: String,
    api_base: String,
    matcher: CtaMatcher,
    timeout: Duration,
    export_timeout: Duration,
    download_timeout: Duration,
}

impl CrmClient {
    /// Create a client from the `[crm]` config section.
    pub fn new(config: &CrmConfig) -> Result<Self> {
        let app_base = normalize_base(&config.app_base_url)?;
        let api_base = normalize_base(&config.api_base_url)?;

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| HarvestError::request(format!("failed to build HTTP client: {e}")))?;

        let no_redirect = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| HarvestError::request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            no_redirect,
            matcher: CtaMatcher::new(&app_base)?,
            app_base,
            api_base,
            timeout: Duration::from_secs(config.timeout_secs),
            export_timeout: Duration::from_secs(config.export_timeout_secs),
            download_timeout: Duration::from_secs(config.download_timeout_secs),
        })
    }

    /// Build the export request for one report payload.
    ///
    /// URL and headers depend only on the payload, the portal id and the
    /// session credentials.
    pub fn export_request(
        &self,
        portal_id: &str,
        payload: &serde_json::Value,
        session: &SessionCredentials,
    ) -> Result<Request> {
        let mut url = Url::parse(&format!("{}{EXPORT_PATH}", self.app_base))
            .map_err(|e| HarvestError::config(format!("invalid export URL: {e}")))?;
        url.query_pairs_mut()
            .append_pair("portalId", portal_id)
            .append_pair("clienttimeout", CLIENT_TIMEOUT_HINT);

        let csrf = session.csrf_token.expose_secret();
        let cookie = format!(
            "hubspotapi-csrf={csrf}; hubspotapi={}",
            session.session_cookie.expose_secret()
        );

        self.client
            .post(url)
            .timeout(self.export_timeout)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .header(CSRF_HEADER, sensitive(csrf)?)
            .header(COOKIE, sensitive(&cookie)?)
            .json(payload)
            .build()
            .map_err(|e| HarvestError::request(format!("failed to build export request: {e}")))
    }

    /// Queue one export. Success is a 200 response; anything else fails.
    #[instrument(skip_all)]
    pub async fn trigger_export(
        &self,
        portal_id: &str,
        payload: &serde_json::Value,
        session: &SessionCredentials,
    ) -> Result<()> {
        let request = self.export_request(portal_id, payload, session)?;

        let response = self
            .client
            .execute(request)
            .await
            .map_err(|e| HarvestError::request(format!("export: {e}")))?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(HarvestError::status(
                format!("export rejected: {}", snippet(&body)),
                status.as_u16(),
            ));
        }

        Ok(())
    }

    /// Follow a notification CTA link (without auto-redirects) to its file id.
    #[instrument(skip_all)]
    pub async fn resolve_file_id(&self, cta_link: &str) -> Result<String> {
        let response = self
            .no_redirect
            .get(cta_link)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| HarvestError::request(format!("CTA link: {e}")))?;

        let status = response.status().as_u16();
        let response_url = response.url().clone();
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(|loc| {
                response_url
                    .join(loc)
                    .map(|u| u.to_string())
                    .unwrap_or_else(|_| loc.to_string())
            });

        let target = redirect_target(status, &response_url, location.as_deref());
        debug!(status, %target, "CTA resolved");

        self.matcher.file_id(&target).ok_or_else(|| {
            HarvestError::extraction(format!("no file id in CTA target {target} (HTTP {status})"))
        })
    }

    /// Exchange a file id for a signed download URL.
    #[instrument(skip(self, token))]
    pub async fn signed_url(&self, file_id: &str, token: &SecretString) -> Result<String> {
        let url = format!("{}/files/v3/files/{file_id}/signed-url", self.api_base);

        let response = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .bearer_auth(token.expose_secret())
            .send()
            .await
            .map_err(|e| HarvestError::request(format!("signed url for file {file_id}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HarvestError::status(
                format!("signed url for file {file_id}"),
                status.as_u16(),
            ));
        }

        let body: SignedUrlResponse = response
            .json()
            .await
            .map_err(|e| HarvestError::parse(format!("signed url response: {e}")))?;

        body.url
            .filter(|u| !u.is_empty())
            .ok_or_else(|| HarvestError::extraction(format!("no signed url for file {file_id}")))
    }

    /// Download a file fully into memory.
    #[instrument(skip_all)]
    pub async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .timeout(self.download_timeout)
            .send()
            .await
            .map_err(|e| HarvestError::request(format!("download: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HarvestError::status("download", status.as_u16()));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| HarvestError::request(format!("download body: {e}")))?;

        debug!(bytes = bytes.len(), "downloaded export archive");
        Ok(bytes.to_vec())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Validate a base URL and strip any trailing slash.
fn normalize_base(base: &str) -> Result<String> {
    Url::parse(base).map_err(|e| HarvestError::config(format!("invalid base URL '{base}': {e}")))?;
    Ok(base.trim_end_matches('/').to_string())
}

fn sensitive(value: &str) -> Result<HeaderValue> {
    let mut header = HeaderValue::from_str(value)
        .map_err(|_| HarvestError::config("credential contains characters not allowed in headers"))?;
    header.set_sensitive(true);
    Ok(header)
}

fn snippet(body: &str) -> String {
    body.chars().take(ERROR_SNIPPET_LEN).collect()
}
