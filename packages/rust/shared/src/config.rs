//! Application configuration for ReportHarvest.
//!
//! User config lives at `~/.reportharvest/reportharvest.toml` unless an
//! explicit path is given. CLI flags override config file values, which
//! override defaults. Secrets are never stored here; the file only names
//! the environment variables that hold them.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{HarvestError, Result};
use crate::types::ReportEntry;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "reportharvest.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".reportharvest";

/// Template written by `config init`, including the report catalog.
pub const CONFIG_TEMPLATE: &str = include_str!("../templates/reportharvest.toml");

// ---------------------------------------------------------------------------
// Config structs (matching reportharvest.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// CRM reporting platform settings.
    #[serde(default)]
    pub crm: CrmConfig,

    /// Mailbox API settings.
    #[serde(default)]
    pub mailbox: MailboxConfig,

    /// Spreadsheet API settings.
    #[serde(default)]
    pub sheets: SheetsConfig,

    /// Local artifact locations.
    #[serde(default)]
    pub paths: PathsConfig,

    /// The report catalog, in processing order.
    #[serde(default)]
    pub reports: Vec<ReportEntry>,
}

/// `[crm]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrmConfig {
    /// Account id passed as `portalId` on export requests.
    #[serde(default)]
    pub portal_id: String,

    /// Base URL of the CRM web app (export endpoint, notification CTA links).
    #[serde(default = "default_app_base_url")]
    pub app_base_url: String,

    /// Base URL of the CRM public API (files endpoint).
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Env var holding the anti-forgery token.
    #[serde(default = "default_csrf_token_env")]
    pub csrf_token_env: String,

    /// Env var holding the short-lived session cookie.
    #[serde(default = "default_session_cookie_env")]
    pub session_cookie_env: String,

    /// Env var holding the long-lived application access token.
    #[serde(default = "default_access_token_env")]
    pub access_token_env: String,

    /// Flat delay between consecutive export requests.
    #[serde(default = "default_request_delay")]
    pub request_delay_ms: u64,

    /// Timeout for CTA resolution and signed-URL calls.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Timeout for export trigger calls.
    #[serde(default = "default_long_timeout")]
    pub export_timeout_secs: u64,

    /// Timeout for file downloads.
    #[serde(default = "default_long_timeout")]
    pub download_timeout_secs: u64,
}

impl Default for CrmConfig {
    fn default() -> Self {
        Self {
            portal_id: String::new(),
            app_base_url: default_app_base_url(),
            api_base_url: default_api_base_url(),
            csrf_token_env: default_csrf_token_env(),
            session_cookie_env: default_session_cookie_env(),
            access_token_env: default_access_token_env(),
            request_delay_ms: default_request_delay(),
            timeout_secs: default_timeout(),
            export_timeout_secs: default_long_timeout(),
            download_timeout_secs: default_long_timeout(),
        }
    }
}

fn default_app_base_url() -> String {
    "https://app-eu1.hubspot.com".into()
}
fn default_api_base_url() -> String {
    "https://api.hubapi.com".into()
}
fn default_csrf_token_env() -> String {
    "HUBSPOT_CSRF_TOKEN".into()
}
fn default_session_cookie_env() -> String {
    "HUBSPOT_API_COOKIE".into()
}
fn default_access_token_env() -> String {
    "HUBSPOT_TOKEN".into()
}
fn default_request_delay() -> u64 {
    1500
}
fn default_timeout() -> u64 {
    30
}
fn default_long_timeout() -> u64 {
    60
}

/// `[mailbox]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailboxConfig {
    /// Base URL of the mailbox API, scoped to the authenticated user.
    #[serde(default = "default_mailbox_base_url")]
    pub base_url: String,

    /// Label marking notifications that were fully materialized.
    #[serde(default = "default_processed_label")]
    pub processed_label: String,

    /// Expected notification subject; `{report}` is replaced by the report name.
    #[serde(default = "default_subject_template")]
    pub subject_template: String,

    /// Recency window in mailbox query syntax (e.g. `1d`).
    #[serde(default = "default_newer_than")]
    pub newer_than: String,

    /// Maximum matching messages fetched per report (newest first).
    #[serde(default = "default_search_limit")]
    pub search_limit: u32,

    /// Env var holding the OAuth token bundle as JSON.
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// Fallback file holding the OAuth token bundle.
    #[serde(default = "default_token_file")]
    pub token_file: String,

    /// Per-request timeout.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            base_url: default_mailbox_base_url(),
            processed_label: default_processed_label(),
            subject_template: default_subject_template(),
            newer_than: default_newer_than(),
            search_limit: default_search_limit(),
            token_env: default_token_env(),
            token_file: default_token_file(),
            timeout_secs: default_timeout(),
        }
    }
}

fn default_mailbox_base_url() -> String {
    "https://gmail.googleapis.com/gmail/v1/users/me".into()
}
fn default_processed_label() -> String {
    "Automation/HubSpot-Processed".into()
}
fn default_subject_template() -> String {
    r#"Your Report export "{report}" has been delivered"#.into()
}
fn default_newer_than() -> String {
    "1d".into()
}
fn default_search_limit() -> u32 {
    5
}
fn default_token_env() -> String {
    "GOOGLE_TOKEN_JSON".into()
}
fn default_token_file() -> String {
    "token.json".into()
}

/// `[sheets]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SheetsConfig {
    /// Base URL of the spreadsheet API.
    #[serde(default = "default_sheets_base_url")]
    pub base_url: String,

    /// Target spreadsheet id.
    #[serde(default)]
    pub spreadsheet_id: String,

    /// Column range cleared on every destination before writing.
    #[serde(default = "default_clear_range")]
    pub clear_range: String,

    /// Per-request timeout.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for SheetsConfig {
    fn default() -> Self {
        Self {
            base_url: default_sheets_base_url(),
            spreadsheet_id: String::new(),
            clear_range: default_clear_range(),
            timeout_secs: default_timeout(),
        }
    }
}

fn default_sheets_base_url() -> String {
    "https://sheets.googleapis.com/v4".into()
}
fn default_clear_range() -> String {
    "A:ZZ".into()
}

/// `[paths]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Payload catalog (report name -> export payload).
    #[serde(default = "default_payloads_path")]
    pub payloads: PathBuf,

    /// Hand-off artifact written by `resolve`, read by `materialize`.
    #[serde(default = "default_handoff_path")]
    pub handoff: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            payloads: default_payloads_path(),
            handoff: default_handoff_path(),
        }
    }
}

fn default_payloads_path() -> PathBuf {
    PathBuf::from("report_payloads.json")
}
fn default_handoff_path() -> PathBuf {
    PathBuf::from("download_links.json")
}

// ---------------------------------------------------------------------------
// Overrides and validation
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Apply CLI/env overrides on top of file values. Empty values are ignored.
    pub fn with_overrides(mut self, portal_id: Option<&str>, spreadsheet_id: Option<&str>) -> Self {
        if let Some(id) = portal_id.map(str::trim).filter(|s| !s.is_empty()) {
            self.crm.portal_id = id.to_string();
        }
        if let Some(id) = spreadsheet_id.map(str::trim).filter(|s| !s.is_empty()) {
            self.sheets.spreadsheet_id = id.to_string();
        }
        self
    }

    /// The portal id, or a config error if unset.
    pub fn require_portal_id(&self) -> Result<&str> {
        non_empty(&self.crm.portal_id).ok_or_else(|| {
            HarvestError::config("CRM portal id not set. Use --portal-id, HUBSPOT_PORTAL_ID or [crm].portal_id")
        })
    }

    /// The spreadsheet id, or a config error if unset.
    pub fn require_spreadsheet_id(&self) -> Result<&str> {
        non_empty(&self.sheets.spreadsheet_id).ok_or_else(|| {
            HarvestError::config(
                "spreadsheet id not set. Use --spreadsheet-id, SPREADSHEET_ID or [sheets].spreadsheet_id",
            )
        })
    }

    /// Validate the report catalog: non-empty, no blank fields, unique
    /// names and unique destinations.
    pub fn validate_catalog(&self) -> Result<()> {
        if self.reports.is_empty() {
            return Err(HarvestError::config(
                "report catalog is empty. Add [[reports]] entries to the config file",
            ));
        }

        let mut names = HashSet::new();
        let mut destinations = HashSet::new();

        for entry in &self.reports {
            if entry.name.trim().is_empty() || entry.destination.trim().is_empty() {
                return Err(HarvestError::config(format!(
                    "report entry has a blank name or destination: {entry:?}"
                )));
            }
            if !names.insert(entry.name.as_str()) {
                return Err(HarvestError::config(format!(
                    "duplicate report name in catalog: {}",
                    entry.name
                )));
            }
            if !destinations.insert(entry.destination.as_str()) {
                return Err(HarvestError::config(format!(
                    "duplicate destination in catalog: {}",
                    entry.destination
                )));
            }
        }

        Ok(())
    }
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.reportharvest/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| HarvestError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the default config file (`~/.reportharvest/reportharvest.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config.
///
/// An explicit path must exist. Without one, the default location is used
/// and defaults are returned if that file does not exist.
pub fn load_config(explicit: Option<&Path>) -> Result<AppConfig> {
    if let Some(path) = explicit {
        return load_config_from(path);
    }

    let path = config_file_path()?;
    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| HarvestError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| HarvestError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Write the config template. Refuses to overwrite an existing file.
/// Returns the path written.
pub fn init_config(explicit: Option<&Path>) -> Result<PathBuf> {
    let path = match explicit {
        Some(p) => p.to_path_buf(),
        None => config_file_path()?,
    };

    if path.exists() {
        return Err(HarvestError::config(format!(
            "config file already exists at {}",
            path.display()
        )));
    }

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|e| HarvestError::io(dir, e))?;
    }

    std::fs::write(&path, CONFIG_TEMPLATE).map_err(|e| HarvestError::io(&path, e))?;
    tracing::info!(?path, "created config file from template");

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("processed_label"));
        assert!(toml_str.contains("HUBSPOT_TOKEN"));
    }

    #[test]
    fn template_parses_and_validates() {
        let config: AppConfig = toml::from_str(CONFIG_TEMPLATE).expect("parse template");
        assert_eq!(config.reports.len(), 20);
        config.validate_catalog().expect("template catalog is valid");

        let exceptions: Vec<_> = config.reports.iter().filter(|r| !r.use_summary).collect();
        assert_eq!(exceptions.len(), 1);
        assert_eq!(exceptions[0].destination, "SCohort Sales");

        assert_eq!(config.crm.request_delay_ms, 1500);
        assert_eq!(config.sheets.clear_range, "A:ZZ");
        assert!(config.crm.portal_id.is_empty());
        assert!(config.sheets.spreadsheet_id.is_empty());
    }

    #[test]
    fn catalog_preserves_order() {
        let config: AppConfig = toml::from_str(CONFIG_TEMPLATE).expect("parse template");
        assert_eq!(
            config.reports[0].name,
            "Time - Create Deal to KYC - Inbound Scorecard"
        );
        assert_eq!(config.reports[19].destination, "TTL Automated");
    }

    #[test]
    fn empty_catalog_rejected() {
        let config = AppConfig::default();
        let err = config.validate_catalog().unwrap_err();
        assert!(err.to_string().contains("catalog is empty"));
    }

    #[test]
    fn duplicate_destination_rejected() {
        let toml_str = r#"
[[reports]]
name = "A - Inbound Scorecard"
destination = "Shared"

[[reports]]
name = "B - Inbound Scorecard"
destination = "Shared"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        let err = config.validate_catalog().unwrap_err();
        assert!(err.to_string().contains("duplicate destination"));
    }

    #[test]
    fn overrides_win_over_file_values() {
        let mut config = AppConfig::default();
        config.crm.portal_id = "111".into();

        let config = config.with_overrides(Some("222"), Some("sheet-abc"));
        assert_eq!(config.require_portal_id().unwrap(), "222");
        assert_eq!(config.require_spreadsheet_id().unwrap(), "sheet-abc");

        let config = config.with_overrides(Some("  "), None);
        assert_eq!(config.require_portal_id().unwrap(), "222");
    }

    #[test]
    fn missing_ids_are_config_errors() {
        let config = AppConfig::default();
        assert!(matches!(
            config.require_portal_id(),
            Err(HarvestError::Config { .. })
        ));
        assert!(matches!(
            config.require_spreadsheet_id(),
            Err(HarvestError::Config { .. })
        ));
    }

    #[test]
    fn init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("reportharvest.toml");

        let written = init_config(Some(&path)).expect("init");
        assert_eq!(written, path);
        let loaded = load_config(Some(&path)).expect("load");
        assert_eq!(loaded.reports.len(), 20);

        assert!(init_config(Some(&path)).is_err());
    }
}
