//! Credential resolution from the environment (and the token file fallback).
//!
//! Every secret is read at stage start, wrapped in [`SecretString`], and
//! passed explicitly into the stage. Nothing has a built-in default value.

use std::path::Path;

use secrecy::SecretString;
use serde::Deserialize;

use crate::config::AppConfig;
use crate::error::{HarvestError, Result};

/// Default OAuth token endpoint when the bundle does not name one.
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Session credentials for the CRM web app (export trigger).
#[derive(Debug)]
pub struct SessionCredentials {
    /// Anti-forgery token, sent as header and cookie.
    pub csrf_token: SecretString,
    /// Short-lived session cookie value.
    pub session_cookie: SecretString,
}

/// OAuth token bundle for the mailbox and spreadsheet APIs.
#[derive(Debug)]
pub struct GoogleTokenBundle {
    /// Last known access token.
    pub token: Option<SecretString>,
    pub refresh_token: Option<SecretString>,
    pub token_uri: String,
    pub client_id: Option<String>,
    pub client_secret: Option<SecretString>,
}

impl GoogleTokenBundle {
    /// Whether the bundle has everything needed for a refresh exchange.
    pub fn can_refresh(&self) -> bool {
        self.refresh_token.is_some() && self.client_id.is_some() && self.client_secret.is_some()
    }
}

/// On-disk/env JSON shape of the token bundle.
#[derive(Deserialize)]
struct RawTokenBundle {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    token_uri: Option<String>,
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    client_secret: Option<String>,
}

/// Resolve CRM session credentials from the process environment.
pub fn session_credentials(config: &AppConfig) -> Result<SessionCredentials> {
    session_credentials_with(config, env_lookup)
}

/// Resolve the CRM application access token from the process environment.
pub fn crm_access_token(config: &AppConfig) -> Result<SecretString> {
    require(&config.crm.access_token_env, env_lookup)
}

/// Load the OAuth token bundle from the env var named in config, falling
/// back to the configured token file.
pub fn google_token_bundle(config: &AppConfig) -> Result<GoogleTokenBundle> {
    google_token_bundle_with(config, env_lookup)
}

fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

pub(crate) fn session_credentials_with(
    config: &AppConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<SessionCredentials> {
    Ok(SessionCredentials {
        csrf_token: require(&config.crm.csrf_token_env, &lookup)?,
        session_cookie: require(&config.crm.session_cookie_env, &lookup)?,
    })
}

pub(crate) fn google_token_bundle_with(
    config: &AppConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<GoogleTokenBundle> {
    let var = &config.mailbox.token_env;

    let raw = match lookup(var).filter(|v| !v.trim().is_empty()) {
        Some(json) => serde_json::from_str::<RawTokenBundle>(&json)
            .map_err(|e| HarvestError::config(format!("{var} is not a valid token bundle: {e}")))?,
        None => read_token_file(Path::new(&config.mailbox.token_file), var)?,
    };

    let bundle = GoogleTokenBundle {
        token: raw.token.filter(|t| !t.is_empty()).map(SecretString::from),
        refresh_token: raw.refresh_token.filter(|t| !t.is_empty()).map(SecretString::from),
        token_uri: raw.token_uri.unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string()),
        client_id: raw.client_id.filter(|t| !t.is_empty()),
        client_secret: raw.client_secret.filter(|t| !t.is_empty()).map(SecretString::from),
    };

    if bundle.token.is_none() && !bundle.can_refresh() {
        return Err(HarvestError::config(
            "token bundle has neither an access token nor refresh credentials",
        ));
    }

    Ok(bundle)
}

fn read_token_file(path: &Path, var: &str) -> Result<RawTokenBundle> {
    if !path.exists() {
        return Err(HarvestError::config(format!(
            "no OAuth token found: set {var} or provide {}",
            path.display()
        )));
    }

    let content = std::fs::read_to_string(path).map_err(|e| HarvestError::io(path, e))?;
    serde_json::from_str(&content)
        .map_err(|e| HarvestError::config(format!("failed to parse {}: {e}", path.display())))
}

fn require(var: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<SecretString> {
    match lookup(var).map(|v| v.trim().to_string()) {
        Some(value) if !value.is_empty() => Ok(SecretString::from(value)),
        _ => Err(HarvestError::config(format!(
            "required credential not found. Set the {var} environment variable"
        ))),
    }
}
