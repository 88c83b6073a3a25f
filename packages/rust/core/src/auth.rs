//! OAuth access-token refresh for the mailbox and spreadsheet APIs.

use std::time::Duration;

use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, warn};

use reportharvest_shared::{GoogleTokenBundle, HarvestError, Result};

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Produce a usable access token from the bundle.
///
/// Exchanges the refresh token when the bundle can refresh. A failed
/// exchange falls back to the stored token when there is one.
pub async fn access_token(bundle: &GoogleTokenBundle, timeout: Duration) -> Result<SecretString> {
    if !bundle.can_refresh() {
        return bundle.token.as_ref().map(reissue).ok_or_else(|| {
            HarvestError::config("token bundle has no access token and cannot refresh")
        });
    }

    match refresh(bundle, timeout).await {
        Ok(token) => {
            debug!("refreshed access token");
            Ok(token)
        }
        Err(e) => match &bundle.token {
            Some(stored) => {
                warn!(error = %e, "token refresh failed; using stored access token");
                Ok(reissue(stored))
            }
            None => Err(HarvestError::config(format!("token refresh failed: {e}"))),
        },
    }
}

fn reissue(token: &SecretString) -> SecretString {
    SecretString::from(token.expose_secret())
}

async fn refresh(bundle: &GoogleTokenBundle, timeout: Duration) -> Result<SecretString> {
    let (Some(refresh_token), Some(client_id), Some(client_secret)) = (
        bundle.refresh_token.as_ref(),
        bundle.client_id.as_deref(),
        bundle.client_secret.as_ref(),
    ) else {
        return Err(HarvestError::config("incomplete refresh credentials"));
    };

    let client = Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| HarvestError::request(format!("failed to build HTTP client: {e}")))?;

    let form = [
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh_token.expose_secret()),
        ("client_id", client_id),
        ("client_secret", client_secret.expose_secret()),
    ];

    let response = client
        .post(&bundle.token_uri)
        .form(&form)
        .send()
        .await
        .map_err(|e| HarvestError::request(format!("token refresh: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(HarvestError::status("token refresh", status.as_u16()));
    }

    let body: TokenResponse = response
        .json()
        .await
        .map_err(|e| HarvestError::parse(format!("token refresh response: {e}")))?;

    Ok(SecretString::from(body.access_token))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn bundle(token_uri: String, stored: Option<&str>, refreshable: bool) -> GoogleTokenBundle {
        GoogleTokenBundle {
            token: stored.map(SecretString::from),
            refresh_token: refreshable.then(|| SecretString::from("1//refresh")),
            token_uri,
            client_id: refreshable.then(|| "client.apps".to_string()),
            client_secret: refreshable.then(|| SecretString::from("shh")),
        }
    }

    #[tokio::test]
    async fn refresh_exchanges_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("client_id=client.apps"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ya29.fresh",
                "expires_in": 3599,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let b = bundle(format!("{}/token", server.uri()), Some("ya29.stale"), true);
        let token = access_token(&b, Duration::from_secs(5)).await.unwrap();
        assert_eq!(token.expose_secret(), "ya29.fresh");
    }

    #[tokio::test]
    async fn failed_refresh_falls_back_to_stored_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;

        let b = bundle(format!("{}/token", server.uri()), Some("ya29.stale"), true);
        let token = access_token(&b, Duration::from_secs(5)).await.unwrap();
        assert_eq!(token.expose_secret(), "ya29.stale");
    }

    #[tokio::test]
    async fn failed_refresh_without_stored_token_is_config_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let b = bundle(format!("{}/token", server.uri()), None, true);
        let err = access_token(&b, Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, HarvestError::Config { .. }));
    }

    #[tokio::test]
    async fn stored_token_used_without_refresh_fields() {
        let b = bundle("http://127.0.0.1:9/token".to_string(), Some("ya29.only"), false);
        let token = access_token(&b, Duration::from_secs(5)).await.unwrap();
        assert_eq!(token.expose_secret(), "ya29.only");
    }
}
