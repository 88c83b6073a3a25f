//! Mailbox REST client used to find delivery notifications and mark them
//! processed.
//!
//! All calls are scoped to the authenticated user (`.../users/me`) and
//! authenticated with an OAuth bearer token.

mod message;
mod query;

use std::time::Duration;

use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use url::Url;

use reportharvest_shared::{HarvestError, MailboxConfig, Result};

pub use message::{Message, MessagePart, PartBody};
pub use query::{NotificationQuery, notification_subject};

/// User-Agent string for mailbox requests.
const USER_AGENT: &str = concat!("ReportHarvest/", env!("CARGO_PKG_VERSION"));

/// A mailbox label.
#[derive(Debug, Clone, Deserialize)]
pub struct Label {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct LabelList {
    #[serde(default)]
    labels: Vec<Label>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NewLabel<'a> {
    name: &'a str,
    label_list_visibility: &'a str,
    message_list_visibility: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct MessageList {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ModifyRequest<'a> {
    add_label_ids: &'a [&'a str],
}

// ---------------------------------------------------------------------------
// MailboxClient
// ---------------------------------------------------------------------------

/// Authenticated mailbox API client.
pub struct MailboxClient {
    client: Client,
    base: String,
    token: SecretString,
}

impl MailboxClient {
    /// Create a client from the `[mailbox]` config section and an access token.
    pub fn new(config: &MailboxConfig, token: SecretString) -> Result<Self> {
        Url::parse(&config.base_url).map_err(|e| {
            HarvestError::config(format!("invalid mailbox base URL '{}': {e}", config.base_url))
        })?;

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| HarvestError::request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base: config.base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    /// List all labels.
    pub async fn list_labels(&self) -> Result<Vec<Label>> {
        let list: LabelList = self.get_json("labels", &[]).await?;
        Ok(list.labels)
    }

    /// Create a visible label.
    pub async fn create_label(&self, name: &str) -> Result<Label> {
        let body = NewLabel {
            name,
            label_list_visibility: "labelShow",
            message_list_visibility: "show",
        };

        let response = self
            .client
            .post(self.url("labels"))
            .bearer_auth(self.token.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| HarvestError::request(format!("create label {name}: {e}")))?;

        read_json(response, &format!("create label {name}")).await
    }

    /// Return the id of the label named exactly `name`, creating it if absent.
    #[instrument(skip(self))]
    pub async fn ensure_label(&self, name: &str) -> Result<String> {
        if let Some(label) = self.list_labels().await?.into_iter().find(|l| l.name == name) {
            debug!(label_id = %label.id, "processed label exists");
            return Ok(label.id);
        }

        let created = self.create_label(name).await?;
        info!(label_id = %created.id, "created processed label");
        Ok(created.id)
    }

    /// Message ids matching `query`, newest first, at most `limit`.
    pub async fn search(&self, query: &NotificationQuery, limit: u32) -> Result<Vec<String>> {
        let q = query.to_string();
        let limit = limit.max(1).to_string();
        let list: MessageList = self
            .get_json("messages", &[("q", q.as_str()), ("maxResults", limit.as_str())])
            .await?;
        Ok(list.messages.into_iter().map(|m| m.id).collect())
    }

    /// Fetch a full message.
    pub async fn get_message(&self, id: &str) -> Result<Message> {
        self.get_json(&format!("messages/{id}"), &[("format", "full")])
            .await
    }

    /// Add a label to a message. Adding a label it already has is a no-op.
    #[instrument(skip(self))]
    pub async fn add_label(&self, message_id: &str, label_id: &str) -> Result<()> {
        let ids = [label_id];
        let body = ModifyRequest { add_label_ids: &ids };
        let context = format!("label message {message_id}");

        let response = self
            .client
            .post(self.url(&format!("messages/{message_id}/modify")))
            .bearer_auth(self.token.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| HarvestError::request(format!("{context}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HarvestError::status(context, status.as_u16()));
        }
        Ok(())
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let response = self
            .client
            .get(self.url(path))
            .bearer_auth(self.token.expose_secret())
            .query(query)
            .send()
            .await
            .map_err(|e| HarvestError::request(format!("{path}: {e}")))?;

        read_json(response, path).await
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    context: &str,
) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        return Err(HarvestError::status(context, status.as_u16()));
    }

    response
        .json()
        .await
        .map_err(|e| HarvestError::parse(format!("{context}: {e}")))
}
