//! Spreadsheet REST client: destination sheets are created on demand,
//! cleared over a fixed maximal range, then rewritten from the origin cell.

use std::time::Duration;

use reqwest::{Client, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use url::Url;

use reportharvest_shared::{HarvestError, Result, SheetsConfig};

/// User-Agent string for spreadsheet requests.
const USER_AGENT: &str = concat!("ReportHarvest/", env!("CARGO_PKG_VERSION"));

/// Cell where every written table starts.
const ORIGIN_CELL: &str = "A1";

#[derive(Debug, Deserialize)]
struct Spreadsheet {
    #[serde(default)]
    sheets: Vec<Sheet>,
}

#[derive(Debug, Deserialize)]
struct Sheet {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
struct SheetProperties {
    title: String,
}

#[derive(Debug, Serialize)]
struct ValueRange<'a> {
    range: &'a str,
    #[serde(rename = "majorDimension")]
    major_dimension: &'a str,
    values: &'a [Vec<String>],
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateResponse {
    #[serde(default)]
    updated_rows: usize,
}

/// Quote a sheet title for use in an A1 range (`'Won Sales'!A1`).
pub fn a1_range(sheet: &str, cells: &str) -> String {
    format!("'{}'!{cells}", sheet.replace('\'', "''"))
}

// ---------------------------------------------------------------------------
// SheetsClient
// ---------------------------------------------------------------------------

/// Authenticated client bound to one spreadsheet.
pub struct SheetsClient {
    client: Client,
    base: String,
    spreadsheet_id: String,
    token: SecretString,
}

impl SheetsClient {
    /// Create a client from the `[sheets]` config section.
    pub fn new(config: &SheetsConfig, spreadsheet_id: &str, token: SecretString) -> Result<Self> {
        Url::parse(&config.base_url).map_err(|e| {
            HarvestError::config(format!("invalid sheets base URL '{}': {e}", config.base_url))
        })?;

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| HarvestError::request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base: config.base_url.trim_end_matches('/').to_string(),
            spreadsheet_id: spreadsheet_id.to_string(),
            token,
        })
    }

    /// Titles of all sheets in the spreadsheet, in tab order.
    pub async fn sheet_titles(&self) -> Result<Vec<String>> {
        let response = self
            .client
            .get(self.spreadsheet_url(""))
            .bearer_auth(self.token.expose_secret())
            .query(&[("fields", "sheets.properties.title")])
            .send()
            .await
            .map_err(|e| HarvestError::request(format!("spreadsheet metadata: {e}")))?;

        let spreadsheet: Spreadsheet = read_json(response, "spreadsheet metadata").await?;
        Ok(spreadsheet
            .sheets
            .into_iter()
            .map(|s| s.properties.title)
            .collect())
    }

    /// Add a sheet with the given title.
    pub async fn add_sheet(&self, title: &str) -> Result<()> {
        let body = serde_json::json!({
            "requests": [{ "addSheet": { "properties": { "title": title } } }]
        });
        let context = format!("add sheet {title}");

        let response = self
            .client
            .post(self.spreadsheet_url(":batchUpdate"))
            .bearer_auth(self.token.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| HarvestError::request(format!("{context}: {e}")))?;

        check(response, &context)
    }

    /// Create the sheet unless a sheet with exactly this title exists.
    /// Returns whether it was created.
    #[instrument(skip(self))]
    pub async fn ensure_sheet(&self, title: &str) -> Result<bool> {
        if self.sheet_titles().await?.iter().any(|t| t == title) {
            return Ok(false);
        }
        self.add_sheet(title).await?;
        info!(sheet = title, "created destination sheet");
        Ok(true)
    }

    /// Clear all values in an A1 range.
    pub async fn clear(&self, range: &str) -> Result<()> {
        let context = format!("clear {range}");
        let response = self
            .client
            .post(self.values_url(range, ":clear"))
            .bearer_auth(self.token.expose_secret())
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|e| HarvestError::request(format!("{context}: {e}")))?;

        check(response, &context)
    }

    /// Write rows starting at the top-left of `range`, as raw values.
    /// Returns the number of rows the API reports as updated.
    pub async fn update(&self, range: &str, values: &[Vec<String>]) -> Result<usize> {
        let context = format!("update {range}");
        let body = ValueRange {
            range,
            major_dimension: "ROWS",
            values,
        };

        let response = self
            .client
            .put(self.values_url(range, ""))
            .bearer_auth(self.token.expose_secret())
            .query(&[("valueInputOption", "RAW")])
            .json(&body)
            .send()
            .await
            .map_err(|e| HarvestError::request(format!("{context}: {e}")))?;

        let result: UpdateResponse = read_json(response, &context).await?;
        Ok(result.updated_rows)
    }

    /// Replace a destination's contents: ensure it exists, clear
    /// `clear_cells` (a fixed maximal range), write `values` from the origin.
    #[instrument(skip(self, values), fields(rows = values.len()))]
    pub async fn replace_contents(
        &self,
        sheet: &str,
        clear_cells: &str,
        values: &[Vec<String>],
    ) -> Result<usize> {
        self.ensure_sheet(sheet).await?;
        self.clear(&a1_range(sheet, clear_cells)).await?;
        let updated = self.update(&a1_range(sheet, ORIGIN_CELL), values).await?;
        debug!(sheet, updated, "destination written");
        Ok(updated)
    }

    fn spreadsheet_url(&self, suffix: &str) -> String {
        format!("{}/spreadsheets/{}{suffix}", self.base, self.spreadsheet_id)
    }

    fn values_url(&self, range: &str, suffix: &str) -> String {
        format!(
            "{}/spreadsheets/{}/values/{}{suffix}",
            self.base,
            self.spreadsheet_id,
            urlencoding::encode(range)
        )
    }
}

fn check(response: Response, context: &str) -> Result<()> {
    let status = response.status();
    if !status.is_success() {
        return Err(HarvestError::status(context, status.as_u16()));
    }
    Ok(())
}

async fn read_json<T: serde::de::DeserializeOwned>(response: Response, context: &str) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        return Err(HarvestError::status(context, status.as_u16()));
    }

    response
        .json()
        .await
        .map_err(|e| HarvestError::parse(format!("{context}: {e}")))
}
