//! Core domain types shared by the three stages.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ReportEntry
// ---------------------------------------------------------------------------

/// One catalog entry: a CRM report and the sheet it is written to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    /// Export display name; also the substring the delivery subject carries.
    pub name: String,
    /// Destination sheet/tab title in the target spreadsheet.
    pub destination: String,
    /// Prefer the summary table when the export archive has several.
    #[serde(default = "default_true")]
    pub use_summary: bool,
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// NotificationRecord
// ---------------------------------------------------------------------------

/// A delivery notification located by the resolver, consumed once by the
/// materializer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    /// Destination sheet title.
    #[serde(alias = "sheet_name")]
    pub destination: String,
    /// Mailbox message id of the notification.
    pub message_id: String,
    /// Provider CTA link extracted from the body (entities unescaped).
    #[serde(alias = "cta_link")]
    pub redirect_link: String,
    /// Id of the processed label to apply once materialized.
    pub label_id: String,
    /// Table variant preference for this destination.
    #[serde(default = "default_true")]
    pub use_summary: bool,
    /// Older unprocessed notifications for the same report, replaced by this one.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub superseded: Vec<String>,
}

// ---------------------------------------------------------------------------
// Handoff
// ---------------------------------------------------------------------------

/// The hand-off document written by `resolve` and read by `materialize`.
///
/// `reports` keeps catalog order so the materializer walks records in the
/// same order they were discovered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Handoff {
    /// When the resolver produced this document.
    pub timestamp: DateTime<Utc>,
    /// Report name -> located notification.
    #[serde(default)]
    pub reports: IndexMap<String, NotificationRecord>,
}

impl Handoff {
    /// An empty document stamped with the current time.
    pub fn new() -> Self {
        Self {
            timestamp: Utc::now(),
            reports: IndexMap::new(),
        }
    }
}

impl Default for Handoff {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_entry_defaults_to_summary() {
        let entry: ReportEntry =
            toml::from_str("name = \"NBM - Inbound Scorecard\"\ndestination = \"NBM\"")
                .expect("parse");
        assert!(entry.use_summary);
    }

    #[test]
    fn handoff_accepts_legacy_field_names() {
        let json = r#"{
            "timestamp": "2025-12-15T08:30:00Z",
            "reports": {
                "Won Sales - Inbound Scorecard": {
                    "sheet_name": "Won Sales",
                    "message_id": "18c2f",
                    "cta_link": "https://app-eu1.hubspot.com/api/notification-station/general/v1/notifications/cta/abc?x=1&y=2",
                    "label_id": "Label_7"
                }
            }
        }"#;

        let handoff: Handoff = serde_json::from_str(json).expect("parse legacy handoff");
        let record = &handoff.reports["Won Sales - Inbound Scorecard"];
        assert_eq!(record.destination, "Won Sales");
        assert!(record.redirect_link.ends_with("x=1&y=2"));
        assert!(record.use_summary);
        assert!(record.superseded.is_empty());
    }

    #[test]
    fn handoff_keeps_insertion_order() {
        let mut handoff = Handoff::new();
        for name in ["Zeta", "Alpha", "Mid"] {
            handoff.reports.insert(
                name.to_string(),
                NotificationRecord {
                    destination: name.to_string(),
                    message_id: format!("msg-{name}"),
                    redirect_link: "https://example.com/cta".into(),
                    label_id: "Label_1".into(),
                    use_summary: true,
                    superseded: vec![],
                },
            );
        }

        let json = serde_json::to_string(&handoff).expect("serialize");
        let parsed: Handoff = serde_json::from_str(&json).expect("deserialize");
        let names: Vec<_> = parsed.reports.keys().cloned().collect();
        assert_eq!(names, ["Zeta", "Alpha", "Mid"]);
        assert!(!json.contains("superseded"));
    }
}
