//! Search query construction for delivery notifications.

use std::fmt;

/// Placeholder replaced by the report name in subject templates.
const REPORT_PLACEHOLDER: &str = "{report}";

/// Expected notification subject for a report.
pub fn notification_subject(template: &str, report_name: &str) -> String {
    template.replace(REPORT_PLACEHOLDER, report_name)
}

/// A mailbox search predicate: exact subject, recency, optional label exclusion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationQuery {
    pub subject: String,
    pub exclude_label: Option<String>,
    pub newer_than: String,
}

impl fmt::Display for NotificationQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subject:\"{}\"", self.subject)?;
        if let Some(label) = &self.exclude_label {
            write!(f, " -label:{label}")?;
        }
        write!(f, " newer_than:{}", self.newer_than)
    }
}
