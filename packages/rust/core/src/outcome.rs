//! Per-item outcomes, batch summaries and progress reporting.
//!
//! Every stage folds item-level errors into an [`ItemOutcome`] at the item
//! boundary; only configuration errors escape a stage as `Err`.

use std::fmt;
use std::time::Duration;

use reportharvest_shared::HarvestError;

/// Materializer record states, in order. A failure is reported against the
/// stage the record was trying to reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStage {
    Discovered,
    LinkExtracted,
    FileIdResolved,
    Downloaded,
    TableSelected,
    Uploaded,
    MarkedProcessed,
}

impl RecordStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::LinkExtracted => "link-extracted",
            Self::FileIdResolved => "file-id-resolved",
            Self::Downloaded => "downloaded",
            Self::TableSelected => "table-selected",
            Self::Uploaded => "uploaded",
            Self::MarkedProcessed => "marked-processed",
        }
    }
}

impl fmt::Display for RecordStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one report or record.
#[derive(Debug)]
pub enum ItemOutcome {
    /// Completed; `detail` is a short human-readable note.
    Done { detail: String },
    /// Expected input absent (no notification, no link). Not a failure.
    Missing { reason: String },
    /// Failed at `stage`.
    Failed { stage: String, error: HarvestError },
}

impl ItemOutcome {
    pub fn done(detail: impl Into<String>) -> Self {
        Self::Done {
            detail: detail.into(),
        }
    }

    pub fn missing(reason: impl Into<String>) -> Self {
        Self::Missing {
            reason: reason.into(),
        }
    }

    pub fn failed(stage: impl fmt::Display, error: HarvestError) -> Self {
        Self::Failed {
            stage: stage.to_string(),
            error,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

impl fmt::Display for ItemOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Done { detail } => write!(f, "ok ({detail})"),
            Self::Missing { reason } => write!(f, "missing ({reason})"),
            Self::Failed { stage, error } => write!(f, "FAILED at {stage}: {error}"),
        }
    }
}

/// Aggregate result of one stage run.
#[derive(Debug, Default)]
pub struct BatchSummary {
    /// Stage name (`trigger`, `resolve`, `materialize`).
    pub stage: String,
    /// `(item name, outcome)` in processing order.
    pub items: Vec<(String, ItemOutcome)>,
    pub elapsed: Duration,
}

impl BatchSummary {
    pub fn new(stage: &str) -> Self {
        Self {
            stage: stage.to_string(),
            ..Self::default()
        }
    }

    pub fn push(&mut self, name: impl Into<String>, outcome: ItemOutcome) {
        self.items.push((name.into(), outcome));
    }

    pub fn succeeded(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Done { .. }))
    }

    pub fn missing(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Missing { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(ItemOutcome::is_failed)
    }

    /// True when no item failed. Missing items do not count against it.
    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    pub fn outcome(&self, name: &str) -> Option<&ItemOutcome> {
        self.items.iter().find(|(n, _)| n == name).map(|(_, o)| o)
    }

    fn count(&self, pred: impl Fn(&ItemOutcome) -> bool) -> usize {
        self.items.iter().filter(|(_, o)| pred(o)).count()
    }
}

/// Progress callback for reporting stage status.
pub trait ProgressReporter: Send + Sync {
    /// Called when a stage starts with the number of items it will visit.
    fn stage(&self, name: &str, total: usize);
    /// Called after each item with its outcome.
    fn item(&self, name: &str, outcome: &ItemOutcome, current: usize, total: usize);
    /// Called when the stage completes.
    fn done(&self, summary: &BatchSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn stage(&self, _name: &str, _total: usize) {}
    fn item(&self, _name: &str, _outcome: &ItemOutcome, _current: usize, _total: usize) {}
    fn done(&self, _summary: &BatchSummary) {}
}
