//! Core stages and domain logic for ReportHarvest.
//!
//! This crate ties the CRM, mailbox and spreadsheet clients together into
//! the three harvest stages: `trigger`, `resolve` and `materialize`.

pub mod auth;
pub mod catalog;
pub mod handoff;
pub mod materialize;
pub mod outcome;
pub mod pipeline;
pub mod resolve;
pub mod table;
pub mod trigger;

pub use catalog::{CatalogCheck, PayloadCatalog};
pub use outcome::{BatchSummary, ItemOutcome, ProgressReporter, RecordStage, SilentProgress};
pub use pipeline::{run_materialize, run_resolve, run_trigger};
