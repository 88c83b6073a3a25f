//! Shared types, error model, configuration and credentials for ReportHarvest.
//!
//! This crate is the foundation depended on by all other ReportHarvest crates.
//! It provides:
//! - [`HarvestError`]: the unified error type
//! - Domain types ([`ReportEntry`], [`NotificationRecord`], [`Handoff`])
//! - Configuration ([`AppConfig`], config loading and catalog validation)
//! - Credential resolution ([`SessionCredentials`], [`GoogleTokenBundle`])

pub mod config;
pub mod credentials;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CONFIG_TEMPLATE, CrmConfig, MailboxConfig, PathsConfig, SheetsConfig, config_dir,
    config_file_path, init_config, load_config, load_config_from,
};
pub use credentials::{
    GoogleTokenBundle, SessionCredentials, crm_access_token, google_token_bundle,
    session_credentials,
};
pub use error::{HarvestError, Result};
pub use types::{Handoff, NotificationRecord, ReportEntry};
