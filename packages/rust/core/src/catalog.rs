//! Export payload catalog: report name -> CRM export request body.
//!
//! Stored as one JSON object on disk. The reserved `_NOTE` key is a
//! free-text annotation and never treated as a report.

use std::path::Path;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, warn};

use reportharvest_shared::{HarvestError, ReportEntry, Result};

/// Reserved annotation key stripped on load.
pub const NOTE_KEY: &str = "_NOTE";

/// Payload field that carries the export display name.
const EXPORT_NAME_FIELD: &str = "exportName";

/// Payloads keyed by report name, in file order.
#[derive(Debug, Clone, Default)]
pub struct PayloadCatalog {
    entries: IndexMap<String, Value>,
}

/// Result of checking the report catalog against the payload file.
#[derive(Debug, Default)]
pub struct CatalogCheck {
    /// Catalog reports with no payload.
    pub missing: Vec<String>,
    /// Catalog reports whose payload is not a JSON object.
    pub not_object: Vec<String>,
    /// `(report, exportName)` where the payload names a different export.
    pub name_mismatch: Vec<(String, String)>,
    /// Payload keys no catalog report refers to.
    pub unreferenced: Vec<String>,
}

impl CatalogCheck {
    /// Missing and malformed payloads are errors; the rest are warnings.
    pub fn is_ok(&self) -> bool {
        self.missing.is_empty() && self.not_object.is_empty()
    }
}

impl PayloadCatalog {
    /// Load the payload file. A missing file is a configuration error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(HarvestError::config(format!(
                "payload catalog not found at {}",
                path.display()
            )));
        }
        Self::read(path)
    }

    /// Load the payload file, or start empty when it does not exist yet.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::read(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse catalog JSON text.
    pub fn parse(json: &str) -> Result<Self> {
        let mut entries: IndexMap<String, Value> = serde_json::from_str(json)
            .map_err(|e| HarvestError::parse(format!("payload catalog: {e}")))?;
        entries.shift_remove(NOTE_KEY);
        Ok(Self { entries })
    }

    fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| HarvestError::io(path, e))?;
        let catalog = Self::parse(&content)?;
        debug!(path = %path.display(), payloads = catalog.len(), "loaded payload catalog");
        Ok(catalog)
    }

    /// Write the catalog as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| HarvestError::io(parent, e))?;
        }
        let json = serde_json::to_string_pretty(&self.entries)
            .map_err(|e| HarvestError::parse(format!("payload catalog: {e}")))?;
        std::fs::write(path, json + "\n").map_err(|e| HarvestError::io(path, e))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Insert or replace a payload keyed by its `exportName`. Returns the key.
    pub fn add(&mut self, payload: Value) -> Result<String> {
        let name = export_name(&payload)
            .ok_or_else(|| {
                HarvestError::config(format!("payload has no string '{EXPORT_NAME_FIELD}' field"))
            })?
            .to_string();

        if name == NOTE_KEY {
            return Err(HarvestError::config(format!("'{NOTE_KEY}' is a reserved key")));
        }

        self.entries.insert(name.clone(), payload);
        Ok(name)
    }

    /// Check every catalog report against the payloads.
    pub fn check(&self, reports: &[ReportEntry]) -> CatalogCheck {
        let mut check = CatalogCheck::default();

        for report in reports {
            match self.entries.get(&report.name) {
                None => check.missing.push(report.name.clone()),
                Some(payload) if !payload.is_object() => check.not_object.push(report.name.clone()),
                Some(payload) => match export_name(payload) {
                    Some(name) if name == report.name => {}
                    Some(name) => check
                        .name_mismatch
                        .push((report.name.clone(), name.to_string())),
                    None => check
                        .name_mismatch
                        .push((report.name.clone(), String::new())),
                },
            }
        }

        check.unreferenced = self
            .entries
            .keys()
            .filter(|k| !reports.iter().any(|r| &r.name == *k))
            .cloned()
            .collect();

        check
    }

    /// Pair each catalog report with its payload, in catalog order.
    ///
    /// Fails before any request is made if a report has no usable payload.
    pub fn plan<'a>(&'a self, reports: &'a [ReportEntry]) -> Result<Vec<(&'a ReportEntry, &'a Value)>> {
        let check = self.check(reports);

        if !check.is_ok() {
            let mut problems = Vec::new();
            if !check.missing.is_empty() {
                problems.push(format!("no payload for: {}", check.missing.join(", ")));
            }
            if !check.not_object.is_empty() {
                problems.push(format!("payload is not an object for: {}", check.not_object.join(", ")));
            }
            return Err(HarvestError::config(problems.join("; ")));
        }

        for (report, name) in &check.name_mismatch {
            warn!(report = %report, export_name = %name, "payload exportName does not match report name");
        }
        for key in &check.unreferenced {
            warn!(payload = %key, "payload not referenced by any catalog report; skipping");
        }

        Ok(reports
            .iter()
            .filter_map(|r| self.entries.get(&r.name).map(|p| (r, p)))
            .collect())
    }
}

fn export_name(payload: &Value) -> Option<&str> {
    payload.get(EXPORT_NAME_FIELD).and_then(Value::as_str)
}
