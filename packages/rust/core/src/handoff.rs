//! Hand-off file between the resolver and the materializer.

use std::path::Path;

use tracing::debug;

use reportharvest_shared::{Handoff, HarvestError, Result};

/// Read the hand-off document. A missing file is a configuration error.
pub fn load_handoff(path: &Path) -> Result<Handoff> {
    if !path.exists() {
        return Err(HarvestError::config(format!(
            "hand-off file not found at {} (run `reportharvest resolve` first)",
            path.display()
        )));
    }

    let content = std::fs::read_to_string(path).map_err(|e| HarvestError::io(path, e))?;
    let handoff: Handoff = serde_json::from_str(&content)
        .map_err(|e| HarvestError::parse(format!("hand-off file {}: {e}", path.display())))?;

    debug!(path = %path.display(), records = handoff.reports.len(), "loaded hand-off");
    Ok(handoff)
}

/// Write the hand-off document, replacing any previous one.
pub fn save_handoff(path: &Path, handoff: &Handoff) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| HarvestError::io(parent, e))?;
    }

    let json = serde_json::to_string_pretty(handoff)
        .map_err(|e| HarvestError::parse(format!("hand-off: {e}")))?;
    std::fs::write(path, json + "\n").map_err(|e| HarvestError::io(path, e))?;

    debug!(path = %path.display(), records = handoff.reports.len(), "wrote hand-off");
    Ok(())
}
