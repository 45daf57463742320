use anyhow::{Context, Result};
use easm_core::LiveHost;
use std::fs;
use std::path::{Path, PathBuf};

/// `hosts.csv` -> `hosts.previous.csv`; `hosts` -> `hosts.previous`.
pub fn previous_path(path: &Path) -> PathBuf {
    let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}.previous.{}", ext.to_string_lossy()),
        None => format!("{stem}.previous"),
    };
    path.with_file_name(name)
}

/// Write the live-host CSV, rotating an existing report out of the way first.
/// Returns the number of rows written.
pub fn write_live_report(path: &Path, hosts: &[LiveHost]) -> Result<usize> {
    if path.exists() {
        let prev = previous_path(path);
        fs::rename(path, &prev).with_context(|| format!("rotating {} to {}", path.display(), prev.display()))?;
    }
    let mut wtr = csv::Writer::from_path(path).with_context(|| format!("creating {}", path.display()))?;
    wtr.write_record(["domain", "url", "status", "title", "server"])?;
    for h in hosts {
        wtr.write_record([
            h.domain.as_str(),
            h.url.as_str(),
            &h.status.to_string(),
            h.title.as_deref().unwrap_or(""),
            h.server.as_deref().unwrap_or(""),
        ])?;
    }
    wtr.flush()?;
    tracing::info!(report = %path.display(), rows = hosts.len(), "live host report written");
    Ok(hosts.len())
}
