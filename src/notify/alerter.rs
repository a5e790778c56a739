//! # Local Alert Artifacts
//!
//! Two file channels that need no network:
//! - an append-only text log, one `Alert::summary_line` per alert, echoed to
//!   the operator log at WARN;
//! - a JSON array of every alert exported so far, replaced on each export.
//!
//! Both return without touching the filesystem when given no alerts.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::{Alert, NmasResult};

/// Append one line per alert to `log_path`. Returns the number of lines written.
pub fn log_alerts(log_path: &Path, alerts: &[Alert]) -> NmasResult<usize> {
    if alerts.is_empty() {
        return Ok(0);
    }

    let lines: Vec<String> = alerts.iter().map(Alert::summary_line).collect();
    for line in &lines {
        log::warn!("[ALERT] {}", line);
    }

    ensure_parent(log_path)?;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;
    let mut buf = String::new();
    for line in &lines {
        buf.push_str(line);
        buf.push('\n');
    }
    file.write_all(buf.as_bytes())?;
    file.flush()?;

    Ok(lines.len())
}

/// Read the current export array, append `alerts`, and replace the file.
/// Returns the number of alerts appended.
///
/// The new array goes to a temporary file next to the export and is renamed
/// over it, so a failed write leaves the previous array in place.
pub fn export_json(json_path: &Path, alerts: &[Alert]) -> NmasResult<usize> {
    if alerts.is_empty() {
        return Ok(0);
    }

    let mut existing = read_export(json_path);
    let before = existing.len();
    for alert in alerts {
        existing.push(serde_json::to_value(alert)?);
    }
    let content = serde_json::to_string_pretty(&existing)?;

    replace_file(json_path, |file| file.write_all(content.as_bytes()))?;

    log::info!(
        "[EXPORT] {} alert(s) appended to {} ({} total)",
        alerts.len(),
        json_path.display(),
        before + alerts.len(),
    );
    Ok(alerts.len())
}

/// The export array as stored on disk.
///
/// A missing file, an unreadable file, invalid JSON and JSON that is not an
/// array all read as an empty array: the next export starts a fresh one
/// instead of failing the run.
pub fn read_export(json_path: &Path) -> Vec<serde_json::Value> {
    let Ok(content) = std::fs::read_to_string(json_path) else {
        return Vec::new();
    };
    match serde_json::from_str::<serde_json::Value>(&content) {
        Ok(serde_json::Value::Array(items)) => items,
        Ok(_) | Err(_) => {
            log::warn!(
                "[EXPORT] {} is not a JSON array, starting a new one",
                json_path.display()
            );
            Vec::new()
        }
    }
}

/// Write a sibling temporary file with `write`, then rename it over `path`.
/// On any error the temporary file is removed and `path` is untouched.
fn replace_file(
    path: &Path,
    write: impl FnOnce(&mut File) -> std::io::Result<()>,
) -> NmasResult<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    write(tmp.as_file_mut())?;
    tmp.as_file_mut().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn ensure_parent(path: &Path) -> NmasResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
