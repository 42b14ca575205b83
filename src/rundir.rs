//! Dated, numbered run directories and best-effort mirroring.
//!
//! Every scan gets a fresh directory
//! `base_dir/YYYY-MM-DD/Run_NNN_<suffix>` holding `Measdata.nc` plus a copy
//! of the driving script for provenance. `NNN` is the highest run number
//! already present for today plus one, zero-padded to three digits.
//!
//! Mirroring re-creates the dated run directory under a secondary base
//! (typically a network share) and copies its files. The scan engine treats
//! mirroring as optional: failures are logged and swallowed, never raised.

use crate::engine::ScanConfig;
use crate::error::ScanError;
use chrono::Local;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// File name of the structured-array store inside a run directory.
pub const DATA_FILE_NAME: &str = "Measdata.nc";

/// Create a fresh, unique run directory under `base_dir` for today.
pub fn create_run_dir(base_dir: &Path, suffix: &str) -> Result<PathBuf, ScanError> {
    let today = Local::now().format("%Y-%m-%d").to_string();
    let today_dir = base_dir.join(today);
    fs::create_dir_all(&today_dir)?;

    let run_number = next_run_number(&today_dir)?;
    let run_dir = today_dir.join(format!("Run_{run_number:03}_{suffix}"));
    fs::create_dir_all(&run_dir)?;
    info!(dir = %run_dir.display(), "run directory created");
    Ok(run_dir)
}

/// Highest `Run_NNN_*` number in `today_dir`, plus one.
fn next_run_number(today_dir: &Path) -> Result<u32, ScanError> {
    let mut max_seen = 0u32;
    for entry in fs::read_dir(today_dir)? {
        let name = entry?.file_name();
        if let Some(n) = name
            .to_str()
            .and_then(|s| s.split('_').nth(1))
            .and_then(|s| s.parse::<u32>().ok())
        {
            max_seen = max_seen.max(n);
        }
    }
    Ok(max_seen + 1)
}

/// Copy the driving script next to the data, as `Experiment.<ext>`.
pub fn copy_provenance(script: &Path, run_dir: &Path) -> Result<PathBuf, ScanError> {
    let dest_name = match script.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("Experiment.{ext}"),
        None => "Experiment".to_string(),
    };
    let dest = run_dir.join(dest_name);
    fs::copy(script, &dest)?;
    Ok(dest)
}

/// Mirror a finished run directory under `remote_base`, best effort.
///
/// Re-creates `remote_base/YYYY-MM-DD/Run_NNN_<suffix>` (same dated path as
/// the local copy) and copies every regular file. Failures are logged and
/// reported as `false`; the caller must not escalate them.
pub fn mirror_run_dir(run_dir: &Path, remote_base: &Path) -> bool {
    match try_mirror(run_dir, remote_base) {
        Ok(dest) => {
            info!(dest = %dest.display(), "run directory mirrored");
            true
        }
        Err(e) => {
            warn!(
                run_dir = %run_dir.display(),
                remote = %remote_base.display(),
                "could not mirror run directory: {e}"
            );
            false
        }
    }
}

fn try_mirror(run_dir: &Path, remote_base: &Path) -> Result<PathBuf, ScanError> {
    let run_name = run_dir
        .file_name()
        .ok_or_else(|| ScanError::Storage("run directory has no name".into()))?;
    // Keep the dated layer so the mirror mimics the local layout.
    let dated = run_dir
        .parent()
        .and_then(Path::file_name)
        .map(PathBuf::from)
        .unwrap_or_default();

    let dest_dir = remote_base.join(dated).join(run_name);
    fs::create_dir_all(&dest_dir)?;
    for entry in fs::read_dir(run_dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            fs::copy(entry.path(), dest_dir.join(entry.file_name()))?;
        }
    }
    Ok(dest_dir)
}

/// Human-readable summary of a scan for the run-directory name:
/// `_scan<axis>_<first>_<last>` per sweep axis, `_<label>_<value>` per
/// constant, then the free comment.
pub fn scan_suffix(config: &ScanConfig, comment: &str) -> String {
    let mut name = String::new();
    for axis in &config.sweep {
        if let (Some(first), Some(last)) = (axis.values.first(), axis.values.last()) {
            name.push_str(&format!("_scan{}_{}_{}", axis.param.label(), first, last));
        }
    }
    for (param, value) in &config.constants {
        if let Some(v) = value.or_else(|| param.constant()) {
            name.push_str(&format!("_{}_{}", param.label(), v));
        }
    }
    name.push('_');
    name.push_str(comment);
    name
}
