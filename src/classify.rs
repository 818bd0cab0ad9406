//! Directory classification for the watch root.
//!
//! A candidate is a subdirectory whose name ends with `.d`. Each candidate is
//! either done (its expected mzML exists), pending (it holds data), or skipped
//! (nothing in it yet).

use std::path::{Path, PathBuf};

/// Suffix of acquisition folders written by the instrument.
pub const DIR_SUFFIX: &str = ".d";

/// Extension of the conversion artifact.
pub const ARTIFACT_EXTENSION: &str = "mzML";

/// Files whose presence marks a folder as carrying TDF data.
pub const MARKER_FILES: [&str; 2] = ["analysis.tdf", "analysis.tdf_bin"];

/// Classification of one candidate at scan time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// The expected artifact exists on disk.
    Done,
    /// Holds data and has no artifact yet.
    Pending,
    /// No markers and no files; ignored this cycle.
    Empty,
}

/// List candidate directories directly under `watch_root`, sorted by name.
pub fn list_candidates(watch_root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(watch_root)? {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unreadable entry in watch root");
                continue;
            }
        };
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            tracing::debug!(name = ?name, "skipping entry with non-UTF-8 name");
            continue;
        };
        if !is_candidate_name(name) {
            continue;
        }
        let path = entry.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn is_candidate_name(name: &str) -> bool {
    name.len() > DIR_SUFFIX.len() && name.ends_with(DIR_SUFFIX)
}

/// Directory name with a trailing `.d` (any case) removed.
pub fn base_name(dir: &Path) -> String {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && ext.eq_ignore_ascii_case("d") => stem.to_string(),
        _ => name,
    }
}

/// `<out_dir>/<base_name>.mzML`
pub fn expected_artifact(dir: &Path, out_dir: &Path) -> PathBuf {
    out_dir.join(format!("{}.{ARTIFACT_EXTENSION}", base_name(dir)))
}

/// True when the folder contains a marker file, or failing that any regular
/// file at its top level.
///
/// The fallback is permissive and will also accept unrelated folders that
/// happen to end in `.d` and hold a file. Known source of false positives.
pub fn has_required_files(dir: &Path) -> bool {
    if MARKER_FILES.iter().any(|m| dir.join(m).exists()) {
        return true;
    }

    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) => {
            tracing::debug!(error = %e, dir = %dir.display(), "cannot list candidate directory");
            return false;
        }
    };
    entries.flatten().any(|e| e.path().is_file())
}

/// Classify a single candidate directory.
pub fn classify(dir: &Path, out_dir: &Path) -> Classification {
    if expected_artifact(dir, out_dir).exists() {
        Classification::Done
    } else if has_required_files(dir) {
        Classification::Pending
    } else {
        Classification::Empty
    }
}

/// Names of candidates grouped by classification.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub total: usize,
    pub pending: Vec<PathBuf>,
    pub done: Vec<PathBuf>,
    pub empty: Vec<PathBuf>,
}

/// Classify every candidate under `watch_root`.
pub fn snapshot(watch_root: &Path, out_dir: &Path) -> std::io::Result<Snapshot> {
    let candidates = list_candidates(watch_root)?;
    let mut snap = Snapshot {
        total: candidates.len(),
        ..Default::default()
    };
    for dir in candidates {
        match classify(&dir, out_dir) {
            Classification::Done => snap.done.push(dir),
            Classification::Pending => snap.pending.push(dir),
            Classification::Empty => snap.empty.push(dir),
        }
    }
    Ok(snap)
}

/// File name of a path for log output.
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
