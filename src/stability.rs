/// Size-stability tracking for directories that are still being copied.
///
/// A directory is stable once the same total size has been observed on
/// `threshold` consecutive scans.
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Sum the sizes of all regular files below `dir`.
///
/// Symlinks to files count with their target's size; symlinked directories
/// are not descended. Files that vanish or cannot be stat'ed mid-walk, and
/// subdirectories that cannot be listed, contribute zero. Only a failure to
/// list `dir` itself is returned as an error.
pub fn dir_size(dir: &Path) -> std::io::Result<u64> {
    std::fs::read_dir(dir)?;
    let mut total = 0u64;
    for entry in WalkDir::new(dir) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) if e.depth() == 0 => {
                return Err(e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("directory walk failed")));
            }
            Err(e) => {
                tracing::debug!(error = %e, "skipping unreadable entry while sizing");
                continue;
            }
        };
        let metadata = if entry.file_type().is_symlink() {
            // Follow the link; a dangling link counts as zero.
            std::fs::metadata(entry.path())
        } else if entry.file_type().is_file() {
            entry.metadata().map_err(std::io::Error::from)
        } else {
            continue;
        };
        match metadata {
            Ok(m) if !m.is_file() => {}
            Ok(m) => total = total.saturating_add(m.len()),
            Err(e) => {
                tracing::debug!(
                    error = %e,
                    file = %entry.path().display(),
                    "cannot stat file, counting as zero"
                );
            }
        }
    }
    Ok(total)
}

/// Last observation for one directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeRecord {
    pub size: u64,
    /// Consecutive scans whose size equalled the previous scan's.
    /// Zero on first observation and after any change.
    pub stable_count: u32,
}

impl SizeRecord {
    /// Number of consecutive scans that have seen this size, including the
    /// current one.
    pub fn observations(&self) -> u32 {
        self.stable_count.saturating_add(1)
    }
}

/// Per-directory rolling size observations.
#[derive(Debug)]
pub struct StabilityTracker {
    threshold: u32,
    records: HashMap<PathBuf, SizeRecord>,
}

impl StabilityTracker {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            records: HashMap::new(),
        }
    }

    /// Record a size for `dir` and return the updated record.
    pub fn observe(&mut self, dir: &Path, size: u64) -> SizeRecord {
        let record = match self.records.get(dir) {
            Some(prev) if prev.size == size => SizeRecord {
                size,
                stable_count: prev.stable_count.saturating_add(1),
            },
            _ => SizeRecord {
                size,
                stable_count: 0,
            },
        };
        self.records.insert(dir.to_path_buf(), record);
        record
    }

    /// True when `record` has met the threshold.
    pub fn is_stable(&self, record: &SizeRecord) -> bool {
        record.observations() >= self.threshold
    }

    /// Drop all state for `dir`, as if it had never been observed.
    pub fn forget(&mut self, dir: &Path) {
        self.records.remove(dir);
    }

    #[allow(dead_code)]
    pub fn get(&self, dir: &Path) -> Option<&SizeRecord> {
        self.records.get(dir)
    }

    /// Drop records for directories no longer present in a scan.
    pub fn retain_only(&mut self, present: &[PathBuf]) {
        self.records.retain(|p, _| present.contains(p));
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.records.len()
    }
}
