/// Status file: writes `.tdfwatch/status` as JSON on every state transition.
///
/// Uses atomic write pattern: write to temp file then rename.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Watcher states written to the status file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatcherState {
    Starting,
    Scanning,
    Converting,
    Idle,
    ShuttingDown,
}

/// The JSON payload written to the status file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusData {
    pub pid: u32,
    pub state: WatcherState,
    pub watch_dir: String,
    pub out_dir: String,
    pub dry_run: bool,
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub done: usize,
    pub current: Option<String>,
    pub conversions_succeeded: u64,
    pub conversions_failed: u64,
    pub started_at: DateTime<Utc>,
    pub last_scan: Option<DateTime<Utc>>,
    pub last_update: DateTime<Utc>,
}

/// Manages the status file lifecycle.
pub struct StatusFile {
    path: PathBuf,
}

impl StatusFile {
    /// Create a new StatusFile writer for the given path.
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Atomically write status data to the status file.
    ///
    /// Writes to a temporary file in the same directory, then renames
    /// to ensure readers never see a partial write.
    pub fn write(&self, data: &StatusData) -> Result<(), StatusError> {
        let json =
            serde_json::to_string_pretty(data).map_err(|e| StatusError::Serialize { source: e })?;

        let dir = self.path.parent().unwrap_or(Path::new("."));
        let tmp_path = dir.join(format!(".status.tmp.{}", std::process::id()));

        std::fs::write(&tmp_path, json.as_bytes()).map_err(|e| StatusError::Write {
            path: tmp_path.clone(),
            source: e,
        })?;

        std::fs::rename(&tmp_path, &self.path).map_err(|e| StatusError::Rename {
            from: tmp_path,
            to: self.path.clone(),
            source: e,
        })?;

        Ok(())
    }

    /// Read and parse the status file.
    pub fn read(&self) -> Result<StatusData, StatusError> {
        let text = std::fs::read_to_string(&self.path).map_err(|e| StatusError::Read {
            path: self.path.clone(),
            source: e,
        })?;
        serde_json::from_str(&text).map_err(|e| StatusError::Parse { source: e })
    }

    /// Remove the status file (on clean shutdown).
    pub fn remove(&self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Per-scan queue totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub done: usize,
}

/// Mutable state tracker that builds StatusData for each update.
pub struct StatusTracker {
    file: StatusFile,
    pid: u32,
    watch_dir: String,
    out_dir: String,
    dry_run: bool,
    counts: QueueCounts,
    current: Option<String>,
    succeeded: u64,
    failed: u64,
    started_at: DateTime<Utc>,
    last_scan: Option<DateTime<Utc>>,
}

impl StatusTracker {
    /// Create a new tracker.
    pub fn new(status_path: PathBuf, watch_dir: &Path, out_dir: &Path, dry_run: bool) -> Self {
        Self {
            file: StatusFile::new(status_path),
            pid: std::process::id(),
            watch_dir: watch_dir.display().to_string(),
            out_dir: out_dir.display().to_string(),
            dry_run,
            counts: QueueCounts::default(),
            current: None,
            succeeded: 0,
            failed: 0,
            started_at: Utc::now(),
            last_scan: None,
        }
    }

    /// Update and write the status file with the given state.
    pub fn update(&self, state: WatcherState) {
        let data = StatusData {
            pid: self.pid,
            state,
            watch_dir: self.watch_dir.clone(),
            out_dir: self.out_dir.clone(),
            dry_run: self.dry_run,
            total: self.counts.total,
            pending: self.counts.pending,
            in_progress: self.counts.in_progress,
            done: self.counts.done,
            current: self.current.clone(),
            conversions_succeeded: self.succeeded,
            conversions_failed: self.failed,
            started_at: self.started_at,
            last_scan: self.last_scan,
            last_update: Utc::now(),
        };

        if let Err(e) = self.file.write(&data) {
            tracing::warn!(error = %e, "failed to write status file");
        }
    }

    /// Record the totals of a finished scan.
    pub fn set_counts(&mut self, counts: QueueCounts) {
        self.counts = counts;
        self.last_scan = Some(Utc::now());
    }

    /// Set or clear the directory currently being converted.
    pub fn set_current(&mut self, dir: Option<String>) {
        self.current = dir;
    }

    pub fn record_success(&mut self) {
        self.succeeded += 1;
    }

    pub fn record_failure(&mut self) {
        self.failed += 1;
    }

    /// Remove the status file.
    pub fn remove(&self) {
        self.file.remove();
    }
}

/// Render status data for `--status`.
pub fn format_status(data: &StatusData) -> String {
    let mut out = String::new();
    out.push_str(&format!("pid:          {}\n", data.pid));
    out.push_str(&format!(
        "state:        {}\n",
        serde_json::to_value(data.state)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default()
    ));
    out.push_str(&format!("watching:     {}\n", data.watch_dir));
    out.push_str(&format!("output:       {}\n", data.out_dir));
    if data.dry_run {
        out.push_str("mode:         dry-run\n");
    }
    out.push_str(&format!(
        "queue:        total={} pending={} in_progress={} done={}\n",
        data.total, data.pending, data.in_progress, data.done
    ));
    if let Some(current) = &data.current {
        out.push_str(&format!("converting:   {current}\n"));
    }
    out.push_str(&format!(
        "conversions:  {} succeeded, {} failed\n",
        data.conversions_succeeded, data.conversions_failed
    ));
    out.push_str(&format!("started:      {}\n", data.started_at.to_rfc3339()));
    if let Some(scan) = data.last_scan {
        out.push_str(&format!("last scan:    {}\n", scan.to_rfc3339()));
    }
    out
}

/// Errors from status file operations.
#[derive(Debug)]
pub enum StatusError {
    Serialize {
        source: serde_json::Error,
    },
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    Rename {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        source: serde_json::Error,
    },
}

impl std::fmt::Display for StatusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusError::Serialize { source } => write!(f, "failed to serialize status: {source}"),
            StatusError::Write { path, source } => {
                write!(
                    f,
                    "failed to write temp status file {}: {source}",
                    path.display()
                )
            }
            StatusError::Rename { from, to, source } => {
                write!(
                    f,
                    "failed to rename {} -> {}: {source}",
                    from.display(),
                    to.display()
                )
            }
            StatusError::Read { path, source } => {
                write!(f, "failed to read status file {}: {source}", path.display())
            }
            StatusError::Parse { source } => write!(f, "failed to parse status: {source}"),
        }
    }
}

impl std::error::Error for StatusError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StatusError::Serialize { source } => Some(source),
            StatusError::Write { source, .. } => Some(source),
            StatusError::Rename { source, .. } => Some(source),
            StatusError::Read { source, .. } => Some(source),
            StatusError::Parse { source } => Some(source),
        }
    }
}
