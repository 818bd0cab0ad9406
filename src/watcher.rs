/// The polling loop: classify, track stability, dispatch serially, sleep.
///
/// Everything runs on one logical task. A dispatch blocks the loop until the
/// conversion process exits, so later directories in the same scan wait.
use crate::classify::{self, display_name, expected_artifact, has_required_files};
use crate::config::WatcherConfig;
use crate::convert::Converter;
use crate::dispatch::{Dispatcher, Outcome};
use crate::signals::Shutdown;
use crate::stability::{dir_size, StabilityTracker};
use crate::status::{QueueCounts, StatusTracker, WatcherState};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// What one scan saw and did.
#[derive(Debug, Default)]
#[allow(dead_code)]
pub struct ScanReport {
    pub counts: QueueCounts,
    pub outcomes: Vec<(PathBuf, Outcome)>,
}

impl ScanReport {
    #[allow(dead_code)]
    pub fn dispatched(&self) -> Vec<&Path> {
        self.outcomes.iter().map(|(p, _)| p.as_path()).collect()
    }
}

pub struct Watcher<C: Converter> {
    watch_dir: PathBuf,
    poll_interval: Duration,
    tracker: StabilityTracker,
    /// Directories with a conversion in flight.
    processing: HashSet<PathBuf>,
    dispatcher: Dispatcher<C>,
    status: Option<StatusTracker>,
    shutdown: Shutdown,
}

impl<C: Converter> Watcher<C> {
    pub fn new(config: &WatcherConfig, converter: C, shutdown: Shutdown) -> Self {
        let out_dir = config.watch.out_dir().to_path_buf();
        Self {
            watch_dir: config.watch.dir.clone(),
            poll_interval: Duration::from_secs(config.watch.poll_interval_secs),
            tracker: StabilityTracker::new(config.watch.stability_checks),
            processing: HashSet::new(),
            dispatcher: Dispatcher::new(converter, out_dir, config.convert.dry_run),
            status: None,
            shutdown,
        }
    }

    /// Report loop state through a status file.
    pub fn with_status(mut self, status: StatusTracker) -> Self {
        self.status = Some(status);
        self
    }

    #[allow(dead_code)]
    pub fn tracker(&self) -> &StabilityTracker {
        &self.tracker
    }

    #[allow(dead_code)]
    pub fn processing(&self) -> &HashSet<PathBuf> {
        &self.processing
    }

    #[allow(dead_code)]
    pub fn dispatcher(&self) -> &Dispatcher<C> {
        &self.dispatcher
    }

    fn out_dir(&self) -> &Path {
        self.dispatcher.out_dir()
    }

    fn set_state(&self, state: WatcherState) {
        if let Some(status) = &self.status {
            status.update(state);
        }
    }

    /// Log totals and names of pending and done directories.
    pub fn log_startup_snapshot(&self) {
        let snap = match classify::snapshot(&self.watch_dir, self.out_dir()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    dir = %self.watch_dir.display(),
                    "failed to list watch directory"
                );
                return;
            }
        };
        tracing::info!(
            total = snap.total,
            pending = snap.pending.len(),
            done = snap.done.len(),
            skipped = snap.empty.len(),
            "startup snapshot"
        );
        let names = |dirs: &[PathBuf]| {
            dirs.iter()
                .map(|d| display_name(d))
                .collect::<Vec<_>>()
                .join(", ")
        };
        if !snap.pending.is_empty() {
            tracing::info!("pending: {}", names(&snap.pending));
        }
        if !snap.done.is_empty() {
            tracing::info!("done: {}", names(&snap.done));
        }
        if !snap.empty.is_empty() {
            tracing::info!("skipped (no data yet): {}", names(&snap.empty));
        }
    }

    /// Run a single scan: classify, update stability, dispatch what is stable.
    pub async fn scan_once(&mut self) -> std::io::Result<ScanReport> {
        self.set_state(WatcherState::Scanning);
        let candidates = classify::list_candidates(&self.watch_dir)?;

        let mut done = 0;
        let mut pending = Vec::new();
        for dir in &candidates {
            if expected_artifact(dir, self.out_dir()).exists() {
                done += 1;
            } else if self.processing.contains(dir) {
                continue;
            } else if has_required_files(dir) {
                pending.push(dir.clone());
            }
        }
        self.tracker.retain_only(&candidates);

        let mut report = ScanReport {
            counts: QueueCounts {
                total: candidates.len(),
                pending: pending.len(),
                in_progress: self.processing.len(),
                done,
            },
            outcomes: Vec::new(),
        };
        let counts = report.counts;
        tracing::info!(
            total = counts.total,
            pending = counts.pending,
            in_progress = counts.in_progress,
            done = counts.done,
            "status"
        );
        if let Some(status) = &mut self.status {
            status.set_counts(counts);
        }

        for (idx, dir) in pending.iter().enumerate() {
            if self.shutdown.is_requested() {
                tracing::info!("shutdown requested; not dispatching remaining directories");
                break;
            }
            if self.processing.contains(dir) {
                continue;
            }

            let size = match dir_size(dir) {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        dir = %dir.display(),
                        "error computing directory size"
                    );
                    continue;
                }
            };
            let record = self.tracker.observe(dir, size);
            tracing::debug!(
                dir = %display_name(dir),
                size,
                stable_count = record.stable_count,
                "observed size"
            );
            if !self.tracker.is_stable(&record) {
                continue;
            }

            tracing::info!(
                dir = %dir.display(),
                size,
                position = idx + 1,
                queue = counts.pending,
                "detected stable directory"
            );
            let outcome = self.convert(dir).await;
            report.outcomes.push((dir.clone(), outcome));
        }

        self.set_state(WatcherState::Idle);
        Ok(report)
    }

    /// Dispatch one directory and settle its bookkeeping.
    async fn convert(&mut self, dir: &Path) -> Outcome {
        self.processing.insert(dir.to_path_buf());
        if let Some(status) = &mut self.status {
            status.set_current(Some(display_name(dir)));
        }
        self.set_state(WatcherState::Converting);

        let outcome = self.dispatcher.dispatch(dir).await;

        // Success leaves the artifact on disk, which marks the directory done
        // from now on. Anything else starts a fresh stability cycle.
        self.processing.remove(dir);
        self.tracker.forget(dir);
        if let Some(status) = &mut self.status {
            status.set_current(None);
            match &outcome {
                Outcome::Converted { .. } => status.record_success(),
                Outcome::DryRun { .. } => {}
                Outcome::Inconsistent { .. } | Outcome::Failed { .. } => status.record_failure(),
            }
        }
        if !outcome.is_success() {
            tracing::info!(
                dir = %display_name(dir),
                "directory will be retried after a new stability cycle"
            );
        }
        outcome
    }

    /// Poll until shutdown is requested, or for one scan when `once` is set.
    pub async fn run(&mut self, once: bool) {
        tracing::info!(
            dir = %self.watch_dir.display(),
            out = %self.out_dir().display(),
            poll_interval_secs = self.poll_interval.as_secs(),
            stability = self.tracker.threshold(),
            backend = self.dispatcher.converter().name(),
            "watching"
        );
        self.set_state(WatcherState::Starting);
        self.log_startup_snapshot();

        loop {
            if let Err(e) = self.scan_once().await {
                tracing::error!(
                    error = %e,
                    dir = %self.watch_dir.display(),
                    "scan failed; retrying next cycle"
                );
            }
            if once || self.shutdown.is_requested() {
                break;
            }
            if self.shutdown.sleep(self.poll_interval).await {
                break;
            }
        }

        self.set_state(WatcherState::ShuttingDown);
        if self.shutdown.is_requested() {
            tracing::info!("exiting on user interrupt");
        } else {
            tracing::info!("single scan complete; exiting");
        }
        if let Some(status) = &self.status {
            status.remove();
        }
    }
}
