/// One-shot conversion dispatch and result reconciliation.
use crate::classify::{display_name, expected_artifact};
use crate::convert::Converter;
use std::path::{Path, PathBuf};

/// Returned when the converter's external tool cannot be found.
pub const PROBE_UNAVAILABLE_CODE: i32 = 2;

/// Returned when invoking the converter failed before an exit code existed.
pub const INVOCATION_ERROR_CODE: i32 = 99;

/// What a single invocation reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub exit_code: i32,
    /// Where the artifact is expected on the host.
    pub artifact: PathBuf,
    /// True if nothing was run because dry-run is enabled.
    pub dry_run: bool,
}

/// Reconciled result of a dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Exit code 0 and the artifact is on disk.
    Converted { artifact: PathBuf },
    /// Dry-run reported success; nothing was produced.
    DryRun { artifact: PathBuf },
    /// Exit code 0 but the artifact is missing.
    Inconsistent { artifact: PathBuf },
    /// Non-zero exit code.
    Failed { exit_code: i32 },
}

impl Outcome {
    /// Classify an invocation against what is actually on disk.
    pub fn reconcile(invocation: &Invocation) -> Self {
        let artifact = invocation.artifact.clone();
        if invocation.exit_code != 0 {
            Outcome::Failed {
                exit_code: invocation.exit_code,
            }
        } else if artifact.exists() {
            Outcome::Converted { artifact }
        } else if invocation.dry_run {
            Outcome::DryRun { artifact }
        } else {
            Outcome::Inconsistent { artifact }
        }
    }

    /// Whether the directory is finished and can leave tracking for good.
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Converted { .. })
    }
}

/// Runs conversions through a `Converter`, one at a time.
pub struct Dispatcher<C: Converter> {
    converter: C,
    out_dir: PathBuf,
    dry_run: bool,
}

impl<C: Converter> Dispatcher<C> {
    pub fn new(converter: C, out_dir: impl Into<PathBuf>, dry_run: bool) -> Self {
        Self {
            converter,
            out_dir: out_dir.into(),
            dry_run,
        }
    }

    pub fn converter(&self) -> &C {
        &self.converter
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// Invoke the converter once for `dir`. Never returns an error: every
    /// failure is logged and mapped to a non-zero exit code.
    pub async fn invoke(&self, dir: &Path) -> Invocation {
        let artifact = expected_artifact(dir, &self.out_dir);
        let result = |exit_code: i32, dry_run: bool| Invocation {
            exit_code,
            artifact: artifact.clone(),
            dry_run,
        };

        if !self.converter.available() {
            tracing::error!(
                backend = self.converter.name(),
                dir = %dir.display(),
                "conversion tool is not available; cannot convert"
            );
            return result(PROBE_UNAVAILABLE_CODE, false);
        }

        if artifact.exists() {
            tracing::info!(output = %artifact.display(), "skipping conversion; output exists");
            return result(0, false);
        }

        if self.dry_run {
            tracing::info!(
                backend = self.converter.name(),
                input = %dir.display(),
                output = %artifact.display(),
                "[dry-run] would convert"
            );
            return result(0, true);
        }

        match self.converter.convert(dir, &artifact).await {
            Ok(code) => result(code, false),
            Err(e) => {
                tracing::error!(
                    error = %e,
                    backend = self.converter.name(),
                    dir = %dir.display(),
                    output = %artifact.display(),
                    "conversion raised an error"
                );
                result(INVOCATION_ERROR_CODE, false)
            }
        }
    }

    /// Invoke and reconcile, logging the classified outcome.
    pub async fn dispatch(&self, dir: &Path) -> Outcome {
        tracing::info!(dir = %dir.display(), "starting conversion");
        let invocation = self.invoke(dir).await;
        let outcome = Outcome::reconcile(&invocation);
        let name = display_name(dir);
        match &outcome {
            Outcome::Converted { artifact } => {
                tracing::info!(dir = %name, output = %artifact.display(), "conversion succeeded");
            }
            Outcome::DryRun { artifact } => {
                tracing::info!(
                    dir = %name,
                    output = %artifact.display(),
                    "[dry-run] no output produced; directory stays pending"
                );
            }
            Outcome::Inconsistent { artifact } => {
                tracing::error!(
                    dir = %name,
                    expected = %artifact.display(),
                    "conversion reported success but output is missing"
                );
            }
            Outcome::Failed { exit_code } => {
                tracing::error!(dir = %name, exit_code, "conversion failed");
            }
        }
        outcome
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::convert::{ConvertError, Converter};
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    /// Converter double that records calls and optionally writes the artifact.
    pub struct FakeConverter {
        pub available: bool,
        pub exit_code: i32,
        pub write_artifact: bool,
        pub spawn_error: bool,
        pub calls: Mutex<Vec<(PathBuf, PathBuf)>>,
    }

    impl FakeConverter {
        pub fn succeeding() -> Self {
            Self {
                available: true,
                exit_code: 0,
                write_artifact: true,
                spawn_error: false,
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        pub fn called_inputs(&self) -> Vec<PathBuf> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|(i, _)| i.clone())
                .collect()
        }
    }

    impl Converter for FakeConverter {
        fn name(&self) -> &str {
            "fake"
        }

        fn available(&self) -> bool {
            self.available
        }

        async fn convert(&self, input: &Path, output: &Path) -> Result<i32, ConvertError> {
            self.calls
                .lock()
                .unwrap()
                .push((input.to_path_buf(), output.to_path_buf()));
            if self.spawn_error {
                return Err(ConvertError::Spawn {
                    program: "fake".to_string(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such tool"),
                });
            }
            if self.write_artifact {
                std::fs::write(output, b"<mzML/>").unwrap();
            }
            Ok(self.exit_code)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeConverter;
    use super::*;
    use tempfile::tempdir;

    fn setup() -> (tempfile::TempDir, PathBuf) {
        let tmp = tempdir().unwrap();
        let dir = tmp.path().join("run1.d");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("analysis.tdf"), b"data").unwrap();
        (tmp, dir)
    }

    #[tokio::test]
    async fn test_successful_conversion() {
        let (tmp, dir) = setup();
        let dispatcher = Dispatcher::new(FakeConverter::succeeding(), tmp.path(), false);
        let outcome = dispatcher.dispatch(&dir).await;
        assert_eq!(
            outcome,
            Outcome::Converted {
                artifact: tmp.path().join("run1.mzML")
            }
        );
        assert!(outcome.is_success());
        assert_eq!(dispatcher.converter().call_count(), 1);
    }

    #[tokio::test]
    async fn test_probe_unavailable_returns_fixed_code() {
        let (tmp, dir) = setup();
        let fake = FakeConverter {
            available: false,
            ..FakeConverter::succeeding()
        };
        let dispatcher = Dispatcher::new(fake, tmp.path(), false);
        let inv = dispatcher.invoke(&dir).await;
        assert_eq!(inv.exit_code, PROBE_UNAVAILABLE_CODE);
        assert!(!inv.artifact.exists());
        assert_eq!(dispatcher.converter().call_count(), 0);
        assert_eq!(
            Outcome::reconcile(&inv),
            Outcome::Failed {
                exit_code: PROBE_UNAVAILABLE_CODE
            }
        );
    }

    #[tokio::test]
    async fn test_existing_artifact_skips_tool() {
        let (tmp, dir) = setup();
        std::fs::write(tmp.path().join("run1.mzML"), b"old").unwrap();
        let dispatcher = Dispatcher::new(FakeConverter::succeeding(), tmp.path(), false);
        let outcome = dispatcher.dispatch(&dir).await;
        assert!(outcome.is_success());
        assert_eq!(dispatcher.converter().call_count(), 0);
    }

    #[tokio::test]
    async fn test_dry_run_runs_nothing_and_creates_nothing() {
        let (tmp, dir) = setup();
        let out = tmp.path().join("out");
        std::fs::create_dir_all(&out).unwrap();
        let dispatcher = Dispatcher::new(FakeConverter::succeeding(), &out, true);

        let inv = dispatcher.invoke(&dir).await;
        assert_eq!(inv.exit_code, 0);
        assert!(inv.dry_run);
        assert!(!out.join("run1.mzML").exists());
        assert_eq!(dispatcher.converter().call_count(), 0);
        assert_eq!(
            Outcome::reconcile(&inv),
            Outcome::DryRun {
                artifact: out.join("run1.mzML")
            }
        );
    }

    #[tokio::test]
    async fn test_zero_exit_without_artifact_is_inconsistent() {
        let (tmp, dir) = setup();
        let fake = FakeConverter {
            write_artifact: false,
            ..FakeConverter::succeeding()
        };
        let dispatcher = Dispatcher::new(fake, tmp.path(), false);
        let outcome = dispatcher.dispatch(&dir).await;
        assert!(matches!(outcome, Outcome::Inconsistent { .. }));
        assert!(!outcome.is_success());
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failure_even_with_artifact() {
        let (tmp, dir) = setup();
        let fake = FakeConverter {
            exit_code: 1,
            ..FakeConverter::succeeding()
        };
        let dispatcher = Dispatcher::new(fake, tmp.path(), false);
        assert_eq!(
            dispatcher.dispatch(&dir).await,
            Outcome::Failed { exit_code: 1 }
        );
    }

    #[tokio::test]
    async fn test_invocation_error_maps_to_fixed_code() {
        let (tmp, dir) = setup();
        let fake = FakeConverter {
            spawn_error: true,
            ..FakeConverter::succeeding()
        };
        let dispatcher = Dispatcher::new(fake, tmp.path(), false);
        let inv = dispatcher.invoke(&dir).await;
        assert_eq!(inv.exit_code, INVOCATION_ERROR_CODE);
        assert_eq!(dispatcher.converter().call_count(), 1);
    }

    #[tokio::test]
    async fn test_converter_receives_expected_paths() {
        let (tmp, dir) = setup();
        let out = tmp.path().join("mzml");
        std::fs::create_dir_all(&out).unwrap();
        let dispatcher = Dispatcher::new(FakeConverter::succeeding(), &out, false);
        dispatcher.dispatch(&dir).await;
        let calls = dispatcher.converter().calls.lock().unwrap().clone();
        assert_eq!(calls, vec![(dir.clone(), out.join("run1.mzML"))]);
    }
}
