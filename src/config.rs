use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration loaded from tdfwatch.toml.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
#[derive(Default)]
pub struct WatcherConfig {
    pub watch: WatchConfig,
    pub convert: ConvertConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WatchConfig {
    pub dir: PathBuf,
    /// Where artifacts are written. Falls back to `dir` when unset.
    pub out_dir: Option<PathBuf>,
    pub poll_interval_secs: u64,
    pub stability_checks: u32,
}

/// Which converter implementation to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    Docker,
    Local,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConvertConfig {
    pub backend: Backend,
    pub docker_image: String,
    pub container_root: String,
    pub tool: String,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log file path, appended to. `-` means stderr. Unset means
    /// `conversion.log` inside the watched directory.
    pub file: Option<PathBuf>,
    pub level: String,
}

// --- Default implementations ---

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            out_dir: None,
            poll_interval_secs: 30,
            stability_checks: 2,
        }
    }
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Docker,
            docker_image: "mfreitas/tdf2mzml".to_string(),
            container_root: "/data".to_string(),
            tool: "tdf2mzml.py".to_string(),
            dry_run: false,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file: None,
            level: "info".to_string(),
        }
    }
}

impl WatchConfig {
    /// Resolved output directory.
    pub fn out_dir(&self) -> &Path {
        self.out_dir.as_deref().unwrap_or(&self.dir)
    }
}

impl LogConfig {
    /// Resolved log destination; `None` means stderr.
    pub fn destination(&self, watch_dir: &Path) -> Option<PathBuf> {
        match &self.file {
            Some(p) if p.as_os_str() == "-" => None,
            Some(p) => Some(p.clone()),
            None => Some(watch_dir.join("conversion.log")),
        }
    }
}

/// Load configuration from a TOML file. A missing file yields defaults.
pub fn load(path: &Path) -> Result<WatcherConfig, ConfigError> {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(WatcherConfig::default());
        }
        Err(e) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };
    toml::from_str(&text).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

impl WatcherConfig {
    /// Check values the loop relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.watch.stability_checks == 0 {
            return Err(ConfigError::Invalid(
                "stability_checks must be at least 1".to_string(),
            ));
        }
        if self.watch.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_secs must be at least 1".to_string(),
            ));
        }
        if !self.watch.dir.is_dir() {
            return Err(ConfigError::Invalid(format!(
                "watch directory {} does not exist or is not a directory",
                self.watch.dir.display()
            )));
        }
        if self.convert.docker_image.trim().is_empty() {
            return Err(ConfigError::Invalid("docker_image is empty".to_string()));
        }
        if crate::logging::parse_level(&self.log.level).is_none() {
            return Err(ConfigError::Invalid(format!(
                "unknown log level {:?} (expected trace, debug, info, warning, error or critical)",
                self.log.level
            )));
        }
        Ok(())
    }
}

/// Errors from loading or validating configuration.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {source}", path.display())
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {source}", path.display())
            }
            ConfigError::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Invalid(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_match_reference_behavior() {
        let config = WatcherConfig::default();
        assert_eq!(config.watch.poll_interval_secs, 30);
        assert_eq!(config.watch.stability_checks, 2);
        assert_eq!(config.convert.backend, Backend::Docker);
        assert_eq!(config.convert.docker_image, "mfreitas/tdf2mzml");
        assert_eq!(config.convert.container_root, "/data");
        assert!(!config.convert.dry_run);
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_out_dir_defaults_to_watch_dir() {
        let mut watch = WatchConfig {
            dir: PathBuf::from("/runs"),
            ..Default::default()
        };
        assert_eq!(watch.out_dir(), Path::new("/runs"));
        watch.out_dir = Some(PathBuf::from("/mzml"));
        assert_eq!(watch.out_dir(), Path::new("/mzml"));
    }

    #[test]
    fn test_log_destination() {
        let mut log = LogConfig::default();
        assert_eq!(
            log.destination(Path::new("/runs")),
            Some(PathBuf::from("/runs/conversion.log"))
        );
        log.file = Some(PathBuf::from("-"));
        assert_eq!(log.destination(Path::new("/runs")), None);
        log.file = Some(PathBuf::from("/var/log/tdf.log"));
        assert_eq!(
            log.destination(Path::new("/runs")),
            Some(PathBuf::from("/var/log/tdf.log"))
        );
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = load(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config.watch.stability_checks, 2);
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tdfwatch.toml");
        std::fs::write(
            &path,
            "[watch]\nstability_checks = 4\n\n[convert]\nbackend = \"local\"\ndry_run = true\n",
        )
        .unwrap();
        let config = load(&path).unwrap();
        assert_eq!(config.watch.stability_checks, 4);
        assert_eq!(config.watch.poll_interval_secs, 30);
        assert_eq!(config.convert.backend, Backend::Local);
        assert!(config.convert.dry_run);
        assert_eq!(config.convert.tool, "tdf2mzml.py");
    }

    #[test]
    fn test_load_malformed_file_is_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tdfwatch.toml");
        std::fs::write(&path, "[watch\nstability_checks = ").unwrap();
        let err = load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("failed to parse config"));
    }

    #[test]
    fn test_validate_rejects_zero_threshold() {
        let dir = tempdir().unwrap();
        let mut config = WatcherConfig::default();
        config.watch.dir = dir.path().to_path_buf();
        config.watch.stability_checks = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_missing_watch_dir() {
        let dir = tempdir().unwrap();
        let mut config = WatcherConfig::default();
        config.watch.dir = dir.path().join("missing");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_validate_accepts_defaults_with_real_dir() {
        let dir = tempdir().unwrap();
        let mut config = WatcherConfig::default();
        config.watch.dir = dir.path().to_path_buf();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unknown_log_level() {
        let dir = tempdir().unwrap();
        let mut config = WatcherConfig::default();
        config.watch.dir = dir.path().to_path_buf();
        for level in ["inf0", "verbose"] {
            config.log.level = level.to_string();
            let err = config.validate().unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)));
            assert!(err.to_string().contains("unknown log level"));
        }
        for level in ["WARNING", "DEBUG", "critical"] {
            config.log.level = level.to_string();
            assert!(config.validate().is_ok(), "{level} should be accepted");
        }
    }
}
