/// External conversion backends.
///
/// A `Converter` turns one acquisition folder into one mzML file by running
/// an opaque tool as a child process. The child's stdout and stderr are
/// streamed into the log line by line while it runs.
use crate::config::{Backend, ConvertConfig};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

/// Exit code reported when the child was terminated by a signal.
pub const SIGNALLED_EXIT_CODE: i32 = -1;

/// Errors that can occur while invoking a conversion tool.
#[derive(Debug)]
pub enum ConvertError {
    /// A path could not be resolved for mounting or passing to the tool.
    Path {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to spawn the tool subprocess.
    Spawn {
        program: String,
        source: std::io::Error,
    },
    /// Failed while waiting on the child.
    Wait { source: std::io::Error },
}

impl std::fmt::Display for ConvertError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConvertError::Path { path, source } => {
                write!(f, "cannot resolve path {}: {source}", path.display())
            }
            ConvertError::Spawn { program, source } => {
                write!(f, "failed to spawn {program}: {source}")
            }
            ConvertError::Wait { source } => {
                write!(f, "failed waiting for conversion process: {source}")
            }
        }
    }
}

impl std::error::Error for ConvertError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConvertError::Path { source, .. } => Some(source),
            ConvertError::Spawn { source, .. } => Some(source),
            ConvertError::Wait { source } => Some(source),
        }
    }
}

/// Something that can convert an acquisition folder into an mzML file.
#[allow(async_fn_in_trait)]
pub trait Converter {
    /// Human-readable backend name (e.g., "docker", "local").
    fn name(&self) -> &str;

    /// Whether the external tool this backend needs can be found.
    fn available(&self) -> bool;

    /// Run the conversion to completion and return the tool's exit code.
    async fn convert(&self, input: &Path, output: &Path) -> Result<i32, ConvertError>;
}

/// Runs the converter inside a container with the input's parent mounted.
#[derive(Debug, Clone)]
pub struct DockerConverter {
    image: String,
    container_root: String,
    tool: String,
}

impl DockerConverter {
    pub fn new(image: &str, container_root: &str, tool: &str) -> Self {
        Self {
            image: image.to_string(),
            container_root: container_root.trim_end_matches('/').to_string(),
            tool: tool.to_string(),
        }
    }

    /// Build the `docker run` arguments for absolute host paths.
    ///
    /// The input's parent is mounted at the container root. If the output
    /// lives elsewhere, its directory gets a second mount at `<root>-out`.
    fn build_args(&self, input: &Path, output: &Path) -> Vec<String> {
        let root = &self.container_root;
        let parent = input.parent().unwrap_or(Path::new("/"));
        let input_name = file_name(input);
        let output_name = file_name(output);
        let output_dir = output.parent().unwrap_or(Path::new("/"));

        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "-v".to_string(),
            format!("{}:{root}", parent.display()),
        ];

        let container_out = if output_dir == parent {
            format!("{root}/{output_name}")
        } else {
            args.push("-v".to_string());
            args.push(format!("{}:{root}-out", output_dir.display()));
            format!("{root}-out/{output_name}")
        };

        args.extend([
            self.image.clone(),
            self.tool.clone(),
            "-i".to_string(),
            format!("{root}/{input_name}"),
            "-o".to_string(),
            container_out,
        ]);
        args
    }
}

impl Converter for DockerConverter {
    fn name(&self) -> &str {
        "docker"
    }

    fn available(&self) -> bool {
        which::which("docker").is_ok()
    }

    async fn convert(&self, input: &Path, output: &Path) -> Result<i32, ConvertError> {
        let input = absolute(input)?;
        let output = absolute(output)?;
        let args = self.build_args(&input, &output);
        tracing::info!(command = %format!("docker {}", args.join(" ")), "running docker");
        run_streaming("docker", &args).await
    }
}

/// Runs a converter executable found on PATH directly on the host.
#[derive(Debug, Clone)]
pub struct LocalConverter {
    program: String,
}

impl LocalConverter {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
        }
    }
}

impl Converter for LocalConverter {
    fn name(&self) -> &str {
        "local"
    }

    fn available(&self) -> bool {
        which::which(&self.program).is_ok()
    }

    async fn convert(&self, input: &Path, output: &Path) -> Result<i32, ConvertError> {
        let args = vec![
            "-i".to_string(),
            input.display().to_string(),
            "-o".to_string(),
            output.display().to_string(),
        ];
        tracing::info!(
            command = %format!("{} {}", self.program, args.join(" ")),
            "running local converter"
        );
        run_streaming(&self.program, &args).await
    }
}

/// The backend selected by configuration.
#[derive(Debug, Clone)]
pub enum ConfiguredConverter {
    Docker(DockerConverter),
    Local(LocalConverter),
}

impl ConfiguredConverter {
    pub fn from_config(config: &ConvertConfig) -> Self {
        match config.backend {
            Backend::Docker => ConfiguredConverter::Docker(DockerConverter::new(
                &config.docker_image,
                &config.container_root,
                &config.tool,
            )),
            Backend::Local => ConfiguredConverter::Local(LocalConverter::new(&config.tool)),
        }
    }
}

impl Converter for ConfiguredConverter {
    fn name(&self) -> &str {
        match self {
            ConfiguredConverter::Docker(c) => c.name(),
            ConfiguredConverter::Local(c) => c.name(),
        }
    }

    fn available(&self) -> bool {
        match self {
            ConfiguredConverter::Docker(c) => c.available(),
            ConfiguredConverter::Local(c) => c.available(),
        }
    }

    async fn convert(&self, input: &Path, output: &Path) -> Result<i32, ConvertError> {
        match self {
            ConfiguredConverter::Docker(c) => c.convert(input, output).await,
            ConfiguredConverter::Local(c) => c.convert(input, output).await,
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Absolute form of `path`. The path itself need not exist, but for a
/// relative path the current directory must be readable.
fn absolute(path: &Path) -> Result<PathBuf, ConvertError> {
    std::path::absolute(path).map_err(|e| ConvertError::Path {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Spawn `program`, log its combined output line by line, and wait for exit.
///
/// The child runs in its own process group so a terminal interrupt aimed at
/// the watcher does not cut a conversion short.
pub async fn run_streaming(program: &str, args: &[String]) -> Result<i32, ConvertError> {
    let start = Instant::now();
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .spawn()
        .map_err(|e| ConvertError::Spawn {
            program: program.to_string(),
            source: e,
        })?;

    let pid = child.id().unwrap_or(0);
    tracing::debug!(pid, program, "conversion process started");

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    tokio::join!(log_lines(stdout, "stdout"), log_lines(stderr, "stderr"));

    let status = child
        .wait()
        .await
        .map_err(|e| ConvertError::Wait { source: e })?;
    let code = status.code().unwrap_or(SIGNALLED_EXIT_CODE);
    tracing::info!(
        program,
        exit_code = code,
        duration_secs = start.elapsed().as_secs(),
        "conversion process exited"
    );
    Ok(code)
}

async fn log_lines<R: AsyncRead + Unpin>(stream: Option<R>, stream_name: &'static str) {
    let Some(stream) = stream else {
        return;
    };
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => tracing::info!(stream = stream_name, "{}", line.trim_end()),
            Ok(None) => break,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    stream = stream_name,
                    "error reading conversion output"
                );
                break;
            }
        }
    }
}
