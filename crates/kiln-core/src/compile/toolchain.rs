//! External toolchain invocation.
//!
//! The pipeline only ever talks to a [`Toolchain`]; [`GoToolchain`] is the
//! real implementation that spawns the `go` command.

use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

use crate::context::AbortHandle;
use crate::error::{Error, Result};

/// How often a running process is checked for exit or cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// One external command: arguments, environment overrides and working dir.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Arguments after the toolchain binary, e.g. `["mod", "tidy"]`.
    pub args: Vec<String>,

    /// Environment variables set on top of the inherited environment.
    pub env: Vec<(String, String)>,

    /// Working directory (always the build workspace).
    pub cwd: PathBuf,
}

impl Invocation {
    /// A `go` invocation with `args`, run in `cwd`.
    pub fn new(cwd: impl Into<PathBuf>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            env: Vec::new(),
            cwd: cwd.into(),
        }
    }

    /// Set the environment overrides.
    #[must_use]
    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    /// First argument, e.g. `get`, `mod` or `build`.
    pub fn subcommand(&self) -> &str {
        self.args.first().map_or("", String::as_str)
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in &self.env {
            write!(f, "{key}={value} ")?;
        }
        write!(f, "go {}", self.args.join(" "))
    }
}

/// Result of a finished external command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    /// Whether the process exited with status zero.
    pub success: bool,

    /// Exit code, if the process exited normally.
    pub code: Option<i32>,

    /// Combined stdout and stderr.
    pub output: String,
}

impl CommandOutput {
    /// A run that exited with status 0.
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            code: Some(0),
            output: output.into(),
        }
    }

    /// A run that exited with `code`.
    pub fn failure(code: i32, output: impl Into<String>) -> Self {
        Self {
            success: false,
            code: Some(code),
            output: output.into(),
        }
    }
}

/// The external resolver/compiler the pipeline drives.
pub trait Toolchain: Send + Sync {
    /// Run one command to completion, or until `abort` fires.
    ///
    /// A nonzero exit is reported through [`CommandOutput::success`], not as
    /// an error; `Err` means the process could not run at all or was aborted.
    fn run(&self, invocation: &Invocation, abort: &AbortHandle) -> Result<CommandOutput>;

    /// Location of the shared module download cache, if known.
    fn module_cache(&self) -> Option<PathBuf> {
        None
    }
}

/// The Go toolchain, located on `PATH`.
pub struct GoToolchain {
    go_path: PathBuf,
    version: String,
    module_cache: OnceLock<Option<PathBuf>>,
}

impl GoToolchain {
    /// Locate `go` and read its version.
    pub fn new() -> Result<Self> {
        let go_path = which::which("go")
            .map_err(|_| Error::Toolchain("go not found in PATH".to_string()))?;
        Self::with_binary(go_path)
    }

    /// Use a specific `go` binary.
    pub fn with_binary(go_path: impl Into<PathBuf>) -> Result<Self> {
        let go_path = go_path.into();
        let output = Command::new(&go_path)
            .arg("version")
            .output()
            .map_err(|e| Error::Toolchain(format!("Failed to run {}: {}", go_path.display(), e)))?;

        if !output.status.success() {
            return Err(Error::Toolchain(format!(
                "{} version exited with {}",
                go_path.display(),
                output.status
            )));
        }

        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        tracing::debug!("Using {} ({})", version, go_path.display());

        Ok(Self {
            go_path,
            version,
            module_cache: OnceLock::new(),
        })
    }

    /// Path of the `go` executable.
    pub fn go_path(&self) -> &Path {
        &self.go_path
    }

    /// Output of `go version`.
    pub fn version(&self) -> &str {
        &self.version
    }
}

impl Toolchain for GoToolchain {
    fn run(&self, invocation: &Invocation, abort: &AbortHandle) -> Result<CommandOutput> {
        run_process(&self.go_path, invocation, abort)
    }

    fn module_cache(&self) -> Option<PathBuf> {
        self.module_cache
            .get_or_init(|| {
                let output = Command::new(&self.go_path)
                    .args(["env", "GOMODCACHE"])
                    .output()
                    .ok()?;
                if !output.status.success() {
                    return None;
                }
                let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                (!path.is_empty()).then(|| PathBuf::from(path))
            })
            .clone()
    }
}

/// Spawn `program` with the invocation's arguments and wait for it.
///
/// The child is polled so that an abort request kills it promptly instead of
/// waiting for it to finish on its own.
pub fn run_process(
    program: &Path,
    invocation: &Invocation,
    abort: &AbortHandle,
) -> Result<CommandOutput> {
    abort.check()?;

    let mut child = Command::new(program)
        .args(&invocation.args)
        .envs(invocation.env.iter().map(|(k, v)| (k, v)))
        .current_dir(&invocation.cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            Error::Toolchain(format!(
                "Failed to run {} (working dir: {}): {}",
                program.display(),
                invocation.cwd.display(),
                e
            ))
        })?;

    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let status = loop {
        if abort.is_aborted() {
            if let Err(e) = child.kill() {
                tracing::warn!("Failed to kill {}: {}", program.display(), e);
            }
            let _ = child.wait();
            return Err(Error::Aborted);
        }
        match child.try_wait()? {
            Some(status) => break status,
            None => thread::sleep(POLL_INTERVAL),
        }
    };

    let mut output = String::new();
    for reader in [stdout, stderr].into_iter().flatten() {
        let bytes = reader.join().unwrap_or_default();
        output.push_str(&String::from_utf8_lossy(&bytes));
    }

    Ok(CommandOutput {
        success: status.success(),
        code: status.code(),
        output,
    })
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        buf
    })
}
