//! External process execution.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

/// `PATH` handed to launched programs in place of the caller's environment.
pub const DEFAULT_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

const SPAWN_BUSY_RETRIES: u32 = 5;
const SPAWN_BUSY_BACKOFF: Duration = Duration::from_millis(20);

/// Result of running a program to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    /// Process exit code (`None` when the process was killed by a signal).
    pub exit_code: Option<i32>,
    /// Captured stdout bytes.
    pub stdout: Vec<u8>,
    /// Captured stderr bytes.
    pub stderr: Vec<u8>,
    /// Wall-clock duration of the execution.
    pub duration: Duration,
}

impl ExecOutput {
    /// Returns `true` when the process exited with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Stdout followed by stderr.
    pub fn combined(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.stdout.len().saturating_add(self.stderr.len()));
        out.extend_from_slice(&self.stdout);
        out.extend_from_slice(&self.stderr);
        out
    }
}

/// Spawns a program with positional arguments and captures its output.
///
/// Implementations report spawn failures as `Err`; a program that ran and
/// exited non-zero is still `Ok` and the caller inspects the exit code.
/// Dropping the returned future must terminate the program.
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Run `program` with `args` inside `working_dir` and wait for it.
    async fn launch(
        &self,
        program: &Path,
        args: &[PathBuf],
        working_dir: &Path,
    ) -> io::Result<ExecOutput>;
}

/// Runs programs as local child processes with a scrubbed environment.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    path_env: String,
}

impl ProcessLauncher {
    /// Launcher using [`DEFAULT_PATH`].
    pub fn new() -> Self {
        Self::with_path(DEFAULT_PATH)
    }

    /// Launcher handing `path_env` to programs as `PATH`.
    pub fn with_path(path_env: impl Into<String>) -> Self {
        Self {
            path_env: path_env.into(),
        }
    }

    fn command(&self, program: &Path, args: &[PathBuf], working_dir: &Path) -> Command {
        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(working_dir)
            .env_clear()
            .env("PATH", &self.path_env)
            .env("HOME", working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

impl Default for ProcessLauncher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Launcher for ProcessLauncher {
    async fn launch(
        &self,
        program: &Path,
        args: &[PathBuf],
        working_dir: &Path,
    ) -> io::Result<ExecOutput> {
        let started = Instant::now();
        let mut attempt: u32 = 0;
        // ETXTBSY: a child forked concurrently elsewhere in this process can
        // briefly hold the just-written program open for writing.
        let child = loop {
            match self.command(program, args, working_dir).spawn() {
                Ok(child) => break child,
                Err(e)
                    if e.kind() == io::ErrorKind::ExecutableFileBusy
                        && attempt < SPAWN_BUSY_RETRIES =>
                {
                    attempt = attempt.saturating_add(1);
                    debug!(attempt, "program busy, retrying spawn");
                    tokio::time::sleep(SPAWN_BUSY_BACKOFF).await;
                }
                Err(e) => return Err(e),
            }
        };

        let output = child.wait_with_output().await?;
        Ok(ExecOutput {
            exit_code: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
            duration: started.elapsed(),
        })
    }
}
