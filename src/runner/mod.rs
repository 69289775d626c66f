//! Sandboxed task runner.
//!
//! One [`Task`] is one isolated execution. Its lifecycle is encoded in the
//! type parameter, so every stage is only reachable from the one before it:
//!
//! ```text
//! Task::create ─► Task<Created> ─upload─► Task<Populated> ─verify─► Task<Verified>
//!                                                                      │ execute
//!                                   destroy / finish ◄── Task<Executed> ◄┘
//! ```
//!
//! Every transition consumes the task. When a transition fails, the task is
//! dropped before the error reaches the caller, and dropping removes the
//! workspace. [`Task::destroy`] is the explicit, error-reporting way to do
//! the same from any state.
//!
//! `execute` only exists on a verified task:
//!
//! ```compile_fail
//! use sealrun::runner::{Launcher, Populated, Task};
//!
//! async fn skip_verify(task: Task<Populated>, launcher: &dyn Launcher) {
//!     let _ = task.execute(launcher).await;
//! }
//! ```
//!
//! and uploads need a created workspace:
//!
//! ```compile_fail
//! use sealrun::runner::{Task, Verified};
//!
//! async fn upload_after_verify(task: Task<Verified>) {
//!     let _ = task.upload(b"#!/bin/sh\n", &[b"data"]).await;
//! }
//! ```
//!
//! A full run:
//!
//! ```no_run
//! use std::path::Path;
//!
//! use sealrun::digest::sha256_hex;
//! use sealrun::runner::{ProcessLauncher, Task, VerificationClaim};
//!
//! # async fn run() -> Result<(), sealrun::runner::RunnerError> {
//! let algorithm = b"#!/bin/sh\ncat \"$1\"\n".to_vec();
//! let inputs = vec![b"Hello World!".to_vec()];
//! let claim = VerificationClaim::new(sha256_hex(&algorithm), vec![sha256_hex(&inputs[0])]);
//!
//! let output = Task::create(Path::new("/tmp/workspaces"))
//!     .await?
//!     .upload(&algorithm, &inputs)
//!     .await?
//!     .verify(&claim)?
//!     .execute(&ProcessLauncher::new())
//!     .await?
//!     .finish()
//!     .await?;
//! assert_eq!(output.stdout, b"Hello World!");
//! # Ok(())
//! # }
//! ```

use std::io;
use std::path::{Path, PathBuf};

use tracing::{info, instrument, warn};

use crate::digest::sha256_hex;
use crate::files::{write_new_file, EXECUTABLE_FILE_MODE, PRIVATE_FILE_MODE};

mod claim;
mod launcher;
mod workspace;

pub use claim::{InputOrder, VerificationClaim};
pub use launcher::{ExecOutput, Launcher, ProcessLauncher, DEFAULT_PATH};
pub use workspace::Workspace;

/// File name of the materialized algorithm inside a workspace.
pub const ALGORITHM_FILE: &str = "main";

/// Errors produced by the task runner.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// The workspace directory could not be created.
    #[error("failed to allocate workspace {}: {source}", .path.display())]
    WorkspaceAllocation {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },

    /// The algorithm has zero length.
    #[error("algorithm bytes are empty")]
    EmptyAlgorithm,

    /// No inputs were supplied.
    #[error("input list is empty")]
    EmptyInputs,

    /// Writing a file into the workspace failed.
    #[error("failed to materialize {}: {source}", .path.display())]
    Materialize {
        /// File that could not be written.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },

    /// The materialized algorithm is not the one claimed.
    #[error("algorithm digest mismatch, claimed: {expected}, materialized: {actual}")]
    AlgorithmMismatch {
        /// Claimed digest.
        expected: String,
        /// Digest of the materialized algorithm.
        actual: String,
    },

    /// The number of claimed and materialized inputs differ.
    #[error("input count mismatch, claimed: {expected}, materialized: {actual}")]
    InputCountMismatch {
        /// Number of claimed digests.
        expected: usize,
        /// Number of materialized inputs.
        actual: usize,
    },

    /// A claimed input digest has no materialized counterpart.
    #[error("claimed input digest {digest} was not materialized")]
    InputSetMismatch {
        /// First claimed digest left unmatched.
        digest: String,
    },

    /// Positional matching found a different input at `index`.
    #[error("input {index} digest mismatch, claimed: {expected}, materialized: {actual}")]
    InputOrderMismatch {
        /// Argument position.
        index: usize,
        /// Claimed digest at that position.
        expected: String,
        /// Materialized digest at that position.
        actual: String,
    },

    /// The algorithm could not be started.
    #[error("failed to spawn {}: {source}", .program.display())]
    Spawn {
        /// Program path.
        program: PathBuf,
        /// Underlying spawn failure.
        #[source]
        source: io::Error,
    },

    /// The algorithm ran and failed. Its captured output is preserved.
    #[error("algorithm failed with {}", exit_label(.code))]
    Execution {
        /// Exit code, `None` when killed by a signal.
        code: Option<i32>,
        /// Combined stdout and stderr.
        output: Vec<u8>,
    },

    /// The workspace directory could not be removed.
    #[error("failed to remove workspace {}: {source}", .path.display())]
    Destroy {
        /// Workspace directory.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
}

impl RunnerError {
    /// Output captured before the failure, if any.
    pub fn output(&self) -> Option<&[u8]> {
        match self {
            Self::Execution { output, .. } => Some(output),
            _ => None,
        }
    }
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "termination by signal".to_owned(),
    }
}

/// Workspace allocated, nothing written yet.
#[derive(Debug)]
pub struct Created;

/// Algorithm and inputs written, digests recorded.
#[derive(Debug)]
pub struct Populated {
    files: Materialized,
}

/// Materialized digests matched the claim.
#[derive(Debug)]
pub struct Verified {
    files: Materialized,
}

/// Algorithm ran to a successful exit.
#[derive(Debug)]
pub struct Executed {
    output: ExecOutput,
}

#[derive(Debug)]
struct Materialized {
    program: PathBuf,
    algorithm_digest: String,
    args: Vec<PathBuf>,
    input_digests: Vec<String>,
}

/// One isolated execution in lifecycle state `S`.
#[derive(Debug)]
pub struct Task<S> {
    workspace: Workspace,
    state: S,
}

impl<S> Task<S> {
    /// Random identifier of this task's workspace.
    pub fn id(&self) -> &str {
        self.workspace.id()
    }

    /// Workspace directory.
    pub fn dir(&self) -> &Path {
        self.workspace.dir()
    }

    /// Remove the workspace and end the task.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::Destroy`] if the directory cannot be removed.
    pub async fn destroy(mut self) -> Result<(), RunnerError> {
        self.workspace.release().await
    }

    fn advance<T>(self, state: T) -> Task<T> {
        Task {
            workspace: self.workspace,
            state,
        }
    }
}

impl Task<Created> {
    /// Allocate a fresh workspace under `root`.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::WorkspaceAllocation`] on directory-creation failure.
    #[instrument(skip_all, fields(root = %root.display()))]
    pub async fn create(root: &Path) -> Result<Self, RunnerError> {
        let workspace = Workspace::allocate(root).await?;
        info!(task_id = %workspace.id(), "task created");
        Ok(Self {
            workspace,
            state: Created,
        })
    }

    /// Write the algorithm and inputs into the workspace.
    ///
    /// The algorithm lands in [`ALGORITHM_FILE`] with owner-execute
    /// permissions; input `i` lands in a file named `i`. Digests are computed
    /// from the bytes written and kept in input order.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::EmptyAlgorithm`], [`RunnerError::EmptyInputs`]
    /// or [`RunnerError::Materialize`]. The workspace is removed on error.
    #[instrument(skip_all, fields(task_id = %self.workspace.id(), inputs = inputs.len()))]
    pub async fn upload<I>(self, algorithm: &[u8], inputs: &[I]) -> Result<Task<Populated>, RunnerError>
    where
        I: AsRef<[u8]> + Sync,
    {
        if algorithm.is_empty() {
            return Err(RunnerError::EmptyAlgorithm);
        }
        if inputs.is_empty() {
            return Err(RunnerError::EmptyInputs);
        }

        let program = self.workspace.dir().join(ALGORITHM_FILE);
        let algorithm_digest = sha256_hex(algorithm);
        write_new_file(&program, algorithm, EXECUTABLE_FILE_MODE)
            .await
            .map_err(|source| RunnerError::Materialize {
                path: program.clone(),
                source,
            })?;

        let mut args = Vec::with_capacity(inputs.len());
        let mut input_digests = Vec::with_capacity(inputs.len());
        for (index, input) in inputs.iter().enumerate() {
            let data = input.as_ref();
            let path = self.workspace.dir().join(index.to_string());
            write_new_file(&path, data, PRIVATE_FILE_MODE)
                .await
                .map_err(|source| RunnerError::Materialize {
                    path: path.clone(),
                    source,
                })?;
            input_digests.push(sha256_hex(data));
            args.push(path);
        }

        info!(algorithm = %algorithm_digest, "task populated");
        Ok(self.advance(Populated {
            files: Materialized {
                program,
                algorithm_digest,
                args,
                input_digests,
            },
        }))
    }
}

impl Task<Populated> {
    /// Digest of the materialized algorithm.
    pub fn algorithm_digest(&self) -> &str {
        &self.state.files.algorithm_digest
    }

    /// Digests of the materialized inputs, in argument order.
    pub fn input_digests(&self) -> &[String] {
        &self.state.files.input_digests
    }

    /// Check the materialized digests against the requester's claim.
    ///
    /// This is the only way to obtain a `Task<Verified>`, and so the only
    /// way to reach [`Task::execute`].
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::AlgorithmMismatch`],
    /// [`RunnerError::InputCountMismatch`], [`RunnerError::InputSetMismatch`]
    /// or [`RunnerError::InputOrderMismatch`]. The workspace is removed
    /// before the error is returned.
    pub fn verify(self, claim: &VerificationClaim) -> Result<Task<Verified>, RunnerError> {
        let files = &self.state.files;
        if let Err(e) = claim.check(&files.algorithm_digest, &files.input_digests) {
            warn!(task_id = %self.id(), error = %e, "verification failed");
            return Err(e);
        }
        info!(task_id = %self.id(), "task verified");
        let Task { workspace, state } = self;
        Ok(Task {
            workspace,
            state: Verified { files: state.files },
        })
    }
}

impl Task<Verified> {
    /// Run the algorithm with the input files as positional arguments.
    ///
    /// No deadline is applied here. Bound the returned future externally;
    /// dropping it kills the process and removes the workspace.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::Spawn`] if the program cannot be started and
    /// [`RunnerError::Execution`], carrying the captured output, if it exits
    /// unsuccessfully. The workspace is removed on error.
    #[instrument(skip_all, fields(task_id = %self.workspace.id()))]
    pub async fn execute(self, launcher: &dyn Launcher) -> Result<Task<Executed>, RunnerError> {
        let files = &self.state.files;
        let output = launcher
            .launch(&files.program, &files.args, self.workspace.dir())
            .await
            .map_err(|source| RunnerError::Spawn {
                program: files.program.clone(),
                source,
            })?;

        if !output.success() {
            warn!(exit_code = ?output.exit_code, "algorithm failed");
            return Err(RunnerError::Execution {
                code: output.exit_code,
                output: output.combined(),
            });
        }

        info!(
            duration_ms = u64::try_from(output.duration.as_millis()).unwrap_or(u64::MAX),
            "task executed"
        );
        Ok(self.advance(Executed { output }))
    }
}

impl Task<Executed> {
    /// Output of the successful run.
    pub fn output(&self) -> &ExecOutput {
        &self.state.output
    }

    /// Remove the workspace and hand back the output.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::Destroy`] if the directory cannot be removed.
    pub async fn finish(mut self) -> Result<ExecOutput, RunnerError> {
        self.workspace.release().await?;
        Ok(self.state.output)
    }
}
