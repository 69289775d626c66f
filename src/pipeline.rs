//! End-to-end task pipeline.
//!
//! Fetches the algorithm and inputs from the blob store, drives one
//! [`Task`] through create, upload, verify and execute, persists the output
//! back into the store, and removes the workspace on every path.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{error, info, instrument};

use crate::config::RunnerConfig;
use crate::runner::{ExecOutput, Launcher, RunnerError, Task, VerificationClaim};
use crate::store::{BlobStore, StoreError};

/// Errors produced while running a task.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Fetching blobs or persisting output failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A runner stage failed.
    #[error(transparent)]
    Runner(#[from] RunnerError),

    /// The execute stage exceeded its deadline; the process was killed.
    #[error("task timed out after {limit:?}")]
    TimedOut {
        /// Deadline that expired.
        limit: Duration,
    },

    /// The algorithm succeeded but its output could not be stored.
    #[error("task succeeded but its output could not be stored: {source}")]
    Persist {
        /// Combined stdout and stderr of the successful run.
        output: Vec<u8>,
        /// Store failure.
        #[source]
        source: StoreError,
    },
}

impl PipelineError {
    /// Output captured before the failure, if any.
    pub fn output(&self) -> Option<&[u8]> {
        match self {
            Self::Runner(e) => e.output(),
            Self::Persist { output, .. } => Some(output),
            _ => None,
        }
    }
}

/// Where and how long tasks run.
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    /// Directory under which workspaces are allocated.
    pub workspace_root: PathBuf,
    /// Optional deadline for the execute stage.
    pub timeout: Option<Duration>,
}

impl From<&RunnerConfig> for RunnerSettings {
    fn from(config: &RunnerConfig) -> Self {
        Self {
            workspace_root: config.workspace_root.clone(),
            timeout: config.timeout(),
        }
    }
}

/// A request to run a stored algorithm against stored inputs.
#[derive(Debug, Clone)]
pub struct TaskRequest {
    /// Owner namespace holding the blobs; `None` for the store root.
    pub owner: Option<String>,
    /// Blob id of the algorithm.
    pub algorithm_id: String,
    /// Blob ids of the inputs, in argument order.
    pub input_ids: Vec<String>,
    /// Digests the requester committed to.
    pub claim: VerificationClaim,
}

/// Result of a successful task.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    /// Random identifier of the (now removed) workspace.
    pub task_id: String,
    /// Captured process output.
    pub output: ExecOutput,
    /// Blob id of the persisted combined output, `None` when it was empty.
    pub output_id: Option<String>,
}

impl TaskOutcome {
    /// Compact, serializable view of the outcome.
    pub fn summary(&self) -> TaskSummary {
        TaskSummary {
            task_id: self.task_id.clone(),
            exit_code: self.output.exit_code,
            duration_ms: u64::try_from(self.output.duration.as_millis()).unwrap_or(u64::MAX),
            output_id: self.output_id.clone(),
        }
    }
}

/// Serializable task summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskSummary {
    /// Workspace identifier.
    pub task_id: String,
    /// Process exit code.
    pub exit_code: Option<i32>,
    /// Execution wall-clock time in milliseconds.
    pub duration_ms: u64,
    /// Blob id of the persisted output.
    pub output_id: Option<String>,
}

/// Runs tasks against one store with one launcher.
pub struct Pipeline {
    store: Arc<BlobStore>,
    settings: RunnerSettings,
    launcher: Arc<dyn Launcher>,
}

impl Pipeline {
    /// Create a pipeline. The launcher is injected so tests can substitute it.
    pub fn new(store: Arc<BlobStore>, settings: RunnerSettings, launcher: Arc<dyn Launcher>) -> Self {
        Self {
            store,
            settings,
            launcher,
        }
    }

    /// Blob store used for inputs and outputs.
    pub fn store(&self) -> &BlobStore {
        &self.store
    }

    /// Run one task to completion.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Store`] when a blob cannot be fetched,
    /// [`PipelineError::Runner`] when a runner stage fails,
    /// [`PipelineError::TimedOut`] when the deadline expires, and
    /// [`PipelineError::Persist`], still carrying the output, when a
    /// successful run's output cannot be stored.
    #[instrument(
        name = "task_run",
        skip(self, request),
        fields(algorithm = %request.algorithm_id, inputs = request.input_ids.len())
    )]
    pub async fn run(&self, request: TaskRequest) -> Result<TaskOutcome, PipelineError> {
        info!("task started");

        let result = self.run_inner(&request).await;

        match &result {
            Ok(outcome) => info!(
                task_id = %outcome.task_id,
                output_id = ?outcome.output_id,
                "task completed"
            ),
            Err(e) => error!(error = %e, "task failed"),
        }

        result
    }

    async fn run_inner(&self, request: &TaskRequest) -> Result<TaskOutcome, PipelineError> {
        let owner = request.owner.as_deref();

        let algorithm = self.store.get_in(owner, &request.algorithm_id).await?;
        let mut inputs = Vec::with_capacity(request.input_ids.len());
        for id in &request.input_ids {
            inputs.push(self.store.get_in(owner, id).await?);
        }

        let task = Task::create(&self.settings.workspace_root).await?;
        let task_id = task.id().to_owned();
        let task = task.upload(&algorithm, &inputs).await?.verify(&request.claim)?;

        let execution = task.execute(self.launcher.as_ref());
        let executed = match self.settings.timeout {
            Some(limit) => tokio::time::timeout(limit, execution)
                .await
                .map_err(|_| PipelineError::TimedOut { limit })??,
            None => execution.await?,
        };
        let output = executed.finish().await?;

        let combined = output.combined();
        let output_id = if combined.is_empty() {
            None
        } else {
            match self.store.put_in(owner, &combined).await {
                Ok(id) => Some(id),
                Err(source) => {
                    return Err(PipelineError::Persist {
                        output: combined,
                        source,
                    })
                }
            }
        };

        Ok(TaskOutcome {
            task_id,
            output,
            output_id,
        })
    }
}
