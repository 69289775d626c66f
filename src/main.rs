//! Sealrun CLI entry point.
//!
//! Provides `put`, `get` and `digest` for working with the blob store, and
//! `run` for executing a stored algorithm against stored inputs behind a
//! digest check.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use sealrun::config::Config;
use sealrun::digest::sha256_hex;
use sealrun::logging;
use sealrun::pipeline::{Pipeline, RunnerSettings, TaskRequest};
use sealrun::runner::{InputOrder, ProcessLauncher, VerificationClaim};
use sealrun::store::BlobStore;

/// Sealrun: content-addressed blobs and digest-gated task execution.
#[derive(Parser)]
#[command(name = "sealrun", version, about)]
struct Cli {
    /// Config file (defaults to `$SEALRUN_CONFIG_PATH` or `~/.sealrun/config.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Store a file and print its blob id.
    Put {
        /// File to store.
        file: PathBuf,
        /// Owner namespace (64 hex chars).
        #[arg(long)]
        owner: Option<String>,
    },
    /// Write a stored blob to stdout or a file.
    Get {
        /// Blob id.
        id: String,
        /// Owner namespace (64 hex chars).
        #[arg(long)]
        owner: Option<String>,
        /// Destination file instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
        /// Re-hash the blob and fail if it no longer matches its id.
        #[arg(long)]
        verify: bool,
    },
    /// Print the SHA-256 digest of a file.
    Digest {
        /// File to hash.
        file: PathBuf,
    },
    /// Run a stored algorithm against stored inputs.
    Run {
        /// Blob id of the algorithm.
        #[arg(long)]
        algorithm: String,
        /// Blob ids of the inputs, in argument order.
        #[arg(long = "input", required = true)]
        inputs: Vec<String>,
        /// Digest the algorithm must have.
        #[arg(long)]
        expect_algorithm: String,
        /// Digests the inputs must have.
        #[arg(long = "expect-input", required = true)]
        expect_inputs: Vec<String>,
        /// Owner namespace (64 hex chars).
        #[arg(long)]
        owner: Option<String>,
        /// Match input digests by position instead of as a set.
        #[arg(long)]
        positional: bool,
        /// Kill the algorithm after this many seconds.
        #[arg(long)]
        timeout: Option<u64>,
        /// Print a JSON summary to stderr.
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let (config, invalid_overrides) =
        Config::load(cli.config.as_deref()).context("failed to load configuration")?;

    let _logging_guard = match &config.logging.logs_dir {
        Some(dir) => Some(logging::init_production(dir, &config.logging.level)?),
        None => {
            logging::init_cli(&config.logging.level);
            None
        }
    };
    for invalid in &invalid_overrides {
        warn!(var = invalid.var, value = %invalid.value, "ignoring invalid env override");
    }

    match cli.command {
        Command::Put { file, owner } => handle_put(&config, &file, owner.as_deref()).await,
        Command::Get {
            id,
            owner,
            out,
            verify,
        } => handle_get(&config, &id, owner.as_deref(), out.as_deref(), verify).await,
        Command::Digest { file } => handle_digest(&file),
        Command::Run {
            algorithm,
            inputs,
            expect_algorithm,
            expect_inputs,
            owner,
            positional,
            timeout,
            json,
        } => {
            let order = if positional {
                InputOrder::Positional
            } else {
                config.runner.input_order
            };
            let request = TaskRequest {
                owner,
                algorithm_id: algorithm,
                input_ids: inputs,
                claim: VerificationClaim::new(expect_algorithm, expect_inputs).with_order(order),
            };
            handle_run(&config, request, timeout.map(Duration::from_secs), json).await
        }
    }
}

/// Store a file and print its id.
async fn handle_put(config: &Config, file: &Path, owner: Option<&str>) -> anyhow::Result<()> {
    let data =
        std::fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;
    let store = BlobStore::from_config(&config.store);
    let id = store.put_in(owner, &data).await?;
    info!(id = %id, size = data.len(), "blob stored");
    println!("{id}");
    Ok(())
}

/// Write a blob to stdout or `out`.
async fn handle_get(
    config: &Config,
    id: &str,
    owner: Option<&str>,
    out: Option<&Path>,
    verify: bool,
) -> anyhow::Result<()> {
    let store = BlobStore::from_config(&config.store);
    let data = if verify {
        store.get_verified(owner, id).await?
    } else {
        store.get_in(owner, id).await?
    };

    match out {
        Some(path) => std::fs::write(path, &data)
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => std::io::stdout()
            .write_all(&data)
            .context("failed to write blob to stdout")?,
    }
    Ok(())
}

/// Print a file's digest.
fn handle_digest(file: &Path) -> anyhow::Result<()> {
    let data =
        std::fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;
    println!("{}", sha256_hex(&data));
    Ok(())
}

/// Run one task, stopping early on Ctrl-C.
async fn handle_run(
    config: &Config,
    request: TaskRequest,
    timeout: Option<Duration>,
    json: bool,
) -> anyhow::Result<()> {
    let mut settings = RunnerSettings::from(&config.runner);
    if timeout.is_some() {
        settings.timeout = timeout;
    }

    let pipeline = Pipeline::new(
        Arc::new(BlobStore::from_config(&config.store)),
        settings,
        Arc::new(ProcessLauncher::new()),
    );

    let result = tokio::select! {
        result = pipeline.run(request) => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("received interrupt, abandoning task");
            anyhow::bail!("task interrupted");
        }
    };

    let mut stdout = std::io::stdout();
    match result {
        Ok(outcome) => {
            stdout
                .write_all(&outcome.output.combined())
                .context("failed to write output")?;
            if json {
                eprintln!("{}", serde_json::to_string(&outcome.summary())?);
            }
            Ok(())
        }
        Err(e) => {
            if let Some(output) = e.output() {
                stdout.write_all(output).context("failed to write output")?;
            }
            Err(e.into())
        }
    }
}
