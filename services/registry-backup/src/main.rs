//! Command line entry point for registry namespace backups.

use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand, ValueEnum};
use registry_backup::{BackupError, BackupOptions, RestoreOptions, Settings, Toolkit};
use serde::Serialize;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Backs up and restores image storage for a registry namespace to and from
/// an S3-compatible endpoint.
#[derive(Debug, Parser)]
#[command(name = "registry-backup", version)]
struct Cli {
    /// Archive bucket.
    #[arg(long, global = true, default_value = "quaybackup")]
    bucket_name: String,

    /// Log verbosity. `RUST_LOG` takes precedence.
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,

    /// Also write logs to this file.
    #[arg(long, global = true)]
    log_file: Option<Utf8PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Back up every blob of a namespace.
    Backup {
        /// Namespace (user or organization) name.
        namespace: String,

        /// Upload blobs even when the archive already has them.
        #[arg(long)]
        force_blobs: bool,

        /// Concurrent transfers.
        #[arg(long, default_value_t = registry_backup::DEFAULT_WORKERS)]
        num_workers: usize,
    },

    /// Restore a namespace's blobs from a backup.
    Restore {
        /// Namespace (user or organization) name.
        namespace: String,

        /// Only report what would be restored.
        #[arg(long)]
        dry_run: bool,

        /// Write blobs even when the registry already has them.
        #[arg(long)]
        force_blobs: bool,

        /// Only restore this repository.
        #[arg(long)]
        repository: Option<String>,

        /// Backup number to restore from; the latest by default.
        #[arg(long = "from")]
        from: Option<u64>,

        /// Concurrent transfers.
        #[arg(long, default_value_t = registry_backup::DEFAULT_WORKERS)]
        num_workers: usize,
    },

    /// Compare a backup with the live registry.
    Verify {
        /// Namespace (user or organization) name.
        namespace: String,

        /// Backup number to verify; the latest by default.
        #[arg(long = "from")]
        from: Option<u64>,
    },

    /// Remove a stale backup lock.
    Unlock {
        /// Namespace (user or organization) name.
        namespace: String,
    },
}

impl Command {
    fn operation(&self) -> &'static str {
        match self {
            Command::Backup { .. } => "Backup",
            Command::Restore { .. } => "Restore",
            Command::Verify { .. } => "Verify",
            Command::Unlock { .. } => "Unlock",
        }
    }
}

/// A rendered report and, if it describes a failure, the reason.
#[derive(Debug)]
struct Outcome {
    document: serde_json::Value,
    failure: Option<BackupError>,
}

impl Outcome {
    fn new<T: Serialize>(report: &T, failure: Option<BackupError>) -> Result<Self, BackupError> {
        Ok(Self {
            document: serde_json::to_value(report).map_err(BackupError::Report)?,
            failure,
        })
    }
}

fn init_tracing(cli: &Cli) -> eyre::Result<Option<WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level.directive()));

    let (file_layer, guard) = match &cli.log_file {
        Some(path) => {
            let directory = path
                .parent()
                .filter(|parent| !parent.as_str().is_empty())
                .unwrap_or_else(|| camino::Utf8Path::new("."));
            let file_name = path
                .file_name()
                .ok_or_else(|| eyre::eyre!("log file path has no file name: {path}"))?;
            std::fs::create_dir_all(directory)?;
            let appender = tracing_appender::rolling::never(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .with(tracing_error::ErrorLayer::default())
        .try_init()?;

    Ok(guard)
}

async fn execute(cli: &Cli) -> Result<Outcome, BackupError> {
    let settings = Settings::load()?;
    let toolkit = Toolkit::connect(&settings, &cli.bucket_name).await?;

    match &cli.command {
        Command::Backup {
            namespace,
            force_blobs,
            num_workers,
        } => {
            let options = BackupOptions {
                force: *force_blobs,
                workers: *num_workers,
            };
            let report = toolkit.backup(namespace, options).await?;
            Outcome::new(&report, report.failure())
        }
        Command::Restore {
            namespace,
            dry_run,
            force_blobs,
            repository,
            from,
            num_workers,
        } => {
            let options = RestoreOptions {
                backup_number: *from,
                repository: repository.clone(),
                dry_run: *dry_run,
                force: *force_blobs,
                workers: *num_workers,
            };
            let outcome = toolkit.restore(namespace, options).await?;
            Outcome::new(&outcome, outcome.failure())
        }
        Command::Verify { namespace, from } => {
            let report = toolkit.verify(namespace, *from).await?;
            Outcome::new(&report, report.failure())
        }
        Command::Unlock { namespace } => {
            let report = toolkit.unlock(namespace).await?;
            Outcome::new(&report, None)
        }
    }
}

fn print(document: &serde_json::Value) {
    match serde_json::to_string_pretty(document) {
        Ok(text) => println!("{text}"),
        Err(_) => println!("{document}"),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let _guard = match init_tracing(&cli) {
        Ok(guard) => guard,
        Err(error) => {
            eprintln!("failed to initialize logging: {error:?}");
            return ExitCode::FAILURE;
        }
    };

    let operation = cli.command.operation();
    match execute(&cli).await {
        Ok(Outcome { document, failure }) => {
            print(&document);
            match failure {
                None => ExitCode::SUCCESS,
                Some(error) => {
                    tracing::error!("{operation} did not fully succeed: {error}");
                    ExitCode::FAILURE
                }
            }
        }
        Err(error) => {
            print(&serde_json::json!({
                "Operation": operation,
                "Status": "Failed",
                "Error": error.to_string(),
                "ErrorKind": error.kind(),
            }));
            tracing::error!("{operation} failed: {:?}", eyre::Report::new(error));
            ExitCode::FAILURE
        }
    }
}
