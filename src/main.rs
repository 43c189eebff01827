use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use std::path::Path;
use tracing_subscriber::EnvFilter;
use upsync::cli::{Cli, Commands, PushArgs};
use upsync::config::JobConfig;
use upsync::job::{self, Job};
use upsync::remote::{FtpConfig, FtpSession, TraceSession};
use upsync::{FingerprintLedger, SyncStats};

fn init_logging(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn open_ledger(path: Option<&Path>, persist: bool) -> Result<FingerprintLedger> {
    let mut ledger = match path {
        Some(path) => FingerprintLedger::open(path)
            .with_context(|| format!("Failed to open ledger {}", path.display()))?,
        None => {
            tracing::warn!("no ledger configured; every file will be uploaded");
            FingerprintLedger::in_memory()
        }
    };
    if !persist {
        ledger.detach();
    }
    Ok(ledger)
}

async fn execute(ftp: Option<FtpConfig>, ledger: FingerprintLedger, job: &Job) -> Result<SyncStats> {
    let stats = match ftp {
        Some(config) => {
            let session = FtpSession::connect(&config)
                .await
                .with_context(|| format!("Failed to connect to {}:{}", config.host, config.port))?;
            tracing::info!(host = %config.host, "connected");
            job::run(session, ledger, job).await?
        }
        None => {
            tracing::info!("dry run: no connection is made");
            job::run(TraceSession::new(), ledger, job).await?
        }
    };
    Ok(stats)
}

async fn run_job(path: &Path, dry_run: bool, no_delete: bool, record_ledger: bool) -> Result<SyncStats> {
    let config = JobConfig::load(path)?;
    let ftp = match (&config.server, dry_run) {
        (Some(server), false) => Some(server.ftp_config()?),
        _ => None,
    };
    let ledger = open_ledger(
        config.ledger_path().as_deref(),
        ftp.is_some() || record_ledger,
    )?;
    let job = Job::from_config(&config, !no_delete);
    execute(ftp, ledger, &job).await
}

async fn run_push(args: &PushArgs) -> Result<SyncStats> {
    let ftp = args.ftp_config();
    let ledger = open_ledger(args.ledger.as_deref(), ftp.is_some() || args.record_ledger)?;
    let job = Job::new(vec![args.upload_spec()], args.delete);
    execute(ftp, ledger, &job).await
}

fn show_ledger(path: &Path) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("{} does not exist", path.display());
    }
    let ledger = FingerprintLedger::load(path)?;
    for (name, hash) in ledger.previous() {
        println!("{} {}", hash, name);
    }
    eprintln!("{} entries", ledger.previous().len());
    Ok(())
}

fn print_summary(stats: &SyncStats) {
    println!(
        "{} {} uploaded ({} text, {} binary, {} bytes), {} unchanged, {} deleted in {:.2?}",
        "done:".green().bold(),
        stats.files_transferred,
        stats.text_files,
        stats.binary_files,
        stats.bytes_transferred,
        stats.files_unchanged,
        stats.files_deleted,
        stats.duration,
    );
    if stats.delete_failures > 0 {
        println!(
            "{} {} remote deletions failed (see log)",
            "warning:".yellow().bold(),
            stats.delete_failures
        );
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    init_logging(&cli);

    let result = match &cli.command {
        Commands::Run {
            job,
            dry_run,
            no_delete,
            record_ledger,
        } => run_job(job, *dry_run, *no_delete, *record_ledger)
            .await
            .map(|stats| print_summary(&stats)),
        Commands::Push(args) => run_push(args).await.map(|stats| print_summary(&stats)),
        Commands::Ledger { file } => show_ledger(file),
    };

    if let Err(err) = result {
        eprintln!("{} {:#}", "error:".red().bold(), err);
        std::process::exit(1);
    }
}
