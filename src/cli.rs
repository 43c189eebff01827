use crate::remote::ftp::{FtpConfig, DEFAULT_PORT};
use crate::sync::UploadSpec;
use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "upsync")]
#[command(about = "Upload only what changed to an FTP server", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a job file
    Run {
        /// TOML job file
        job: PathBuf,

        /// Log the commands instead of connecting
        #[arg(long)]
        dry_run: bool,

        /// Skip deleting remote files that disappeared locally
        #[arg(long)]
        no_delete: bool,

        /// Write the ledger even on a dry run
        #[arg(long)]
        record_ledger: bool,
    },

    /// Upload one directory tree
    Push(PushArgs),

    /// Print the entries of a ledger file
    Ledger {
        file: PathBuf,
    },
}

#[derive(Args, Debug)]
pub struct PushArgs {
    /// Local directory to upload
    #[arg(long, default_value = ".")]
    pub src: PathBuf,

    /// Ledger file tracking what was uploaded
    #[arg(long)]
    pub ledger: Option<PathBuf>,

    /// FTP server; without it the push is a dry run
    #[arg(long)]
    pub host: Option<String>,

    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    #[arg(long, default_value = "anonymous")]
    pub user: String,

    #[arg(long, env = "UPSYNC_PASSWORD", hide_env_values = true, default_value = "")]
    pub password: String,

    /// Remote directory to upload into
    #[arg(long)]
    pub host_dir: Option<String>,

    /// Pattern for files sent as text (repeatable)
    #[arg(long = "text", value_name = "PATTERN")]
    pub text: Vec<String>,

    /// Pattern for files sent as binary (repeatable)
    #[arg(long = "binary", value_name = "PATTERN")]
    pub binary: Vec<String>,

    /// Only consider files whose name matches
    #[arg(long)]
    pub only: Option<String>,

    /// Never consider files whose name matches
    #[arg(long)]
    pub skip: Option<String>,

    /// Delete remote files that disappeared locally
    #[arg(long)]
    pub delete: bool,

    /// Log the commands instead of connecting
    #[arg(long)]
    pub dry_run: bool,

    /// Write the ledger even on a dry run
    #[arg(long)]
    pub record_ledger: bool,

    /// Network timeout in seconds
    #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: u64,
}

impl PushArgs {
    pub fn upload_spec(&self) -> UploadSpec {
        let text = if self.text.is_empty() && self.binary.is_empty() {
            vec!["*.*".to_string()]
        } else {
            self.text.clone()
        };
        UploadSpec {
            host_dir: self.host_dir.clone(),
            source: self.src.clone(),
            text,
            binary: self.binary.clone(),
            only: self.only.clone(),
            skip: self.skip.clone(),
        }
    }

    /// Connection settings, unless this is a dry run.
    pub fn ftp_config(&self) -> Option<FtpConfig> {
        if self.dry_run {
            return None;
        }
        let host = self.host.as_ref()?;
        Some(FtpConfig {
            host: host.clone(),
            port: self.port,
            user: self.user.clone(),
            password: self.password.clone(),
            timeout: Duration::from_secs(self.timeout),
        })
    }
}

impl Cli {
    /// Default `tracing` filter for the chosen verbosity. `RUST_LOG` wins.
    pub fn log_filter(&self) -> &'static str {
        match (self.quiet, self.verbose) {
            (true, _) => "upsync=warn",
            (false, 0) => "upsync=info",
            (false, 1) => "upsync=debug",
            _ => "upsync=trace",
        }
    }
}
