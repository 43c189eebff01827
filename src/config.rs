//! Job files.
//!
//! A job is one session against one server: a ledger, any number of uploads,
//! and whether files that disappeared locally are deleted remotely.

use crate::error::{Result, SyncError};
use crate::remote::ftp::{FtpConfig, DEFAULT_PORT};
use crate::sync::{UploadSpec, CHECKPOINT_EVERY};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const ANONYMOUS: &str = "anonymous";

/// Patterns as a list or as one whitespace-separated string.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Patterns {
    Joined(String),
    List(Vec<String>),
}

impl Patterns {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Patterns::Joined(s) => s.split_whitespace().map(str::to_string).collect(),
            Patterns::List(v) => v.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default)]
    pub password: Option<String>,
    /// Name of an environment variable holding the password.
    #[serde(default)]
    pub password_env: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_user() -> String {
    ANONYMOUS.to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_checkpoint_every() -> usize {
    CHECKPOINT_EVERY
}

impl ServerConfig {
    pub fn password(&self) -> Result<String> {
        if let Some(password) = &self.password {
            return Ok(password.clone());
        }
        if let Some(var) = &self.password_env {
            return std::env::var(var).map_err(|_| {
                SyncError::Config(format!("environment variable {} is not set", var))
            });
        }
        if self.user == ANONYMOUS {
            return Ok(String::new());
        }
        Err(SyncError::Config(format!(
            "no password for {}@{} (set `password` or `password_env`)",
            self.user, self.host
        )))
    }

    pub fn ftp_config(&self) -> Result<FtpConfig> {
        Ok(FtpConfig {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            password: self.password()?,
            timeout: Duration::from_secs(self.timeout_secs),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UploadConfig {
    #[serde(default)]
    pub host_dir: Option<String>,
    #[serde(default = "default_source")]
    pub source: PathBuf,
    #[serde(default)]
    pub text: Option<Patterns>,
    #[serde(default)]
    pub binary: Option<Patterns>,
    #[serde(default)]
    pub only: Option<String>,
    #[serde(default)]
    pub skip: Option<String>,
}

fn default_source() -> PathBuf {
    PathBuf::from(".")
}

impl UploadConfig {
    /// Resolve into an engine upload, with `source` taken relative to `base`.
    pub fn to_spec(&self, base: &Path) -> UploadSpec {
        let (text, binary) = match (&self.text, &self.binary) {
            // Nothing configured: every file with an extension goes as text
            (None, None) => (vec!["*.*".to_string()], Vec::new()),
            (text, binary) => (
                text.as_ref().map(Patterns::to_vec).unwrap_or_default(),
                binary.as_ref().map(Patterns::to_vec).unwrap_or_default(),
            ),
        };
        UploadSpec {
            host_dir: self.host_dir.clone(),
            source: base.join(&self.source),
            text,
            binary,
            only: self.only.clone(),
            skip: self.skip.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobConfig {
    /// Ledger file. Without one every run uploads everything.
    #[serde(default)]
    pub ledger: Option<PathBuf>,
    #[serde(default)]
    pub delete_old: bool,
    #[serde(default = "default_checkpoint_every")]
    pub checkpoint_every: usize,
    /// Without a server the job is a dry run.
    #[serde(default)]
    pub server: Option<ServerConfig>,
    #[serde(default, rename = "upload")]
    pub uploads: Vec<UploadConfig>,
    /// Directory relative paths are resolved against.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl JobConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!("cannot read job file {}: {}", path.display(), e))
        })?;
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        Self::parse(&content, base)
            .map_err(|e| SyncError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn parse(content: &str, base_dir: &Path) -> std::result::Result<Self, String> {
        let mut job: JobConfig = toml::from_str(content).map_err(|e| e.to_string())?;
        job.base_dir = base_dir.to_path_buf();
        job.validate()?;
        Ok(job)
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.uploads.is_empty() {
            return Err("at least one [[upload]] section is required".into());
        }
        if self.checkpoint_every == 0 {
            return Err("checkpoint_every must be greater than zero".into());
        }
        if let Some(server) = &self.server {
            if server.host.trim().is_empty() {
                return Err("server.host must not be empty".into());
            }
            if server.timeout_secs == 0 {
                return Err("server.timeout_secs must be greater than zero".into());
            }
            server.password().map_err(|e| match e {
                SyncError::Config(reason) => reason,
                other => other.to_string(),
            })?;
        }
        Ok(())
    }

    pub fn ledger_path(&self) -> Option<PathBuf> {
        self.ledger.as_ref().map(|p| self.base_dir.join(p))
    }

    pub fn upload_specs(&self) -> Vec<UploadSpec> {
        self.uploads
            .iter()
            .map(|u| u.to_spec(&self.base_dir))
            .collect()
    }
}
