//! Job execution: a fixed sequence of steps against one session.

use crate::config::JobConfig;
use crate::error::Result;
use crate::ledger::FingerprintLedger;
use crate::remote::RemoteSession;
use crate::sync::{SyncEngine, SyncStats, UploadSpec, CHECKPOINT_EVERY};

#[derive(Debug, Clone)]
pub enum Step {
    Upload(UploadSpec),
    DeleteOldFiles,
}

#[derive(Debug, Clone)]
pub struct Job {
    pub steps: Vec<Step>,
    pub checkpoint_every: usize,
}

impl Job {
    pub fn new(uploads: Vec<UploadSpec>, delete_old: bool) -> Self {
        let mut steps: Vec<Step> = uploads.into_iter().map(Step::Upload).collect();
        if delete_old {
            steps.push(Step::DeleteOldFiles);
        }
        Self {
            steps,
            checkpoint_every: CHECKPOINT_EVERY,
        }
    }

    /// Steps of a job file; `allow_delete = false` drops the deletion pass.
    pub fn from_config(config: &JobConfig, allow_delete: bool) -> Self {
        let mut job = Self::new(config.upload_specs(), config.delete_old && allow_delete);
        job.checkpoint_every = config.checkpoint_every;
        job
    }
}

async fn execute<S: RemoteSession>(engine: &mut SyncEngine<S>, steps: &[Step]) -> Result<()> {
    for step in steps {
        match step {
            Step::Upload(spec) => engine.upload(spec).await?,
            Step::DeleteOldFiles => engine.delete_old_files().await?,
        }
    }
    Ok(())
}

/// Run every step, then finish the session whatever happened, so the ledger
/// records the transfers that did complete.
pub async fn run<S: RemoteSession>(
    session: S,
    ledger: FingerprintLedger,
    job: &Job,
) -> Result<SyncStats> {
    let mut engine = SyncEngine::new(session, ledger).with_checkpoint_every(job.checkpoint_every);

    let outcome = execute(&mut engine, &job.steps).await;
    let finished = engine.finish().await;

    match (outcome, finished) {
        (Ok(()), finished) => finished,
        (Err(err), Ok(_)) => Err(err),
        (Err(err), Err(finish_err)) => {
            tracing::error!(error = %finish_err, "ledger could not be saved after failure");
            Err(err)
        }
    }
}
