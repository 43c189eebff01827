pub mod cli;
pub mod config;
pub mod error;
pub mod job;
pub mod ledger;
pub mod remote;
pub mod sync;

pub use error::{Result, SyncError};
pub use ledger::{Fingerprint, FingerprintLedger};
pub use sync::{EngineState, SyncEngine, SyncStats, TransferMode, UploadSpec};
