//! Error taxonomy for factorization jobs.
//!
//! Store adapters return `anyhow::Result` like the rest of the crate; the
//! factorizer wraps those into [`FactorizeError::Store`] only when the error is
//! structural (bootstrap reads, exhausted checkpoint retries). Transient write
//! failures are logged and healed by re-deriving state from the ledger.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FactorizeError {
    /// Non-numeric or out-of-domain argument. No job is created.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The store could not be read or kept refusing writes.
    #[error("store error: {0:#}")]
    Store(#[source] anyhow::Error),

    /// The search token was cancelled by the caller before the job finished.
    /// The ledger is left in a resumable state.
    #[error("factorization aborted before completion")]
    Aborted,

    /// Another driver already holds the job. Nothing was read or written.
    #[error("job {job_id} is already being worked on by another process")]
    Busy { job_id: uuid::Uuid },

    /// The persisted ledger contradicts itself in a way resume cannot repair.
    #[error("inconsistent ledger for job {job_id}: {detail}")]
    Inconsistent { job_id: uuid::Uuid, detail: String },
}

impl FactorizeError {
    /// Short category label used in user-facing failure messages.
    pub fn category(&self) -> &'static str {
        match self {
            FactorizeError::InvalidInput(_) => "input",
            FactorizeError::Store(_) => "store",
            FactorizeError::Aborted => "aborted",
            FactorizeError::Busy { .. } => "busy",
            FactorizeError::Inconsistent { .. } => "inconsistent",
        }
    }
}

pub type Result<T> = std::result::Result<T, FactorizeError>;
