use granite::DbError;
use thiserror::Error;

/// Errors surfaced by operator trees. Storage failures pass through
/// unchanged; the exec layer adds the iterator-protocol and aggregate kinds.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error("unsupported aggregate: {0}")]
    Unsupported(String),

    #[error("operator is not open")]
    NotOpen,

    #[error("no more tuples")]
    NoSuchElement,
}

impl ExecError {
    /// Whether this error means the calling transaction was chosen as a
    /// deadlock victim and must be rolled back.
    pub fn is_aborted(&self) -> bool {
        matches!(self, ExecError::Db(DbError::TransactionAborted))
    }
}

pub type Result<T> = std::result::Result<T, ExecError>;
