use thiserror::Error;

/// The two error kinds the core ever raises.
///
/// `Aborted` means the caller's transaction cannot make progress and
/// must be rolled back via `transaction_complete(tid, false)`.
/// Everything else is a `DbError` proper: a structural or operational
/// failure that is generally fatal for the current statement.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("transaction aborted: {reason}")]
    Aborted { reason: String },

    #[error("eviction failed: all cached pages are dirty")]
    NoEvictablePage,

    #[error("page store io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DbError {
    pub fn aborted<S: Into<String>>(reason: S) -> Self {
        DbError::Aborted {
            reason: reason.into(),
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, DbError::Aborted { .. })
    }
}

pub type Result<T> = std::result::Result<T, DbError>;
