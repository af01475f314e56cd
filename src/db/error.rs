/// Postgres unique-violation SQLSTATE.
const UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A dedup constraint rejected the write. Recoverable: the caller
    /// treats the row as already ingested and skips or audits.
    #[error("duplicate observation: {0}")]
    DuplicateObservation(String),
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

impl DbError {
    /// Map a unique-constraint violation into `DuplicateObservation`,
    /// passing every other error through unchanged.
    pub(crate) fn on_conflict(err: sqlx::Error, what: &str) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) {
                return DbError::DuplicateObservation(what.to_string());
            }
        }
        DbError::Sqlx(err)
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, DbError::DuplicateObservation(_))
    }
}
