use thiserror::Error;

/// Failures a caller of the scraper must tell apart from transient ones.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("Invalid search query: {0}")]
    InvalidQuery(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Integrity violation: {0}")]
    IntegrityViolation(String),
}

impl StoreError {
    /// Maps SQLite constraint failures to `IntegrityViolation`, everything else to `anyhow`.
    pub fn from_sqlite(err: rusqlite::Error) -> anyhow::Error {
        match err {
            rusqlite::Error::SqliteFailure(code, ref msg)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                let detail = msg.clone().unwrap_or_else(|| code.to_string());
                StoreError::IntegrityViolation(detail).into()
            }
            other => other.into(),
        }
    }
}
