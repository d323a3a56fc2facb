use thiserror::Error;

/// Errors shared by the store, config and engine layers.
///
/// Upstream HTTP failures have their own type in the ingest service; this
/// enum covers everything that is not a network round trip.
#[derive(Debug, Error)]
pub enum FerryError {
    /// Missing or invalid settings, or a tenant with no usable connection.
    #[error("configuration error: {0}")]
    Config(String),

    /// A store read or write failed. Worth retrying.
    #[error("database error: {0}")]
    Database(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// One malformed input; the caller skips it.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl FerryError {
    /// Whether repeating the same operation could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FerryError::Database(_) | FerryError::Internal(_))
    }
}

pub type FerryResult<T> = Result<T, FerryError>;
