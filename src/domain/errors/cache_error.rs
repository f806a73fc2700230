//! Errors raised inside the rendition pipeline.
//!
//! None of these reach a caller of the processing queue: every failure is
//! logged and degrades to "no image produced".

/// Result type for cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Errors that can occur during cache operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// Source not found.
    #[error("Image not found: {0}")]
    NotFound(String),
    /// Failed to decode or encode image data.
    #[error("Decode error: {0}")]
    DecodeError(String),
    /// I/O error during cache operation.
    #[error("IO error: {0}")]
    IoError(String),
    /// Network error during download.
    #[error("Network error: {0}")]
    NetworkError(String),
    /// No async runtime or a worker task failed.
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl CacheError {
    /// Maps an I/O error, keeping `NotFound` distinguishable.
    #[must_use]
    pub fn from_io(context: &str, err: &std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound(format!("{context}: {err}"))
        } else {
            Self::IoError(format!("{context}: {err}"))
        }
    }

    /// Returns true for the not-found variant.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_io_keeps_not_found() {
        let missing = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");

        assert!(CacheError::from_io("read", &missing).is_not_found());
        let err = CacheError::from_io("read", &denied);
        assert!(!err.is_not_found());
        assert_eq!(err.to_string(), "IO error: read: nope");
    }
}
