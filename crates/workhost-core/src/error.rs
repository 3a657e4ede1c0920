use thiserror::Error;

/// Error surface of worker supervision operations.
#[derive(Error, Debug)]
pub enum WorkerError {
    /// The process-spawn facility is missing entirely. Not recoverable;
    /// callers should treat this as a startup failure of the host itself.
    #[error("process spawn facility is not available")]
    SpawnFacilityUnavailable,

    #[error("failed to spawn worker process: {0}")]
    SpawnFailed(String),

    #[error("configuration error: {0}")]
    ConfigurationError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl WorkerError {
    pub fn spawn_failed(message: impl Into<String>) -> Self {
        WorkerError::SpawnFailed(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        WorkerError::ConfigurationError(message.into())
    }

    /// True for conditions no caller-side handling can fix.
    pub fn is_fatal(&self) -> bool {
        matches!(self, WorkerError::SpawnFacilityUnavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = WorkerError::spawn_failed("exec not found");
        let display = format!("{error}");
        assert!(display.contains("failed to spawn worker process"));
        assert!(display.contains("exec not found"));

        let error = WorkerError::SpawnFacilityUnavailable;
        assert!(format!("{error}").contains("not available"));
    }

    #[test]
    fn test_error_categorization() {
        assert!(WorkerError::SpawnFacilityUnavailable.is_fatal());
        assert!(!WorkerError::spawn_failed("x").is_fatal());
        assert!(!WorkerError::configuration("x").is_fatal());
    }

    #[test]
    fn test_io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        let error: WorkerError = io.into();
        assert!(matches!(error, WorkerError::Io(_)));
    }
}
