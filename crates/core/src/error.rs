use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid job spec: {0}")]
    InvalidSpec(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Browser not found: {0}")]
    BrowserNotFound(String),

    #[error("Browser attach timed out: {0}")]
    AttachTimeout(String),

    #[error("Site protection detected: {0}")]
    ProtectionDetected(String),

    #[error("Automation engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Automation engine failed: {0}")]
    EngineExecution(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Errors the request surface reports synchronously (bad request, unknown
    /// job, wrong lifecycle state) as opposed to failures recorded on a job.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidSpec(_) | Error::NotFound(_) | Error::InvalidState(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caller_errors() {
        assert!(Error::InvalidSpec("mode".into()).is_caller_error());
        assert!(Error::NotFound("job".into()).is_caller_error());
        assert!(Error::InvalidState("done".into()).is_caller_error());
        assert!(!Error::AttachTimeout("refused".into()).is_caller_error());
        assert!(!Error::EngineUnavailable("no key".into()).is_caller_error());
    }

    #[test]
    fn test_display_includes_detail() {
        let err = Error::AttachTimeout("Connection refused".into());
        assert_eq!(err.to_string(), "Browser attach timed out: Connection refused");
    }
}
