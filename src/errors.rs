use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0}")]
    Command(String),

    #[error("Registry error: {message}")]
    Registry {
        status: Option<u16>,
        message: String,
    },

    #[error("Job {0} not found")]
    UnknownJob(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    pub fn invalid(message: impl Into<String>) -> Self {
        SyncError::InvalidArgument(message.into())
    }

    pub fn registry(status: Option<u16>, message: impl Into<String>) -> Self {
        SyncError::Registry {
            status,
            message: message.into(),
        }
    }

    /// True when the registry answered 404 for the requested object.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SyncError::Registry {
                status: Some(404),
                ..
            }
        )
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::registry(None, format!("Unexpected registry payload: {}", err))
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        let status = err.status().map(|s| s.as_u16());
        SyncError::registry(status, format!("Registry request failed: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_argument_display() {
        let err = SyncError::invalid("source_image cannot be empty.");
        assert_eq!(
            err.to_string(),
            "Invalid argument: source_image cannot be empty."
        );
    }

    #[test]
    fn test_command_display_is_verbatim() {
        let err = SyncError::Command("Command failed (1): docker pull nginx".to_string());
        assert_eq!(err.to_string(), "Command failed (1): docker pull nginx");
    }

    #[test]
    fn test_registry_display() {
        let err = SyncError::registry(Some(500), "Registry API error 500: boom");
        assert_eq!(err.to_string(), "Registry error: Registry API error 500: boom");
    }

    #[test]
    fn test_unknown_job_display() {
        let err = SyncError::UnknownJob("abc123".to_string());
        assert_eq!(err.to_string(), "Job abc123 not found");
    }

    #[test]
    fn test_is_not_found() {
        assert!(SyncError::registry(Some(404), "gone").is_not_found());
        assert!(!SyncError::registry(Some(500), "boom").is_not_found());
        assert!(!SyncError::registry(None, "offline").is_not_found());
        assert!(!SyncError::invalid("x").is_not_found());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "docker missing");
        let err: SyncError = io_err.into();
        match err {
            SyncError::Internal(msg) => assert!(msg.contains("docker missing")),
            other => panic!("Expected Internal, got: {:?}", other),
        }
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<Vec<String>>("{").unwrap_err();
        let err: SyncError = json_err.into();
        match err {
            SyncError::Registry { status: None, .. } => {}
            other => panic!("Expected Registry, got: {:?}", other),
        }
    }
}
