use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationError {
    // Storage errors
    StorageError(String),
    SerializationError(String),

    // Transport errors
    TransportError(String),
    InvalidTopic(String),

    // Validation errors
    ValidationError(String),

    // Application errors
    NotInitialized,
    QueueClosed,
}

impl fmt::Display for NotificationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            NotificationError::StorageError(msg) => write!(f, "Storage error: {}", msg),
            NotificationError::SerializationError(msg) => {
                write!(f, "Serialization error: {}", msg)
            }

            NotificationError::TransportError(msg) => write!(f, "Transport error: {}", msg),
            NotificationError::InvalidTopic(msg) => write!(f, "Invalid topic: {}", msg),

            NotificationError::ValidationError(msg) => write!(f, "Validation error: {}", msg),

            NotificationError::NotInitialized => write!(f, "Notifications not initialized"),
            NotificationError::QueueClosed => write!(f, "Task queue is closed"),
        }
    }
}

impl std::error::Error for NotificationError {}

pub type NotificationResult<T> = Result<T, NotificationError>;

// Conversion helpers
impl From<std::io::Error> for NotificationError {
    fn from(error: std::io::Error) -> Self {
        NotificationError::StorageError(error.to_string())
    }
}

impl From<serde_json::Error> for NotificationError {
    fn from(error: serde_json::Error) -> Self {
        NotificationError::SerializationError(format!("JSON error: {}", error))
    }
}

impl From<reqwest::Error> for NotificationError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            NotificationError::TransportError(format!("request timed out: {}", error))
        } else {
            NotificationError::TransportError(error.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_map_to_storage() {
        let err: NotificationError =
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into();
        assert!(matches!(err, NotificationError::StorageError(_)));
    }

    #[test]
    fn json_errors_map_to_serialization() {
        let err: NotificationError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(err.to_string().starts_with("Serialization error: JSON error"));
    }
}
