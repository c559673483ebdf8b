//! Error types for petal.

use thiserror::Error;

/// Main error type shared by every petal crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Architecture identifier outside the supported set
    #[error("Unknown architecture: {0}")]
    UnknownArchitecture(String),

    /// Dataset directory missing, malformed, or without readable images
    #[error("Data load error: {0}")]
    DataLoad(String),

    /// A split that must contain samples has none
    #[error("Empty dataset: {0}")]
    EmptyDataset(String),

    /// Loss became NaN or infinite during training
    #[error("Training diverged: {0}")]
    TrainingDiverged(String),

    /// Checkpoint destination is not an existing writable directory
    #[error("Invalid destination: {0}")]
    InvalidDestination(String),

    /// Checkpoint artifact unreadable, incomplete or inconsistent
    #[error("Checkpoint corrupt: {0}")]
    CheckpointCorrupt(String),

    /// Image file could not be decoded
    #[error("Image decode error: {0}")]
    ImageDecode(String),

    /// Predicted class index has no entry in the label mapping
    #[error("Label mapping missing for class index {0}")]
    LabelMappingMissing(usize),

    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid argument error
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::ImageDecode(err.to_string())
    }
}

/// Specialized Result type for petal operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::UnknownArchitecture("resnet9000".to_string());
        assert_eq!(err.to_string(), "Unknown architecture: resnet9000");

        let err = Error::LabelMappingMissing(7);
        assert_eq!(err.to_string(), "Label mapping missing for class index 7");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
