//! Error Handling Module
//!
//! Error types shared by every stage of the lesion pipeline.
//! Library code returns [`Result`]; the binary wraps these in `anyhow`.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for lesion classifier operations
#[derive(Error, Debug)]
pub enum LesionError {
    /// An image could not be opened or decoded
    #[error("Failed to load image at '{0}': {1}")]
    ImageLoad(PathBuf, String),

    /// Error with sample sets, splits or batching
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Malformed metadata table
    #[error("Metadata error: {0}")]
    Metadata(String),

    /// Error with model construction or weight loading
    #[error("Model error: {0}")]
    Model(String),

    /// Error during the fit loop
    #[error("Training error: {0}")]
    Training(String),

    /// Error while producing predictions
    #[error("Inference error: {0}")]
    Inference(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Export to a deployment format failed
    #[error("Export error: {0}")]
    Export(String),

    /// Fetching remote weights failed
    #[error("Network error: {0}")]
    Network(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Path not found
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV read/write error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Convenience Result type for lesion classifier operations
pub type Result<T> = std::result::Result<T, LesionError>;

impl From<serde_json::Error> for LesionError {
    fn from(err: serde_json::Error) -> Self {
        LesionError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for LesionError {
    fn from(err: toml::de::Error) -> Self {
        LesionError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for LesionError {
    fn from(err: toml::ser::Error) -> Self {
        LesionError::Serialization(err.to_string())
    }
}

impl From<image::ImageError> for LesionError {
    fn from(err: image::ImageError) -> Self {
        LesionError::ImageLoad(PathBuf::new(), err.to_string())
    }
}

impl From<burn::record::RecorderError> for LesionError {
    fn from(err: burn::record::RecorderError) -> Self {
        LesionError::Model(format!("{:?}", err))
    }
}

impl From<reqwest::Error> for LesionError {
    fn from(err: reqwest::Error) -> Self {
        LesionError::Network(err.to_string())
    }
}

/// Extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, msg: &str) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: std::error::Error> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, msg: &str) -> Result<T> {
        self.map_err(|e| LesionError::InvalidInput(format!("{}: {}", msg, e)))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| LesionError::InvalidInput(format!("{}: {}", f(), e)))
    }
}

impl<T> ResultExt<T> for Option<T> {
    fn context(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| LesionError::InvalidInput(msg.to_string()))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.ok_or_else(|| LesionError::InvalidInput(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LesionError::Dataset("empty sample set".to_string());
        assert_eq!(format!("{}", err), "Dataset error: empty sample set");
    }

    #[test]
    fn test_image_load_error_names_path() {
        let path = PathBuf::from("/data/HAM10000/ISIC_0024306.jpg");
        let err = LesionError::ImageLoad(path, "unexpected EOF".to_string());
        assert!(format!("{}", err).contains("ISIC_0024306.jpg"));
    }

    #[test]
    fn test_toml_error_is_config() {
        let parsed: std::result::Result<toml::Value, _> = toml::from_str("epochs = = 3");
        let err: LesionError = parsed.unwrap_err().into();
        assert!(matches!(err, LesionError::Config(_)));
    }

    #[test]
    fn test_option_context() {
        let opt: Option<i32> = None;
        let with_context = opt.context("no probabilities");
        assert!(matches!(with_context, Err(LesionError::InvalidInput(_))));
    }
}
