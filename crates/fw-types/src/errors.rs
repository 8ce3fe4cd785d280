use thiserror::Error;

/// Main error type for Foldwise
#[derive(Error, Debug)]
pub enum FwError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("External tool error: {0}")]
    ExternalTool(#[from] ExternalToolError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Artifact name collision: {name} is already registered")]
    Collision { name: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Operation cancelled before fold {fold}")]
    Cancelled { fold: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failures of the external trainer process
#[derive(Error, Debug)]
pub enum ExternalToolError {
    #[error("Failed to launch {program}: {message}")]
    Spawn { program: String, message: String },

    #[error("{program} exited with status {status}: {stderr}")]
    NonZeroExit {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("{program} produced no output at {path}")]
    MissingOutput { program: String, path: String },
}

/// Failures allocating, publishing or resolving cache artifacts
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Temporary file allocation failed in {dir}: {message}")]
    TempFile { dir: String, message: String },

    #[error("Failed to save artifact {name}: {message}")]
    SaveFailed { name: String, message: String },

    #[error("Artifact not found: {name}")]
    NotFound { name: String },

    #[error("Failed to copy {from} to {to}: {message}")]
    CopyFailed {
        from: String,
        to: String,
        message: String,
    },
}

/// Result type alias for Foldwise operations
pub type FwResult<T> = Result<T, FwError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::FwError::Validation(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::FwError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::FwError::Config(format!($($arg)*))
    };
}
