use thiserror::Error;

/// Error types that can occur while building or running layers
///
/// # Variants
///
/// - `IncompatibleConfiguration` - Indicates that the requested layer options cannot be combined (e.g. max pooling together with average pooling)
/// - `InputValidationError` - Indicates the input data or parameters do not meet the expected format, size, or validation rules
/// - `ProcessingError` - Indicates that there is something wrong while processing
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("Incompatible configuration: {0}")]
    IncompatibleConfiguration(String),
    #[error("Input validation error: {0}")]
    InputValidationError(String),
    #[error("Processing error: {0}")]
    ProcessingError(String),
}
