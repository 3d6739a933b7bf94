use super::*;

/// Validates the filters parameter.
///
/// # Errors
///
/// Returns `ModelError::InputValidationError` if filters is 0.
pub(super) fn validate_filters(filters: usize) -> Result<(), ModelError> {
    if filters == 0 {
        return Err(ModelError::InputValidationError(
            "Number of filters must be greater than 0".to_string(),
        ));
    }
    Ok(())
}

/// Validates kernel size for 2D convolution.
///
/// # Errors
///
/// Returns `ModelError::InputValidationError` if any dimension is 0.
pub(super) fn validate_kernel_size_2d(kernel_size: (usize, usize)) -> Result<(), ModelError> {
    if kernel_size.0 == 0 || kernel_size.1 == 0 {
        return Err(ModelError::InputValidationError(
            "Kernel dimensions must be greater than 0".to_string(),
        ));
    }
    Ok(())
}

/// Validates strides for 2D convolution.
///
/// # Errors
///
/// Returns `ModelError::InputValidationError` if any stride is 0.
pub(super) fn validate_strides_2d(strides: (usize, usize)) -> Result<(), ModelError> {
    if strides.0 == 0 || strides.1 == 0 {
        return Err(ModelError::InputValidationError(
            "Stride values must be greater than 0".to_string(),
        ));
    }
    Ok(())
}

/// Validates a 2D convolution input shape `[batch_size, channels, height, width]`.
///
/// # Errors
///
/// Returns `ModelError::InputValidationError` if the shape is not 4D, has a zero
/// dimension, or the padded spatial size is smaller than the kernel.
pub(super) fn validate_input_shape_2d(
    input_shape: &[usize],
    kernel_size: (usize, usize),
    padding: (usize, usize),
) -> Result<(), ModelError> {
    if input_shape.len() != 4 {
        return Err(ModelError::InputValidationError(format!(
            "Input shape must be 4D [batch_size, channels, height, width], got {:?}",
            input_shape
        )));
    }
    if input_shape.iter().any(|&d| d == 0) {
        return Err(ModelError::InputValidationError(format!(
            "All input dimensions must be greater than 0, got {:?}",
            input_shape
        )));
    }
    if input_shape[2] + 2 * padding.0 < kernel_size.0
        || input_shape[3] + 2 * padding.1 < kernel_size.1
    {
        return Err(ModelError::InputValidationError(format!(
            "Padded input {}x{} is smaller than kernel {}x{}",
            input_shape[2] + 2 * padding.0,
            input_shape[3] + 2 * padding.1,
            kernel_size.0,
            kernel_size.1
        )));
    }
    Ok(())
}
