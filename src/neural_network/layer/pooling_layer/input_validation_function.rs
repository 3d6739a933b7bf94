use super::*;

/// Validates that the input shape has the expected number of dimensions.
///
/// # Errors
///
/// Returns `ModelError::InputValidationError` if the shape length doesn't match expected_dims.
pub fn validate_input_shape_dims(
    input_shape: &[usize],
    expected_dims: usize,
    layer_name: &str,
) -> Result<(), ModelError> {
    if input_shape.len() != expected_dims {
        return Err(ModelError::InputValidationError(format!(
            "Input shape must be {}-dimensional: [batch_size, channels, height, width] for {}, got {:?}",
            expected_dims, layer_name, input_shape
        )));
    }
    Ok(())
}

/// Validates that all dimensions in input_shape are greater than zero.
///
/// # Errors
///
/// Returns `ModelError::InputValidationError` if any dimension is 0.
pub fn validate_all_dims_positive(input_shape: &[usize]) -> Result<(), ModelError> {
    if !input_shape.iter().all(|&dim| dim > 0) {
        return Err(ModelError::InputValidationError(format!(
            "All dimensions in input_shape must be greater than zero. Got: {:?}",
            input_shape
        )));
    }
    Ok(())
}

/// Validates pool size for 2D pooling.
///
/// # Errors
///
/// Returns `ModelError::InputValidationError` if any dimension is 0.
pub fn validate_pool_size_2d(pool_size: (usize, usize)) -> Result<(), ModelError> {
    if pool_size.0 == 0 || pool_size.1 == 0 {
        return Err(ModelError::InputValidationError(
            "pool_size dimensions must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

/// Validates strides for 2D pooling.
///
/// # Errors
///
/// Returns `ModelError::InputValidationError` if any stride is 0.
pub fn validate_strides_2d(strides: (usize, usize)) -> Result<(), ModelError> {
    if strides.0 == 0 || strides.1 == 0 {
        return Err(ModelError::InputValidationError(
            "strides must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

/// Validates a tensor passed to a pooling forward pass.
///
/// # Errors
///
/// Returns `ModelError::InputValidationError` if the tensor is not 4D or its spatial
/// size is smaller than the pooling window.
pub fn validate_pooling_input_2d(
    input: &Tensor,
    pool_size: (usize, usize),
    layer_name: &str,
) -> Result<(), ModelError> {
    validate_input_shape_dims(input.shape(), 4, layer_name)?;
    let shape = input.shape();
    if shape[2] < pool_size.0 || shape[3] < pool_size.1 {
        return Err(ModelError::InputValidationError(format!(
            "{} window {:?} is larger than input {}x{}",
            layer_name, pool_size, shape[2], shape[3]
        )));
    }
    Ok(())
}
