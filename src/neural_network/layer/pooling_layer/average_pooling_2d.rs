use super::*;

/// Threshold for deciding between parallel and sequential execution.
/// When batch_size * channels >= this threshold, use parallel execution.
const AVERAGE_POOLING_2D_PARALLEL_THRESHOLD: usize = 32;

/// A 2D average pooling layer for neural networks.
///
/// Average pooling computes the mean of each window defined by the pool size.
///
/// # Input Shape
///
/// Input is a 4D tensor with shape \[batch_size, channels, height, width\]
///
/// # Output Shape
///
/// Output is a 4D tensor with shape \[batch_size, channels, pooled_height, pooled_width\]
/// where:
/// - pooled_height = (height - pool_size_h) / stride_h + 1
/// - pooled_width = (width - pool_size_w) / stride_w + 1
///
/// # Fields
///
/// - `pool_size` - Size of the pooling window as (height, width)
/// - `strides` - Stride of the pooling operation as (height, width)
/// - `input_shape` - Shape of the input tensor
/// - `input_cache` - Cached input tensor from forward pass, used in backpropagation
///
/// # Example
/// ```rust
/// use waternet::prelude::*;
/// use ndarray::Array4;
/// use approx::assert_relative_eq;
///
/// let mut input_data = Array4::zeros((2, 3, 4, 4));
/// for b in 0..2 {
///     for c in 0..3 {
///         for i in 0..4 {
///             for j in 0..4 {
///                 input_data[[b, c, i, j]] = (i + j) as f32;
///             }
///         }
///     }
/// }
///
/// let mut pool = AveragePooling2D::new((2, 2), vec![2, 3, 4, 4], None).unwrap();
/// let output = pool.forward(&input_data.into_dyn()).unwrap();
///
/// assert_eq!(output.shape(), &[2, 3, 2, 2]);
/// // (0 + 1 + 1 + 2) / 4
/// assert_relative_eq!(output[[0, 0, 0, 0]], 1.0);
/// // (4 + 5 + 5 + 6) / 4
/// assert_relative_eq!(output[[1, 2, 1, 1]], 5.0);
/// ```
pub struct AveragePooling2D {
    pool_size: (usize, usize),
    strides: (usize, usize),
    input_shape: Vec<usize>,
    input_cache: Option<Tensor>,
}

impl AveragePooling2D {
    /// Creates a new 2D average pooling layer.
    ///
    /// If `strides` is None, it defaults to `pool_size`.
    ///
    /// # Parameters
    ///
    /// - `pool_size` - Size of the pooling window as (height, width)
    /// - `input_shape` - Shape of the input tensor \[batch_size, channels, height, width\]
    /// - `strides` - Optional stride of the pooling operation as (height, width)
    ///
    /// # Errors
    ///
    /// - `ModelError::InputValidationError` - If `input_shape` is not 4D or has a zero
    ///   dimension, `pool_size` has a zero dimension, or any stride is zero
    pub fn new(
        pool_size: (usize, usize),
        input_shape: Vec<usize>,
        strides: Option<(usize, usize)>,
    ) -> Result<Self, ModelError> {
        let strides = strides.unwrap_or(pool_size);

        validate_input_shape_dims(&input_shape, 4, "AveragePooling2D")?;
        validate_all_dims_positive(&input_shape)?;
        validate_pool_size_2d(pool_size)?;
        validate_strides_2d(strides)?;

        Ok(AveragePooling2D {
            pool_size,
            strides,
            input_shape,
            input_cache: None,
        })
    }

    /// Performs average pooling operation.
    ///
    /// # Parameters
    ///
    /// * `input` - Input tensor with shape \[batch_size, channels, height, width\]
    ///
    /// # Returns
    ///
    /// * `Tensor` - Result of the pooling operation
    fn avg_pool(&self, input: &Tensor) -> Tensor {
        let input_shape = input.shape();
        let batch_size = input_shape[0];
        let channels = input_shape[1];
        let output_shape =
            calculate_output_shape_2d_pooling(input_shape, self.pool_size, self.strides);
        let window_area = (self.pool_size.0 * self.pool_size.1) as f32;

        let mut output = ArrayD::zeros(output_shape.clone());

        let compute_pooling = |b: usize, c: usize| {
            let mut batch_channel_output = Vec::with_capacity(output_shape[2] * output_shape[3]);

            for i in 0..output_shape[2] {
                let i_start = i * self.strides.0;

                for j in 0..output_shape[3] {
                    let j_start = j * self.strides.1;
                    let mut sum = 0.0;

                    for di in 0..self.pool_size.0 {
                        for dj in 0..self.pool_size.1 {
                            sum += input[[b, c, i_start + di, j_start + dj]];
                        }
                    }

                    batch_channel_output.push((i, j, sum / window_area));
                }
            }

            ((b, c), batch_channel_output)
        };

        let results: Vec<_> = execute_parallel_or_sequential!(
            batch_size,
            channels,
            AVERAGE_POOLING_2D_PARALLEL_THRESHOLD,
            compute_pooling
        );

        for ((b, c), outputs) in results {
            for (i, j, val) in outputs {
                output[[b, c, i, j]] = val;
            }
        }

        output
    }
}

impl Layer for AveragePooling2D {
    fn forward(&mut self, input: &Tensor) -> Result<Tensor, ModelError> {
        validate_pooling_input_2d(input, self.pool_size, "AveragePooling2D")?;

        self.input_cache = Some(input.clone());

        Ok(self.avg_pool(input))
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor, ModelError> {
        let Some(input) = &self.input_cache else {
            return Err(ModelError::ProcessingError(
                "Forward pass has not been run".to_string(),
            ));
        };

        let input_shape = input.shape();
        let output_shape =
            calculate_output_shape_2d_pooling(input_shape, self.pool_size, self.strides);
        if grad_output.shape() != output_shape.as_slice() {
            return Err(ModelError::InputValidationError(format!(
                "Gradient shape {:?} does not match output shape {:?}",
                grad_output.shape(),
                output_shape
            )));
        }

        let batch_size = input_shape[0];
        let channels = input_shape[1];
        let height = input_shape[2];
        let width = input_shape[3];
        let pool_size = self.pool_size;
        let strides = self.strides;
        let window_area = (pool_size.0 * pool_size.1) as f32;

        let mut input_gradients = ArrayD::zeros(input_shape.to_vec());

        // Every input cell in a window receives an equal share of that window's gradient
        let compute_gradient = |b: usize, c: usize| {
            let mut spatial_grad = vec![0.0; height * width];

            for i in 0..output_shape[2] {
                let i_start = i * strides.0;

                for j in 0..output_shape[3] {
                    let j_start = j * strides.1;
                    let share = grad_output[[b, c, i, j]] / window_area;

                    for di in 0..pool_size.0 {
                        for dj in 0..pool_size.1 {
                            spatial_grad[(i_start + di) * width + j_start + dj] += share;
                        }
                    }
                }
            }

            ((b, c), spatial_grad)
        };

        let results: Vec<_> = execute_parallel_or_sequential!(
            batch_size,
            channels,
            AVERAGE_POOLING_2D_PARALLEL_THRESHOLD,
            compute_gradient
        );

        merge_gradients_2d!(input_gradients, results, height, width);

        Ok(input_gradients)
    }

    fn layer_type(&self) -> &str {
        "AveragePooling2D"
    }

    layer_functions_2d_pooling!();
}
