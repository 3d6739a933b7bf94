use super::*;

/// Threshold for deciding between parallel and sequential execution.
/// When batch_size * channels >= this threshold, use parallel execution.
const MAX_POOLING_2D_PARALLEL_THRESHOLD: usize = 32;

/// Maps one output cell to the input cell that held its maximum:
/// (batch, channel, out_i, out_j, in_i, in_j)
type MaxPosition = (usize, usize, usize, usize, usize, usize);

/// 2D max pooling layer.
///
/// Selects the maximum value within each pooling window across height and width.
/// Input tensor shape: `[batch_size, channels, height, width]`. Output tensor shape:
/// `[batch_size, channels, pooled_height, pooled_width]` where
/// `pooled_height = (height - pool_size_h) / stride_h + 1` and
/// `pooled_width = (width - pool_size_w) / stride_w + 1`.
///
/// # Fields
///
/// - `pool_size` - Size of the pooling window as (height, width)
/// - `strides` - Step size of the pooling operation as (vertical stride, horizontal stride)
/// - `input_shape` - Shape of the input tensor
/// - `input_cache` - Cached input tensor from the forward pass
/// - `max_positions` - Cached positions of maximum values for backpropagation
///
/// # Examples
/// ```rust
/// use waternet::prelude::*;
/// use ndarray::Array4;
///
/// let mut input_data = Array4::zeros((2, 3, 6, 6));
/// for b in 0..2 {
///     for c in 0..3 {
///         for i in 0..6 {
///             for j in 0..6 {
///                 input_data[[b, c, i, j]] = (i * j) as f32;
///             }
///         }
///     }
/// }
///
/// let mut pool = MaxPooling2D::new((2, 2), vec![2, 3, 6, 6], None).unwrap();
/// let output = pool.forward(&input_data.into_dyn()).unwrap();
///
/// assert_eq!(output.shape(), &[2, 3, 3, 3]);
/// assert_eq!(output[[0, 0, 2, 2]], 25.0);
/// ```
///
/// # Performance
///
/// Parallel execution is used when `batch_size * channels >= MAX_POOLING_2D_PARALLEL_THRESHOLD` (32).
pub struct MaxPooling2D {
    pool_size: (usize, usize),
    strides: (usize, usize),
    input_shape: Vec<usize>,
    input_cache: Option<Tensor>,
    max_positions: Option<Vec<MaxPosition>>,
}

impl MaxPooling2D {
    /// Creates a new 2D max pooling layer.
    ///
    /// If `strides` is None, it defaults to `pool_size`.
    ///
    /// # Parameters
    ///
    /// - `pool_size` - Size of the pooling window as (height, width)
    /// - `input_shape` - Input tensor shape `[batch_size, channels, height, width]`
    /// - `strides` - Optional strides of the pooling operation as (vertical stride, horizontal stride)
    ///
    /// # Returns
    ///
    /// - `Result<MaxPooling2D, ModelError>` - New layer instance on success
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

        validate_input_shape_dims(&input_shape, 4, "MaxPooling2D")?;
        validate_all_dims_positive(&input_shape)?;
        validate_pool_size_2d(pool_size)?;
        validate_strides_2d(strides)?;

        Ok(MaxPooling2D {
            pool_size,
            strides,
            input_shape,
            input_cache: None,
            max_positions: None,
        })
    }

    /// Performs max pooling operation.
    ///
    /// # Parameters
    ///
    /// * `input` - Input tensor with shape \[batch_size, channels, height, width\].
    ///
    /// # Returns
    ///
    /// * `(Tensor, Vec<MaxPosition>)` - Result of the pooling operation and the
    ///   position of each selected maximum
    fn max_pool(&self, input: &Tensor) -> (Tensor, Vec<MaxPosition>) {
        let input_shape = input.shape();
        let batch_size = input_shape[0];
        let channels = input_shape[1];
        let output_shape =
            calculate_output_shape_2d_pooling(input_shape, self.pool_size, self.strides);

        let mut output = ArrayD::zeros(output_shape.clone());
        let mut max_positions = Vec::new();

        let compute_pooling = |b: usize, c: usize| {
            let mut batch_channel_output = Vec::new();
            let mut batch_channel_positions = Vec::new();

            for out_i in 0..output_shape[2] {
                let i_start = out_i * self.strides.0;

                for out_j in 0..output_shape[3] {
                    let j_start = out_j * self.strides.1;

                    let mut max_val = f32::NEG_INFINITY;
                    let mut max_pos = (i_start, j_start);

                    for di in 0..self.pool_size.0 {
                        let i_pos = i_start + di;
                        if i_pos >= input_shape[2] {
                            continue;
                        }

                        for dj in 0..self.pool_size.1 {
                            let j_pos = j_start + dj;
                            if j_pos >= input_shape[3] {
                                continue;
                            }

                            let val = input[[b, c, i_pos, j_pos]];
                            if val > max_val {
                                max_val = val;
                                max_pos = (i_pos, j_pos);
                            }
                        }
                    }

                    batch_channel_output.push((out_i, out_j, max_val));
                    batch_channel_positions.push((b, c, out_i, out_j, max_pos.0, max_pos.1));
                }
            }

            ((b, c), (batch_channel_output, batch_channel_positions))
        };

        let results: Vec<_> = execute_parallel_or_sequential!(
            batch_size,
            channels,
            MAX_POOLING_2D_PARALLEL_THRESHOLD,
            compute_pooling
        );

        for ((b, c), (outputs, positions)) in results {
            for (i, j, val) in outputs {
                output[[b, c, i, j]] = val;
            }
            max_positions.extend(positions);
        }

        (output, max_positions)
    }
}

impl Layer for MaxPooling2D {
    fn forward(&mut self, input: &Tensor) -> Result<Tensor, ModelError> {
        validate_pooling_input_2d(input, self.pool_size, "MaxPooling2D")?;

        self.input_cache = Some(input.clone());

        let (output, max_positions) = self.max_pool(input);
        self.max_positions = Some(max_positions);

        Ok(output)
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor, ModelError> {
        let (Some(input), Some(max_positions)) = (&self.input_cache, &self.max_positions) else {
            return Err(ModelError::ProcessingError(
                "Forward pass has not been run".to_string(),
            ));
        };

        let input_shape = input.shape();
        let expected = calculate_output_shape_2d_pooling(input_shape, self.pool_size, self.strides);
        if grad_output.shape() != expected.as_slice() {
            return Err(ModelError::InputValidationError(format!(
                "Gradient shape {:?} does not match output shape {:?}",
                grad_output.shape(),
                expected
            )));
        }

        let batch_size = input_shape[0];
        let channels = input_shape[1];
        let height = input_shape[2];
        let width = input_shape[3];

        let mut input_gradients = ArrayD::zeros(input_shape.to_vec());

        // Positions are produced in (batch, channel)-major order, one block per pair
        let per_pair = expected[2] * expected[3];

        let compute_gradient = |b: usize, c: usize| {
            let mut spatial_grad = vec![0.0; height * width];
            let start = (b * channels + c) * per_pair;

            for &(_, _, out_i, out_j, in_i, in_j) in &max_positions[start..start + per_pair] {
                spatial_grad[in_i * width + in_j] += grad_output[[b, c, out_i, out_j]];
            }

            ((b, c), spatial_grad)
        };

        let results: Vec<_> = execute_parallel_or_sequential!(
            batch_size,
            channels,
            MAX_POOLING_2D_PARALLEL_THRESHOLD,
            compute_gradient
        );

        merge_gradients_2d!(input_gradients, results, height, width);

        Ok(input_gradients)
    }

    fn layer_type(&self) -> &str {
        "MaxPooling2D"
    }

    layer_functions_2d_pooling!();
}
