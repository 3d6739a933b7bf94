use super::*;

/// Threshold for deciding when to use parallel computation in Conv2D operations.
/// If batch_size * filters * output_area < threshold, use sequential processing.
/// Otherwise, use parallel processing with Rayon.
const CONV_2D_PARALLEL_THRESHOLD: usize = 10000;

/// A 2D convolutional layer with explicit zero padding.
///
/// Unlike a "valid"/"same" switch, the padding here is an exact number of zero rows and
/// columns added on each side, which lets callers derive padding from other constraints
/// (see `Water`, which derives it from a reduction factor).
///
/// # Fields
///
/// - `filters` - Number of convolution filters (output channels).
/// - `in_channels` - Number of input channels.
/// - `kernel_size` - Size of the convolution kernel as (height, width).
/// - `strides` - Stride values for the convolution operation as (vertical, horizontal).
/// - `padding` - Zero padding added to each side as (vertical, horizontal).
/// - `weights` - 4D array of filter weights with shape \[filters, channels, kernel_height, kernel_width\].
/// - `bias` - 2D array of bias values with shape \[1, filters\].
/// - `input_cache` - Cached input from the forward pass, used during backpropagation.
/// - `input_shape` - Shape of the input tensor the layer was configured for.
/// - `weight_gradients` - Gradients for the weights, computed during backpropagation.
/// - `bias_gradients` - Gradients for the biases, computed during backpropagation.
///
/// # Shape Information
///
/// Input shape: \[batch_size, channels, height, width\]
/// Output shape: \[batch_size, filters, output_height, output_width\] where
/// `output = (size + 2 * padding - kernel) / stride + 1`.
///
/// # Example
/// ```rust
/// use waternet::prelude::*;
/// use ndarray::Array4;
///
/// // 3 filters, 3x3 kernel, stride 1, one row/column of zero padding
/// let mut conv = Conv2D::new(3, (3, 3), vec![2, 1, 5, 5], (1, 1), (1, 1)).unwrap();
///
/// let x = Array4::ones((2, 1, 5, 5)).into_dyn();
/// let y = conv.forward(&x).unwrap();
///
/// assert_eq!(y.shape(), &[2, 3, 5, 5]);
/// ```
pub struct Conv2D {
    filters: usize,
    in_channels: usize,
    kernel_size: (usize, usize),
    strides: (usize, usize),
    padding: (usize, usize),
    weights: Array4<f32>,
    bias: Array2<f32>,
    input_cache: Option<Tensor>,
    input_shape: Vec<usize>,
    weight_gradients: Option<Array4<f32>>,
    bias_gradients: Option<Array2<f32>>,
}

impl Conv2D {
    /// Creates a new 2D convolutional layer with the specified parameters.
    ///
    /// # Parameters
    ///
    /// - `filters` - Number of convolution filters (output channels).
    /// - `kernel_size` - Size of the convolution kernel as (height, width).
    /// - `input_shape` - Shape of the input tensor as \[batch_size, channels, height, width\].
    /// - `strides` - Stride values for the convolution operation as (vertical, horizontal).
    /// - `padding` - Zero padding added to each side as (vertical, horizontal).
    ///
    /// # Returns
    ///
    /// - `Ok(Conv2D)` - A new layer instance with randomly initialized weights.
    /// - `Err(ModelError::InputValidationError)` - If any size is zero, the shape is not 4D,
    ///   or the padded input is smaller than the kernel.
    ///
    /// # Notes
    ///
    /// Weights are initialized using Xavier (Glorot) uniform initialization.
    /// Biases are initialized to zeros.
    pub fn new(
        filters: usize,
        kernel_size: (usize, usize),
        input_shape: Vec<usize>,
        strides: (usize, usize),
        padding: (usize, usize),
    ) -> Result<Self, ModelError> {
        validate_filters(filters)?;
        validate_kernel_size_2d(kernel_size)?;
        validate_strides_2d(strides)?;
        validate_input_shape_2d(&input_shape, kernel_size, padding)?;

        let channels = input_shape[1];

        // Formula: sqrt(6 / (input_channels * kernel_area + filters * kernel_area))
        let fan_in = channels * kernel_size.0 * kernel_size.1;
        let fan_out = filters * kernel_size.0 * kernel_size.1;
        let weight_bound = (6.0 / (fan_in + fan_out) as f32).sqrt();

        let weights = Array4::random(
            (filters, channels, kernel_size.0, kernel_size.1),
            Uniform::new(-weight_bound, weight_bound),
        );

        let bias = Array2::zeros((1, filters));

        Ok(Conv2D {
            filters,
            in_channels: channels,
            kernel_size,
            strides,
            padding,
            weights,
            bias,
            input_cache: None,
            input_shape,
            weight_gradients: None,
            bias_gradients: None,
        })
    }

    /// Sets the weights and bias for this layer.
    ///
    /// # Parameters
    ///
    /// - `weights` - 4D array of filter weights with shape \[filters, channels, kernel_height, kernel_width\]
    /// - `bias` - 2D array of bias values with shape \[1, filters\]
    ///
    /// # Errors
    ///
    /// Returns `ModelError::InputValidationError` if either array has the wrong shape.
    pub fn set_weights(&mut self, weights: Array4<f32>, bias: Array2<f32>) -> Result<(), ModelError> {
        if weights.dim() != self.weights.dim() || bias.dim() != self.bias.dim() {
            return Err(ModelError::InputValidationError(format!(
                "Expected weights {:?} and bias {:?}, got {:?} and {:?}",
                self.weights.dim(),
                self.bias.dim(),
                weights.dim(),
                bias.dim()
            )));
        }
        self.weights = weights;
        self.bias = bias;
        Ok(())
    }

    /// Returns the filter weights \[filters, channels, kernel_height, kernel_width\]
    pub fn get_weights(&self) -> &Array4<f32> {
        &self.weights
    }

    /// Returns the bias \[1, filters\]
    pub fn get_bias(&self) -> &Array2<f32> {
        &self.bias
    }

    /// Returns the weight gradients from the last backward pass, if any
    pub fn get_weight_gradients(&self) -> Option<&Array4<f32>> {
        self.weight_gradients.as_ref()
    }

    /// Returns the bias gradients from the last backward pass, if any
    pub fn get_bias_gradients(&self) -> Option<&Array2<f32>> {
        self.bias_gradients.as_ref()
    }

    pub fn get_filters(&self) -> usize {
        self.filters
    }

    pub fn get_kernel_size(&self) -> (usize, usize) {
        self.kernel_size
    }

    pub fn get_strides(&self) -> (usize, usize) {
        self.strides
    }

    pub fn get_padding(&self) -> (usize, usize) {
        self.padding
    }

    /// Adds `padding` zero rows/columns on each side of the spatial dimensions.
    fn apply_padding(&self, input: &Tensor) -> Result<Tensor, ModelError> {
        if self.padding == (0, 0) {
            return Ok(input.clone());
        }

        let input_shape = input.shape();
        let (pad_top, pad_left) = self.padding;
        let input_height = input_shape[2];
        let input_width = input_shape[3];

        let mut padded = Array4::zeros((
            input_shape[0],
            input_shape[1],
            input_height + 2 * pad_top,
            input_width + 2 * pad_left,
        ));
        let input_4d = input
            .view()
            .into_dimensionality::<ndarray::Ix4>()
            .map_err(|e| ModelError::ProcessingError(e.to_string()))?;

        padded
            .slice_mut(s![
                ..,
                ..,
                pad_top..pad_top + input_height,
                pad_left..pad_left + input_width
            ])
            .assign(&input_4d);

        Ok(padded.into_dyn())
    }

    /// Computes convolution for a single batch.
    fn compute_batch_convolution(
        &self,
        b: usize,
        padded_input: &Tensor,
        output_shape: &[usize],
    ) -> (usize, Array3<f32>) {
        let mut batch_output = Array3::zeros((self.filters, output_shape[2], output_shape[3]));

        for f in 0..self.filters {
            for i in 0..output_shape[2] {
                let i_base = i * self.strides.0;

                for j in 0..output_shape[3] {
                    let j_base = j * self.strides.1;
                    let mut sum = 0.0;

                    for c in 0..self.in_channels {
                        for ki in 0..self.kernel_size.0 {
                            let i_pos = i_base + ki;

                            for kj in 0..self.kernel_size.1 {
                                let j_pos = j_base + kj;
                                sum += padded_input[[b, c, i_pos, j_pos]]
                                    * self.weights[[f, c, ki, kj]];
                            }
                        }
                    }

                    sum += self.bias[[0, f]];
                    batch_output[[f, i, j]] = sum;
                }
            }
        }

        (b, batch_output)
    }

    /// Performs the convolution operation on the input tensor.
    ///
    /// Batches are processed in parallel once the workload reaches
    /// `CONV_2D_PARALLEL_THRESHOLD`.
    fn convolve(&self, input: &Tensor, output_shape: Vec<usize>) -> Result<Tensor, ModelError> {
        let padded_input = self.apply_padding(input)?;
        let batch_size = output_shape[0];

        let workload_size = batch_size * self.filters * output_shape[2] * output_shape[3];

        let results: Vec<_> = if workload_size >= CONV_2D_PARALLEL_THRESHOLD {
            (0..batch_size)
                .into_par_iter()
                .map(|b| self.compute_batch_convolution(b, &padded_input, &output_shape))
                .collect()
        } else {
            (0..batch_size)
                .map(|b| self.compute_batch_convolution(b, &padded_input, &output_shape))
                .collect()
        };

        Ok(merge_results(output_shape, results))
    }
}

impl Layer for Conv2D {
    fn forward(&mut self, input: &Tensor) -> Result<Tensor, ModelError> {
        validate_input_shape_2d(input.shape(), self.kernel_size, self.padding)?;
        if input.shape()[1] != self.in_channels {
            return Err(ModelError::InputValidationError(format!(
                "Conv2D expects {} input channels, got {}",
                self.in_channels,
                input.shape()[1]
            )));
        }

        let output_shape = calculate_output_shape_2d_convolution(
            input.shape(),
            self.filters,
            self.kernel_size,
            self.strides,
            self.padding,
        )
        .ok_or_else(|| {
            ModelError::InputValidationError("Padded input is smaller than kernel".to_string())
        })?;

        self.input_cache = Some(input.clone());

        self.convolve(input, output_shape)
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor, ModelError> {
        let input = self.input_cache.as_ref().ok_or_else(|| {
            ModelError::ProcessingError("Forward pass has not been run".to_string())
        })?;

        let original_input_shape = input.shape().to_vec();
        let expected_grad_shape = calculate_output_shape_2d_convolution(
            &original_input_shape,
            self.filters,
            self.kernel_size,
            self.strides,
            self.padding,
        );
        if expected_grad_shape.as_deref() != Some(grad_output.shape()) {
            return Err(ModelError::InputValidationError(format!(
                "Gradient shape {:?} does not match output shape {:?}",
                grad_output.shape(),
                expected_grad_shape
            )));
        }

        let padded_input = self.apply_padding(input)?;
        let input_shape = padded_input.shape();

        let batch_size = input_shape[0];
        let channels = input_shape[1];
        let grad_shape = grad_output.shape();

        let mut weight_grads = Array4::zeros(self.weights.dim());
        let mut bias_grads = Array2::zeros((1, self.filters));

        bias_grads
            .axis_iter_mut(Axis(1))
            .into_par_iter()
            .enumerate()
            .for_each(|(f, mut bias)| {
                let mut sum = 0.0;
                for b in 0..batch_size {
                    for i in 0..grad_shape[2] {
                        for j in 0..grad_shape[3] {
                            sum += grad_output[[b, f, i, j]];
                        }
                    }
                }
                bias[0] = sum;
            });

        weight_grads
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(f, mut filter_grad)| {
                for c in 0..channels {
                    for h in 0..self.kernel_size.0 {
                        for w in 0..self.kernel_size.1 {
                            let mut sum = 0.0;
                            for b in 0..batch_size {
                                for i in 0..grad_shape[2] {
                                    let i_pos = i * self.strides.0 + h;
                                    if i_pos >= input_shape[2] {
                                        continue;
                                    }

                                    sum += compute_row_gradient_sum(
                                        grad_output,
                                        &padded_input,
                                        b,
                                        f,
                                        c,
                                        i,
                                        i_pos,
                                        w,
                                        self.strides.1,
                                    );
                                }
                            }
                            filter_grad[[c, h, w]] = sum;
                        }
                    }
                }
            });

        self.weight_gradients = Some(weight_grads);
        self.bias_gradients = Some(bias_grads);

        let local_results: Vec<_> = (0..batch_size)
            .into_par_iter()
            .map(|b| {
                let mut local_gradients = Array3::zeros([channels, input_shape[2], input_shape[3]]);

                for c in 0..channels {
                    for i in 0..input_shape[2] {
                        for j in 0..input_shape[3] {
                            let mut sum = 0.0;

                            for f in 0..self.filters {
                                for h in 0..self.kernel_size.0 {
                                    for w in 0..self.kernel_size.1 {
                                        if i >= h && j >= w {
                                            let grad_i = (i - h) / self.strides.0;
                                            let grad_j = (j - w) / self.strides.1;

                                            if grad_i < grad_shape[2]
                                                && grad_j < grad_shape[3]
                                                && (i - h) % self.strides.0 == 0
                                                && (j - w) % self.strides.1 == 0
                                            {
                                                sum += grad_output[[b, f, grad_i, grad_j]]
                                                    * self.weights[[f, c, h, w]];
                                            }
                                        }
                                    }
                                }
                            }

                            local_gradients[[c, i, j]] = sum;
                        }
                    }
                }

                (b, local_gradients)
            })
            .collect();

        let padded_grad = merge_results(
            vec![batch_size, channels, input_shape[2], input_shape[3]],
            local_results,
        )
        .into_dimensionality::<ndarray::Ix4>()
        .map_err(|e| ModelError::ProcessingError(e.to_string()))?;

        // Strip the zero border so the gradient matches the unpadded input
        let (pad_top, pad_left) = self.padding;
        let final_grad = padded_grad
            .slice(s![
                ..,
                ..,
                pad_top..pad_top + original_input_shape[2],
                pad_left..pad_left + original_input_shape[3]
            ])
            .to_owned()
            .into_dyn();

        Ok(final_grad)
    }

    fn layer_type(&self) -> &str {
        "Conv2D"
    }

    fn output_shape(&self) -> String {
        match calculate_output_shape_2d_convolution(
            &self.input_shape,
            self.filters,
            self.kernel_size,
            self.strides,
            self.padding,
        ) {
            Some(shape) => format!("({}, {}, {}, {})", shape[0], shape[1], shape[2], shape[3]),
            None => String::from("Unknown"),
        }
    }

    fn param_count(&self) -> TrainingParameters {
        TrainingParameters::Trainable(self.weights.len() + self.bias.len())
    }
}
