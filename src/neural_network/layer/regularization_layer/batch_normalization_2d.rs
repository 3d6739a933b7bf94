use super::*;

/// Threshold for switching between sequential and parallel per-channel reductions.
/// Based on the total number of elements in the input tensor.
const BATCH_NORM_2D_PARALLEL_THRESHOLD: usize = 1024;

/// Default momentum for the running statistics.
pub const DEFAULT_BATCH_NORM_MOMENTUM: f32 = 0.9;

/// Default epsilon added to the variance before taking the square root.
pub const DEFAULT_BATCH_NORM_EPSILON: f32 = 1e-5;

/// Batch normalization over the channel axis of a 4D feature map.
///
/// Statistics are computed per channel across the batch, height, and width dimensions of
/// an input shaped `[batch_size, channels, height, width]`. Each channel has its own
/// learnable scale (`gamma`) and shift (`beta`).
///
/// In training mode the batch statistics normalize the input and update the running
/// statistics:
///
/// ```text
/// running = running * momentum + batch * (1 - momentum)
/// ```
///
/// where the running variance receives the unbiased batch variance. In inference mode the
/// running statistics are used instead.
///
/// # Fields
///
/// - `channels` - Number of channels being normalized.
/// - `epsilon` - Small constant for numerical stability in normalization.
/// - `momentum` - Momentum for the moving average of mean and variance.
/// - `input_shape` - Shape of the input tensor the layer was configured for.
/// - `gamma` - Per-channel scale parameter (trainable).
/// - `beta` - Per-channel shift parameter (trainable).
/// - `running_mean` - Running mean for inference.
/// - `running_var` - Running variance for inference.
/// - `training` - Whether the layer is in training mode or inference mode.
/// - `x_normalized` - Normalized input (used in backward pass).
/// - `inv_std` - Per-channel `1 / sqrt(var + epsilon)` used in the forward pass.
/// - `trained_on_batch` - Whether the cached values came from batch statistics.
/// - `grad_gamma` - Gradient for gamma parameter.
/// - `grad_beta` - Gradient for beta parameter.
///
/// # Example
/// ```rust
/// use waternet::prelude::*;
/// use ndarray::Array4;
/// use approx::assert_abs_diff_eq;
///
/// let mut bn = BatchNormalization2D::new(vec![4, 2, 3, 3], 0.9, 1e-5).unwrap();
///
/// let input = Array4::from_shape_fn((4, 2, 3, 3), |(b, c, i, j)| {
///     (b * 7 + c * 3 + i * 2 + j) as f32
/// })
/// .into_dyn();
/// let output = bn.forward(&input).unwrap();
///
/// // Each channel has zero mean after normalization
/// let channel_mean = output.index_axis(ndarray::Axis(1), 0).mean().unwrap();
/// assert_abs_diff_eq!(channel_mean, 0.0, epsilon = 1e-5);
/// ```
pub struct BatchNormalization2D {
    channels: usize,
    epsilon: f32,
    momentum: f32,
    input_shape: Vec<usize>,
    gamma: Array1<f32>,
    beta: Array1<f32>,
    running_mean: Array1<f32>,
    running_var: Array1<f32>,
    training: bool,
    // Cache for backward pass
    x_normalized: Option<Tensor>,
    inv_std: Option<Array1<f32>>,
    trained_on_batch: bool,
    // Gradients
    grad_gamma: Option<Array1<f32>>,
    grad_beta: Option<Array1<f32>>,
}

/// Reshapes a per-channel vector to `[1, channels, 1, 1]` so it broadcasts over a 4D tensor.
fn as_channel_tensor(values: &Array1<f32>) -> Tensor {
    values
        .view()
        .insert_axis(Axis(0))
        .insert_axis(Axis(2))
        .insert_axis(Axis(3))
        .to_owned()
        .into_dyn()
}

/// Applies `reduce` to each channel slice `[batch, height, width]` of a 4D tensor.
fn per_channel<F>(tensor: &Tensor, reduce: F) -> Array1<f32>
where
    F: Fn(ndarray::ArrayViewD<'_, f32>) -> f32 + Sync + Send,
{
    per_channel_with_index(tensor, |_, view| reduce(view))
}

impl BatchNormalization2D {
    /// Creates a new BatchNormalization2D layer.
    ///
    /// # Parameters
    ///
    /// - `input_shape` - Shape of the input tensor \[batch_size, channels, height, width\].
    /// - `momentum` - Momentum for the moving average of mean and variance (typically 0.9 or 0.99).
    /// - `epsilon` - Small constant for numerical stability (typically 1e-5).
    ///
    /// # Errors
    ///
    /// Returns `ModelError::InputValidationError` if the shape is not 4D or has a zero
    /// dimension, `momentum` is outside `[0, 1]`, or `epsilon` is not positive.
    pub fn new(input_shape: Vec<usize>, momentum: f32, epsilon: f32) -> Result<Self, ModelError> {
        if input_shape.len() != 4 || input_shape.iter().any(|&d| d == 0) {
            return Err(ModelError::InputValidationError(format!(
                "BatchNormalization2D expects a 4D shape with non-zero dimensions, got {:?}",
                input_shape
            )));
        }
        if !(0.0..=1.0).contains(&momentum) {
            return Err(ModelError::InputValidationError(format!(
                "momentum must be in [0, 1], got {}",
                momentum
            )));
        }
        if epsilon <= 0.0 {
            return Err(ModelError::InputValidationError(format!(
                "epsilon must be positive, got {}",
                epsilon
            )));
        }

        let channels = input_shape[1];

        Ok(BatchNormalization2D {
            channels,
            epsilon,
            momentum,
            input_shape,
            gamma: Array1::ones(channels),
            beta: Array1::zeros(channels),
            running_mean: Array1::zeros(channels),
            running_var: Array1::ones(channels),
            training: true,
            x_normalized: None,
            inv_std: None,
            trained_on_batch: false,
            grad_gamma: None,
            grad_beta: None,
        })
    }

    mode_dependent_layer_set_training!();

    /// Sets the weights for the BatchNormalization2D layer.
    ///
    /// # Parameters
    ///
    /// - `gamma` - Scale parameter (trainable).
    /// - `beta` - Shift parameter (trainable).
    /// - `running_mean` - Running mean for inference.
    /// - `running_var` - Running variance for inference.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::InputValidationError` if any vector length differs from the
    /// channel count.
    pub fn set_weights(
        &mut self,
        gamma: Array1<f32>,
        beta: Array1<f32>,
        running_mean: Array1<f32>,
        running_var: Array1<f32>,
    ) -> Result<(), ModelError> {
        if [&gamma, &beta, &running_mean, &running_var]
            .iter()
            .any(|v| v.len() != self.channels)
        {
            return Err(ModelError::InputValidationError(format!(
                "All BatchNormalization2D parameters must have length {}",
                self.channels
            )));
        }
        self.gamma = gamma;
        self.beta = beta;
        self.running_mean = running_mean;
        self.running_var = running_var;
        Ok(())
    }

    pub fn get_gamma(&self) -> &Array1<f32> {
        &self.gamma
    }

    pub fn get_beta(&self) -> &Array1<f32> {
        &self.beta
    }

    pub fn get_running_mean(&self) -> &Array1<f32> {
        &self.running_mean
    }

    pub fn get_running_var(&self) -> &Array1<f32> {
        &self.running_var
    }

    /// Returns the gamma gradient from the last backward pass, if any
    pub fn get_grad_gamma(&self) -> Option<&Array1<f32>> {
        self.grad_gamma.as_ref()
    }

    /// Returns the beta gradient from the last backward pass, if any
    pub fn get_grad_beta(&self) -> Option<&Array1<f32>> {
        self.grad_beta.as_ref()
    }

    fn validate_input(&self, input: &Tensor) -> Result<(), ModelError> {
        if input.ndim() != 4 || input.shape()[1] != self.channels {
            return Err(ModelError::InputValidationError(format!(
                "BatchNormalization2D expects [batch_size, {}, height, width], got {:?}",
                self.channels,
                input.shape()
            )));
        }
        if input.is_empty() {
            return Err(ModelError::InputValidationError(
                "BatchNormalization2D input must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl Layer for BatchNormalization2D {
    fn forward(&mut self, input: &Tensor) -> Result<Tensor, ModelError> {
        self.validate_input(input)?;

        let (mean, var) = if self.training {
            let elements_per_channel = (input.len() / self.channels) as f32;
            let batch_mean = per_channel(input, |view| view.sum() / elements_per_channel);
            let batch_var = {
                let means = &batch_mean;
                per_channel_with_index(input, |c, view| {
                    let m = means[c];
                    view.iter().map(|&x| (x - m) * (x - m)).sum::<f32>() / elements_per_channel
                })
            };

            let unbiased_var = if elements_per_channel > 1.0 {
                &batch_var * (elements_per_channel / (elements_per_channel - 1.0))
            } else {
                batch_var.clone()
            };
            self.running_mean =
                &self.running_mean * self.momentum + &batch_mean * (1.0 - self.momentum);
            self.running_var =
                &self.running_var * self.momentum + &unbiased_var * (1.0 - self.momentum);

            (batch_mean, batch_var)
        } else {
            (self.running_mean.clone(), self.running_var.clone())
        };

        let inv_std = var.mapv(|v| 1.0 / (v + self.epsilon).sqrt());
        let x_normalized = (input - &as_channel_tensor(&mean)) * &as_channel_tensor(&inv_std);
        let output = &x_normalized * &as_channel_tensor(&self.gamma) + &as_channel_tensor(&self.beta);

        self.x_normalized = Some(x_normalized);
        self.inv_std = Some(inv_std);
        self.trained_on_batch = self.training;

        Ok(output)
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor, ModelError> {
        let (Some(x_normalized), Some(inv_std)) = (&self.x_normalized, &self.inv_std) else {
            return Err(ModelError::ProcessingError(
                "Forward pass has not been run".to_string(),
            ));
        };
        if grad_output.shape() != x_normalized.shape() {
            return Err(ModelError::InputValidationError(format!(
                "Gradient shape {:?} does not match output shape {:?}",
                grad_output.shape(),
                x_normalized.shape()
            )));
        }

        let grad_gamma = per_channel(&(grad_output * x_normalized), |view| view.sum());
        let grad_beta = per_channel(grad_output, |view| view.sum());

        let scale = as_channel_tensor(&(&self.gamma * inv_std));

        let grad_input = if self.trained_on_batch {
            // dx = gamma * inv_std / m * (m * dy - sum(dy) - x_hat * sum(dy * x_hat))
            let m = (grad_output.len() / self.channels) as f32;
            let mean_dy = as_channel_tensor(&(&grad_beta / m));
            let mean_dy_xhat = as_channel_tensor(&(&grad_gamma / m));
            (grad_output - &mean_dy - &(x_normalized * &mean_dy_xhat)) * &scale
        } else {
            grad_output * &scale
        };

        self.grad_gamma = Some(grad_gamma);
        self.grad_beta = Some(grad_beta);

        Ok(grad_input)
    }

    fn layer_type(&self) -> &str {
        "BatchNormalization2D"
    }

    fn output_shape(&self) -> String {
        format!(
            "({}, {}, {}, {})",
            self.input_shape[0], self.input_shape[1], self.input_shape[2], self.input_shape[3]
        )
    }

    fn param_count(&self) -> TrainingParameters {
        TrainingParameters::Trainable(self.gamma.len() + self.beta.len())
    }

    mode_dependent_layer_trait!();
}

/// Like `per_channel`, but also passes the channel index to `reduce`.
fn per_channel_with_index<F>(tensor: &Tensor, reduce: F) -> Array1<f32>
where
    F: Fn(usize, ndarray::ArrayViewD<'_, f32>) -> f32 + Sync + Send,
{
    let channels = tensor.shape()[1];
    let values: Vec<f32> = if tensor.len() >= BATCH_NORM_2D_PARALLEL_THRESHOLD {
        (0..channels)
            .into_par_iter()
            .map(|c| reduce(c, tensor.index_axis(Axis(1), c)))
            .collect()
    } else {
        (0..channels)
            .map(|c| reduce(c, tensor.index_axis(Axis(1), c)))
            .collect()
    };
    Array1::from(values)
}
