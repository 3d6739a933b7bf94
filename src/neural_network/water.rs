use crate::error::ModelError;
use crate::neural_network::Tensor;
use crate::neural_network::layer::helper_function::{
    calculate_output_image_size, calculate_padding_and_stride,
};
use crate::neural_network::layer::{
    AveragePooling2D, BatchNormalization2D, Conv2D, DEFAULT_BATCH_NORM_EPSILON,
    DEFAULT_BATCH_NORM_MOMENTUM, MaxPooling2D, TrainingParameters,
};
use crate::neural_network::neural_network_trait::Layer;

/// Convolution kernel size as (height, width).
///
/// A single `usize` is broadcast to a square kernel.
///
/// # Examples
/// ```rust
/// use waternet::neural_network::KernelSize;
///
/// assert_eq!(KernelSize::from(5), KernelSize(5, 5));
/// assert_eq!(KernelSize::from((3, 1)), KernelSize(3, 1));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelSize(pub usize, pub usize);

impl From<usize> for KernelSize {
    fn from(size: usize) -> Self {
        KernelSize(size, size)
    }
}

impl From<(usize, usize)> for KernelSize {
    fn from((height, width): (usize, usize)) -> Self {
        KernelSize(height, width)
    }
}

impl From<KernelSize> for (usize, usize) {
    fn from(kernel: KernelSize) -> Self {
        (kernel.0, kernel.1)
    }
}

/// Pooling applied after the convolution (and normalization) of a `Water` block.
///
/// The carried value is the amplification factor, used as both window size and stride.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolingMode {
    None,
    Max(usize),
    Avg(usize),
}

impl PoolingMode {
    /// Returns the amplification factor, or `None` when no pooling is attached
    pub fn amplify(&self) -> Option<usize> {
        match self {
            PoolingMode::None => None,
            PoolingMode::Max(amplify) | PoolingMode::Avg(amplify) => Some(*amplify),
        }
    }
}

/// Where a `Water` block takes its input shape from.
///
/// # Variants
///
/// - `ImageSize` - An explicit image size as (height, width, channels); used for the first block
/// - `Previous` - An already-built block whose output channels and output size become the input
#[derive(Clone, Copy)]
pub enum ShapeSource<'a> {
    ImageSize((usize, usize, usize)),
    Previous(&'a Water),
}

/// Options for building a `Water` block.
///
/// # Fields
///
/// - `out_channels` - Number of output channels of the convolution (default 1)
/// - `kernel` - Kernel size (default 3x3)
/// - `reduction` - Spatial downsampling factor applied through the convolution stride (default 1)
/// - `amplify` - Window and stride of the pooling layer (default 2)
/// - `use_maxpool` - Attach a max pooling layer (default false)
/// - `use_avgpool` - Attach an average pooling layer (default false)
/// - `use_normalization` - Attach a batch normalization layer (default false)
///
/// # Examples
/// ```rust
/// use waternet::neural_network::WaterConfig;
///
/// let config = WaterConfig::new(32).kernel(5).reduction(2).normalization(true);
/// assert_eq!(config.out_channels, 32);
/// assert_eq!(config.amplify, 2);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaterConfig {
    pub out_channels: usize,
    pub kernel: KernelSize,
    pub reduction: usize,
    pub amplify: usize,
    pub use_maxpool: bool,
    pub use_avgpool: bool,
    pub use_normalization: bool,
}

impl Default for WaterConfig {
    fn default() -> Self {
        WaterConfig {
            out_channels: 1,
            kernel: KernelSize(3, 3),
            reduction: 1,
            amplify: 2,
            use_maxpool: false,
            use_avgpool: false,
            use_normalization: false,
        }
    }
}

impl WaterConfig {
    /// Creates a configuration with `out_channels` and every other option at its default.
    pub fn new(out_channels: usize) -> Self {
        WaterConfig {
            out_channels,
            ..Default::default()
        }
    }

    pub fn kernel(mut self, kernel: impl Into<KernelSize>) -> Self {
        self.kernel = kernel.into();
        self
    }

    pub fn reduction(mut self, reduction: usize) -> Self {
        self.reduction = reduction;
        self
    }

    pub fn amplify(mut self, amplify: usize) -> Self {
        self.amplify = amplify;
        self
    }

    pub fn max_pool(mut self, use_maxpool: bool) -> Self {
        self.use_maxpool = use_maxpool;
        self
    }

    pub fn avg_pool(mut self, use_avgpool: bool) -> Self {
        self.use_avgpool = use_avgpool;
        self
    }

    pub fn normalization(mut self, use_normalization: bool) -> Self {
        self.use_normalization = use_normalization;
        self
    }

    /// Resolves the pooling flags into a single `PoolingMode`.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::IncompatibleConfiguration` if both max and average pooling are requested.
    pub fn pooling_mode(&self) -> Result<PoolingMode, ModelError> {
        match (self.use_maxpool, self.use_avgpool) {
            (true, true) => Err(ModelError::IncompatibleConfiguration(
                "MaxPool and AvgPool cannot co-exist".to_string(),
            )),
            (true, false) => Ok(PoolingMode::Max(self.amplify)),
            (false, true) => Ok(PoolingMode::Avg(self.amplify)),
            (false, false) => Ok(PoolingMode::None),
        }
    }
}

/// The pooling operator owned by a `Water` block.
enum PoolLayer {
    Max(MaxPooling2D),
    Avg(AveragePooling2D),
}

impl PoolLayer {
    fn as_layer_mut(&mut self) -> &mut dyn Layer {
        match self {
            PoolLayer::Max(pool) => pool,
            PoolLayer::Avg(pool) => pool,
        }
    }
}

/// A convolution block with automatically derived padding and stride.
///
/// A `Water` block wraps a `Conv2D`, optionally followed by `BatchNormalization2D` and
/// then by max or average pooling. Instead of specifying padding and stride, the caller
/// gives a `reduction` factor `R`; for each spatial dimension of size `S` with kernel `K`:
///
/// ```text
/// padding = floor(((R - 1) * S - R + K) / 2)
/// stride  = R
/// output  = floor((S + 2 * padding - K) / stride) + 1
/// ```
///
/// and pooling further floor-divides the output by `amplify`. The output size is computed
/// once at construction, so the next block can be built from this one with
/// `Water::from_previous` without running any data through it.
///
/// # Example
/// ```rust
/// use waternet::prelude::*;
/// use ndarray::Array4;
///
/// let mut layer = Water::from_image_size(
///     (224, 256, 3),
///     WaterConfig::new(16).kernel((3, 3)).reduction(1),
/// )
/// .unwrap();
///
/// assert_eq!(layer.get_linear_size(), 16 * 224 * 256);
///
/// let x = Array4::zeros((1, 3, 224, 256)).into_dyn();
/// let y = layer.forward(&x).unwrap();
/// assert_eq!(y.shape(), &[1, 16, 224, 256]);
/// ```
pub struct Water {
    in_channels: usize,
    out_channels: usize,
    kernel_size: (usize, usize),
    input_image_size: (usize, usize),
    padding: (usize, usize),
    strides: (usize, usize),
    output_image_size: (usize, usize),
    pooling: PoolingMode,
    is_chained: bool,
    conv: Conv2D,
    norm: Option<BatchNormalization2D>,
    pool: Option<PoolLayer>,
}

impl Water {
    /// Builds a block from an explicit shape source.
    ///
    /// # Parameters
    ///
    /// - `source` - Image size `(height, width, channels)` or a previous block
    /// - `config` - Block options
    ///
    /// # Returns
    ///
    /// - `Ok(Water)` - The configured block
    /// - `Err(ModelError::IncompatibleConfiguration)` - If max and average pooling are both requested
    /// - `Err(ModelError::InputValidationError)` - If a size or factor is zero, or the derived
    ///   padding or output size is not usable
    pub fn new(source: ShapeSource<'_>, config: WaterConfig) -> Result<Self, ModelError> {
        let pooling = config.pooling_mode()?;

        let (in_channels, input_image_size, is_chained) = match source {
            ShapeSource::ImageSize((height, width, channels)) => {
                (channels, (height, width), false)
            }
            ShapeSource::Previous(previous) => {
                (previous.out_channels, previous.output_image_size, true)
            }
        };
        let kernel_size: (usize, usize) = config.kernel.into();

        validate_water_parameters(in_channels, input_image_size, kernel_size, &config)?;

        let (signed_padding, strides) =
            calculate_padding_and_stride(input_image_size, kernel_size, config.reduction)?;
        let padding = match (
            usize::try_from(signed_padding.0),
            usize::try_from(signed_padding.1),
        ) {
            (Ok(h), Ok(w)) => (h, w),
            _ => {
                return Err(ModelError::InputValidationError(format!(
                    "Derived padding {:?} is negative for image {:?}, kernel {:?}, reduction {}",
                    signed_padding, input_image_size, kernel_size, config.reduction
                )));
            }
        };

        let conv_output =
            calculate_output_image_size(input_image_size, kernel_size, strides, signed_padding)?;
        let mut output_image_size = positive_size(conv_output, "convolution")?;

        // Shapes below use a batch size of 1; the operators accept any batch size
        let conv = Conv2D::new(
            config.out_channels,
            kernel_size,
            vec![1, in_channels, input_image_size.0, input_image_size.1],
            strides,
            padding,
        )?;
        let conv_output_shape = vec![1, config.out_channels, output_image_size.0, output_image_size.1];

        let norm = if config.use_normalization {
            Some(BatchNormalization2D::new(
                conv_output_shape.clone(),
                DEFAULT_BATCH_NORM_MOMENTUM,
                DEFAULT_BATCH_NORM_EPSILON,
            )?)
        } else {
            None
        };

        let pool = match pooling {
            PoolingMode::None => None,
            PoolingMode::Max(amplify) => Some(PoolLayer::Max(MaxPooling2D::new(
                (amplify, amplify),
                conv_output_shape,
                None,
            )?)),
            PoolingMode::Avg(amplify) => Some(PoolLayer::Avg(AveragePooling2D::new(
                (amplify, amplify),
                conv_output_shape,
                None,
            )?)),
        };
        if let Some(amplify) = pooling.amplify() {
            output_image_size = positive_size(
                (
                    (output_image_size.0 / amplify) as i64,
                    (output_image_size.1 / amplify) as i64,
                ),
                "pooling",
            )?;
        }

        Ok(Water {
            in_channels,
            out_channels: config.out_channels,
            kernel_size,
            input_image_size,
            padding,
            strides,
            output_image_size,
            pooling,
            is_chained,
            conv,
            norm,
            pool,
        })
    }

    /// Builds the first block of a chain from an image size `(height, width, channels)`.
    pub fn from_image_size(
        image_size: (usize, usize, usize),
        config: WaterConfig,
    ) -> Result<Self, ModelError> {
        Water::new(ShapeSource::ImageSize(image_size), config)
    }

    /// Builds a block that consumes the output of `previous`.
    ///
    /// The new block's input channels and input size are `previous.out_channels()` and
    /// `previous.output_image_size()`.
    pub fn from_previous(previous: &Water, config: WaterConfig) -> Result<Self, ModelError> {
        Water::new(ShapeSource::Previous(previous), config)
    }

    /// Size of the flattened output of this block: `out_channels * out_height * out_width`.
    ///
    /// Used to size a fully connected layer following the block.
    pub fn get_linear_size(&self) -> usize {
        self.out_channels * self.output_image_size.0 * self.output_image_size.1
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    pub fn kernel_size(&self) -> (usize, usize) {
        self.kernel_size
    }

    /// Input (height, width), without the channel dimension
    pub fn input_image_size(&self) -> (usize, usize) {
        self.input_image_size
    }

    pub fn padding(&self) -> (usize, usize) {
        self.padding
    }

    pub fn strides(&self) -> (usize, usize) {
        self.strides
    }

    /// Output (height, width) after convolution and, if attached, pooling
    pub fn output_image_size(&self) -> (usize, usize) {
        self.output_image_size
    }

    pub fn pooling(&self) -> PoolingMode {
        self.pooling
    }

    pub fn uses_max_pool(&self) -> bool {
        matches!(self.pooling, PoolingMode::Max(_))
    }

    pub fn uses_avg_pool(&self) -> bool {
        matches!(self.pooling, PoolingMode::Avg(_))
    }

    pub fn uses_normalization(&self) -> bool {
        self.norm.is_some()
    }

    /// Whether the input shape was taken from a previous block
    pub fn is_chained(&self) -> bool {
        self.is_chained
    }

    pub fn conv(&self) -> &Conv2D {
        &self.conv
    }

    pub fn conv_mut(&mut self) -> &mut Conv2D {
        &mut self.conv
    }

    pub fn norm(&self) -> Option<&BatchNormalization2D> {
        self.norm.as_ref()
    }

    pub fn norm_mut(&mut self) -> Option<&mut BatchNormalization2D> {
        self.norm.as_mut()
    }

    /// Switches the normalization layer between training and inference mode.
    ///
    /// Has no effect on blocks without normalization.
    pub fn set_training(&mut self, is_training: bool) {
        if let Some(norm) = self.norm.as_mut() {
            norm.set_training(is_training);
        }
    }
}

/// Rejects zero channel counts, sizes, and factors before any arithmetic runs.
fn validate_water_parameters(
    in_channels: usize,
    input_image_size: (usize, usize),
    kernel_size: (usize, usize),
    config: &WaterConfig,
) -> Result<(), ModelError> {
    let checks = [
        (in_channels, "input channels"),
        (input_image_size.0, "input height"),
        (input_image_size.1, "input width"),
        (config.out_channels, "out_channels"),
        (kernel_size.0, "kernel height"),
        (kernel_size.1, "kernel width"),
        (config.reduction, "reduction"),
        (config.amplify, "amplify"),
    ];

    for (value, name) in checks {
        if value == 0 {
            return Err(ModelError::InputValidationError(format!(
                "{} must be greater than 0",
                name
            )));
        }
    }
    Ok(())
}

fn positive_size(size: (i64, i64), stage: &str) -> Result<(usize, usize), ModelError> {
    if size.0 < 1 || size.1 < 1 {
        return Err(ModelError::InputValidationError(format!(
            "Output size after {} would be {}x{}",
            stage, size.0, size.1
        )));
    }
    Ok((size.0 as usize, size.1 as usize))
}

impl Layer for Water {
    fn forward(&mut self, input: &Tensor) -> Result<Tensor, ModelError> {
        let (height, width) = self.input_image_size;
        if input.ndim() != 4
            || input.shape()[1] != self.in_channels
            || input.shape()[2] != height
            || input.shape()[3] != width
        {
            return Err(ModelError::InputValidationError(format!(
                "Water expects input [batch_size, {}, {}, {}], got {:?}",
                self.in_channels,
                height,
                width,
                input.shape()
            )));
        }

        let mut output = self.conv.forward(input)?;
        if let Some(norm) = self.norm.as_mut() {
            output = norm.forward(&output)?;
        }
        if let Some(pool) = self.pool.as_mut() {
            output = pool.as_layer_mut().forward(&output)?;
        }
        Ok(output)
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor, ModelError> {
        let mut grad = grad_output.clone();
        if let Some(pool) = self.pool.as_mut() {
            grad = pool.as_layer_mut().backward(&grad)?;
        }
        if let Some(norm) = self.norm.as_mut() {
            grad = norm.backward(&grad)?;
        }
        self.conv.backward(&grad)
    }

    fn layer_type(&self) -> &str {
        "Water"
    }

    fn output_shape(&self) -> String {
        format!(
            "(None, {}, {}, {})",
            self.out_channels, self.output_image_size.0, self.output_image_size.1
        )
    }

    fn param_count(&self) -> TrainingParameters {
        let norm_params = self.norm.as_ref().map_or(0, |norm| norm.param_count().count());
        TrainingParameters::Trainable(self.conv.param_count().count() + norm_params)
    }

    fn set_training_if_mode_dependent(&mut self, is_training: bool) {
        self.set_training(is_training);
    }
}
