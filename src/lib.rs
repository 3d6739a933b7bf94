/// Error type shared by every layer in this crate.
///
/// All fallible constructors and passes return `Result<_, ModelError>`:
///
/// - `IncompatibleConfiguration` - mutually exclusive options were requested together
/// - `InputValidationError` - parameters or tensors have invalid sizes
/// - `ProcessingError` - a pass was run out of order (e.g. backward before forward)
pub mod error;

/// Components for building convolutional networks whose padding and stride are derived
/// from a desired spatial reduction factor.
///
/// # Core Components
///
/// ## Building blocks
/// - **Water**: convolution with optional batch normalization and optional pooling, configured
///   from an image size or chained onto a previous `Water`
/// - **WaterNetwork**: an owned chain of `Water` layers that propagates shapes automatically
///
/// ## Operators
/// - **Conv2D**: 2D convolution with explicit zero padding and stride
/// - **MaxPooling2D** / **AveragePooling2D**: 2D pooling
/// - **BatchNormalization2D**: per-channel batch normalization for 4D feature maps
///
/// # Examples
/// ```rust
/// use waternet::neural_network::*;
/// use ndarray::Array4;
///
/// let first = Water::from_image_size((32, 32, 3), WaterConfig::new(8).max_pool(true)).unwrap();
/// let second = Water::from_previous(&first, WaterConfig::new(16).avg_pool(true)).unwrap();
///
/// assert_eq!(first.output_image_size(), (16, 16));
/// assert_eq!(second.output_image_size(), (8, 8));
/// assert_eq!(second.get_linear_size(), 16 * 8 * 8);
///
/// let mut first = first;
/// let x = Array4::ones((2, 3, 32, 32)).into_dyn();
/// let y = first.forward(&x).unwrap();
/// assert_eq!(y.shape(), &[2, 8, 16, 16]);
/// ```
pub mod neural_network;

/// A convenience module that re-exports the most commonly used types and traits from this crate.
///
/// # Examples
/// ```rust
/// use waternet::prelude::*;
///
/// let layer = Water::from_image_size((28, 28, 1), WaterConfig::new(4)).unwrap();
/// assert_eq!(layer.get_linear_size(), 4 * 28 * 28);
/// ```
pub mod prelude;
