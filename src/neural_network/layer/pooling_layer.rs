use crate::error::ModelError;
use crate::neural_network::Tensor;
use crate::neural_network::layer::TrainingParameters;
use crate::neural_network::layer::helper_function::calculate_output_shape_2d_pooling;
use crate::neural_network::neural_network_trait::Layer;
use input_validation_function::*;
use ndarray::ArrayD;

/// A macro that generates standard function implementations for 2D pooling layers.
///
/// This macro expands to implementations of:
/// - `output_shape`: Calculates and returns the output shape after 2D pooling operations
/// - `param_count`: Pooling layers have no trainable parameters
///
/// # Requirements
///
/// The implementing struct must have the following fields:
/// - `input_shape: Vec<usize>` - The shape of the input tensor
/// - `pool_size: (usize, usize)` - Size of the pooling window as (height, width)
/// - `strides: (usize, usize)` - Step size for the pooling operation as (height_step, width_step)
macro_rules! layer_functions_2d_pooling {
    () => {
        fn output_shape(&self) -> String {
            if !self.input_shape.is_empty() {
                let output_shape = calculate_output_shape_2d_pooling(
                    &self.input_shape,
                    self.pool_size,
                    self.strides,
                );
                format!(
                    "({}, {}, {}, {})",
                    output_shape[0], output_shape[1], output_shape[2], output_shape[3]
                )
            } else {
                String::from("Unknown")
            }
        }

        no_trainable_parameters_layer_functions!();
    };
}

/// Writes per-(batch, channel) flattened spatial gradients back into a 4D gradient tensor.
macro_rules! merge_gradients_2d {
    ($input_gradients:expr, $results:expr, $height:expr, $width:expr) => {
        for ((b, c), spatial_grad) in $results {
            for i in 0..$height {
                for j in 0..$width {
                    $input_gradients[[b, c, i, j]] = spatial_grad[i * $width + j];
                }
            }
        }
    };
}

/// 2D average pooling layer
pub mod average_pooling_2d;
/// Input validation functions for pooling layers
mod input_validation_function;
/// 2D max pooling layer
pub mod max_pooling_2d;

pub use average_pooling_2d::*;
pub use max_pooling_2d::*;
