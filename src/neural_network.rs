/// Module that contains neural network layer implementations
pub mod layer;
/// Module that contains the `Layer` trait shared by every layer
pub mod neural_network_trait;
/// Module that contains the `Water` convolution block
pub mod water;
/// Module that contains an owned chain of `Water` blocks
pub mod water_network;

pub use layer::*;
pub use neural_network_trait::Layer;
pub use water::*;
pub use water_network::*;

use ndarray::ArrayD;

/// Type alias for n-dimensional arrays used as tensors in the neural network
pub type Tensor = ArrayD<f32>;
