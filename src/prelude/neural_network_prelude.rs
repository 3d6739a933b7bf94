pub use crate::neural_network::Tensor;
pub use crate::neural_network::layer::TrainingParameters;
pub use crate::neural_network::layer::convolution_layer::*;
pub use crate::neural_network::layer::pooling_layer::*;
pub use crate::neural_network::layer::regularization_layer::*;
pub use crate::neural_network::neural_network_trait::Layer;
pub use crate::neural_network::water::*;
pub use crate::neural_network::water_network::*;
