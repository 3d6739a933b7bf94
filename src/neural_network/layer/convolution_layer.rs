use crate::error::ModelError;
use crate::neural_network::Tensor;
use crate::neural_network::layer::TrainingParameters;
use crate::neural_network::layer::helper_function::*;
use crate::neural_network::neural_network_trait::Layer;
use input_validation_function::*;
use ndarray::{Array2, Array3, Array4, Axis, s};
use ndarray_rand::RandomExt;
use ndarray_rand::rand_distr::Uniform;
use rayon::prelude::*;

/// 2D convolution layer with explicit zero padding
pub mod conv_2d;
/// Input validation functions for convolution layers
mod input_validation_function;

pub use conv_2d::*;
