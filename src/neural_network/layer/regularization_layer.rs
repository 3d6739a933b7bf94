use crate::error::ModelError;
use crate::neural_network::Tensor;
use crate::neural_network::layer::TrainingParameters;
use crate::neural_network::neural_network_trait::Layer;
use ndarray::{Array1, Axis};
use rayon::prelude::*;

/// A macro that generates a `set_training` method for layers whose behavior depends on
/// whether they are in training or inference mode.
///
/// # Requirements
///
/// The implementing struct must have a `training: bool` field.
macro_rules! mode_dependent_layer_set_training {
    () => {
        /// Sets the training mode for the layer.
        ///
        /// # Arguments
        ///
        /// * `is_training` - `true` for training mode, `false` for inference mode.
        pub fn set_training(&mut self, is_training: bool) {
            self.training = is_training;
        }

        /// Returns whether the layer is in training mode
        pub fn is_training(&self) -> bool {
            self.training
        }
    };
}

/// A macro that forwards `Layer::set_training_if_mode_dependent` to `set_training`.
macro_rules! mode_dependent_layer_trait {
    () => {
        fn set_training_if_mode_dependent(&mut self, is_training: bool) {
            self.set_training(is_training);
        }
    };
}

/// Per-channel batch normalization for 4D feature maps
pub mod batch_normalization_2d;

pub use batch_normalization_2d::*;
