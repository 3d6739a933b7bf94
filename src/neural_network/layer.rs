/// Generates the `param_count` implementation for layers without trainable parameters.
macro_rules! no_trainable_parameters_layer_functions {
    () => {
        fn param_count(&self) -> TrainingParameters {
            TrainingParameters::NoTrainable
        }
    };
}

/// Runs `compute(b, c)` for every (batch, channel) pair, in parallel once
/// `batch_size * channels` reaches `threshold`.
macro_rules! execute_parallel_or_sequential {
    ($batch_size:expr, $channels:expr, $threshold:expr, $compute:expr) => {{
        use rayon::iter::{IntoParallelIterator, ParallelIterator};

        let batch_size = $batch_size;
        let channels = $channels;
        if batch_size * channels >= $threshold {
            (0..batch_size)
                .into_par_iter()
                .flat_map(|b| {
                    (0..channels)
                        .into_par_iter()
                        .map(move |c| (b, c))
                })
                .map(|(b, c)| $compute(b, c))
                .collect()
        } else {
            (0..batch_size)
                .flat_map(|b| (0..channels).map(move |c| (b, c)))
                .map(|(b, c)| $compute(b, c))
                .collect()
        }
    }};
}

/// Module that contains convolution layers
pub mod convolution_layer;
/// Helper functions for shape arithmetic and result merging shared across layers
pub mod helper_function;
/// Module that contains pooling layers
pub mod pooling_layer;
/// Module that contains normalization layers
pub mod regularization_layer;

pub use convolution_layer::*;
pub use pooling_layer::*;
pub use regularization_layer::*;

/// Number of parameters a layer exposes to training.
///
/// # Variants
///
/// - `Trainable(usize)` - The layer owns this many trainable parameters
/// - `NoTrainable` - The layer has no trainable parameters (e.g. pooling)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingParameters {
    Trainable(usize),
    NoTrainable,
}

impl TrainingParameters {
    /// Returns the parameter count, treating `NoTrainable` as zero.
    pub fn count(&self) -> usize {
        match self {
            TrainingParameters::Trainable(n) => *n,
            TrainingParameters::NoTrainable => 0,
        }
    }
}
