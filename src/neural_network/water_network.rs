use crate::error::ModelError;
use crate::neural_network::Tensor;
use crate::neural_network::layer::TrainingParameters;
use crate::neural_network::neural_network_trait::Layer;
use crate::neural_network::water::{Water, WaterConfig};
use std::fmt;

/// An owned chain of `Water` blocks.
///
/// The first block is built from an image size; every block pushed afterwards is built
/// with the current last block as its predecessor, so input channels and spatial sizes
/// never have to be spelled out by hand. The predecessor of block `i` is block `i - 1`.
///
/// # Fields
///
/// - `image_size` - The network input as (height, width, channels)
/// - `layers` - The blocks in forward order; never empty
///
/// # Example
/// ```rust
/// use waternet::prelude::*;
/// use ndarray::Array4;
///
/// let mut network = WaterNetwork::new((64, 64, 3), WaterConfig::new(8).max_pool(true)).unwrap();
/// network
///     .push(WaterConfig::new(16).normalization(true).max_pool(true))
///     .unwrap()
///     .push(WaterConfig::new(32).avg_pool(true))
///     .unwrap();
///
/// network.summary();
///
/// // 64 -> max pool -> 32 -> max pool -> 16 -> avg pool -> 8
/// assert_eq!(network.last().output_image_size(), (8, 8));
/// assert_eq!(network.get_linear_size(), 32 * 8 * 8);
///
/// let x = Array4::ones((2, 3, 64, 64)).into_dyn();
/// let y = network.forward(&x).unwrap();
/// assert_eq!(y.shape(), &[2, 32, 8, 8]);
/// ```
pub struct WaterNetwork {
    image_size: (usize, usize, usize),
    layers: Vec<Water>,
}

impl WaterNetwork {
    /// Creates a network whose first block reads images of `image_size` (height, width, channels).
    ///
    /// # Errors
    ///
    /// Propagates any error from `Water::from_image_size`.
    pub fn new(image_size: (usize, usize, usize), first: WaterConfig) -> Result<Self, ModelError> {
        let first = Water::from_image_size(image_size, first)?;
        Ok(WaterNetwork {
            image_size,
            layers: vec![first],
        })
    }

    /// Appends a block built from the current last block.
    ///
    /// Supports method chaining pattern. On error the network is left unchanged.
    ///
    /// # Errors
    ///
    /// Propagates any error from `Water::from_previous`.
    pub fn push(&mut self, config: WaterConfig) -> Result<&mut Self, ModelError> {
        let next = Water::from_previous(self.last(), config)?;
        self.layers.push(next);
        Ok(self)
    }

    /// The network input as (height, width, channels)
    pub fn image_size(&self) -> (usize, usize, usize) {
        self.image_size
    }

    pub fn layers(&self) -> &[Water] {
        &self.layers
    }

    pub fn layers_mut(&mut self) -> &mut [Water] {
        &mut self.layers
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Always `false`: a network holds at least its first block
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Returns the block that feeds block `index`, or `None` for the first block or an
    /// out-of-range index.
    pub fn previous(&self, index: usize) -> Option<&Water> {
        if index == 0 || index >= self.layers.len() {
            return None;
        }
        self.layers.get(index - 1)
    }

    pub fn last(&self) -> &Water {
        // `new` always stores the first block and nothing removes blocks
        &self.layers[self.layers.len() - 1]
    }

    /// Flattened output size of the last block.
    pub fn get_linear_size(&self) -> usize {
        self.last().get_linear_size()
    }

    /// Switches every normalization layer between training and inference mode.
    pub fn set_training(&mut self, is_training: bool) {
        for layer in &mut self.layers {
            layer.set_training(is_training);
        }
    }

    /// Prints a summary of the network's structure
    ///
    /// Displays each block's output shape and parameter count in a tabular format
    pub fn summary(&self) {
        print!("{}", self);
    }
}

impl fmt::Display for WaterNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let col1_width = 33;
        let col2_width = 24;
        let col3_width = 15;
        writeln!(f, "Model: \"water_network\"")?;
        writeln!(
            f,
            "┏{}┳{}┳{}┓",
            "━".repeat(col1_width),
            "━".repeat(col2_width),
            "━".repeat(col3_width)
        )?;
        writeln!(
            f,
            "┃ {:<31} ┃ {:<22} ┃ {:>13} ┃",
            "Layer (type)", "Output Shape", "Param #"
        )?;
        writeln!(
            f,
            "┡{}╇{}╇{}┩",
            "━".repeat(col1_width),
            "━".repeat(col2_width),
            "━".repeat(col3_width)
        )?;

        let mut total_params: usize = 0;
        for (i, layer) in self.layers.iter().enumerate() {
            let layer_name = if i == 0 {
                "Water".to_string()
            } else {
                format!("Water_{}", i)
            };
            let param_count = layer.param_count().count();
            total_params += param_count;

            writeln!(
                f,
                "│ {:<31} │ {:<22} │ {:>13} │",
                format!("{} ({})", layer_name, block_label(layer)),
                layer.output_shape(),
                param_count
            )?;
        }
        writeln!(
            f,
            "└{}┴{}┴{}┘",
            "─".repeat(col1_width),
            "─".repeat(col2_width),
            "─".repeat(col3_width)
        )?;
        // f32 parameters, 4 bytes each
        writeln!(f, " Total params: {} ({} B)", total_params, total_params * 4)?;
        writeln!(f, " Flattened output size: {}", self.get_linear_size())
    }
}

/// Short description of the operators inside a block, e.g. "Conv2D+BN+MaxPool".
fn block_label(layer: &Water) -> String {
    let mut label = String::from("Conv2D");
    if layer.uses_normalization() {
        label.push_str("+BN");
    }
    if layer.uses_max_pool() {
        label.push_str("+MaxPool");
    } else if layer.uses_avg_pool() {
        label.push_str("+AvgPool");
    }
    label
}

impl Layer for WaterNetwork {
    fn forward(&mut self, input: &Tensor) -> Result<Tensor, ModelError> {
        if input.is_empty() {
            return Err(ModelError::InputValidationError(
                "Input tensor cannot be empty".to_string(),
            ));
        }

        let mut output = input.clone();
        for layer in &mut self.layers {
            output = layer.forward(&output)?;
        }
        Ok(output)
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor, ModelError> {
        let mut grad = grad_output.clone();
        for layer in self.layers.iter_mut().rev() {
            grad = layer.backward(&grad)?;
        }
        Ok(grad)
    }

    fn layer_type(&self) -> &str {
        "WaterNetwork"
    }

    fn output_shape(&self) -> String {
        self.last().output_shape()
    }

    fn param_count(&self) -> TrainingParameters {
        TrainingParameters::Trainable(
            self.layers
                .iter()
                .map(|layer| layer.param_count().count())
                .sum(),
        )
    }

    fn set_training_if_mode_dependent(&mut self, is_training: bool) {
        self.set_training(is_training);
    }
}
