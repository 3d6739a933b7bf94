use crate::error::ModelError;
use crate::neural_network::Tensor;
use ndarray::{Array3, ArrayD};

/// Integer division rounding toward negative infinity.
///
/// Rust's `/` truncates toward zero, which differs from floor division whenever the
/// operands have opposite signs and the division is inexact (e.g. `-1 / 2 == 0` but
/// `floor_div(-1, 2) == -1`).
///
/// # Parameters
///
/// - `numerator` - Dividend
/// - `denominator` - Divisor, must not be zero
///
/// # Returns
///
/// * `i64` - `floor(numerator / denominator)`
pub fn floor_div(numerator: i64, denominator: i64) -> i64 {
    let quotient = numerator / denominator;
    if numerator % denominator != 0 && ((numerator < 0) != (denominator < 0)) {
        quotient - 1
    } else {
        quotient
    }
}

/// Derives convolution padding and stride from a desired spatial reduction factor.
///
/// For each spatial dimension with size `S` and kernel `K`:
///
/// ```text
/// padding = floor(((R - 1) * S - R + K) / 2)
/// stride  = R
/// ```
///
/// With `R = 1` this is "same" padding for odd kernels. For larger `R` the padding grows
/// with `(R - 1) * S`, so the convolution output stays at `S` or `S - 1` depending on the
/// parity of `(R - 1) * S - R + K`.
///
/// # Parameters
///
/// - `image_size` - Input spatial size as (height, width)
/// - `kernel_size` - Convolution kernel as (height, width)
/// - `reduction` - Desired downsampling factor `R`
///
/// # Returns
///
/// * `Ok(((i64, i64), (usize, usize)))` - Signed padding as (height, width) and stride as
///   (height, width). Padding is left signed so callers can reject negative values explicitly.
/// * `Err(ModelError::InputValidationError)` - If an operand does not fit in `i64` or the
///   arithmetic overflows
pub fn calculate_padding_and_stride(
    image_size: (usize, usize),
    kernel_size: (usize, usize),
    reduction: usize,
) -> Result<((i64, i64), (usize, usize)), ModelError> {
    let r = to_i64(reduction, "reduction")?;
    let padding_for = |size: usize, kernel: usize| -> Result<i64, ModelError> {
        let size = to_i64(size, "image size")?;
        let kernel = to_i64(kernel, "kernel size")?;
        let numerator = (r - 1)
            .checked_mul(size)
            .and_then(|v| v.checked_sub(r))
            .and_then(|v| v.checked_add(kernel))
            .ok_or_else(|| overflow_error("padding", reduction))?;
        Ok(floor_div(numerator, 2))
    };

    let padding = (
        padding_for(image_size.0, kernel_size.0)?,
        padding_for(image_size.1, kernel_size.1)?,
    );
    Ok((padding, (reduction, reduction)))
}

/// Calculates the spatial output size of a convolution.
///
/// ```text
/// output = floor((S + 2 * padding - K) / stride) + 1
/// ```
///
/// # Parameters
///
/// - `image_size` - Input spatial size as (height, width)
/// - `kernel_size` - Convolution kernel as (height, width)
/// - `strides` - Convolution stride as (height, width), both non-zero
/// - `padding` - Signed padding as (height, width)
///
/// # Returns
///
/// * `Ok((i64, i64))` - Output (height, width); may be zero or negative for degenerate inputs
/// * `Err(ModelError::InputValidationError)` - If an operand does not fit in `i64` or the
///   arithmetic overflows
pub fn calculate_output_image_size(
    image_size: (usize, usize),
    kernel_size: (usize, usize),
    strides: (usize, usize),
    padding: (i64, i64),
) -> Result<(i64, i64), ModelError> {
    let output_for = |size: usize,
                      kernel: usize,
                      stride: usize,
                      pad: i64|
     -> Result<i64, ModelError> {
        let size = to_i64(size, "image size")?;
        let kernel = to_i64(kernel, "kernel size")?;
        let signed_stride = to_i64(stride, "stride")?;
        let numerator = pad
            .checked_mul(2)
            .and_then(|v| v.checked_add(size))
            .and_then(|v| v.checked_sub(kernel))
            .ok_or_else(|| overflow_error("output size", stride))?;
        floor_div(numerator, signed_stride)
            .checked_add(1)
            .ok_or_else(|| overflow_error("output size", stride))
    };

    Ok((
        output_for(image_size.0, kernel_size.0, strides.0, padding.0)?,
        output_for(image_size.1, kernel_size.1, strides.1, padding.1)?,
    ))
}

fn to_i64(value: usize, name: &str) -> Result<i64, ModelError> {
    i64::try_from(value).map_err(|_| {
        ModelError::InputValidationError(format!("{} {} is too large", name, value))
    })
}

fn overflow_error(stage: &str, factor: usize) -> ModelError {
    ModelError::InputValidationError(format!(
        "{} computation overflows with factor {}",
        stage, factor
    ))
}

/// Calculates the output shape of a 2D convolution over a 4D input.
///
/// # Parameters
///
/// - `input_shape` - Shape of the input tensor \[batch_size, channels, height, width\]
/// - `filters` - Number of output channels
/// - `kernel_size` - Kernel as (height, width)
/// - `strides` - Stride as (height, width)
/// - `padding` - Zero padding as (height, width), applied on both sides
///
/// # Returns
///
/// * `Option<Vec<usize>>` - \[batch_size, filters, output_height, output_width\], or `None`
///   when the padded input is smaller than the kernel
pub fn calculate_output_shape_2d_convolution(
    input_shape: &[usize],
    filters: usize,
    kernel_size: (usize, usize),
    strides: (usize, usize),
    padding: (usize, usize),
) -> Option<Vec<usize>> {
    let padded_height = input_shape[2] + 2 * padding.0;
    let padded_width = input_shape[3] + 2 * padding.1;

    let out_height = padded_height.checked_sub(kernel_size.0)? / strides.0 + 1;
    let out_width = padded_width.checked_sub(kernel_size.1)? / strides.1 + 1;

    Some(vec![input_shape[0], filters, out_height, out_width])
}

/// Calculates the output shape of the 2d pooling layer.
///
/// # Parameters
///
/// * `input_shape` - Shape of the input tensor, in format \[batch_size, channels, height, width\].
/// * `pool_size` - Size of the pooling window as a tuple (height, width).
/// * `strides` - Step size for the pooling window as a tuple (height_step, width_step).
///
/// # Returns
///
/// * `Vec<usize>` - A vector containing the calculated output shape, in format \[batch_size, channels, output_height, output_width\].
///   Spatial dimensions smaller than the window produce zero-sized outputs.
pub fn calculate_output_shape_2d_pooling(
    input_shape: &[usize],
    pool_size: (usize, usize),
    strides: (usize, usize),
) -> Vec<usize> {
    let batch_size = input_shape[0];
    let channels = input_shape[1];
    let input_height = input_shape[2];
    let input_width = input_shape[3];

    let output_height = input_height
        .checked_sub(pool_size.0)
        .map_or(0, |h| h / strides.0 + 1);
    let output_width = input_width
        .checked_sub(pool_size.1)
        .map_or(0, |w| w / strides.1 + 1);

    vec![batch_size, channels, output_height, output_width]
}

/// Merges parallel computation results from multiple batches into a single output tensor.
///
/// # Parameters
///
/// - `output_shape` - The desired shape of the final output tensor, `[batch_size, channels, height, width]`
/// - `results` - Tuples of batch index and that batch's `[channels, height, width]` result
///
/// # Returns
///
/// * `ArrayD<f32>` - A 4D dynamic array containing the merged results
pub fn merge_results(output_shape: Vec<usize>, results: Vec<(usize, Array3<f32>)>) -> ArrayD<f32> {
    let mut output: ArrayD<f32> = ArrayD::zeros(output_shape);

    for (b, batch_output) in results {
        output
            .index_axis_mut(ndarray::Axis(0), b)
            .assign(&batch_output.into_dyn());
    }

    output
}

/// Computes the accumulated weight gradient contribution of one output row.
///
/// # Parameters
///
/// - `gradient` - Upstream gradient \[batch, filters, out_h, out_w\]
/// - `input` - Padded input \[batch, channels, h, w\]
/// - `b`, `f`, `c` - Batch, filter and channel indices
/// - `i` - Output row index
/// - `i_pos` - Corresponding row in the padded input
/// - `w` - Kernel column index
/// - `stride_1` - Stride in the width direction
///
/// # Returns
///
/// * `f32` - Sum over the row of `gradient * input`
pub fn compute_row_gradient_sum(
    gradient: &Tensor,
    input: &Tensor,
    b: usize,
    f: usize,
    c: usize,
    i: usize,
    i_pos: usize,
    w: usize,
    stride_1: usize,
) -> f32 {
    let grad_width = gradient.shape()[3];
    let input_width = input.shape()[3];
    let mut sum = 0.0;

    for j in 0..grad_width {
        let j_pos = j * stride_1 + w;
        if j_pos < input_width {
            sum += gradient[[b, f, i, j]] * input[[b, c, i_pos, j_pos]];
        }
    }

    sum
}
