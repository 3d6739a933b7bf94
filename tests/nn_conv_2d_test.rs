use approx::assert_relative_eq;
use ndarray::{Array2, Array4};
use waternet::prelude::*;

#[test]
fn conv2d_output_shape_with_explicit_padding() {
    // Batch size=2, 1 input channel, 5x5 pixels
    let x = Array4::ones((2, 1, 5, 5)).into_dyn();

    let mut valid = Conv2D::new(3, (3, 3), vec![2, 1, 5, 5], (1, 1), (0, 0)).unwrap();
    assert_eq!(valid.forward(&x).unwrap().shape(), &[2, 3, 3, 3]);
    assert_eq!(valid.output_shape(), "(2, 3, 3, 3)");

    let mut padded = Conv2D::new(3, (3, 3), vec![2, 1, 5, 5], (1, 1), (1, 1)).unwrap();
    assert_eq!(padded.forward(&x).unwrap().shape(), &[2, 3, 5, 5]);

    // (5 + 2 * 1 - 3) / 2 + 1 = 3
    let mut strided = Conv2D::new(2, (3, 3), vec![2, 1, 5, 5], (2, 2), (1, 1)).unwrap();
    assert_eq!(strided.forward(&x).unwrap().shape(), &[2, 2, 3, 3]);

    // (5 + 2 * 4 - 3) / 2 + 1 = 6
    let mut wide = Conv2D::new(1, (3, 3), vec![1, 1, 5, 5], (2, 2), (4, 4)).unwrap();
    let single = Array4::ones((1, 1, 5, 5)).into_dyn();
    assert_eq!(wide.forward(&single).unwrap().shape(), &[1, 1, 6, 6]);
}

#[test]
fn conv2d_known_values() {
    let mut conv = Conv2D::new(1, (2, 2), vec![1, 1, 3, 3], (1, 1), (0, 0)).unwrap();
    conv.set_weights(
        Array4::from_shape_vec((1, 1, 2, 2), vec![1.0, 0.0, 0.0, -1.0]).unwrap(),
        Array2::from_elem((1, 1), 0.5),
    )
    .unwrap();

    let x = Array4::from_shape_vec((1, 1, 3, 3), (1..=9).map(|v| v as f32).collect())
        .unwrap()
        .into_dyn();
    let y = conv.forward(&x).unwrap();

    // x[i][j] - x[i+1][j+1] + 0.5 = -4 + 0.5 everywhere
    assert_eq!(y.shape(), &[1, 1, 2, 2]);
    for value in y.iter() {
        assert_relative_eq!(*value, -3.5);
    }
}

#[test]
fn conv2d_multi_channel_sums_over_channels() {
    let mut conv = Conv2D::new(2, (1, 1), vec![1, 3, 2, 2], (1, 1), (0, 0)).unwrap();
    let weights = Array4::from_shape_vec((2, 3, 1, 1), vec![1.0, 1.0, 1.0, 1.0, 2.0, 3.0]).unwrap();
    conv.set_weights(weights, Array2::zeros((1, 2))).unwrap();

    let x = Array4::from_shape_fn((1, 3, 2, 2), |(_, c, _, _)| (c + 1) as f32).into_dyn();
    let y = conv.forward(&x).unwrap();

    assert_relative_eq!(y[[0, 0, 1, 1]], 1.0 + 2.0 + 3.0);
    assert_relative_eq!(y[[0, 1, 0, 0]], 1.0 + 4.0 + 9.0);
}

#[test]
fn conv2d_backward_known_gradients() {
    let mut conv = Conv2D::new(1, (3, 3), vec![1, 1, 3, 3], (1, 1), (0, 0)).unwrap();
    conv.set_weights(Array4::ones((1, 1, 3, 3)), Array2::zeros((1, 1)))
        .unwrap();

    let x = Array4::from_shape_fn((1, 1, 3, 3), |(_, _, i, j)| (i * 3 + j) as f32).into_dyn();
    let y = conv.forward(&x).unwrap();
    assert_eq!(y.shape(), &[1, 1, 1, 1]);
    assert_relative_eq!(y[[0, 0, 0, 0]], 36.0);

    let grad = conv.backward(&Array4::ones((1, 1, 1, 1)).into_dyn()).unwrap();

    // dL/dx equals the kernel, dL/dw equals the input
    assert_eq!(grad.shape(), &[1, 1, 3, 3]);
    for value in grad.iter() {
        assert_relative_eq!(*value, 1.0);
    }
    let weight_grads = conv.get_weight_gradients().unwrap();
    assert_relative_eq!(weight_grads[[0, 0, 2, 1]], 7.0);
    assert_relative_eq!(conv.get_bias_gradients().unwrap()[[0, 0]], 1.0);
}

#[test]
fn conv2d_backward_strips_padding() {
    let mut conv = Conv2D::new(1, (3, 3), vec![1, 1, 3, 3], (1, 1), (1, 1)).unwrap();
    conv.set_weights(Array4::ones((1, 1, 3, 3)), Array2::zeros((1, 1)))
        .unwrap();

    let x = Array4::ones((1, 1, 3, 3)).into_dyn();
    let y = conv.forward(&x).unwrap();
    let grad = conv.backward(&y.mapv(|_| 1.0)).unwrap();

    // Each input cell receives one contribution per output window covering it
    assert_eq!(grad.shape(), &[1, 1, 3, 3]);
    assert_relative_eq!(grad[[0, 0, 0, 0]], 4.0);
    assert_relative_eq!(grad[[0, 0, 0, 1]], 6.0);
    assert_relative_eq!(grad[[0, 0, 1, 1]], 9.0);
}

#[test]
fn conv2d_validation_errors() {
    assert!(matches!(
        Conv2D::new(0, (3, 3), vec![1, 1, 5, 5], (1, 1), (0, 0)),
        Err(ModelError::InputValidationError(_))
    ));
    assert!(matches!(
        Conv2D::new(1, (0, 3), vec![1, 1, 5, 5], (1, 1), (0, 0)),
        Err(ModelError::InputValidationError(_))
    ));
    assert!(matches!(
        Conv2D::new(1, (3, 3), vec![1, 1, 5, 5], (0, 1), (0, 0)),
        Err(ModelError::InputValidationError(_))
    ));
    assert!(matches!(
        Conv2D::new(1, (3, 3), vec![1, 5, 5], (1, 1), (0, 0)),
        Err(ModelError::InputValidationError(_))
    ));
    assert!(matches!(
        Conv2D::new(1, (7, 7), vec![1, 1, 5, 5], (1, 1), (0, 0)),
        Err(ModelError::InputValidationError(_))
    ));
    // Padding makes the same kernel fit
    assert!(Conv2D::new(1, (7, 7), vec![1, 1, 5, 5], (1, 1), (1, 1)).is_ok());

    let mut conv = Conv2D::new(2, (3, 3), vec![1, 2, 5, 5], (1, 1), (0, 0)).unwrap();
    assert!(matches!(
        conv.set_weights(Array4::ones((2, 1, 3, 3)), Array2::zeros((1, 2))),
        Err(ModelError::InputValidationError(_))
    ));
    assert!(matches!(
        conv.forward(&Array4::ones((1, 3, 5, 5)).into_dyn()),
        Err(ModelError::InputValidationError(_))
    ));
    assert!(matches!(
        conv.backward(&Array4::ones((1, 2, 3, 3)).into_dyn()),
        Err(ModelError::ProcessingError(_))
    ));

    conv.forward(&Array4::ones((1, 2, 5, 5)).into_dyn()).unwrap();
    assert!(matches!(
        conv.backward(&Array4::ones((1, 2, 4, 4)).into_dyn()),
        Err(ModelError::InputValidationError(_))
    ));
}

#[test]
fn conv2d_parallel_path_matches_shape() {
    // batch * filters * out_area crosses the parallel threshold
    let mut conv = Conv2D::new(8, (3, 3), vec![8, 2, 16, 16], (1, 1), (1, 1)).unwrap();
    let x = Array4::from_elem((8, 2, 16, 16), 0.5).into_dyn();

    let y = conv.forward(&x).unwrap();
    assert_eq!(y.shape(), &[8, 8, 16, 16]);

    // Every batch element sees the same input, so outputs agree across the batch
    for b in 1..8 {
        assert_relative_eq!(y[[b, 3, 7, 7]], y[[0, 3, 7, 7]]);
    }

    assert_eq!(
        conv.param_count(),
        TrainingParameters::Trainable(8 * 2 * 3 * 3 + 8)
    );
    assert_eq!(conv.layer_type(), "Conv2D");
}
