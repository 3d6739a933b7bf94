use approx::assert_relative_eq;
use ndarray::{Array2, Array4};
use waternet::prelude::*;

#[test]
fn water_reduction_one_preserves_spatial_size() {
    // Odd kernels with stride 1 degenerate to same padding
    for &(height, width, channels) in &[(7, 9, 2), (16, 16, 3), (5, 11, 1)] {
        for &kernel in &[(1, 1), (3, 3), (3, 5), (5, 5)] {
            let mut layer = Water::from_image_size(
                (height, width, channels),
                WaterConfig::new(4).kernel(kernel).reduction(1),
            )
            .unwrap();

            assert_eq!(layer.strides(), (1, 1));
            assert_eq!(layer.padding(), ((kernel.0 - 1) / 2, (kernel.1 - 1) / 2));
            assert_eq!(layer.output_image_size(), (height, width));

            let x = Array4::ones((1, channels, height, width)).into_dyn();
            let y = layer.forward(&x).unwrap();
            assert_eq!(y.shape(), &[1, 4, height, width]);
        }
    }
}

#[test]
fn water_linear_size_for_rectangular_image() {
    let layer = Water::from_image_size(
        (224, 256, 3),
        WaterConfig::new(16).kernel((3, 3)).reduction(1),
    )
    .unwrap();

    assert_eq!(layer.get_linear_size(), 917504);
    assert_eq!(layer.get_linear_size(), 16 * 224 * 256);
}

#[test]
fn water_linear_size_is_idempotent() {
    let layer = Water::from_image_size((20, 12, 3), WaterConfig::new(6).max_pool(true)).unwrap();

    let first = layer.get_linear_size();
    let second = layer.get_linear_size();
    let third = layer.get_linear_size();

    assert_eq!(first, second);
    assert_eq!(second, third);
    assert_eq!(first, 6 * 10 * 6);
    assert_eq!(layer.output_image_size(), (10, 6));
}

#[test]
fn water_rejects_max_and_avg_pool_together() {
    let configs = [
        WaterConfig::new(8).max_pool(true).avg_pool(true),
        WaterConfig::new(8)
            .max_pool(true)
            .avg_pool(true)
            .normalization(true)
            .reduction(3)
            .amplify(4),
        // Checked before any other validation
        WaterConfig::new(0).max_pool(true).avg_pool(true).reduction(0),
    ];

    for config in configs {
        let result = Water::from_image_size((32, 32, 3), config);
        assert!(matches!(
            result,
            Err(ModelError::IncompatibleConfiguration(_))
        ));
    }

    let previous = Water::from_image_size((32, 32, 3), WaterConfig::new(4)).unwrap();
    let result = Water::from_previous(
        &previous,
        WaterConfig::new(4).max_pool(true).avg_pool(true),
    );
    assert!(matches!(
        result,
        Err(ModelError::IncompatibleConfiguration(_))
    ));
}

#[test]
fn water_chained_layer_inherits_previous_output() {
    let first =
        Water::from_image_size((32, 24, 3), WaterConfig::new(8).max_pool(true)).unwrap();
    let second = Water::from_previous(&first, WaterConfig::new(12).kernel(5)).unwrap();

    assert!(!first.is_chained());
    assert!(second.is_chained());
    assert_eq!(second.in_channels(), first.out_channels());
    assert_eq!(second.input_image_size(), first.output_image_size());
    assert_eq!(second.input_image_size(), (16, 12));
    assert_eq!(second.output_image_size(), (16, 12));

    // Explicit shape source behaves the same way
    let third = Water::new(ShapeSource::Previous(&second), WaterConfig::new(2)).unwrap();
    assert_eq!(third.in_channels(), 12);
    assert_eq!(third.input_image_size(), second.output_image_size());
}

#[test]
fn water_max_pool_floor_divides_convolution_output() {
    let plain = Water::from_image_size((15, 13, 1), WaterConfig::new(2)).unwrap();
    let pooled =
        Water::from_image_size((15, 13, 1), WaterConfig::new(2).max_pool(true)).unwrap();

    assert_eq!(plain.output_image_size(), (15, 13));
    assert_eq!(pooled.output_image_size(), (7, 6));
    assert_eq!(pooled.padding(), plain.padding());
    assert_eq!(pooled.strides(), plain.strides());

    let amplified = Water::from_image_size(
        (15, 13, 1),
        WaterConfig::new(2).avg_pool(true).amplify(3),
    )
    .unwrap();
    assert_eq!(amplified.output_image_size(), (5, 4));
    assert_eq!(amplified.pooling(), PoolingMode::Avg(3));
}

#[test]
fn water_reduction_two_follows_padding_formula() {
    let mut layer = Water::from_image_size(
        (32, 31, 1),
        WaterConfig::new(3).kernel(3).reduction(2),
    )
    .unwrap();

    // padding = floor(((2 - 1) * S - 2 + 3) / 2)
    assert_eq!(layer.padding(), (16, 16));
    assert_eq!(layer.strides(), (2, 2));
    // floor((32 + 32 - 3) / 2) + 1 and floor((31 + 32 - 3) / 2) + 1
    assert_eq!(layer.output_image_size(), (31, 31));

    let x = Array4::ones((1, 1, 32, 31)).into_dyn();
    let y = layer.forward(&x).unwrap();
    assert_eq!(y.shape(), &[1, 3, 31, 31]);

    let larger = Water::from_image_size((10, 9, 1), WaterConfig::new(1).reduction(3)).unwrap();
    // padding = floor((2 * S - 3 + 3) / 2) = S
    assert_eq!(larger.padding(), (10, 9));
    assert_eq!(larger.output_image_size(), (10, 9));
}

#[test]
fn water_forward_matches_cached_output_size() {
    let configs = [
        WaterConfig::new(4),
        WaterConfig::new(4).max_pool(true),
        WaterConfig::new(4).avg_pool(true),
        WaterConfig::new(4).normalization(true),
        WaterConfig::new(4).normalization(true).max_pool(true).amplify(3),
        WaterConfig::new(4).normalization(true).avg_pool(true),
        WaterConfig::new(4).kernel((3, 5)).reduction(2).max_pool(true),
        WaterConfig::new(4).kernel(2),
    ];

    for config in configs {
        let mut layer = Water::from_image_size((13, 10, 2), config).unwrap();
        let x = Array4::from_shape_fn((3, 2, 13, 10), |(b, c, i, j)| {
            (b + c) as f32 * 0.5 + (i as f32 - j as f32) * 0.1
        })
        .into_dyn();

        let y = layer.forward(&x).unwrap();
        let (height, width) = layer.output_image_size();

        assert_eq!(y.shape(), &[3, 4, height, width], "config {:?}", config);
        assert_eq!(y.len() / 3, layer.get_linear_size());
    }
}

#[test]
fn water_kernel_int_broadcasts_to_both_dimensions() {
    let layer = Water::from_image_size((9, 9, 1), WaterConfig::new(1).kernel(5)).unwrap();

    assert_eq!(layer.kernel_size(), (5, 5));
    assert_eq!(layer.padding(), (2, 2));
    assert_eq!(layer.conv().get_kernel_size(), (5, 5));
    assert_eq!(KernelSize::from(7), KernelSize(7, 7));
}

#[test]
fn water_rejects_zero_sizes_and_factors() {
    let invalid = [
        ((8, 8, 3), WaterConfig::new(4).reduction(0)),
        ((8, 8, 3), WaterConfig::new(4).kernel(0)),
        ((8, 8, 3), WaterConfig::new(4).kernel((3, 0))),
        ((8, 8, 3), WaterConfig::new(0)),
        ((8, 8, 3), WaterConfig::new(4).max_pool(true).amplify(0)),
        ((0, 8, 3), WaterConfig::new(4)),
        ((8, 8, 0), WaterConfig::new(4)),
        // Padding arithmetic would overflow i64
        ((8, 8, 1), WaterConfig::new(1).reduction(1usize << 61)),
        ((8, 8, 1), WaterConfig::new(1).reduction(usize::MAX)),
        ((usize::MAX, 8, 1), WaterConfig::new(1)),
    ];

    for (image_size, config) in invalid {
        let result = Water::from_image_size(image_size, config);
        assert!(
            matches!(result, Err(ModelError::InputValidationError(_))),
            "image {:?} config {:?}",
            image_size,
            config
        );
    }
}

#[test]
fn water_rejects_non_positive_output_size() {
    // Even kernel shrinks 1x1 to 0x0
    let result = Water::from_image_size((1, 1, 1), WaterConfig::new(1).kernel(2));
    assert!(matches!(result, Err(ModelError::InputValidationError(_))));

    // Pooling window larger than the convolution output
    let result = Water::from_image_size((3, 3, 1), WaterConfig::new(1).max_pool(true).amplify(4));
    assert!(matches!(result, Err(ModelError::InputValidationError(_))));
}

#[test]
fn water_known_values_with_same_padding() {
    let mut layer = Water::from_image_size((3, 3, 1), WaterConfig::new(1)).unwrap();
    layer
        .conv_mut()
        .set_weights(Array4::ones((1, 1, 3, 3)), Array2::zeros((1, 1)))
        .unwrap();

    let x = Array4::ones((1, 1, 3, 3)).into_dyn();
    let y = layer.forward(&x).unwrap();

    // Number of input cells under the kernel at each position
    assert_relative_eq!(y[[0, 0, 0, 0]], 4.0);
    assert_relative_eq!(y[[0, 0, 0, 1]], 6.0);
    assert_relative_eq!(y[[0, 0, 1, 1]], 9.0);
    assert_relative_eq!(y[[0, 0, 2, 2]], 4.0);
}

#[test]
fn water_forward_rejects_wrong_channels() {
    let mut layer = Water::from_image_size((8, 8, 3), WaterConfig::new(4)).unwrap();

    let x = Array4::ones((1, 2, 8, 8)).into_dyn();
    assert!(matches!(
        layer.forward(&x),
        Err(ModelError::InputValidationError(_))
    ));

    let x = ndarray::Array3::<f32>::ones((3, 8, 8)).into_dyn();
    assert!(matches!(
        layer.forward(&x),
        Err(ModelError::InputValidationError(_))
    ));
}

#[test]
fn water_forward_rejects_wrong_spatial_size() {
    let mut layer = Water::from_image_size((8, 8, 1), WaterConfig::new(2)).unwrap();
    assert_eq!(layer.get_linear_size(), 128);

    let x = Array4::ones((1, 1, 16, 16)).into_dyn();
    assert!(matches!(
        layer.forward(&x),
        Err(ModelError::InputValidationError(_))
    ));

    let x = Array4::ones((1, 1, 8, 7)).into_dyn();
    assert!(matches!(
        layer.forward(&x),
        Err(ModelError::InputValidationError(_))
    ));

    // Batch size is free
    let x = Array4::ones((3, 1, 8, 8)).into_dyn();
    let y = layer.forward(&x).unwrap();
    assert_eq!(y.len() / 3, layer.get_linear_size());
}

#[test]
fn water_backward_before_forward_fails() {
    let mut layer =
        Water::from_image_size((8, 8, 3), WaterConfig::new(4).max_pool(true)).unwrap();
    let grad = Array4::ones((1, 4, 4, 4)).into_dyn();

    assert!(matches!(
        layer.backward(&grad),
        Err(ModelError::ProcessingError(_))
    ));
}

#[test]
fn water_backward_returns_input_shaped_gradient() {
    let configs = [
        WaterConfig::new(3),
        WaterConfig::new(3).max_pool(true),
        WaterConfig::new(3).avg_pool(true).normalization(true),
        WaterConfig::new(3).reduction(2).normalization(true).max_pool(true),
    ];

    for config in configs {
        let mut layer = Water::from_image_size((8, 6, 2), config).unwrap();
        let x = Array4::from_shape_fn((2, 2, 8, 6), |(b, c, i, j)| {
            ((b * 13 + c * 7 + i * 3 + j) % 5) as f32
        })
        .into_dyn();

        let y = layer.forward(&x).unwrap();
        let grad = layer.backward(&y.mapv(|_| 1.0)).unwrap();

        assert_eq!(grad.shape(), x.shape());
        assert!(layer.conv().get_weight_gradients().is_some());
        if let Some(norm) = layer.norm() {
            assert!(norm.get_grad_gamma().is_some());
        }
    }
}

#[test]
fn water_descriptive_queries() {
    let plain = Water::from_image_size((224, 256, 3), WaterConfig::new(16)).unwrap();
    let normalized =
        Water::from_image_size((224, 256, 3), WaterConfig::new(16).normalization(true)).unwrap();

    assert_eq!(plain.layer_type(), "Water");
    assert_eq!(plain.output_shape(), "(None, 16, 224, 256)");
    // 16 * 3 * 3 * 3 weights + 16 biases
    assert_eq!(plain.param_count(), TrainingParameters::Trainable(448));
    // plus gamma and beta per channel
    assert_eq!(normalized.param_count(), TrainingParameters::Trainable(480));

    assert!(!plain.uses_normalization());
    assert!(normalized.uses_normalization());
    assert!(!plain.uses_max_pool() && !plain.uses_avg_pool());
    assert_eq!(plain.pooling(), PoolingMode::None);
}

#[test]
fn water_set_training_switches_normalization_mode() {
    let mut layer =
        Water::from_image_size((6, 6, 1), WaterConfig::new(2).normalization(true)).unwrap();
    assert!(layer.norm().unwrap().is_training());

    layer.set_training(false);
    assert!(!layer.norm().unwrap().is_training());

    layer.set_training_if_mode_dependent(true);
    assert!(layer.norm().unwrap().is_training());

    // No-op without normalization
    let mut plain = Water::from_image_size((6, 6, 1), WaterConfig::new(2)).unwrap();
    plain.set_training(false);
    assert!(plain.norm().is_none());
}

#[test]
fn water_config_defaults() {
    let config = WaterConfig::default();

    assert_eq!(config.out_channels, 1);
    assert_eq!(config.kernel, KernelSize(3, 3));
    assert_eq!(config.reduction, 1);
    assert_eq!(config.amplify, 2);
    assert!(!config.use_maxpool);
    assert!(!config.use_avgpool);
    assert!(!config.use_normalization);
    assert_eq!(config.pooling_mode().unwrap(), PoolingMode::None);
    assert_eq!(
        WaterConfig::new(3).max_pool(true).amplify(4).pooling_mode().unwrap(),
        PoolingMode::Max(4)
    );
}
