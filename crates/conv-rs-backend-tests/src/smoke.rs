use std::sync::Arc;

use conv_rs::backend::spec::{GemmDims, MatMulBackend, MatrixRef};
use conv_rs::error::ConvError;
use conv_rs::layout::AxisOrder;
use conv_rs::nn::layers::{Conv2d, Conv2dConfig};
use conv_rs::ops::BorderMode;
use conv_rs::tensor::{Shape, Tensor};

use crate::common::{ramp, tensor_from_vec};
use crate::recording_backend::RecordingBackend;

fn layer<B: MatMulBackend + 'static>(backend: &Arc<B>, config: Conv2dConfig) -> Conv2d {
    Conv2d::new(config, Arc::clone(backend) as Arc<dyn MatMulBackend>).unwrap()
}

fn all_ones_3x3(backend: Arc<dyn MatMulBackend>, padding: BorderMode, stride: usize) -> Conv2d {
    let config = Conv2dConfig::new(1, [3, 3])
        .with_bias(false)
        .with_padding(padding)
        .with_strides([stride, stride]);
    let mut conv = Conv2d::new(config, backend).unwrap();
    conv.set_weights(vec![Tensor::ones(Shape::new([3, 3, 1, 1]))])
        .unwrap();
    conv
}

/// Sum of the in-bounds 3x3 neighbourhood of `(row, col)` in a 5x5 ramp.
fn ramp_window_sum(row: isize, col: isize) -> f32 {
    let mut sum = 0.0;
    for r in row - 1..=row + 1 {
        for c in col - 1..=col + 1 {
            if (0..5).contains(&r) && (0..5).contains(&c) {
                sum += (r * 5 + c) as f32;
            }
        }
    }
    sum
}

pub fn gemm_matches_expected<B: MatMulBackend + 'static>(backend: &Arc<B>) {
    let lhs = [1.0, 2.0, 3.0, 4.0];
    let rhs = [5.0, 6.0, 7.0, 8.0];
    let mut out = [0.0f32; 4];
    backend
        .gemm(
            MatrixRef::new(&lhs, 2, 2).unwrap(),
            MatrixRef::new(&rhs, 2, 2).unwrap(),
            None,
            &mut out,
        )
        .unwrap();
    assert_eq!(out, [19.0, 22.0, 43.0, 50.0]);
}

pub fn gemm_adds_bias_per_column<B: MatMulBackend + 'static>(backend: &Arc<B>) {
    let lhs = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
    let rhs = [1.0, 0.0, 0.0, 1.0, 1.0, 1.0];
    let mut out = [0.0f32; 4];
    backend
        .gemm(
            MatrixRef::new(&lhs, 2, 3).unwrap(),
            MatrixRef::new(&rhs, 3, 2).unwrap(),
            Some(&[0.5, -1.0]),
            &mut out,
        )
        .unwrap();
    assert_eq!(out, [4.5, 4.0, 10.5, 10.0]);
}

pub fn gemm_overwrites_output<B: MatMulBackend + 'static>(backend: &Arc<B>) {
    let lhs = [1.0, 2.0, 3.0, 4.0];
    let rhs = [5.0, 6.0, 7.0, 8.0];
    let mut out = [100.0f32; 4];
    backend
        .gemm(
            MatrixRef::new(&lhs, 2, 2).unwrap(),
            MatrixRef::new(&rhs, 2, 2).unwrap(),
            None,
            &mut out,
        )
        .unwrap();
    assert_eq!(out, [19.0, 22.0, 43.0, 50.0]);
}

pub fn gemm_rejects_shape_mismatch<B: MatMulBackend + 'static>(backend: &Arc<B>) {
    let lhs = [0.0f32; 6];
    let rhs = [0.0f32; 6];
    let mut short = [0.0f32; 3];
    assert!(backend
        .gemm(
            MatrixRef::new(&lhs, 2, 3).unwrap(),
            MatrixRef::new(&rhs, 3, 2).unwrap(),
            None,
            &mut short,
        )
        .is_err());
    let mut out = [0.0f32; 4];
    assert!(backend
        .gemm(
            MatrixRef::new(&lhs, 2, 3).unwrap(),
            MatrixRef::new(&rhs, 3, 2).unwrap(),
            Some(&[1.0]),
            &mut out,
        )
        .is_err());
}

pub fn conv_valid_all_ones_kernel<B: MatMulBackend + 'static>(backend: &Arc<B>) {
    let mut conv = all_ones_3x3(Arc::clone(backend) as Arc<dyn MatMulBackend>, BorderMode::Valid, 1);
    let out = conv.call(&ramp(&[5, 5, 1])).unwrap();
    assert_eq!(out.shape().dims(), &[3, 3, 1]);
    assert_eq!(
        out.data(),
        &[54.0, 63.0, 72.0, 99.0, 108.0, 117.0, 144.0, 153.0, 162.0]
    );
}

pub fn conv_same_preserves_extent<B: MatMulBackend + 'static>(backend: &Arc<B>) {
    let mut conv = all_ones_3x3(Arc::clone(backend) as Arc<dyn MatMulBackend>, BorderMode::Same, 1);
    let out = conv.call(&ramp(&[5, 5, 1])).unwrap();
    assert_eq!(out.shape().dims(), &[5, 5, 1]);
    assert_eq!(out.data()[0], 12.0);
    assert_eq!(out.data()[4], 24.0);
    assert_eq!(out.data()[12], 108.0);
    for row in 0..5 {
        for col in 0..5 {
            assert_eq!(
                out.data()[row * 5 + col],
                ramp_window_sum(row as isize, col as isize),
                "mismatch at ({row}, {col})"
            );
        }
    }
}

pub fn conv_same_strided<B: MatMulBackend + 'static>(backend: &Arc<B>) {
    let mut conv = all_ones_3x3(Arc::clone(backend) as Arc<dyn MatMulBackend>, BorderMode::Same, 2);
    let out = conv.call(&ramp(&[5, 5, 1])).unwrap();
    assert_eq!(out.shape().dims(), &[3, 3, 1]);
    for row in 0..3 {
        for col in 0..3 {
            assert_eq!(
                out.data()[row * 3 + col],
                ramp_window_sum(2 * row as isize, 2 * col as isize),
                "mismatch at ({row}, {col})"
            );
        }
    }
    assert_eq!(out.data()[8], 84.0);
}

pub fn conv_identity_kernel_copies_input<B: MatMulBackend + 'static>(backend: &Arc<B>) {
    let channels = 2;
    let mut kernel = vec![0.0f32; 3 * 3 * channels * channels];
    for c in 0..channels {
        kernel[((3 + 1) * channels + c) * channels + c] = 1.0;
    }
    let config = Conv2dConfig::new(channels, [3, 3])
        .with_bias(false)
        .with_padding(BorderMode::Same);
    let mut conv = layer(backend, config);
    conv.set_weights(vec![tensor_from_vec(&[3, 3, channels, channels], kernel)])
        .unwrap();
    let input = ramp(&[4, 3, channels]);
    let out = conv.call(&input).unwrap();
    assert_eq!(out, input);
}

pub fn conv_kernel_larger_than_input_fails<B: MatMulBackend + 'static>(backend: &Arc<B>) {
    let mut conv = layer(backend, Conv2dConfig::new(1, [5, 5]).with_bias(false));
    conv.set_weights(vec![Tensor::ones(Shape::new([5, 5, 1, 1]))])
        .unwrap();
    let err = conv.call(&ramp(&[3, 3, 1])).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ConvError>(),
        Some(ConvError::EmptyOutput { .. })
    ));
    assert!(conv.compute_output_shape(&[3, 3, 1]).is_err());
}

pub fn layer_issues_one_gemm_per_call<B: MatMulBackend + 'static>(backend: &Arc<B>) {
    let recording = Arc::new(RecordingBackend::new(
        Arc::clone(backend) as Arc<dyn MatMulBackend>
    ));
    let config = Conv2dConfig::new(4, [3, 2])
        .with_strides([1, 2])
        .with_data_format(AxisOrder::ChannelsFirst);
    let mut conv = Conv2d::new(config, recording.clone()).unwrap();
    conv.set_weights(vec![
        Tensor::ones(Shape::new([4, 3, 3, 2])),
        Tensor::zeros(Shape::new([4])),
    ])
    .unwrap();
    let input = ramp(&[3, 6, 7]);
    conv.call(&input).unwrap();
    conv.call(&input).unwrap();
    let expected = GemmDims {
        m: 4 * 3,
        k: 3 * 2 * 3,
        n: 4,
    };
    assert_eq!(recording.recorded_calls(), vec![expected, expected]);
    assert_eq!(recording.call_count(), 2);
}
