//! Randomized agreement checks: every backend against a brute-force direct convolution and
//! against the reference backend.

use std::sync::Arc;

use conv_rs::backend::spec::MatMulBackend;
use conv_rs::layout::AxisOrder;
use conv_rs::nn::layers::{Conv2d, Conv2dConfig};
use conv_rs::ops::{Activation, BorderMode};
use conv_rs::tensor::{Shape, Tensor};
use conv_rs_backend_ref_cpu::CpuMatMulBackend;

use crate::common::{assert_close, assert_close_tol, random_tensor, seeded_rng};

/// Sliding-window convolution straight from the definition, accumulated in `f64`.
///
/// `input` is `[H, W, C]`, `kernel` is `[KH, KW, C, F]`; returns `[OH, OW, F]`.
pub fn direct_conv2d(
    input: &Tensor,
    kernel: &Tensor,
    bias: Option<&[f32]>,
    stride: [usize; 2],
    padding: BorderMode,
) -> Tensor {
    let &[h, w, c] = input.shape().dims() else {
        panic!("input must be rank 3");
    };
    let &[kh, kw, kc, f] = kernel.shape().dims() else {
        panic!("kernel must be rank 4");
    };
    assert_eq!(c, kc);

    let extent = |size: usize, window: usize, step: usize| -> (usize, usize) {
        match padding {
            BorderMode::Valid => ((size - window) / step + 1, 0),
            BorderMode::Same => {
                let out = size.div_ceil(step);
                let total = ((out - 1) * step + window).saturating_sub(size);
                (out, total / 2)
            }
        }
    };
    let (oh, top) = extent(h, kh, stride[0]);
    let (ow, left) = extent(w, kw, stride[1]);

    let x = input.data();
    let k = kernel.data();
    let mut out = Vec::with_capacity(oh * ow * f);
    for oy in 0..oh {
        for ox in 0..ow {
            for fi in 0..f {
                let mut acc = bias.map_or(0.0, |b| b[fi] as f64);
                for ky in 0..kh {
                    let iy = (oy * stride[0] + ky) as isize - top as isize;
                    if iy < 0 || iy >= h as isize {
                        continue;
                    }
                    for kx in 0..kw {
                        let ix = (ox * stride[1] + kx) as isize - left as isize;
                        if ix < 0 || ix >= w as isize {
                            continue;
                        }
                        for ci in 0..c {
                            let xv = x[((iy as usize) * w + ix as usize) * c + ci] as f64;
                            let kv = k[((ky * kw + kx) * c + ci) * f + fi] as f64;
                            acc += xv * kv;
                        }
                    }
                }
                out.push(acc as f32);
            }
        }
    }
    crate::common::tensor_from_vec(&[oh, ow, f], out)
}

#[derive(Clone, Copy)]
struct Case {
    rows: usize,
    cols: usize,
    channels: usize,
    filters: usize,
    kernel: [usize; 2],
    stride: [usize; 2],
    padding: BorderMode,
    seed: u64,
}

fn run_case<B: MatMulBackend + 'static>(backend: &Arc<B>, case: Case) {
    let mut rng = seeded_rng(case.seed);
    let input = random_tensor(&mut rng, &[case.rows, case.cols, case.channels]);
    let kernel = random_tensor(
        &mut rng,
        &[case.kernel[0], case.kernel[1], case.channels, case.filters],
    );
    let bias = random_tensor(&mut rng, &[case.filters]);

    let config = Conv2dConfig::new(case.filters, case.kernel)
        .with_strides(case.stride)
        .with_padding(case.padding);
    let mut conv = Conv2d::new(config, Arc::clone(backend) as Arc<dyn MatMulBackend>).unwrap();
    conv.set_weights(vec![kernel.clone(), bias.clone()]).unwrap();
    let actual = conv.call(&input).unwrap();

    let expected = direct_conv2d(&input, &kernel, Some(bias.data()), case.stride, case.padding);
    assert_eq!(actual.shape().dims(), expected.shape().dims());
    assert_close_tol(expected.data(), actual.data(), 1e-4, 1e-4);
}

pub fn conv_matches_direct_k3_s1_valid<B: MatMulBackend + 'static>(backend: &Arc<B>) {
    run_case(
        backend,
        Case {
            rows: 7,
            cols: 6,
            channels: 3,
            filters: 4,
            kernel: [3, 3],
            stride: [1, 1],
            padding: BorderMode::Valid,
            seed: 7,
        },
    );
}

pub fn conv_matches_direct_k3x5_s2x1_same<B: MatMulBackend + 'static>(backend: &Arc<B>) {
    run_case(
        backend,
        Case {
            rows: 9,
            cols: 10,
            channels: 2,
            filters: 5,
            kernel: [3, 5],
            stride: [2, 1],
            padding: BorderMode::Same,
            seed: 11,
        },
    );
}

pub fn conv_matches_direct_k2_s1_same<B: MatMulBackend + 'static>(backend: &Arc<B>) {
    run_case(
        backend,
        Case {
            rows: 5,
            cols: 6,
            channels: 3,
            filters: 2,
            kernel: [2, 2],
            stride: [1, 1],
            padding: BorderMode::Same,
            seed: 13,
        },
    );
}

pub fn conv_matches_direct_k1_s2_valid<B: MatMulBackend + 'static>(backend: &Arc<B>) {
    run_case(
        backend,
        Case {
            rows: 8,
            cols: 7,
            channels: 4,
            filters: 3,
            kernel: [1, 1],
            stride: [2, 2],
            padding: BorderMode::Valid,
            seed: 17,
        },
    );
}

pub fn conv_matches_direct_k5_s3_same<B: MatMulBackend + 'static>(backend: &Arc<B>) {
    run_case(
        backend,
        Case {
            rows: 11,
            cols: 13,
            channels: 3,
            filters: 6,
            kernel: [5, 5],
            stride: [3, 3],
            padding: BorderMode::Same,
            seed: 19,
        },
    );
}

pub fn bias_disabled_equals_zero_bias<B: MatMulBackend + 'static>(backend: &Arc<B>) {
    let mut rng = seeded_rng(23);
    let input = random_tensor(&mut rng, &[6, 6, 2]);
    let kernel = random_tensor(&mut rng, &[3, 3, 2, 3]);
    let dyn_backend = Arc::clone(backend) as Arc<dyn MatMulBackend>;

    let config = Conv2dConfig::new(3, [3, 3]).with_padding(BorderMode::Same);
    let mut without = Conv2d::new(config.clone().with_bias(false), Arc::clone(&dyn_backend)).unwrap();
    without.set_weights(vec![kernel.clone()]).unwrap();
    let mut with_zero = Conv2d::new(config, dyn_backend).unwrap();
    with_zero
        .set_weights(vec![kernel, Tensor::zeros(Shape::new([3]))])
        .unwrap();

    assert_eq!(
        without.call(&input).unwrap(),
        with_zero.call(&input).unwrap()
    );
}

pub fn channels_first_matches_channels_last<B: MatMulBackend + 'static>(backend: &Arc<B>) {
    let mut rng = seeded_rng(29);
    let input = random_tensor(&mut rng, &[7, 5, 3]);
    let kernel = random_tensor(&mut rng, &[3, 2, 3, 4]);
    let bias = random_tensor(&mut rng, &[4]);
    let dyn_backend = Arc::clone(backend) as Arc<dyn MatMulBackend>;

    let config = Conv2dConfig::new(4, [3, 2])
        .with_strides([2, 1])
        .with_padding(BorderMode::Same);
    let mut last = Conv2d::new(config.clone(), Arc::clone(&dyn_backend)).unwrap();
    last.set_weights(vec![kernel.clone(), bias.clone()]).unwrap();
    let mut first = Conv2d::new(
        config.with_data_format(AxisOrder::ChannelsFirst),
        dyn_backend,
    )
    .unwrap();
    // [KH, KW, C, F] -> [F, C, KH, KW]
    first
        .set_weights(vec![kernel.permute(&[3, 2, 0, 1]).unwrap(), bias])
        .unwrap();

    let expected = last.call(&input).unwrap();
    let actual = first.call(&input.permute(&[2, 0, 1]).unwrap()).unwrap();
    assert_eq!(actual.shape().dims(), &[4, 4, 5]);
    let actual = actual.permute(&[1, 2, 0]).unwrap();
    assert_close(expected.data(), actual.data());
    assert_eq!(first.kernel(), last.kernel());
}

pub fn activation_follows_bias<B: MatMulBackend + 'static>(backend: &Arc<B>) {
    let mut rng = seeded_rng(31);
    let input = random_tensor(&mut rng, &[5, 5, 2]);
    let kernel = random_tensor(&mut rng, &[3, 3, 2, 3]);
    let bias = random_tensor(&mut rng, &[3]);
    let dyn_backend = Arc::clone(backend) as Arc<dyn MatMulBackend>;

    let config = Conv2dConfig::new(3, [3, 3]);
    let mut linear = Conv2d::new(config.clone(), Arc::clone(&dyn_backend)).unwrap();
    linear
        .set_weights(vec![kernel.clone(), bias.clone()])
        .unwrap();
    let mut relu = Conv2d::new(config.with_activation(Activation::Relu), dyn_backend).unwrap();
    relu.set_weights(vec![kernel, bias]).unwrap();

    let mut expected = linear.call(&input).unwrap();
    expected.map_inplace(|v| v.max(0.0));
    assert_eq!(relu.call(&input).unwrap(), expected);
}

pub fn matches_reference_backend<B: MatMulBackend + 'static>(backend: &Arc<B>) {
    let mut rng = seeded_rng(37);
    let input = random_tensor(&mut rng, &[16, 12, 8]);
    let kernel = random_tensor(&mut rng, &[3, 3, 8, 16]);
    let bias = random_tensor(&mut rng, &[16]);

    let config = Conv2dConfig::new(16, [3, 3]).with_padding(BorderMode::Same);
    let mut reference =
        Conv2d::new(config.clone(), Arc::new(CpuMatMulBackend::new())).unwrap();
    reference
        .set_weights(vec![kernel.clone(), bias.clone()])
        .unwrap();
    let mut candidate =
        Conv2d::new(config, Arc::clone(backend) as Arc<dyn MatMulBackend>).unwrap();
    candidate.set_weights(vec![kernel, bias]).unwrap();

    let expected = reference.call(&input).unwrap();
    let actual = candidate.call(&input).unwrap();
    assert_eq!(expected.shape(), actual.shape());
    assert_close(expected.data(), actual.data());
}
