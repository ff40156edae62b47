//! 2D convolution lowered to a single GEMM.
//!
//! - Feature maps are channels-last `[H, W, C]`; kernels are `[KH, KW, C_in, F]`.
//! - [`geometry`] derives output extents and padding, [`pad`] materializes the zero border,
//!   [`im2col`] flattens each window into one patch-matrix row, [`weights`] flattens the kernel
//!   into the matching `[K, F]` matrix, and [`assemble`] relabels the `[P, F]` product as
//!   `[out_rows, out_cols, F]`.

pub mod assemble;
pub mod geometry;
pub mod im2col;
pub mod pad;
pub mod weights;

use std::sync::Arc;

use anyhow::{ensure, Result};

pub use assemble::assemble_output;
pub use geometry::{compute_geometry, BorderMode, Conv2dParams, ConvGeometry, Padding2d};
pub use im2col::{im2col, patch_len};
pub use pad::pad_feature_map;
pub use weights::reshape_kernel;

use crate::backend::{MatMulBackend, MatrixRef};
use crate::error::ConvError;
use crate::observer::{ConvPhase, PhaseObserver, PhaseSpan};
use crate::tensor::Tensor;

/// Runs pad, im2col, GEMM, and assembly for a canonical `[H, W, C]` input whose geometry and
/// `[K, F]` weight matrix are already known.
pub fn conv2d_with_matrix(
    backend: &dyn MatMulBackend,
    input: &Tensor,
    weight_matrix: &Tensor,
    bias: Option<&[f32]>,
    geometry: &ConvGeometry,
    observer: Option<&Arc<dyn PhaseObserver>>,
) -> Result<Tensor> {
    let dims = input.shape().dims();
    if dims.len() != 3 {
        return Err(ConvError::InputRank(dims.to_vec()).into());
    }
    ensure!(
        dims[0] == geometry.input_rows && dims[1] == geometry.input_cols,
        "conv2d input [{}, {}] does not match geometry [{}, {}]",
        dims[0],
        dims[1],
        geometry.input_rows,
        geometry.input_cols
    );
    let channels = dims[2];
    ensure!(
        channels > 0 && geometry.num_positions() > 0,
        "conv2d needs at least one input channel and one output position"
    );
    let k = patch_len(geometry.kernel, channels);
    let wdims = weight_matrix.shape().dims();
    ensure!(wdims.len() == 2, "conv2d weight matrix must be rank-2, got {:?}", wdims);
    if wdims[0] != k {
        return Err(ConvError::ChannelMismatch {
            expected: wdims[0] / (geometry.kernel[0] * geometry.kernel[1]),
            found: channels,
        }
        .into());
    }
    let filters = wdims[1];

    let padded = {
        let _span = PhaseSpan::enter(ConvPhase::Pad, observer);
        pad_feature_map(input, geometry.padding)?
    };

    let patches = {
        let _span = PhaseSpan::enter(ConvPhase::Im2Col, observer);
        im2col(&padded, geometry)?
    };
    drop(padded);

    let positions = geometry.num_positions();
    let mut result = vec![0.0f32; positions * filters];
    {
        let _span = PhaseSpan::enter(ConvPhase::MatMul, observer);
        let lhs = MatrixRef::new(patches.data(), positions, k)?;
        let rhs = MatrixRef::new(weight_matrix.data(), k, filters)?;
        backend.gemm(lhs, rhs, bias, &mut result)?;
    }

    let _span = PhaseSpan::enter(ConvPhase::Assemble, observer);
    assemble_output(result, geometry, filters)
}

/// Stateless convolution of a canonical `[H, W, C]` map with a `[KH, KW, C, F]` kernel.
///
/// Recomputes geometry and the weight matrix on every call; layers that run repeatedly
/// should go through [`crate::nn::layers::Conv2d`], which caches both.
pub fn conv2d(
    backend: &dyn MatMulBackend,
    input: &Tensor,
    kernel: &Tensor,
    bias: Option<&Tensor>,
    params: Conv2dParams,
) -> Result<Tensor> {
    let _scope = crate::profiling::functional_scope("conv_rs::ops::conv::conv2d", "im2col_gemm");
    let dims = input.shape().dims();
    if dims.len() != 3 {
        return Err(ConvError::InputRank(dims.to_vec()).into());
    }
    let kdims = kernel.shape().dims();
    ensure!(
        kdims.len() == 4 && kdims[0] == params.kernel[0] && kdims[1] == params.kernel[1],
        "conv2d kernel {:?} does not match window {:?}",
        kdims,
        params.kernel
    );
    if kdims[2] != dims[2] {
        return Err(ConvError::ChannelMismatch {
            expected: kdims[2],
            found: dims[2],
        }
        .into());
    }
    if let Some(bias) = bias {
        ensure!(
            bias.shape().dims() == [kdims[3]],
            "conv2d bias {:?} must be [{}]",
            bias.shape().dims(),
            kdims[3]
        );
    }

    let geometry = compute_geometry(dims[0], dims[1], params)?;
    let matrix = reshape_kernel(kernel)?;
    conv2d_with_matrix(
        backend,
        input,
        &matrix,
        bias.map(Tensor::data),
        &geometry,
        None,
    )
}
