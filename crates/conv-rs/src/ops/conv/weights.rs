//! Kernel-to-matrix reshape matching the im2col patch order.

use anyhow::{ensure, Result};

use crate::tensor::{Shape, Tensor};

/// Views a canonical `[KH, KW, C_in, F]` kernel as the `[KH * KW * C_in, F]` weight matrix.
///
/// The canonical buffer is already that matrix in row-major order: row `(row, col, channel)`
/// holds the `F` filter taps, matching the patch order of [`super::im2col::im2col`]. Only the
/// shape changes.
pub fn reshape_kernel(kernel: &Tensor) -> Result<Tensor> {
    let dims = kernel.shape().dims();
    ensure!(
        dims.len() == 4,
        "conv2d kernel must be canonical [KH, KW, C_in, F], got {:?}",
        dims
    );
    let filters = dims[3];
    let k = dims[0] * dims[1] * dims[2];
    kernel.clone().reshape(Shape::new([k, filters]))
}
