//! Reassembles the GEMM result into a channels-last feature map.

use anyhow::{ensure, Result};

use super::geometry::ConvGeometry;
use crate::tensor::{Shape, Tensor};

/// Turns a `[out_rows * out_cols, filters]` GEMM result into `[out_rows, out_cols, filters]`.
///
/// Result row `n` becomes output position `(n / out_cols, n % out_cols)`, inverting the
/// enumeration used by [`super::im2col::im2col`]. Row-major storage makes this a relabelling
/// of the buffer, so no data moves.
pub fn assemble_output(result: Vec<f32>, geometry: &ConvGeometry, filters: usize) -> Result<Tensor> {
    let expected = geometry.num_positions() * filters;
    ensure!(
        result.len() == expected,
        "conv2d result has {} elements, expected {} ({} x {} x {})",
        result.len(),
        expected,
        geometry.out_rows,
        geometry.out_cols,
        filters
    );
    Tensor::from_vec(
        Shape::new([geometry.out_rows, geometry.out_cols, filters]),
        result,
    )
}
