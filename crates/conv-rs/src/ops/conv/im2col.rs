//! Image-to-column transform.
//!
//! Row `n` of the patch matrix holds the window for output position
//! `(n / out_cols, n % out_cols)`, flattened as `(kernel_row, kernel_col, channel)` with the
//! channel fastest. [`super::weights::reshape_kernel`] flattens kernels in the same order and
//! [`super::assemble::assemble_output`] inverts the row enumeration.

use anyhow::{ensure, Result};

use super::geometry::ConvGeometry;
use crate::tensor::{Shape, Tensor};

/// Patch-matrix row length for a kernel over `channels` input channels.
pub fn patch_len(kernel: [usize; 2], channels: usize) -> usize {
    kernel[0] * kernel[1] * channels
}

/// Extracts every kernel window of an already padded `[H, W, C]` map into a
/// `[out_rows * out_cols, kernel_rows * kernel_cols * C]` matrix.
pub fn im2col(padded: &Tensor, geometry: &ConvGeometry) -> Result<Tensor> {
    let dims = padded.shape().dims();
    ensure!(
        dims.len() == 3,
        "im2col expects a rank-3 [H, W, C] feature map, got {:?}",
        dims
    );
    let (rows, cols, channels) = (dims[0], dims[1], dims[2]);
    ensure!(
        rows == geometry.padded_rows() && cols == geometry.padded_cols(),
        "im2col input [{}, {}] does not match padded geometry [{}, {}]",
        rows,
        cols,
        geometry.padded_rows(),
        geometry.padded_cols()
    );

    ensure!(
        channels > 0 && geometry.num_positions() > 0,
        "im2col needs at least one channel and one output position, got {} channels and {}x{} \
         positions",
        channels,
        geometry.out_rows,
        geometry.out_cols
    );

    let [kernel_rows, kernel_cols] = geometry.kernel;
    let [stride_rows, stride_cols] = geometry.stride;
    ensure!(
        (geometry.out_rows - 1) * stride_rows + kernel_rows <= rows
            && (geometry.out_cols - 1) * stride_cols + kernel_cols <= cols,
        "im2col window runs past the padded input"
    );

    let k = patch_len(geometry.kernel, channels);
    let positions = geometry.num_positions();
    let mut patches = vec![0.0f32; positions * k];

    let src = padded.data();
    let src_row_stride = cols * channels;
    // One kernel row of a window is contiguous in a channels-last map.
    let segment = kernel_cols * channels;

    for (n, dst_row) in patches.chunks_exact_mut(k).enumerate() {
        let out_row = n / geometry.out_cols;
        let out_col = n % geometry.out_cols;
        let base = out_row * stride_rows * src_row_stride + out_col * stride_cols * channels;
        for (kr, dst) in dst_row.chunks_exact_mut(segment).enumerate() {
            let start = base + kr * src_row_stride;
            dst.copy_from_slice(&src[start..start + segment]);
        }
    }

    Tensor::from_vec(Shape::new([positions, k]), patches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::conv::geometry::{compute_geometry, BorderMode, Conv2dParams};

    fn sequential(dims: [usize; 3]) -> Tensor {
        let len = dims.iter().product::<usize>();
        Tensor::from_vec(Shape::new(dims), (0..len).map(|v| v as f32).collect()).unwrap()
    }

    #[test]
    fn rows_enumerate_positions_row_major() {
        let input = sequential([3, 3, 1]);
        let geometry = compute_geometry(
            3,
            3,
            Conv2dParams {
                kernel: [2, 2],
                stride: [1, 1],
                border_mode: BorderMode::Valid,
            },
        )
        .unwrap();
        let patches = im2col(&input, &geometry).unwrap();
        assert_eq!(patches.shape().dims(), &[4, 4]);
        #[rustfmt::skip]
        let expected = vec![
            0.0, 1.0, 3.0, 4.0,
            1.0, 2.0, 4.0, 5.0,
            3.0, 4.0, 6.0, 7.0,
            4.0, 5.0, 7.0, 8.0,
        ];
        assert_eq!(patches.data(), expected.as_slice());
    }

    #[test]
    fn channels_are_fastest_within_a_patch() {
        // [2, 3, 2]: value = (row * 3 + col) * 2 + channel
        let input = sequential([2, 3, 2]);
        let geometry = compute_geometry(
            2,
            3,
            Conv2dParams {
                kernel: [2, 2],
                stride: [1, 2],
                border_mode: BorderMode::Valid,
            },
        )
        .unwrap();
        assert_eq!((geometry.out_rows, geometry.out_cols), (1, 1));
        let patches = im2col(&input, &geometry).unwrap();
        assert_eq!(patches.data(), &[0.0, 1.0, 2.0, 3.0, 6.0, 7.0, 8.0, 9.0]);
    }

    #[test]
    fn strided_windows_skip_positions() {
        let input = sequential([5, 5, 1]);
        let geometry = compute_geometry(
            5,
            5,
            Conv2dParams {
                kernel: [1, 1],
                stride: [2, 2],
                border_mode: BorderMode::Valid,
            },
        )
        .unwrap();
        let patches = im2col(&input, &geometry).unwrap();
        assert_eq!(
            patches.data(),
            &[0.0, 2.0, 4.0, 10.0, 12.0, 14.0, 20.0, 22.0, 24.0]
        );
    }

    #[test]
    fn rejects_empty_geometry_and_channelless_input() {
        let mut geometry = compute_geometry(
            3,
            3,
            Conv2dParams {
                kernel: [2, 2],
                stride: [1, 1],
                border_mode: BorderMode::Valid,
            },
        )
        .unwrap();
        assert!(im2col(&Tensor::zeros(Shape::new([3, 3, 0])), &geometry).is_err());

        geometry.out_rows = 0;
        assert!(im2col(&sequential([3, 3, 1]), &geometry).is_err());
    }

    #[test]
    fn rejects_unpadded_input_for_same_geometry() {
        let input = sequential([3, 3, 1]);
        let geometry = compute_geometry(
            3,
            3,
            Conv2dParams {
                kernel: [3, 3],
                stride: [1, 1],
                border_mode: BorderMode::Same,
            },
        )
        .unwrap();
        assert!(im2col(&input, &geometry).is_err());
    }
}
