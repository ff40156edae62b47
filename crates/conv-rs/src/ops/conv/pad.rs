//! Zero padding of channels-last feature maps.

use std::borrow::Cow;

use anyhow::{ensure, Result};

use super::geometry::Padding2d;
use crate::tensor::{Shape, Tensor};

/// Returns `input` surrounded by `padding` zeros on the spatial axes.
///
/// Zero padding borrows the input unchanged; otherwise a fresh `[H + top + bottom,
/// W + left + right, C]` tensor is allocated. The caller's tensor is never modified.
pub fn pad_feature_map(input: &Tensor, padding: Padding2d) -> Result<Cow<'_, Tensor>> {
    let dims = input.shape().dims();
    ensure!(
        dims.len() == 3,
        "padding expects a rank-3 [H, W, C] feature map, got {:?}",
        dims
    );
    if padding.is_zero() {
        return Ok(Cow::Borrowed(input));
    }

    let (rows, cols, channels) = (dims[0], dims[1], dims[2]);
    let padded_rows = rows + padding.top + padding.bottom;
    let padded_cols = cols + padding.left + padding.right;
    let mut padded = Tensor::zeros(Shape::new([padded_rows, padded_cols, channels]));

    let src_row_len = cols * channels;
    let dst_row_len = padded_cols * channels;
    let src = input.data();
    let dst = padded.data_mut();
    for row in 0..rows {
        let src_start = row * src_row_len;
        let dst_start = (row + padding.top) * dst_row_len + padding.left * channels;
        dst[dst_start..dst_start + src_row_len]
            .copy_from_slice(&src[src_start..src_start + src_row_len]);
    }

    Ok(Cow::Owned(padded))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_padding_borrows_input() {
        let input = Tensor::ones(Shape::new([2, 2, 1]));
        let out = pad_feature_map(&input, Padding2d::zero()).unwrap();
        assert!(matches!(out, Cow::Borrowed(_)));
    }

    #[test]
    fn copies_into_offset_window() {
        let input = Tensor::from_vec(
            Shape::new([2, 2, 2]),
            vec![1.0, 10.0, 2.0, 20.0, 3.0, 30.0, 4.0, 40.0],
        )
        .unwrap();
        let padding = Padding2d {
            top: 1,
            bottom: 0,
            left: 0,
            right: 1,
        };
        let out = pad_feature_map(&input, padding).unwrap();
        assert_eq!(out.shape().dims(), &[3, 3, 2]);
        #[rustfmt::skip]
        let expected = vec![
            0.0, 0.0,  0.0, 0.0,   0.0, 0.0,
            1.0, 10.0, 2.0, 20.0,  0.0, 0.0,
            3.0, 30.0, 4.0, 40.0,  0.0, 0.0,
        ];
        assert_eq!(out.data(), expected.as_slice());
        assert_eq!(input.shape().dims(), &[2, 2, 2]);
    }

    #[test]
    fn rejects_non_feature_map() {
        let input = Tensor::zeros(Shape::new([4, 4]));
        assert!(pad_feature_map(&input, Padding2d::zero()).is_err());
    }
}
