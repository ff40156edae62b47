//! Output-shape and padding arithmetic for 2D convolution.

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, ensure, Result};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConvError};

/// Padding policy applied before the kernel slides over the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BorderMode {
    /// No padding; the output shrinks by `kernel - 1` (before striding).
    #[default]
    Valid,
    /// Zero padding so the output has `ceil(input / stride)` positions per axis.
    Same,
}

impl BorderMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            BorderMode::Valid => "valid",
            BorderMode::Same => "same",
        }
    }
}

impl FromStr for BorderMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "valid" => Ok(BorderMode::Valid),
            "same" => Ok(BorderMode::Same),
            _ => Err(ConfigError::UnknownBorderMode(s.to_string())),
        }
    }
}

impl TryFrom<String> for BorderMode {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BorderMode> for String {
    fn from(value: BorderMode) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for BorderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Padding2d {
    pub top: usize,
    pub bottom: usize,
    pub left: usize,
    pub right: usize,
}

impl Padding2d {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn is_zero(self) -> bool {
        self == Self::zero()
    }

    pub fn as_hw_pairs(self) -> [(usize, usize); 2] {
        [(self.top, self.bottom), (self.left, self.right)]
    }
}

/// Window parameters of a 2D convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Conv2dParams {
    pub kernel: [usize; 2],
    pub stride: [usize; 2],
    pub border_mode: BorderMode,
}

/// Derived per-input geometry: where the kernel lands and how much padding that needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConvGeometry {
    pub input_rows: usize,
    pub input_cols: usize,
    pub kernel: [usize; 2],
    pub stride: [usize; 2],
    pub out_rows: usize,
    pub out_cols: usize,
    pub padding: Padding2d,
}

impl ConvGeometry {
    pub fn padded_rows(&self) -> usize {
        self.input_rows + self.padding.top + self.padding.bottom
    }

    pub fn padded_cols(&self) -> usize {
        self.input_cols + self.padding.left + self.padding.right
    }

    /// Number of output positions (rows of the patch matrix).
    pub fn num_positions(&self) -> usize {
        self.out_rows * self.out_cols
    }
}

fn valid_out_dim(input: usize, window: usize, stride: usize) -> usize {
    // floor((input - window + stride) / stride), clamped at zero
    match (input + stride).checked_sub(window) {
        Some(span) => span / stride,
        None => 0,
    }
}

/// Returns `(out, pad_before, pad_after)` for one axis in `same` mode.
fn same_out_dim(input: usize, window: usize, stride: usize) -> Result<(usize, usize, usize)> {
    let out = input.div_ceil(stride);
    let needed = out
        .saturating_sub(1)
        .checked_mul(stride)
        .and_then(|v| v.checked_add(window))
        .ok_or_else(|| anyhow!("conv2d padded dimension overflow"))?;
    let total = needed.saturating_sub(input);
    let before = total / 2;
    Ok((out, before, total - before))
}

/// Computes output extents and padding for an `input_rows x input_cols` feature map.
pub fn compute_geometry(
    input_rows: usize,
    input_cols: usize,
    params: Conv2dParams,
) -> Result<ConvGeometry> {
    let [kernel_rows, kernel_cols] = params.kernel;
    let [stride_rows, stride_cols] = params.stride;
    ensure!(
        kernel_rows > 0 && kernel_cols > 0,
        "conv2d window must be > 0"
    );
    ensure!(
        stride_rows > 0 && stride_cols > 0,
        "conv2d stride must be > 0"
    );
    ensure!(
        input_rows > 0 && input_cols > 0,
        "conv2d input spatial dims must be > 0, got [{}, {}]",
        input_rows,
        input_cols
    );

    let (out_rows, out_cols, padding) = match params.border_mode {
        BorderMode::Valid => (
            valid_out_dim(input_rows, kernel_rows, stride_rows),
            valid_out_dim(input_cols, kernel_cols, stride_cols),
            Padding2d::zero(),
        ),
        BorderMode::Same => {
            let (out_rows, top, bottom) = same_out_dim(input_rows, kernel_rows, stride_rows)?;
            let (out_cols, left, right) = same_out_dim(input_cols, kernel_cols, stride_cols)?;
            (
                out_rows,
                out_cols,
                Padding2d {
                    top,
                    bottom,
                    left,
                    right,
                },
            )
        }
    };

    let geometry = ConvGeometry {
        input_rows,
        input_cols,
        kernel: params.kernel,
        stride: params.stride,
        out_rows,
        out_cols,
        padding,
    };
    if out_rows == 0 || out_cols == 0 {
        return Err(ConvError::EmptyOutput {
            kernel_rows,
            kernel_cols,
            padded_rows: geometry.padded_rows(),
            padded_cols: geometry.padded_cols(),
        }
        .into());
    }
    Ok(geometry)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(kernel: [usize; 2], stride: [usize; 2], border_mode: BorderMode) -> Conv2dParams {
        Conv2dParams {
            kernel,
            stride,
            border_mode,
        }
    }

    #[test]
    fn valid_mode_shrinks_by_kernel() {
        let g = compute_geometry(5, 5, params([3, 3], [1, 1], BorderMode::Valid)).unwrap();
        assert_eq!((g.out_rows, g.out_cols), (3, 3));
        assert!(g.padding.is_zero());

        let g = compute_geometry(7, 8, params([3, 2], [2, 3], BorderMode::Valid)).unwrap();
        // floor((7 - 3 + 2) / 2) = 3, floor((8 - 2 + 3) / 3) = 3
        assert_eq!((g.out_rows, g.out_cols), (3, 3));
    }

    #[test]
    fn same_mode_pads_symmetrically_for_odd_kernel() {
        let g = compute_geometry(5, 5, params([3, 3], [1, 1], BorderMode::Same)).unwrap();
        assert_eq!((g.out_rows, g.out_cols), (5, 5));
        assert_eq!(
            g.padding,
            Padding2d {
                top: 1,
                bottom: 1,
                left: 1,
                right: 1
            }
        );
        assert_eq!((g.padded_rows(), g.padded_cols()), (7, 7));
    }

    #[test]
    fn same_mode_puts_odd_pixel_after() {
        let g = compute_geometry(6, 4, params([2, 4], [1, 1], BorderMode::Same)).unwrap();
        assert_eq!((g.out_rows, g.out_cols), (6, 4));
        // rows: total 1 -> (0, 1); cols: total 3 -> (1, 2)
        assert_eq!(
            g.padding,
            Padding2d {
                top: 0,
                bottom: 1,
                left: 1,
                right: 2
            }
        );
    }

    #[test]
    fn same_mode_with_stride_uses_ceil() {
        let g = compute_geometry(7, 6, params([3, 3], [2, 2], BorderMode::Same)).unwrap();
        assert_eq!((g.out_rows, g.out_cols), (4, 3));
        // rows: (4-1)*2+3-7 = 2 -> (1,1); cols: (3-1)*2+3-6 = 1 -> (0,1)
        assert_eq!(g.padding.as_hw_pairs(), [(1, 1), (0, 1)]);
    }

    #[test]
    fn same_mode_never_pads_negative() {
        let g = compute_geometry(5, 5, params([1, 1], [3, 3], BorderMode::Same)).unwrap();
        assert_eq!((g.out_rows, g.out_cols), (2, 2));
        assert!(g.padding.is_zero());
    }

    #[test]
    fn kernel_larger_than_input_is_an_error() {
        let err = compute_geometry(2, 5, params([3, 3], [1, 1], BorderMode::Valid)).unwrap_err();
        assert_eq!(
            err.downcast_ref::<ConvError>(),
            Some(&ConvError::EmptyOutput {
                kernel_rows: 3,
                kernel_cols: 3,
                padded_rows: 2,
                padded_cols: 5,
            })
        );
    }

    #[test]
    fn border_mode_parses_case_insensitively() {
        assert_eq!("SAME".parse::<BorderMode>(), Ok(BorderMode::Same));
        assert_eq!(
            "full".parse::<BorderMode>(),
            Err(ConfigError::UnknownBorderMode("full".into()))
        );
    }
}
