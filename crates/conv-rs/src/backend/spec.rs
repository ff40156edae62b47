//! GEMM backend contract shared by the reference and accelerated implementations.
//!
//! A backend computes `out[p, f] = bias[f] + sum_k lhs[p, k] * rhs[k, f]` over row-major
//! buffers. Everything else in the convolution pipeline (padding, patch extraction, output
//! assembly) is backend-neutral and lives in [`crate::ops::conv`].

use std::fmt;

use thiserror::Error;

/// Capability class of a backend, fixed when the backend is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Deterministic host loops; the numerical ground truth.
    Reference,
    /// Library or device accelerated; matches the reference within floating tolerance.
    Accelerated,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Reference => f.write_str("reference"),
            BackendKind::Accelerated => f.write_str("accelerated"),
        }
    }
}

/// Borrowed row-major matrix.
#[derive(Debug, Clone, Copy)]
pub struct MatrixRef<'a> {
    pub data: &'a [f32],
    pub rows: usize,
    pub cols: usize,
}

impl<'a> MatrixRef<'a> {
    pub fn new(data: &'a [f32], rows: usize, cols: usize) -> BackendResult<Self> {
        let expected = rows
            .checked_mul(cols)
            .ok_or_else(|| BackendError::execution("matrix size overflow"))?;
        if data.len() != expected {
            return Err(BackendError::ShapeMismatch {
                what: "matrix buffer",
                expected: vec![rows, cols],
                found: vec![data.len()],
            });
        }
        Ok(Self { data, rows, cols })
    }

    #[inline]
    pub fn row(&self, index: usize) -> &'a [f32] {
        &self.data[index * self.cols..(index + 1) * self.cols]
    }
}

/// Validated GEMM extents: `[m, k] x [k, n] -> [m, n]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GemmDims {
    pub m: usize,
    pub k: usize,
    pub n: usize,
}

impl GemmDims {
    /// Checks operand agreement; every backend calls this before touching `out`.
    pub fn validate(
        lhs: &MatrixRef<'_>,
        rhs: &MatrixRef<'_>,
        bias: Option<&[f32]>,
        out: &[f32],
    ) -> BackendResult<Self> {
        if lhs.cols != rhs.rows {
            return Err(BackendError::ShapeMismatch {
                what: "gemm inner dimension",
                expected: vec![lhs.rows, lhs.cols],
                found: vec![rhs.rows, rhs.cols],
            });
        }
        if let Some(bias) = bias {
            if bias.len() != rhs.cols {
                return Err(BackendError::ShapeMismatch {
                    what: "gemm bias",
                    expected: vec![rhs.cols],
                    found: vec![bias.len()],
                });
            }
        }
        let out_len = lhs
            .rows
            .checked_mul(rhs.cols)
            .ok_or_else(|| BackendError::execution("gemm output size overflow"))?;
        if out.len() != out_len {
            return Err(BackendError::ShapeMismatch {
                what: "gemm output",
                expected: vec![lhs.rows, rhs.cols],
                found: vec![out.len()],
            });
        }
        Ok(Self {
            m: lhs.rows,
            k: lhs.cols,
            n: rhs.cols,
        })
    }

    /// Multiply-add count, saturating.
    pub fn flops(&self) -> u64 {
        (self.m as u128)
            .saturating_mul(self.n as u128)
            .saturating_mul(self.k as u128)
            .saturating_mul(2)
            .min(u64::MAX as u128) as u64
    }
}

/// Dense matrix-multiply strategy used by the convolution layer.
///
/// Implementations must be pure with respect to their inputs: the same operands always produce
/// the same `out` (bit-exact for [`BackendKind::Reference`], within `1e-4` relative tolerance for
/// [`BackendKind::Accelerated`]). Calls may block until the result is ready; they are never
/// cancelled.
pub trait MatMulBackend: Send + Sync {
    /// Human-readable identifier (e.g. "cpu", "faer").
    fn backend_name(&self) -> &str;

    fn kind(&self) -> BackendKind;

    /// Writes `lhs x rhs (+ bias)` into `out`, which holds `lhs.rows * rhs.cols` elements.
    /// Existing contents of `out` are overwritten.
    fn gemm(
        &self,
        lhs: MatrixRef<'_>,
        rhs: MatrixRef<'_>,
        bias: Option<&[f32]>,
        out: &mut [f32],
    ) -> BackendResult<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("{what} shape mismatch: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: Vec<usize>,
        found: Vec<usize>,
    },
    #[error("backend execution failure: {message}")]
    Execution { message: String },
}

impl BackendError {
    pub fn execution(message: impl Into<String>) -> Self {
        BackendError::Execution {
            message: message.into(),
        }
    }
}

/// Convenience alias for results returned by backend routines.
pub type BackendResult<T> = Result<T, BackendError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gemm_dims_reject_inner_mismatch() {
        let lhs_data = [0.0f32; 6];
        let rhs_data = [0.0f32; 6];
        let lhs = MatrixRef::new(&lhs_data, 2, 3).unwrap();
        let rhs = MatrixRef::new(&rhs_data, 2, 3).unwrap();
        let out = [0.0f32; 6];
        let err = GemmDims::validate(&lhs, &rhs, None, &out).unwrap_err();
        assert!(matches!(err, BackendError::ShapeMismatch { what: "gemm inner dimension", .. }));
    }

    #[test]
    fn gemm_dims_check_bias_and_output() {
        let lhs_data = [0.0f32; 6];
        let rhs_data = [0.0f32; 12];
        let lhs = MatrixRef::new(&lhs_data, 2, 3).unwrap();
        let rhs = MatrixRef::new(&rhs_data, 3, 4).unwrap();
        let out = [0.0f32; 8];
        let dims = GemmDims::validate(&lhs, &rhs, Some(&[0.0; 4]), &out).unwrap();
        assert_eq!(dims, GemmDims { m: 2, k: 3, n: 4 });
        assert_eq!(dims.flops(), 48);
        assert!(GemmDims::validate(&lhs, &rhs, Some(&[0.0; 3]), &out).is_err());
        assert!(GemmDims::validate(&lhs, &rhs, None, &out[..7]).is_err());
    }

    #[test]
    fn matrix_ref_checks_length() {
        assert!(MatrixRef::new(&[1.0, 2.0, 3.0], 2, 2).is_err());
        let m = MatrixRef::new(&[1.0, 2.0, 3.0, 4.0], 2, 2).unwrap();
        assert_eq!(m.row(1), &[3.0, 4.0]);
    }
}
