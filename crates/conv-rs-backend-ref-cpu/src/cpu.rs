use conv_rs::backend::spec::{BackendKind, BackendResult, GemmDims, MatMulBackend, MatrixRef};
use conv_rs::profiling::{self, ScopeMeta, WorkStats};

/// Deterministic host GEMM: one dot product per output element, accumulated in `k` order.
///
/// Results are bit-for-bit reproducible across runs and thread counts, which makes this the
/// ground truth the accelerated backends are compared against.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpuMatMulBackend;

impl CpuMatMulBackend {
    pub fn new() -> Self {
        Self
    }
}

impl MatMulBackend for CpuMatMulBackend {
    fn backend_name(&self) -> &str {
        "cpu"
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Reference
    }

    fn gemm(
        &self,
        lhs: MatrixRef<'_>,
        rhs: MatrixRef<'_>,
        bias: Option<&[f32]>,
        out: &mut [f32],
    ) -> BackendResult<()> {
        let dims = GemmDims::validate(&lhs, &rhs, bias, out)?;
        let _scope = profiling::backend_scope_with_meta("backend.cpu.gemm", || {
            ScopeMeta::default().with_work(gemm_work(dims))
        });

        let GemmDims { m, n, .. } = dims;
        for i in 0..m {
            let lhs_row = lhs.row(i);
            let out_row = &mut out[i * n..(i + 1) * n];
            for (j, out_value) in out_row.iter_mut().enumerate() {
                let mut sum = 0.0f32;
                for (p, &a) in lhs_row.iter().enumerate() {
                    sum += a * rhs.data[p * n + j];
                }
                *out_value = match bias {
                    Some(bias) => sum + bias[j],
                    None => sum,
                };
            }
        }
        Ok(())
    }
}

fn gemm_work(dims: GemmDims) -> WorkStats {
    let out_elems = (dims.m as u64).saturating_mul(dims.n as u64);
    let read_elems = (dims.m as u64)
        .saturating_mul(dims.k as u64)
        .saturating_add((dims.k as u64).saturating_mul(dims.n as u64));
    WorkStats {
        elements: out_elems,
        bytes_read: read_elems.saturating_mul(4),
        bytes_written: out_elems.saturating_mul(4),
        flops: dims.flops(),
        alloc_bytes: 0,
        alloc_count: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conv_rs::backend::BackendError;

    #[test]
    fn multiplies_small_matrices() {
        let backend = CpuMatMulBackend::new();
        let lhs = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let rhs = [7.0, 8.0, 9.0, 10.0, 11.0, 12.0];
        let mut out = [0.0f32; 4];
        backend
            .gemm(
                MatrixRef::new(&lhs, 2, 3).unwrap(),
                MatrixRef::new(&rhs, 3, 2).unwrap(),
                None,
                &mut out,
            )
            .unwrap();
        assert_eq!(out, [58.0, 64.0, 139.0, 154.0]);
    }

    #[test]
    fn bias_is_added_per_column() {
        let backend = CpuMatMulBackend::new();
        let lhs = [1.0, 1.0];
        let rhs = [1.0, 2.0, 3.0, 4.0];
        let mut out = [f32::NAN; 2];
        backend
            .gemm(
                MatrixRef::new(&lhs, 1, 2).unwrap(),
                MatrixRef::new(&rhs, 2, 2).unwrap(),
                Some(&[10.0, -10.0]),
                &mut out,
            )
            .unwrap();
        assert_eq!(out, [14.0, -4.0]);
    }

    #[test]
    fn rejects_inner_dimension_mismatch() {
        let backend = CpuMatMulBackend::new();
        let lhs = [0.0; 6];
        let rhs = [0.0; 6];
        let mut out = [0.0f32; 4];
        let err = backend
            .gemm(
                MatrixRef::new(&lhs, 2, 3).unwrap(),
                MatrixRef::new(&rhs, 2, 3).unwrap(),
                None,
                &mut out,
            )
            .unwrap_err();
        assert!(matches!(err, BackendError::ShapeMismatch { .. }));
    }

    #[test]
    fn reports_reference_kind() {
        assert_eq!(CpuMatMulBackend.kind(), BackendKind::Reference);
        assert_eq!(CpuMatMulBackend.backend_name(), "cpu");
    }
}
