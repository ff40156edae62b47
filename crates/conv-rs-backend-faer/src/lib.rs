//! faer-accelerated GEMM backend.
//!
//! Computes the row-major product `out[m, n] = lhs[m, k] x rhs[k, n]` as its column-major
//! transpose `out^T[n, m] = rhs^T x lhs^T`, which lets faer write straight into the caller's
//! buffer without a copy.

use conv_rs::backend::spec::{BackendKind, BackendResult, GemmDims, MatMulBackend, MatrixRef};
use conv_rs::profiling::{self, ScopeMeta, WorkStats};
use faer::linalg::matmul::matmul;
use faer::mat::{MatMut, MatRef};
use faer::utils::thread::join_raw;
use faer::{Accum, Par};
use log::debug;

fn faer_parallelism() -> Par {
    if let Some(threads) = conv_rs::env::faer_threads() {
        return if threads == 1 {
            Par::Seq
        } else {
            Par::rayon(threads)
        };
    }
    let par = faer::get_global_parallelism();
    if par.degree() == 1 {
        Par::Seq
    } else {
        par
    }
}

/// GEMM through faer, split into independent tiles across the configured thread pool.
///
/// Agrees with the reference backend within `1e-4` relative tolerance; summation order differs,
/// so results are not bit-identical.
#[derive(Debug, Clone, Copy)]
pub struct FaerMatMulBackend {
    par: Par,
}

impl Default for FaerMatMulBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FaerMatMulBackend {
    /// Uses `CONVRS_FAER_THREADS` when set, otherwise faer's global parallelism.
    pub fn new() -> Self {
        let par = faer_parallelism();
        debug!("faer matmul backend with parallelism degree {}", par.degree());
        Self { par }
    }

    /// Single-threaded; mostly useful for deterministic benchmarking.
    pub fn sequential() -> Self {
        Self { par: Par::Seq }
    }
}

impl MatMulBackend for FaerMatMulBackend {
    fn backend_name(&self) -> &str {
        "faer"
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Accelerated
    }

    fn gemm(
        &self,
        lhs: MatrixRef<'_>,
        rhs: MatrixRef<'_>,
        bias: Option<&[f32]>,
        out: &mut [f32],
    ) -> BackendResult<()> {
        let dims = GemmDims::validate(&lhs, &rhs, bias, out)?;
        let GemmDims { m, k, n } = dims;
        if m == 0 || n == 0 {
            return Ok(());
        }

        {
            let _scope = profiling::backend_scope_with_meta("backend.faer.gemm", || {
                let bytes_per_elem = 4u64;
                let out_elems = (m as u64).saturating_mul(n as u64);
                ScopeMeta::default().with_work(WorkStats {
                    elements: out_elems,
                    bytes_read: ((m * k + k * n) as u64).saturating_mul(bytes_per_elem),
                    bytes_written: out_elems.saturating_mul(bytes_per_elem),
                    flops: dims.flops(),
                    alloc_bytes: 0,
                    alloc_count: 0,
                })
            });
            let patches_t = MatRef::from_row_major_slice(lhs.data, m, k).transpose();
            let weights_t = MatRef::from_row_major_slice(rhs.data, k, n).transpose();
            let out_view = MatMut::from_column_major_slice_mut(out, n, m);
            gemm_tiled(self.par, out_view, weights_t, patches_t);
        }

        if let Some(bias) = bias {
            let _bias_scope = profiling::backend_scope_with_meta("backend.faer.bias_add", || {
                let out_elems = (m as u64).saturating_mul(n as u64);
                ScopeMeta::default().with_work(WorkStats {
                    elements: out_elems,
                    bytes_read: out_elems.saturating_add(n as u64).saturating_mul(4),
                    bytes_written: out_elems.saturating_mul(4),
                    flops: out_elems,
                    alloc_bytes: 0,
                    alloc_count: 0,
                })
            });
            for row in out.chunks_exact_mut(n) {
                for (slot, b) in row.iter_mut().zip(bias.iter()) {
                    *slot += *b;
                }
            }
        }
        Ok(())
    }
}

/// Smallest tile extents handed to a single-threaded faer call.
const TILE_FILTERS: usize = 64;
const TILE_POSITIONS: usize = 16;

/// Writes `out = weights_t x patches_t`, where `out` is the column-major `[F, P]` view of the
/// row-major `[P, F]` result.
///
/// Halves whichever of the filter and position axes holds more tiles and runs both halves under
/// `join_raw` until tiles reach the minimum extent or the thread budget runs out.
fn gemm_tiled(
    par: Par,
    mut out: MatMut<'_, f32>,
    weights_t: MatRef<'_, f32>,
    patches_t: MatRef<'_, f32>,
) {
    let (filters, positions) = (out.nrows(), out.ncols());
    let split_filters =
        filters >= 2 * TILE_FILTERS && filters / TILE_FILTERS >= positions / TILE_POSITIONS;
    let split_positions = !split_filters && positions >= 2 * TILE_POSITIONS;
    if par.degree() <= 1 || !(split_filters || split_positions) {
        matmul(&mut out, Accum::Replace, weights_t, patches_t, 1.0f32, Par::Seq);
        return;
    }

    if split_filters {
        let mid = filters / 2;
        let (out_top, out_bottom) = out.split_at_row_mut(mid);
        let (weights_top, weights_bottom) = weights_t.split_at_row(mid);
        join_raw(
            |par| gemm_tiled(par, out_top, weights_top, patches_t),
            |par| gemm_tiled(par, out_bottom, weights_bottom, patches_t),
            par,
        );
    } else {
        let mid = positions / 2;
        let (out_left, out_right) = out.split_at_col_mut(mid);
        let (patches_left, patches_right) = patches_t.split_at_col(mid);
        join_raw(
            |par| gemm_tiled(par, out_left, weights_t, patches_left),
            |par| gemm_tiled(par, out_right, weights_t, patches_right),
            par,
        );
    }
}

/// Register the faer backend with the global backend registry.
///
/// This function is called automatically via a static initializer, but can also
/// be called manually to ensure the backend is registered.
pub fn register_faer_backend() {
    conv_rs::backend::registry::register_matmul_backend("faer", FaerMatMulBackend::new);
}

// Auto-register on library load
#[cfg(not(target_family = "wasm"))]
#[used]
#[link_section = ".init_array"]
static REGISTER_FAER_BACKEND: extern "C" fn() = {
    extern "C" fn register() {
        register_faer_backend();
    }
    register
};

#[cfg(test)]
mod tests {
    use super::*;
    use conv_rs_backend_ref_cpu::CpuMatMulBackend;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_vec(rng: &mut StdRng, len: usize) -> Vec<f32> {
        (0..len).map(|_| rng.gen::<f32>() * 2.0 - 1.0).collect()
    }

    fn assert_gemm_matches_reference(backend: &FaerMatMulBackend, m: usize, k: usize, n: usize) {
        let mut rng = StdRng::seed_from_u64((m * 31 + k * 7 + n) as u64);
        let lhs = random_vec(&mut rng, m * k);
        let rhs = random_vec(&mut rng, k * n);
        let bias = random_vec(&mut rng, n);

        let mut expected = vec![0.0f32; m * n];
        CpuMatMulBackend::new()
            .gemm(
                MatrixRef::new(&lhs, m, k).unwrap(),
                MatrixRef::new(&rhs, k, n).unwrap(),
                Some(&bias),
                &mut expected,
            )
            .unwrap();
        let mut actual = vec![0.0f32; m * n];
        backend
            .gemm(
                MatrixRef::new(&lhs, m, k).unwrap(),
                MatrixRef::new(&rhs, k, n).unwrap(),
                Some(&bias),
                &mut actual,
            )
            .unwrap();

        for (idx, (&e, &a)) in expected.iter().zip(actual.iter()).enumerate() {
            let thresh = 1e-4 + 1e-4 * e.abs().max(a.abs());
            assert!(
                (e - a).abs() <= thresh,
                "[{m}x{k}x{n}] mismatch at {idx}: expected {e}, actual {a}"
            );
        }
    }

    #[test]
    fn sequential_matches_reference() {
        let backend = FaerMatMulBackend::sequential();
        for (m, k, n) in [(1, 1, 1), (7, 13, 9), (33, 65, 31), (100, 27, 16)] {
            assert_gemm_matches_reference(&backend, m, k, n);
        }
    }

    #[test]
    fn tiled_split_matches_reference() {
        // large enough to split on both output axes
        let backend = FaerMatMulBackend {
            par: Par::rayon(4),
        };
        assert_gemm_matches_reference(&backend, 300, 72, 160);
        assert_gemm_matches_reference(&backend, 40, 18, 200);
    }

    #[test]
    fn reports_accelerated_kind() {
        let backend = FaerMatMulBackend::sequential();
        assert_eq!(backend.kind(), BackendKind::Accelerated);
        assert_eq!(backend.backend_name(), "faer");
    }
}
