use conv_rs::tensor::{Shape, Tensor};
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Relative tolerance accelerated backends must meet against the reference.
pub const RTOL: f64 = 1e-4;
pub const ATOL: f64 = 1e-5;

pub fn seeded_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

pub fn random_vec(rng: &mut StdRng, len: usize) -> Vec<f32> {
    (0..len).map(|_| rng.gen::<f32>() * 2.0 - 1.0).collect()
}

pub fn random_tensor(rng: &mut StdRng, shape: &[usize]) -> Tensor {
    let len = shape.iter().product();
    tensor_from_vec(shape, random_vec(rng, len))
}

pub fn tensor_from_vec(shape: &[usize], data: Vec<f32>) -> Tensor {
    Tensor::from_vec(Shape::new(shape.to_vec()), data).unwrap()
}

/// `0, 1, 2, ...` laid out row-major over `shape`.
pub fn ramp(shape: &[usize]) -> Tensor {
    let len: usize = shape.iter().product();
    tensor_from_vec(shape, (0..len).map(|v| v as f32).collect())
}

pub fn assert_close(expected: &[f32], actual: &[f32]) {
    assert_close_tol(expected, actual, ATOL, RTOL);
}

pub fn assert_close_tol(expected: &[f32], actual: &[f32], atol: f64, rtol: f64) {
    assert_eq!(expected.len(), actual.len());
    for (idx, (&e, &a)) in expected.iter().zip(actual.iter()).enumerate() {
        let diff = (e as f64 - a as f64).abs();
        let thresh = atol + rtol * e.abs().max(a.abs()) as f64;
        assert!(
            diff <= thresh,
            "value mismatch at index {idx}: expected {e}, actual {a}, diff {diff}, thresh {thresh}"
        );
    }
}
