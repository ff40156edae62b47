//! GEMM backend contract and the runtime registry used to pick an implementation.
//!
//! The convolution layer lowers to a single matrix multiply; this module only describes that
//! multiply. Concrete strategies live in the `conv-rs-backend-*` crates.

pub mod registry;
pub mod spec;

pub use spec::{BackendError, BackendKind, BackendResult, GemmDims, MatMulBackend, MatrixRef};
