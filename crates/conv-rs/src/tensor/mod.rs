//! Core tensor abstractions shared across the convolution kernels and backends.
//!
//! Only dense `f32` host tensors exist here; accelerated backends borrow their buffers as
//! row-major matrix views rather than owning device copies.

mod host_tensor;
pub mod shape;

pub use host_tensor::Tensor;
pub use shape::Shape;
