//! 2D convolution forward pass lowered to patch extraction plus one matrix product.
//!
//! The numeric core lives in [`ops::conv`]; [`nn::layers::Conv2d`] wraps it with axis-order
//! handling, weight/geometry caching, and an activation. Matrix products go through a
//! [`backend::MatMulBackend`] chosen when the layer is built.

pub mod backend;
pub mod env;
pub mod error;
pub mod layout;
pub mod module;
pub mod nn;
pub mod observer;
pub mod ops;
pub mod profiling;
pub mod tensor;

pub use backend::{BackendKind, MatMulBackend};
pub use error::{ConfigError, ConvError};
pub use layout::AxisOrder;
pub use nn::layers::{Conv2d, Conv2dConfig, WeightState};
pub use ops::{Activation, BorderMode};
pub use tensor::{Shape, Tensor};
