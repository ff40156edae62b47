//! Host-side operators: the convolution pipeline and pointwise activations.

pub mod activation;
pub mod conv;

pub use activation::Activation;
pub use conv::{conv2d, BorderMode, Conv2dParams, ConvGeometry, Padding2d};
