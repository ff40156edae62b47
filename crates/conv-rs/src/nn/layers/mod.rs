//! Convolution layer and its configuration.

pub mod config;
pub mod conv;

pub use config::Conv2dConfig;
pub use conv::{Conv2d, WeightState};
