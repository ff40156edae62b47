//! Pointwise activations applied in place to a finished feature map.
//!
//! Activations are identified by their Keras names. Everything except `softmax` is elementwise;
//! `softmax` normalizes over the last (channel) axis of a channels-last tensor.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::tensor::Tensor;

const SELU_ALPHA: f32 = 1.673_263_2;
const SELU_SCALE: f32 = 1.050_701;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Activation {
    #[default]
    Linear,
    Relu,
    Relu6,
    Sigmoid,
    HardSigmoid,
    Tanh,
    Softmax,
    Softplus,
    Softsign,
    Elu,
    Selu,
    Gelu,
    Silu,
}

impl Activation {
    pub const fn as_str(self) -> &'static str {
        match self {
            Activation::Linear => "linear",
            Activation::Relu => "relu",
            Activation::Relu6 => "relu6",
            Activation::Sigmoid => "sigmoid",
            Activation::HardSigmoid => "hard_sigmoid",
            Activation::Tanh => "tanh",
            Activation::Softmax => "softmax",
            Activation::Softplus => "softplus",
            Activation::Softsign => "softsign",
            Activation::Elu => "elu",
            Activation::Selu => "selu",
            Activation::Gelu => "gelu",
            Activation::Silu => "silu",
        }
    }

    /// Applies the activation to every element of `tensor`.
    pub fn apply_inplace(self, tensor: &mut Tensor) {
        let _scope = crate::profiling::functional_scope("conv_rs::ops::activation", self.as_str());
        match self {
            Activation::Linear => {}
            Activation::Relu => tensor.map_inplace(|x| x.max(0.0)),
            Activation::Relu6 => tensor.map_inplace(|x| x.clamp(0.0, 6.0)),
            Activation::Sigmoid => tensor.map_inplace(sigmoid),
            Activation::HardSigmoid => tensor.map_inplace(|x| (0.2 * x + 0.5).clamp(0.0, 1.0)),
            Activation::Tanh => tensor.map_inplace(f32::tanh),
            Activation::Softmax => softmax_last_axis(tensor),
            Activation::Softplus => tensor.map_inplace(softplus),
            Activation::Softsign => tensor.map_inplace(|x| x / (1.0 + x.abs())),
            Activation::Elu => tensor.map_inplace(|x| if x > 0.0 { x } else { x.exp_m1() }),
            Activation::Selu => tensor.map_inplace(|x| {
                if x > 0.0 {
                    SELU_SCALE * x
                } else {
                    SELU_SCALE * SELU_ALPHA * x.exp_m1()
                }
            }),
            Activation::Gelu => {
                tensor.map_inplace(|x| 0.5 * x * (1.0 + erf(x * std::f32::consts::FRAC_1_SQRT_2)))
            }
            Activation::Silu => tensor.map_inplace(|x| x * sigmoid(x)),
        }
    }
}

fn sigmoid(x: f32) -> f32 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

fn softplus(x: f32) -> f32 {
    // log(1 + e^x) without overflow for large x
    x.max(0.0) + (-x.abs()).exp().ln_1p()
}

/// Abramowitz-Stegun 7.1.26, |error| < 1.5e-7.
fn erf(x: f32) -> f32 {
    let sign = x.signum();
    let x = x.abs() as f64;
    let t = 1.0 / (1.0 + 0.327_591_1 * x);
    let poly = t
        * (0.254_829_592
            + t * (-0.284_496_736 + t * (1.421_413_741 + t * (-1.453_152_027 + t * 1.061_405_429))));
    sign * (1.0 - poly * (-x * x).exp()) as f32
}

fn softmax_last_axis(tensor: &mut Tensor) {
    let axis_len = *tensor.shape().dims().last().unwrap_or(&1);
    if axis_len == 0 {
        return;
    }
    for row in tensor.data_mut().chunks_exact_mut(axis_len) {
        let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let mut sum = 0.0f32;
        for v in row.iter_mut() {
            *v = (*v - max).exp();
            sum += *v;
        }
        for v in row.iter_mut() {
            *v /= sum;
        }
    }
}

impl FromStr for Activation {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let activation = match s.trim().to_ascii_lowercase().as_str() {
            "linear" | "" => Activation::Linear,
            "relu" => Activation::Relu,
            "relu6" => Activation::Relu6,
            "sigmoid" => Activation::Sigmoid,
            "hard_sigmoid" => Activation::HardSigmoid,
            "tanh" => Activation::Tanh,
            "softmax" => Activation::Softmax,
            "softplus" => Activation::Softplus,
            "softsign" => Activation::Softsign,
            "elu" => Activation::Elu,
            "selu" => Activation::Selu,
            "gelu" => Activation::Gelu,
            "silu" | "swish" => Activation::Silu,
            _ => return Err(ConfigError::UnknownActivation(s.to_string())),
        };
        Ok(activation)
    }
}

impl TryFrom<String> for Activation {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Activation> for String {
    fn from(value: Activation) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
