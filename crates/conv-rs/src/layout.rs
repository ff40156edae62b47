//! Tensor layout helpers.
//!
//! Kernels operate on a single canonical layout: channels-last feature maps `[H, W, C]` and
//! kernels `[KH, KW, C_in, C_out]`. This module defines the axis-order enum and the
//! permutations that move data into and out of that layout.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Axis convention of the tensors a caller hands to a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AxisOrder {
    /// `[H, W, C]` feature maps and `[KH, KW, C_in, C_out]` kernels.
    #[default]
    ChannelsLast,
    /// `[C, H, W]` feature maps and `[C_out, C_in, KH, KW]` kernels.
    ChannelsFirst,
}

impl AxisOrder {
    pub const fn as_str(self) -> &'static str {
        match self {
            AxisOrder::ChannelsLast => "channels_last",
            AxisOrder::ChannelsFirst => "channels_first",
        }
    }

    pub const fn is_canonical(self) -> bool {
        matches!(self, AxisOrder::ChannelsLast)
    }

    /// Permutation taking a feature map in this order to `[H, W, C]`.
    pub const fn perm_feature_map_to_canonical(self) -> [usize; 3] {
        match self {
            AxisOrder::ChannelsLast => [0, 1, 2],
            AxisOrder::ChannelsFirst => [1, 2, 0],
        }
    }

    /// Permutation taking an `[H, W, C]` feature map back to this order.
    pub const fn perm_feature_map_from_canonical(self) -> [usize; 3] {
        match self {
            AxisOrder::ChannelsLast => [0, 1, 2],
            AxisOrder::ChannelsFirst => [2, 0, 1],
        }
    }

    /// Permutation taking a kernel in this order to `[KH, KW, C_in, C_out]`.
    pub const fn perm_kernel_to_canonical(self) -> [usize; 4] {
        match self {
            AxisOrder::ChannelsLast => [0, 1, 2, 3],
            AxisOrder::ChannelsFirst => [2, 3, 1, 0],
        }
    }

    /// Maps canonical `[H, W, C]` extents to the caller's order.
    pub const fn feature_map_dims(self, rows: usize, cols: usize, channels: usize) -> [usize; 3] {
        match self {
            AxisOrder::ChannelsLast => [rows, cols, channels],
            AxisOrder::ChannelsFirst => [channels, rows, cols],
        }
    }

    /// Splits caller-ordered feature-map dims into canonical `(H, W, C)`.
    pub const fn split_feature_map_dims(self, dims: [usize; 3]) -> (usize, usize, usize) {
        match self {
            AxisOrder::ChannelsLast => (dims[0], dims[1], dims[2]),
            AxisOrder::ChannelsFirst => (dims[1], dims[2], dims[0]),
        }
    }
}

impl FromStr for AxisOrder {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "channels_last" | "tf" => Ok(AxisOrder::ChannelsLast),
            "channels_first" | "th" => Ok(AxisOrder::ChannelsFirst),
            _ => Err(ConfigError::UnknownAxisOrder(s.to_string())),
        }
    }
}

impl TryFrom<String> for AxisOrder {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AxisOrder> for String {
    fn from(value: AxisOrder) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for AxisOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_keras_and_legacy_names() {
        assert_eq!("channels_last".parse::<AxisOrder>(), Ok(AxisOrder::ChannelsLast));
        assert_eq!("TH".parse::<AxisOrder>(), Ok(AxisOrder::ChannelsFirst));
        assert_eq!(
            "nchw".parse::<AxisOrder>(),
            Err(ConfigError::UnknownAxisOrder("nchw".into()))
        );
    }

    #[test]
    fn feature_map_permutations_are_inverse() {
        let order = AxisOrder::ChannelsFirst;
        let to = order.perm_feature_map_to_canonical();
        let from = order.perm_feature_map_from_canonical();
        for axis in 0..3 {
            assert_eq!(to[from[axis]], axis);
        }
        assert_eq!(order.feature_map_dims(4, 5, 3), [3, 4, 5]);
        assert_eq!(order.split_feature_map_dims([3, 4, 5]), (4, 5, 3));
    }
}
