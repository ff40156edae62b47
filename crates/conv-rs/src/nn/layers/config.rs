//! Keras-style configuration for [`super::Conv2d`].

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ConfigError;
use crate::layout::AxisOrder;
use crate::ops::activation::Activation;
use crate::ops::conv::{BorderMode, Conv2dParams};

/// Layer hyperparameters. Field names follow the Keras `Conv2D` config so exported layer
/// configs deserialize directly; unknown keys are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conv2dConfig {
    /// Used in log lines only.
    #[serde(default)]
    pub name: Option<String>,
    pub filters: usize,
    #[serde(deserialize_with = "scalar_or_pair")]
    pub kernel_size: [usize; 2],
    #[serde(default = "unit_stride", deserialize_with = "scalar_or_pair")]
    pub strides: [usize; 2],
    #[serde(default)]
    pub padding: BorderMode,
    #[serde(default)]
    pub data_format: AxisOrder,
    #[serde(default = "default_use_bias")]
    pub use_bias: bool,
    #[serde(default)]
    pub activation: Activation,
}

fn unit_stride() -> [usize; 2] {
    [1, 1]
}

fn default_use_bias() -> bool {
    true
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ScalarOrPair {
    Scalar(usize),
    Pair(Vec<usize>),
}

fn scalar_or_pair<'de, D>(deserializer: D) -> Result<[usize; 2], D::Error>
where
    D: Deserializer<'de>,
{
    match ScalarOrPair::deserialize(deserializer)? {
        ScalarOrPair::Scalar(v) => Ok([v, v]),
        ScalarOrPair::Pair(values) => match values.as_slice() {
            [rows, cols] => Ok([*rows, *cols]),
            _ => Err(serde::de::Error::custom(format!(
                "expected an integer or a pair of integers, got {} values",
                values.len()
            ))),
        },
    }
}

impl Conv2dConfig {
    /// Channels-last, `valid`, unit stride, with bias, linear activation.
    pub fn new(filters: usize, kernel_size: [usize; 2]) -> Self {
        Self {
            name: None,
            filters,
            kernel_size,
            strides: unit_stride(),
            padding: BorderMode::Valid,
            data_format: AxisOrder::ChannelsLast,
            use_bias: true,
            activation: Activation::Linear,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_strides(mut self, strides: [usize; 2]) -> Self {
        self.strides = strides;
        self
    }

    pub fn with_padding(mut self, padding: BorderMode) -> Self {
        self.padding = padding;
        self
    }

    pub fn with_data_format(mut self, data_format: AxisOrder) -> Self {
        self.data_format = data_format;
        self
    }

    pub fn with_bias(mut self, use_bias: bool) -> Self {
        self.use_bias = use_bias;
        self
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    /// Parses a Keras layer config. Unknown enum names come back as their typed
    /// [`ConfigError`] variant; every other decoding failure is [`ConfigError::Malformed`].
    pub fn from_json_str(src: &str) -> Result<Self, ConfigError> {
        let malformed = |err: serde_json::Error| ConfigError::Malformed(err.to_string());
        let value: serde_json::Value = serde_json::from_str(src).map_err(malformed)?;
        if let Some(padding) = value.get("padding").and_then(serde_json::Value::as_str) {
            padding.parse::<BorderMode>()?;
        }
        if let Some(order) = value.get("data_format").and_then(serde_json::Value::as_str) {
            order.parse::<AxisOrder>()?;
        }
        if let Some(activation) = value.get("activation").and_then(serde_json::Value::as_str) {
            activation.parse::<Activation>()?;
        }
        let config: Conv2dConfig = serde_json::from_value(value).map_err(malformed)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("filters", self.filters),
            ("kernel_size[0]", self.kernel_size[0]),
            ("kernel_size[1]", self.kernel_size[1]),
            ("strides[0]", self.strides[0]),
            ("strides[1]", self.strides[1]),
        ];
        for (field, value) in checks {
            if value == 0 {
                return Err(ConfigError::NonPositive { field, value });
            }
        }
        Ok(())
    }

    pub fn params(&self) -> Conv2dParams {
        Conv2dParams {
            kernel: self.kernel_size,
            stride: self.strides,
            border_mode: self.padding,
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("conv2d")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_keras_config_with_defaults() {
        let config = Conv2dConfig::from_json_str(
            r#"{"name": "block1_conv1", "filters": 8, "kernel_size": 3, "trainable": true}"#,
        )
        .unwrap();
        assert_eq!(config.kernel_size, [3, 3]);
        assert_eq!(config.strides, [1, 1]);
        assert_eq!(config.padding, BorderMode::Valid);
        assert_eq!(config.data_format, AxisOrder::ChannelsLast);
        assert!(config.use_bias);
        assert_eq!(config.activation, Activation::Linear);
    }

    #[test]
    fn parses_full_config() {
        let config = Conv2dConfig::from_json_str(
            r#"{"filters": 4, "kernel_size": [3, 5], "strides": [2, 1], "padding": "same",
                "data_format": "channels_first", "use_bias": false, "activation": "relu"}"#,
        )
        .unwrap();
        assert_eq!(config.kernel_size, [3, 5]);
        assert_eq!(config.strides, [2, 1]);
        assert_eq!(config.padding, BorderMode::Same);
        assert_eq!(config.data_format, AxisOrder::ChannelsFirst);
        assert!(!config.use_bias);
        assert_eq!(config.activation, Activation::Relu);
    }

    #[test]
    fn invalid_border_mode_keeps_its_variant() {
        let err = Conv2dConfig::from_json_str(
            r#"{"filters": 1, "kernel_size": 3, "padding": "causal"}"#,
        )
        .unwrap_err();
        assert_eq!(err, ConfigError::UnknownBorderMode("causal".to_string()));
        assert!(err.to_string().contains("unknown border mode 'causal'"));
    }

    #[test]
    fn invalid_axis_order_and_activation_keep_their_variants() {
        let err = Conv2dConfig::from_json_str(
            r#"{"filters": 1, "kernel_size": 3, "data_format": "nhwc"}"#,
        )
        .unwrap_err();
        assert_eq!(err, ConfigError::UnknownAxisOrder("nhwc".to_string()));

        let err = Conv2dConfig::from_json_str(
            r#"{"filters": 1, "kernel_size": 3, "activation": "swish2"}"#,
        )
        .unwrap_err();
        assert_eq!(err, ConfigError::UnknownActivation("swish2".to_string()));
    }

    #[test]
    fn structural_errors_stay_malformed() {
        let err = Conv2dConfig::from_json_str(r#"{"kernel_size": 3}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Malformed(_)), "{err:?}");
        let err = Conv2dConfig::from_json_str("not json").unwrap_err();
        assert!(matches!(err, ConfigError::Malformed(_)), "{err:?}");
    }

    #[test]
    fn zero_extents_fail_validation() {
        assert_eq!(
            Conv2dConfig::new(0, [3, 3]).validate(),
            Err(ConfigError::NonPositive {
                field: "filters",
                value: 0
            })
        );
        assert_eq!(
            Conv2dConfig::new(1, [3, 3]).with_strides([1, 0]).validate(),
            Err(ConfigError::NonPositive {
                field: "strides[1]",
                value: 0
            })
        );
        assert!(Conv2dConfig::from_json_str(r#"{"filters": 1, "kernel_size": [1, 2, 3]}"#).is_err());
    }
}
