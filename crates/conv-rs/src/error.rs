//! Typed failures raised by layer construction and the convolution pipeline.
//!
//! Public entry points return `anyhow::Result`; these enums travel inside so callers can
//! `downcast_ref` when they need to branch on the failure kind.

use thiserror::Error;

/// Invalid layer configuration, reported at construction time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unknown border mode '{0}' (expected 'valid' or 'same')")]
    UnknownBorderMode(String),
    #[error("unknown axis order '{0}' (expected 'channels_last' or 'channels_first')")]
    UnknownAxisOrder(String),
    #[error("unknown activation '{0}'")]
    UnknownActivation(String),
    #[error("{field} must be >= 1, got {value}")]
    NonPositive { field: &'static str, value: usize },
    #[error("invalid layer config: {0}")]
    Malformed(String),
}

/// Shape and state violations detected while running the operator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConvError {
    #[error("conv2d weights have not been assigned")]
    WeightsUnset,
    #[error("conv2d input has {found} channels but the kernel expects {expected}")]
    ChannelMismatch { expected: usize, found: usize },
    #[error("conv2d expects a rank-3 feature map, got {0:?}")]
    InputRank(Vec<usize>),
    #[error(
        "conv2d kernel [{kernel_rows}, {kernel_cols}] exceeds padded input [{padded_rows}, {padded_cols}]"
    )]
    EmptyOutput {
        kernel_rows: usize,
        kernel_cols: usize,
        padded_rows: usize,
        padded_cols: usize,
    },
    #[error("conv2d expects {expected} weight tensors, got {found}")]
    WeightCount { expected: usize, found: usize },
    #[error("conv2d {what} shape {found:?} does not match expected {expected:?}")]
    WeightShape {
        what: &'static str,
        expected: Vec<usize>,
        found: Vec<usize>,
    },
}
