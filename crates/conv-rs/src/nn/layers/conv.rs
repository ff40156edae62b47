//! 2D convolution layer (canonical NHWC-style `[H, W, C]` internal layout).
//!
//! The layer owns three pieces of derived state:
//! - the kernel in canonical `[KH, KW, C_in, F]` order, transposed once on assignment;
//! - the `[K, F]` weight matrix, rebuilt only after a reassignment ([`WeightState`]);
//! - the geometry for the most recent input extent, rebuilt only when `(H, W)` changes.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use log::debug;

use super::config::Conv2dConfig;
use crate::backend::registry;
use crate::backend::MatMulBackend;
use crate::error::ConvError;
use crate::layout::AxisOrder;
use crate::module::{Module, ParamVisitor};
use crate::observer::{ConvPhase, PhaseObserver, PhaseSpan};
use crate::ops::conv::{compute_geometry, conv2d_with_matrix, reshape_kernel, ConvGeometry};
use crate::profiling;
use crate::tensor::Tensor;

/// Observable state of the cached weight matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightState {
    /// No weights assigned yet; calls fail.
    Unset,
    /// Weights assigned, matrix not yet rebuilt for them.
    Stale,
    /// Matrix matches the assigned kernel.
    Ready,
}

enum WeightCache {
    Unset,
    Stale {
        kernel: Tensor,
        bias: Option<Tensor>,
    },
    Ready {
        kernel: Tensor,
        bias: Option<Tensor>,
        matrix: Tensor,
    },
}

impl WeightCache {
    fn state(&self) -> WeightState {
        match self {
            WeightCache::Unset => WeightState::Unset,
            WeightCache::Stale { .. } => WeightState::Stale,
            WeightCache::Ready { .. } => WeightState::Ready,
        }
    }

    fn kernel(&self) -> Option<&Tensor> {
        match self {
            WeightCache::Unset => None,
            WeightCache::Stale { kernel, .. } | WeightCache::Ready { kernel, .. } => Some(kernel),
        }
    }

    fn bias(&self) -> Option<&Tensor> {
        match self {
            WeightCache::Unset => None,
            WeightCache::Stale { bias, .. } | WeightCache::Ready { bias, .. } => bias.as_ref(),
        }
    }

    /// Any state -> Stale.
    fn assign(&mut self, kernel: Tensor, bias: Option<Tensor>) {
        *self = WeightCache::Stale { kernel, bias };
    }

    /// Stale -> Ready. Returns whether a rebuild happened.
    fn ensure_ready(&mut self) -> Result<bool> {
        match std::mem::replace(self, WeightCache::Unset) {
            WeightCache::Unset => Err(ConvError::WeightsUnset.into()),
            ready @ WeightCache::Ready { .. } => {
                *self = ready;
                Ok(false)
            }
            WeightCache::Stale { kernel, bias } => match reshape_kernel(&kernel) {
                Ok(matrix) => {
                    *self = WeightCache::Ready {
                        kernel,
                        bias,
                        matrix,
                    };
                    Ok(true)
                }
                Err(err) => {
                    *self = WeightCache::Stale { kernel, bias };
                    Err(err)
                }
            },
        }
    }

    fn matrix_and_bias(&self) -> Result<(&Tensor, Option<&Tensor>)> {
        match self {
            WeightCache::Ready { matrix, bias, .. } => Ok((matrix, bias.as_ref())),
            _ => Err(ConvError::WeightsUnset.into()),
        }
    }
}

pub struct Conv2d {
    config: Conv2dConfig,
    backend: Arc<dyn MatMulBackend>,
    weights: WeightCache,
    geometry: Option<ConvGeometry>,
    observer: Option<Arc<dyn PhaseObserver>>,
}

impl Conv2d {
    /// Validates `config` and binds the layer to `backend` for its whole lifetime.
    pub fn new(config: Conv2dConfig, backend: Arc<dyn MatMulBackend>) -> Result<Self> {
        config.validate()?;
        debug!(
            "conv2d '{}': {} filters {:?}, stride {:?}, {} / {}, backend {}",
            config.display_name(),
            config.filters,
            config.kernel_size,
            config.strides,
            config.padding,
            config.data_format,
            backend.backend_name()
        );
        Ok(Self {
            config,
            backend,
            weights: WeightCache::Unset,
            geometry: None,
            observer: None,
        })
    }

    /// Resolves `backend_name` through the global registry.
    pub fn from_registry(config: Conv2dConfig, backend_name: &str) -> Result<Self> {
        let backend = registry::create_backend(backend_name).ok_or_else(|| {
            anyhow!(
                "matmul backend '{}' is not registered (available: {:?})",
                backend_name,
                registry::list_backends()
            )
        })?;
        Self::new(config, backend)
    }

    /// Uses the registry entry named by `CONVRS_BACKEND` (default `"cpu"`).
    pub fn from_env(config: Conv2dConfig) -> Result<Self> {
        Self::from_registry(config, crate::env::default_backend_name())
    }

    pub fn with_observer(mut self, observer: Arc<dyn PhaseObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn config(&self) -> &Conv2dConfig {
        &self.config
    }

    pub fn backend(&self) -> Arc<dyn MatMulBackend> {
        Arc::clone(&self.backend)
    }

    pub fn weight_state(&self) -> WeightState {
        self.weights.state()
    }

    /// Assigned kernel in canonical `[KH, KW, C_in, F]` order.
    pub fn kernel(&self) -> Option<&Tensor> {
        self.weights.kernel()
    }

    pub fn bias(&self) -> Option<&Tensor> {
        self.weights.bias()
    }

    /// Assigned weights in the layer's `data_format` convention, i.e. what [`Self::set_weights`]
    /// accepts. Empty before assignment.
    pub fn weights(&self) -> Result<Vec<Tensor>> {
        let Some(kernel) = self.weights.kernel() else {
            return Ok(Vec::new());
        };
        let order = self.config.data_format;
        let kernel = if order.is_canonical() {
            kernel.clone()
        } else {
            // inverse of [2, 3, 1, 0]
            kernel.permute(&[3, 2, 0, 1])?
        };
        let mut out = vec![kernel];
        out.extend(self.weights.bias().cloned());
        Ok(out)
    }

    /// Input channel count implied by the assigned kernel.
    pub fn input_channels(&self) -> Option<usize> {
        self.weights.kernel().map(|kernel| kernel.shape().dims()[2])
    }

    /// Assigns `[kernel]` or `[kernel, bias]` (when `use_bias`).
    ///
    /// The kernel is given in the layer's `data_format` convention: `[KH, KW, C_in, F]` for
    /// channels-last, `[F, C_in, KH, KW]` for channels-first. It is transposed to canonical order
    /// here and never again. The weight matrix is rebuilt on the next call or [`Self::prepare`].
    pub fn set_weights(&mut self, weights: Vec<Tensor>) -> Result<()> {
        let expected = if self.config.use_bias { 2 } else { 1 };
        if weights.len() != expected {
            return Err(ConvError::WeightCount {
                expected,
                found: weights.len(),
            }
            .into());
        }
        let mut weights = weights.into_iter();
        let (Some(kernel), bias) = (weights.next(), weights.next()) else {
            return Err(ConvError::WeightCount { expected, found: 0 }.into());
        };

        let order = self.config.data_format;
        let kdims = kernel.shape().dims();
        if kdims.len() != 4 {
            return Err(ConvError::WeightShape {
                what: "kernel",
                expected: self.expected_kernel_dims(None),
                found: kdims.to_vec(),
            }
            .into());
        }
        let kernel = if order.is_canonical() {
            kernel
        } else {
            kernel.permute(&order.perm_kernel_to_canonical())?
        };
        let input_channels = kernel.shape().dims()[2];
        if input_channels == 0 {
            return Err(ConvError::WeightShape {
                what: "kernel",
                expected: self.expected_kernel_dims(None),
                found: kdims_in_order(&kernel, order),
            }
            .into());
        }
        let canonical = vec![
            self.config.kernel_size[0],
            self.config.kernel_size[1],
            input_channels,
            self.config.filters,
        ];
        if kernel.shape().dims() != canonical.as_slice() {
            return Err(ConvError::WeightShape {
                what: "kernel",
                expected: self.expected_kernel_dims(Some(input_channels)),
                found: kdims_in_order(&kernel, order),
            }
            .into());
        }

        if let Some(bias) = &bias {
            if bias.shape().dims() != [self.config.filters] {
                return Err(ConvError::WeightShape {
                    what: "bias",
                    expected: vec![self.config.filters],
                    found: bias.shape().dims().to_vec(),
                }
                .into());
            }
        }

        debug!(
            "conv2d '{}': weights assigned, kernel {:?}",
            self.config.display_name(),
            kernel.shape().dims()
        );
        self.weights.assign(kernel, bias);
        Ok(())
    }

    /// Builds the weight matrix now instead of on the next call.
    pub fn prepare(&mut self) -> Result<()> {
        self.refresh_weight_matrix().map(|_| ())
    }

    fn refresh_weight_matrix(&mut self) -> Result<bool> {
        let rebuilt = self.weights.ensure_ready()?;
        if rebuilt {
            profiling::cache_event("conv2d.weight_matrix.rebuild");
            debug!(
                "conv2d '{}': rebuilt weight matrix",
                self.config.display_name()
            );
        } else {
            profiling::cache_event("conv2d.weight_matrix.hit");
        }
        Ok(rebuilt)
    }

    fn expected_kernel_dims(&self, input_channels: Option<usize>) -> Vec<usize> {
        // 0 stands for "any" when the channel count is unknown
        let c = input_channels.unwrap_or(0);
        let [kh, kw] = self.config.kernel_size;
        let f = self.config.filters;
        if self.config.data_format.is_canonical() {
            vec![kh, kw, c, f]
        } else {
            vec![f, c, kh, kw]
        }
    }

    /// Geometry for a canonical `rows x cols` input, cached per extent.
    fn geometry_for(&mut self, rows: usize, cols: usize) -> Result<ConvGeometry> {
        if let Some(geometry) = self.geometry {
            if geometry.input_rows == rows && geometry.input_cols == cols {
                return Ok(geometry);
            }
        }
        let geometry = compute_geometry(rows, cols, self.config.params())?;
        debug!(
            "conv2d '{}': geometry for [{}, {}] -> [{}, {}], padding {:?}",
            self.config.display_name(),
            rows,
            cols,
            geometry.out_rows,
            geometry.out_cols,
            geometry.padding
        );
        self.geometry = Some(geometry);
        Ok(geometry)
    }

    /// Output dims, in the layer's `data_format`, for an input of `input_dims`.
    pub fn compute_output_shape(&self, input_dims: &[usize]) -> Result<Vec<usize>> {
        let dims: [usize; 3] = input_dims
            .try_into()
            .map_err(|_| ConvError::InputRank(input_dims.to_vec()))?;
        let order = self.config.data_format;
        let (rows, cols, _) = order.split_feature_map_dims(dims);
        let geometry = compute_geometry(rows, cols, self.config.params())?;
        Ok(order
            .feature_map_dims(geometry.out_rows, geometry.out_cols, self.config.filters)
            .to_vec())
    }

    /// Runs the layer on one feature map given in the layer's `data_format`.
    pub fn call(&mut self, input: &Tensor) -> Result<Tensor> {
        let _scope = profiling::layer_scope("Conv2d::call");
        let dims: [usize; 3] = input
            .shape()
            .dims()
            .try_into()
            .map_err(|_| ConvError::InputRank(input.shape().dims().to_vec()))?;
        let order = self.config.data_format;
        let observer = self.observer.clone();
        let observer = observer.as_ref();

        let canonical: Cow<'_, Tensor> = {
            let _span = PhaseSpan::enter(ConvPhase::ToCanonical, observer);
            if order.is_canonical() {
                Cow::Borrowed(input)
            } else {
                Cow::Owned(input.permute(&order.perm_feature_map_to_canonical())?)
            }
        };
        let (rows, cols, channels) = order.split_feature_map_dims(dims);

        let geometry = {
            let _span = PhaseSpan::enter(ConvPhase::Geometry, observer);
            self.geometry_for(rows, cols)?
        };

        {
            let _span = PhaseSpan::enter(ConvPhase::WeightMatrix, observer);
            self.refresh_weight_matrix()?;
        }
        if let Some(expected) = self.input_channels() {
            if expected != channels {
                return Err(ConvError::ChannelMismatch {
                    expected,
                    found: channels,
                }
                .into());
            }
        }

        let (matrix, bias) = self.weights.matrix_and_bias()?;
        let mut output = conv2d_with_matrix(
            self.backend.as_ref(),
            &canonical,
            matrix,
            bias.map(Tensor::data),
            &geometry,
            observer,
        )?;
        drop(canonical);

        {
            let _span = PhaseSpan::enter(ConvPhase::Activation, observer);
            self.config.activation.apply_inplace(&mut output);
        }

        let _span = PhaseSpan::enter(ConvPhase::FromCanonical, observer);
        if order.is_canonical() {
            Ok(output)
        } else {
            output.permute(&order.perm_feature_map_from_canonical())
        }
    }

    pub fn count_params(&self) -> Result<usize> {
        crate::module::count_params(self)
    }
}

fn kdims_in_order(canonical: &Tensor, order: AxisOrder) -> Vec<usize> {
    let d = canonical.shape().dims();
    if order.is_canonical() {
        d.to_vec()
    } else {
        vec![d[3], d[2], d[0], d[1]]
    }
}

impl Module for Conv2d {
    fn visit_params(&self, v: &mut ParamVisitor<'_>) -> Result<()> {
        if let Some(kernel) = self.weights.kernel() {
            v.param("kernel", kernel)?;
        }
        if let Some(bias) = self.weights.bias() {
            v.param("bias", bias)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Conv2d {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conv2d")
            .field("config", &self.config)
            .field("backend", &self.backend.backend_name())
            .field("weights", &self.weights.state())
            .field("geometry", &self.geometry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendKind, BackendResult, GemmDims, MatrixRef};
    use crate::observer::RecordingObserver;
    use crate::ops::{Activation, BorderMode};
    use crate::tensor::Shape;

    /// Straight triple loop; the real reference backend lives in its own crate.
    struct LoopBackend;

    impl MatMulBackend for LoopBackend {
        fn backend_name(&self) -> &str {
            "loop"
        }

        fn kind(&self) -> BackendKind {
            BackendKind::Reference
        }

        fn gemm(
            &self,
            lhs: MatrixRef<'_>,
            rhs: MatrixRef<'_>,
            bias: Option<&[f32]>,
            out: &mut [f32],
        ) -> BackendResult<()> {
            let dims = GemmDims::validate(&lhs, &rhs, bias, out)?;
            for i in 0..dims.m {
                for j in 0..dims.n {
                    let mut acc = bias.map_or(0.0, |b| b[j]);
                    for p in 0..dims.k {
                        acc += lhs.data[i * dims.k + p] * rhs.data[p * dims.n + j];
                    }
                    out[i * dims.n + j] = acc;
                }
            }
            Ok(())
        }
    }

    fn layer(config: Conv2dConfig) -> Conv2d {
        Conv2d::new(config, Arc::new(LoopBackend)).unwrap()
    }

    fn ramp(dims: &[usize]) -> Tensor {
        let shape = Shape::from(dims);
        let data = (0..shape.num_elements()).map(|v| v as f32).collect();
        Tensor::from_vec(shape, data).unwrap()
    }

    #[test]
    fn call_without_weights_fails() {
        let mut conv = layer(Conv2dConfig::new(1, [3, 3]));
        let err = conv.call(&ramp(&[5, 5, 1])).unwrap_err();
        assert_eq!(err.downcast_ref::<ConvError>(), Some(&ConvError::WeightsUnset));
    }

    #[test]
    fn weight_matrix_rebuilds_only_after_assignment() {
        let mut conv = layer(Conv2dConfig::new(1, [3, 3]).with_bias(false));
        assert_eq!(conv.weight_state(), WeightState::Unset);

        conv.set_weights(vec![Tensor::ones(Shape::new([3, 3, 1, 1]))])
            .unwrap();
        assert_eq!(conv.weight_state(), WeightState::Stale);

        let first = conv.call(&ramp(&[5, 5, 1])).unwrap();
        assert_eq!(conv.weight_state(), WeightState::Ready);
        assert_eq!(first.shape().dims(), &[3, 3, 1]);
        assert_eq!(first.data()[0], 54.0);

        let again = conv.call(&ramp(&[5, 5, 1])).unwrap();
        assert_eq!(conv.weight_state(), WeightState::Ready);
        assert_eq!(first, again);

        let mut doubled = Tensor::ones(Shape::new([3, 3, 1, 1]));
        doubled.fill(2.0);
        conv.set_weights(vec![doubled]).unwrap();
        assert_eq!(conv.weight_state(), WeightState::Stale);
        let second = conv.call(&ramp(&[5, 5, 1])).unwrap();
        assert_eq!(second.data()[0], 108.0);
    }

    #[test]
    fn weight_count_follows_use_bias() {
        let mut conv = layer(Conv2dConfig::new(2, [1, 1]));
        let err = conv
            .set_weights(vec![Tensor::ones(Shape::new([1, 1, 1, 2]))])
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<ConvError>(),
            Some(&ConvError::WeightCount {
                expected: 2,
                found: 1
            })
        );

        let err = conv
            .set_weights(vec![
                Tensor::ones(Shape::new([1, 1, 1, 2])),
                Tensor::ones(Shape::new([3])),
            ])
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConvError>(),
            Some(ConvError::WeightShape { what: "bias", .. })
        ));
        assert_eq!(conv.weight_state(), WeightState::Unset);
    }

    #[test]
    fn kernel_with_wrong_window_is_rejected() {
        let mut conv = layer(Conv2dConfig::new(1, [3, 3]).with_bias(false));
        let err = conv
            .set_weights(vec![Tensor::ones(Shape::new([2, 3, 1, 1]))])
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConvError>(),
            Some(ConvError::WeightShape { what: "kernel", .. })
        ));
    }

    #[test]
    fn zero_channel_kernel_is_rejected() {
        let mut conv = layer(Conv2dConfig::new(1, [3, 3]).with_bias(false));
        let err = conv
            .set_weights(vec![Tensor::zeros(Shape::new([3, 3, 0, 1]))])
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConvError>(),
            Some(ConvError::WeightShape { what: "kernel", .. })
        ));
        assert_eq!(conv.weight_state(), WeightState::Unset);

        let params = conv.config().params();
        let input = Tensor::zeros(Shape::new([5, 5, 0]));
        let kernel = Tensor::zeros(Shape::new([3, 3, 0, 1]));
        assert!(crate::ops::conv2d(&LoopBackend, &input, &kernel, None, params).is_err());
    }

    #[test]
    fn channel_mismatch_is_fatal() {
        let mut conv = layer(Conv2dConfig::new(1, [3, 3]).with_bias(false));
        conv.set_weights(vec![Tensor::ones(Shape::new([3, 3, 2, 1]))])
            .unwrap();
        let err = conv.call(&ramp(&[5, 5, 3])).unwrap_err();
        assert_eq!(
            err.downcast_ref::<ConvError>(),
            Some(&ConvError::ChannelMismatch {
                expected: 2,
                found: 3
            })
        );
    }

    #[test]
    fn bias_and_activation_apply_after_matmul() {
        let config = Conv2dConfig::new(2, [1, 1]).with_activation(Activation::Relu);
        let mut conv = layer(config);
        let kernel = Tensor::from_vec(Shape::new([1, 1, 1, 2]), vec![1.0, -1.0]).unwrap();
        let bias = Tensor::from_vec(Shape::new([2]), vec![0.5, 0.5]).unwrap();
        conv.set_weights(vec![kernel, bias]).unwrap();

        let input = Tensor::from_vec(Shape::new([1, 2, 1]), vec![1.0, 2.0]).unwrap();
        let out = conv.call(&input).unwrap();
        assert_eq!(out.shape().dims(), &[1, 2, 2]);
        assert_eq!(out.data(), &[1.5, 0.0, 2.5, 0.0]);
    }

    #[test]
    fn channels_first_layer_reads_and_writes_its_own_order() {
        let config = Conv2dConfig::new(1, [3, 3])
            .with_bias(false)
            .with_padding(BorderMode::Same)
            .with_data_format(AxisOrder::ChannelsFirst);
        let mut conv = layer(config);
        conv.set_weights(vec![Tensor::ones(Shape::new([1, 1, 3, 3]))])
            .unwrap();
        let out = conv.call(&ramp(&[1, 5, 5])).unwrap();
        assert_eq!(out.shape().dims(), &[1, 5, 5]);
        // top-left window sees 0, 1, 5, 6
        assert_eq!(out.data()[0], 12.0);
        // centre window
        assert_eq!(out.data()[12], 108.0);
        assert_eq!(conv.kernel().unwrap().shape().dims(), &[3, 3, 1, 1]);
    }

    #[test]
    fn weights_come_back_in_assignment_order() {
        let config = Conv2dConfig::new(3, [2, 1]).with_data_format(AxisOrder::ChannelsFirst);
        let mut conv = layer(config);
        assert!(conv.weights().unwrap().is_empty());
        let kernel = ramp(&[3, 2, 2, 1]);
        let bias = ramp(&[3]);
        conv.set_weights(vec![kernel.clone(), bias.clone()]).unwrap();
        assert_eq!(conv.kernel().unwrap().shape().dims(), &[2, 1, 2, 3]);
        assert_eq!(conv.weights().unwrap(), vec![kernel, bias]);
    }

    #[test]
    fn output_shape_matches_call() {
        let config = Conv2dConfig::new(4, [3, 2])
            .with_strides([2, 1])
            .with_bias(false)
            .with_padding(BorderMode::Same);
        let mut conv = layer(config);
        conv.set_weights(vec![Tensor::zeros(Shape::new([3, 2, 2, 4]))])
            .unwrap();
        let expected = conv.compute_output_shape(&[7, 6, 2]).unwrap();
        assert_eq!(expected, vec![4, 6, 4]);
        let out = conv.call(&Tensor::zeros(Shape::new([7, 6, 2]))).unwrap();
        assert_eq!(out.shape().dims(), expected.as_slice());
    }

    #[test]
    fn geometry_follows_input_extent() {
        let mut conv = layer(Conv2dConfig::new(1, [2, 2]).with_bias(false));
        conv.set_weights(vec![Tensor::ones(Shape::new([2, 2, 1, 1]))])
            .unwrap();
        assert_eq!(conv.call(&ramp(&[3, 3, 1])).unwrap().shape().dims(), &[2, 2, 1]);
        assert_eq!(conv.call(&ramp(&[4, 5, 1])).unwrap().shape().dims(), &[3, 4, 1]);
        assert_eq!(conv.call(&ramp(&[3, 3, 1])).unwrap().shape().dims(), &[2, 2, 1]);
    }

    #[test]
    fn observer_sees_every_phase_in_order() {
        let observer = Arc::new(RecordingObserver::new());
        let mut conv = layer(Conv2dConfig::new(1, [3, 3]).with_bias(false))
            .with_observer(observer.clone());
        conv.set_weights(vec![Tensor::ones(Shape::new([3, 3, 1, 1]))])
            .unwrap();
        conv.call(&ramp(&[5, 5, 1])).unwrap();
        assert_eq!(observer.phases(), ConvPhase::ALL.to_vec());
    }

    #[test]
    fn params_are_visited_by_name() {
        let mut conv = layer(Conv2dConfig::new(3, [2, 2]));
        assert_eq!(conv.count_params().unwrap(), 0);
        conv.set_weights(vec![
            Tensor::zeros(Shape::new([2, 2, 4, 3])),
            Tensor::zeros(Shape::new([3])),
        ])
        .unwrap();
        assert_eq!(conv.count_params().unwrap(), 2 * 2 * 4 * 3 + 3);
        let shapes = crate::module::param_shapes(&conv).unwrap();
        assert_eq!(shapes[0], ("kernel".to_string(), vec![2, 2, 4, 3]));
        assert_eq!(shapes[1], ("bias".to_string(), vec![3]));
    }
}
