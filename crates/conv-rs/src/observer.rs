//! Per-layer phase hooks.
//!
//! A [`PhaseObserver`] attached to a layer is told when each pipeline phase starts and how long
//! it took. Observers are keyed to the layer instance they are attached to, never to a layer
//! name, and cannot change the computation.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::trace;

use crate::profiling::{self, ScopeGuard};

/// Pipeline phases of one convolution call, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConvPhase {
    ToCanonical,
    Geometry,
    WeightMatrix,
    Pad,
    Im2Col,
    MatMul,
    Assemble,
    Activation,
    FromCanonical,
}

impl ConvPhase {
    pub const ALL: [ConvPhase; 9] = [
        ConvPhase::ToCanonical,
        ConvPhase::Geometry,
        ConvPhase::WeightMatrix,
        ConvPhase::Pad,
        ConvPhase::Im2Col,
        ConvPhase::MatMul,
        ConvPhase::Assemble,
        ConvPhase::Activation,
        ConvPhase::FromCanonical,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            ConvPhase::ToCanonical => "conv2d.to_canonical",
            ConvPhase::Geometry => "conv2d.geometry",
            ConvPhase::Pad => "conv2d.pad",
            ConvPhase::Im2Col => "conv2d.im2col",
            ConvPhase::WeightMatrix => "conv2d.weight_matrix",
            ConvPhase::MatMul => "conv2d.matmul",
            ConvPhase::Assemble => "conv2d.assemble",
            ConvPhase::Activation => "conv2d.activation",
            ConvPhase::FromCanonical => "conv2d.from_canonical",
        }
    }
}

impl fmt::Display for ConvPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait PhaseObserver: Send + Sync {
    fn phase_started(&self, phase: ConvPhase) {
        let _ = phase;
    }

    fn phase_finished(&self, phase: ConvPhase, elapsed: Duration);
}

/// Observer that keeps every `(phase, elapsed)` pair it sees.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<(ConvPhase, Duration)>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phases(&self) -> Vec<ConvPhase> {
        self.events
            .lock()
            .expect("observer mutex poisoned")
            .iter()
            .map(|(phase, _)| *phase)
            .collect()
    }

    pub fn take_events(&self) -> Vec<(ConvPhase, Duration)> {
        std::mem::take(&mut *self.events.lock().expect("observer mutex poisoned"))
    }
}

impl PhaseObserver for RecordingObserver {
    fn phase_finished(&self, phase: ConvPhase, elapsed: Duration) {
        self.events
            .lock()
            .expect("observer mutex poisoned")
            .push((phase, elapsed));
    }
}

/// Guard spanning one phase: opens a functional profiling scope and notifies the observer.
pub(crate) struct PhaseSpan<'a> {
    phase: ConvPhase,
    observer: Option<&'a Arc<dyn PhaseObserver>>,
    start: Instant,
    _scope: ScopeGuard,
}

impl<'a> PhaseSpan<'a> {
    pub(crate) fn enter(phase: ConvPhase, observer: Option<&'a Arc<dyn PhaseObserver>>) -> Self {
        if let Some(observer) = observer {
            observer.phase_started(phase);
        }
        Self {
            phase,
            observer,
            start: Instant::now(),
            _scope: profiling::functional_scope(phase.as_str(), "host"),
        }
    }
}

impl Drop for PhaseSpan<'_> {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        trace!("{} took {:?}", self.phase, elapsed);
        if let Some(observer) = self.observer {
            observer.phase_finished(self.phase, elapsed);
        }
    }
}
