use std::sync::{Arc, Mutex};

use conv_rs::backend::spec::{BackendKind, BackendResult, GemmDims, MatMulBackend, MatrixRef};

/// Test-only backend that forwards to an inner backend and records every GEMM shape.
pub struct RecordingBackend {
    inner: Arc<dyn MatMulBackend>,
    calls: Mutex<Vec<GemmDims>>,
}

impl RecordingBackend {
    pub fn new(inner: Arc<dyn MatMulBackend>) -> Self {
        Self {
            inner,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn recorded_calls(&self) -> Vec<GemmDims> {
        self.calls.lock().expect("backend mutex poisoned").clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("backend mutex poisoned").len()
    }
}

impl MatMulBackend for RecordingBackend {
    fn backend_name(&self) -> &str {
        "recording"
    }

    fn kind(&self) -> BackendKind {
        self.inner.kind()
    }

    fn gemm(
        &self,
        lhs: MatrixRef<'_>,
        rhs: MatrixRef<'_>,
        bias: Option<&[f32]>,
        out: &mut [f32],
    ) -> BackendResult<()> {
        let dims = GemmDims::validate(&lhs, &rhs, bias, out)?;
        self.calls.lock().expect("backend mutex poisoned").push(dims);
        self.inner.gemm(lhs, rhs, bias, out)
    }
}
