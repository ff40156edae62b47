use anyhow::{ensure, Result};

use crate::tensor::Tensor;

pub type VisitParamsFn<'a> = dyn FnMut(&str, &Tensor) -> Result<()> + 'a;

#[derive(Default)]
struct ParamPath {
    segments: Vec<String>,
}

impl ParamPath {
    fn push(&mut self, segment: &str) -> Result<()> {
        ensure!(
            !segment.is_empty(),
            "parameter path segments must be non-empty"
        );
        ensure!(
            !segment.contains('.'),
            "parameter path segments must not contain '.', got '{segment}'"
        );
        self.segments.push(segment.to_string());
        Ok(())
    }

    fn pop(&mut self) {
        let _ = self.segments.pop();
    }
}

/// Walks named parameters, prefixing each leaf with the enclosing scopes (`block.conv.kernel`).
pub struct ParamVisitor<'a> {
    path: ParamPath,
    scratch: String,
    f: &'a mut VisitParamsFn<'a>,
}

impl<'a> ParamVisitor<'a> {
    pub fn new(f: &'a mut VisitParamsFn<'a>) -> Self {
        Self {
            path: ParamPath::default(),
            scratch: String::new(),
            f,
        }
    }

    pub fn scoped(
        &mut self,
        segment: &str,
        inner: impl FnOnce(&mut Self) -> Result<()>,
    ) -> Result<()> {
        self.path.push(segment)?;
        let out = inner(self);
        self.path.pop();
        out
    }

    pub fn param(&mut self, leaf: &str, tensor: &Tensor) -> Result<()> {
        ensure!(!leaf.is_empty(), "parameter leaf names must be non-empty");
        ensure!(
            !leaf.contains('.'),
            "parameter leaf names must not contain '.', got '{leaf}'"
        );
        self.scratch.clear();
        for segment in &self.path.segments {
            self.scratch.push_str(segment);
            self.scratch.push('.');
        }
        self.scratch.push_str(leaf);
        (self.f)(&self.scratch, tensor)
    }
}

pub trait Module {
    fn visit_params(&self, v: &mut ParamVisitor<'_>) -> Result<()>;
}

/// Total scalar count over every parameter the module exposes.
pub fn count_params(module: &dyn Module) -> Result<usize> {
    let mut total = 0usize;
    let mut add = |_: &str, tensor: &Tensor| -> Result<()> {
        total += tensor.len();
        Ok(())
    };
    module.visit_params(&mut ParamVisitor::new(&mut add))?;
    Ok(total)
}

/// Collects `(path, dims)` for every parameter, in visit order.
pub fn param_shapes(module: &dyn Module) -> Result<Vec<(String, Vec<usize>)>> {
    let mut out = Vec::new();
    let mut collect = |name: &str, tensor: &Tensor| -> Result<()> {
        out.push((name.to_string(), tensor.shape().dims().to_vec()));
        Ok(())
    };
    module.visit_params(&mut ParamVisitor::new(&mut collect))?;
    Ok(out)
}
