//! Host-backed `f32` tensor used for feature maps, kernels, and intermediate matrices.

use anyhow::{bail, ensure, Result};

use super::shape::Shape;

/// Dense row-major `f32` tensor. The last axis is the fastest-varying one.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Shape,
    data: Vec<f32>,
}

impl Tensor {
    /// Constructs a tensor from raw values, validating the length against the shape.
    pub fn from_vec(shape: Shape, data: Vec<f32>) -> Result<Self> {
        if data.len() != shape.num_elements() {
            bail!(
                "tensor data length ({}) does not match shape {:?}",
                data.len(),
                shape.dims()
            );
        }
        Ok(Tensor { shape, data })
    }

    /// Returns a zero-initialized tensor of the requested shape.
    pub fn zeros(shape: Shape) -> Self {
        let len = shape.num_elements();
        Tensor {
            shape,
            data: vec![0.0; len],
        }
    }

    /// Returns a one-initialized tensor of the requested shape.
    pub fn ones(shape: Shape) -> Self {
        let len = shape.num_elements();
        Tensor {
            shape,
            data: vec![1.0; len],
        }
    }

    /// Returns the total number of elements stored in the tensor.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Reports whether the tensor contains zero elements.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Consumes the tensor and returns its flat buffer.
    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    /// Applies a unary function in place over every scalar element.
    pub fn map_inplace<F>(&mut self, mut f: F)
    where
        F: FnMut(f32) -> f32,
    {
        for v in self.data.iter_mut() {
            *v = f(*v);
        }
    }

    /// Fills the tensor with a constant value.
    pub fn fill(&mut self, value: f32) {
        self.data.fill(value);
    }

    /// Reinterprets the buffer under a new shape with the same element count.
    pub fn reshape(self, shape: Shape) -> Result<Self> {
        ensure!(
            shape.num_elements() == self.data.len(),
            "cannot reshape {:?} into {:?}",
            self.shape.dims(),
            shape.dims()
        );
        Ok(Tensor {
            shape,
            data: self.data,
        })
    }

    /// Returns a contiguous copy whose axis `i` is axis `perm[i]` of `self`.
    pub fn permute(&self, perm: &[usize]) -> Result<Self> {
        let rank = self.shape.rank();
        ensure!(
            perm.len() == rank,
            "permutation {:?} does not match tensor rank {}",
            perm,
            rank
        );
        let mut seen = vec![false; rank];
        for &axis in perm {
            ensure!(
                axis < rank && !seen[axis],
                "invalid permutation {:?} for rank {}",
                perm,
                rank
            );
            seen[axis] = true;
        }

        let src_dims = self.shape.dims();
        let src_strides = self.shape.strides();
        let out_dims: Vec<usize> = perm.iter().map(|&axis| src_dims[axis]).collect();
        // Stride into the source buffer for each output axis.
        let gather: Vec<usize> = perm.iter().map(|&axis| src_strides[axis]).collect();

        let mut out = Vec::with_capacity(self.data.len());
        let mut index = vec![0usize; rank];
        let mut src_offset = 0usize;
        for _ in 0..self.data.len() {
            out.push(self.data[src_offset]);
            for axis in (0..rank).rev() {
                index[axis] += 1;
                src_offset += gather[axis];
                if index[axis] < out_dims[axis] {
                    break;
                }
                src_offset -= gather[axis] * out_dims[axis];
                index[axis] = 0;
            }
        }

        Ok(Tensor {
            shape: Shape::new(out_dims),
            data: out,
        })
    }
}
