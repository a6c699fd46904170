use crate::error::{KernelError, Result};

use half::f16;
use half::slice::HalfFloatSliceExt;
use std::fmt;

/// Highest rank a kernel tensor may have (`N, C, H, W`).
pub const MAX_RANK: usize = 4;

/// Validated tensor dimensions with a cached element count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorShape {
    dims: Vec<usize>,
    elements: usize,
}

impl TensorShape {
    /// Create a shape from 1 to [`MAX_RANK`] non-zero extents.
    pub fn new<D>(dims: D) -> Result<Self>
    where
        D: Into<Vec<usize>>,
    {
        let dims = dims.into();
        if dims.is_empty() || dims.len() > MAX_RANK {
            return Err(KernelError::Tensor(format!(
                "rank must be between 1 and {MAX_RANK} (got {})",
                dims.len()
            )));
        }
        let mut elements = 1usize;
        for (idx, &dim) in dims.iter().enumerate() {
            if dim == 0 {
                return Err(KernelError::Tensor(format!(
                    "dimension {idx} must be greater than zero"
                )));
            }
            elements = elements.checked_mul(dim).ok_or_else(|| {
                KernelError::Tensor(format!("shape overflows usize at dimension {idx}"))
            })?;
        }
        Ok(Self { dims, elements })
    }

    /// Total number of elements described by this shape.
    pub fn elements(&self) -> usize {
        self.elements
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }
}

impl fmt::Display for TensorShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.dims)
    }
}

/// Named host tensor: a fixed shape and a row-major `f16` buffer of exactly
/// `shape.elements()` values.
///
/// Kernels never resize a tensor; they fill or mutate the existing buffer.
#[derive(Clone)]
pub struct Tensor {
    name: String,
    shape: TensorShape,
    data: Vec<f16>,
}

impl Tensor {
    /// Zero-filled tensor.
    pub fn zeros<D>(name: impl Into<String>, dims: D) -> Result<Self>
    where
        D: Into<Vec<usize>>,
    {
        let shape = TensorShape::new(dims)?;
        let data = vec![f16::ZERO; shape.elements()];
        Ok(Self {
            name: name.into(),
            shape,
            data,
        })
    }

    /// Wrap an existing buffer; its length must match the shape.
    pub fn from_vec<D>(name: impl Into<String>, dims: D, data: Vec<f16>) -> Result<Self>
    where
        D: Into<Vec<usize>>,
    {
        let shape = TensorShape::new(dims)?;
        let name = name.into();
        if data.len() != shape.elements() {
            return Err(KernelError::Tensor(format!(
                "{name}: shape {shape} needs {} values, got {}",
                shape.elements(),
                data.len()
            )));
        }
        Ok(Self { name, shape, data })
    }

    /// Round `f32` values to the nearest `f16`.
    pub fn from_f32<D>(name: impl Into<String>, dims: D, values: &[f32]) -> Result<Self>
    where
        D: Into<Vec<usize>>,
    {
        let mut data = vec![f16::ZERO; values.len()];
        data.convert_from_f32_slice(values);
        Self::from_vec(name, dims, data)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> &TensorShape {
        &self.shape
    }

    pub fn dims(&self) -> &[usize] {
        self.shape.dims()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[f16] {
        &self.data
    }

    /// Mutable access to the buffer. The slice cannot change length, so the
    /// shape invariant holds.
    pub fn data_mut(&mut self) -> &mut [f16] {
        &mut self.data
    }

    /// Widen every element to `f32`.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        self.data.to_f32_vec()
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("name", &self.name)
            .field("dims", &self.shape.dims())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_counts_elements() {
        let shape = TensorShape::new([1usize, 64, 8, 8]).expect("shape");
        assert_eq!(shape.elements(), 4096);
        assert_eq!(shape.rank(), 4);
        assert_eq!(shape.to_string(), "[1, 64, 8, 8]");
    }

    #[test]
    fn shape_rejects_bad_dims() {
        assert!(TensorShape::new(Vec::<usize>::new()).is_err());
        assert!(TensorShape::new([1usize, 2, 3, 4, 5]).is_err());
        assert!(TensorShape::new([3usize, 0]).is_err());
        assert!(TensorShape::new([usize::MAX, 2]).is_err());
    }

    #[test]
    fn from_vec_checks_length() {
        let err = Tensor::from_vec("w", [2usize, 3], vec![f16::ONE; 5]).expect_err("short buffer");
        assert!(err.to_string().contains("needs 6 values, got 5"), "{err}");
    }

    #[test]
    fn f32_conversion_rounds_to_half() {
        let tensor = Tensor::from_f32("x", [3usize], &[0.5, -2.0, 0.1]).expect("tensor");
        assert_eq!(tensor.data()[0], f16::from_f32(0.5));
        assert_eq!(tensor.data()[1], f16::from_f32(-2.0));
        assert_eq!(tensor.to_f32_vec()[2], f16::from_f32(0.1).to_f32());
        assert_eq!(tensor.len(), 3);
        assert!(!tensor.is_empty());
    }

    #[test]
    fn zeros_are_zero() {
        let tensor = Tensor::zeros("out", [1usize, 2, 2, 2]).expect("tensor");
        assert!(tensor.data().iter().all(|v| *v == f16::ZERO));
        assert_eq!(tensor.name(), "out");
    }
}
