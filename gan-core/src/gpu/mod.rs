//! Accelerator execution of the forward kernels on `wgpu`.
//!
//! Tensors stay `f16` on the host and are widened to `f32` on upload; every
//! shader accumulates in `f32` and results are narrowed on download. Device
//! memory lives only for the duration of one call (see [`dispatch`]).

mod activation;
mod batch_norm;
mod conv2d;
mod conv_transpose2d;
mod copy;
pub mod dispatch;
mod linear;
mod ops;
mod utils;

pub use activation::Activation;
pub use dispatch::LaunchGeometry;
pub use ops::GpuKernels;

use crate::tensor::Tensor;

/// Read-only arguments of a weighted kernel.
#[derive(Clone, Copy)]
pub(crate) struct Operands<'a> {
    pub input: &'a Tensor,
    pub weight: &'a Tensor,
    pub bias: &'a Tensor,
}

#[cfg(test)]
mod tests;
