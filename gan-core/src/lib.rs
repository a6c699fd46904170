//! Forward-pass kernels for a small image generator network.
//!
//! Every operator exists twice: a host implementation in [`cpu`] built on
//! rayon, and an accelerator implementation in [`gpu`] running WGSL compute
//! shaders through `wgpu`. Both take `f16` [`Tensor`]s, validate shapes before
//! touching data and write into caller-provided outputs.

/// Host kernels.
pub mod cpu;
/// Kernel error type and the fatal-on-error helper.
pub mod error;
/// Shape validation and output extent formulas.
pub mod geometry;
/// Accelerator kernels.
pub mod gpu;
/// Per-call kernel parameters.
pub mod params;
/// Accumulation policy for host reductions.
pub mod precision;
/// Half-precision tensor container.
pub mod tensor;

pub use error::{FatalExt, KernelError, Result};
pub use geometry::{conv_transpose2d_output_dim, conv2d_output_dim};
pub use gpu::{Activation, GpuKernels};
pub use params::{
    BATCH_NORM_EPSILON, BatchNorm2dParams, Conv2dParams, ConvTranspose2dParams, KernelParams,
    LEAKY_RELU_SLOPE, LeakyReluParams, LinearParams,
};
pub use precision::Accumulation;
pub use tensor::{MAX_RANK, Tensor, TensorShape};

/// Returns the crate version for diagnostics.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
