//! Host execution of the forward kernels.
//!
//! Every kernel validates shapes first, then partitions its output across the
//! rayon pool so that each task writes a disjoint slice: rows for `linear`,
//! `(n, out_channel)` planes for the convolutions, channels for batch norm and
//! contiguous chunks for the elementwise activations. Inputs and weights are
//! only ever read.

mod activation;
mod batch_norm;
mod conv2d;
mod conv_transpose2d;
mod linear;
mod reshape;

pub use activation::{leaky_relu, tanh};
pub use batch_norm::batch_norm2d;
pub use conv2d::conv2d;
pub use conv_transpose2d::conv_transpose2d;
pub use linear::linear;
pub use reshape::{flatten, reshape};

pub(crate) const BACKEND: &str = "host";

/// Elements per rayon task for the elementwise kernels.
const ELEMENTWISE_CHUNK: usize = 4096;
